//! Resource description: type tag and JSON payload of a resource value.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::error::FhirError;

/// Anything that can be sent to the server as a resource body.
///
/// Every `Serialize` type is serialized to JSON; `RawResource` passes its
/// bytes through untouched.
pub trait ResourcePayload {
    fn to_json(&self) -> Result<Cow<'_, [u8]>, serde_json::Error>;

    /// Name of the value's type, used in error messages.
    fn type_label(&self) -> &'static str;
}

impl<T: Serialize + ?Sized> ResourcePayload for T {
    fn to_json(&self) -> Result<Cow<'_, [u8]>, serde_json::Error> {
        serde_json::to_vec(self).map(Cow::Owned)
    }

    fn type_label(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Already-encoded resource JSON, sent verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawResource<'a>(pub &'a [u8]);

impl ResourcePayload for RawResource<'_> {
    fn to_json(&self) -> Result<Cow<'_, [u8]>, serde_json::Error> {
        Ok(Cow::Borrowed(self.0))
    }

    fn type_label(&self) -> &'static str {
        "raw bytes"
    }
}

/// Type tag and encoded payload of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescription {
    /// The resource type, e.g. "Patient".
    pub resource_type: String,
    /// JSON payload, ready to send without encoding again.
    pub data: Vec<u8>,
}

#[derive(Deserialize)]
struct TypeProbe {
    #[serde(rename = "resourceType", default)]
    resource_type: Option<String>,
}

/// Encode `resource` and read its `resourceType`.
///
/// Already-encoded JSON must be wrapped in `RawResource`. A bare `Vec<u8>`
/// or `&[u8]` is a `Serialize` value like any other and is encoded as a JSON
/// array of numbers, which fails with `FhirError::InvalidResource`.
pub fn describe<R: ResourcePayload + ?Sized>(
    resource: &R,
) -> Result<ResourceDescription, FhirError> {
    let invalid = |source| FhirError::InvalidResource {
        type_name: resource.type_label().to_string(),
        source,
    };
    let data = resource.to_json().map_err(invalid)?;
    let probe: TypeProbe = serde_json::from_slice(&data).map_err(invalid)?;
    match probe.resource_type {
        Some(resource_type) if !resource_type.is_empty() => Ok(ResourceDescription {
            resource_type,
            data: data.into_owned(),
        }),
        _ => Err(FhirError::NoResourceType {
            type_name: resource.type_label().to_string(),
        }),
    }
}
