//! Error types for the FHIR client.
//!
//! # Design
//! One enum covers every failure the client can surface. Variants raised
//! during an exchange carry the method and URL (and the status once one is
//! known) so a message alone is enough to diagnose the call. Nothing here is
//! retried; every variant is terminal for the call that produced it.

use thiserror::Error;

use crate::http::HttpMethod;
use crate::outcome::OperationOutcomeError;

/// Failure reported by an `HttpTransport`.
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T, E = FhirError> = std::result::Result<T, E>;

/// Errors returned by `FhirClient` operations and the pagination driver.
#[derive(Debug, Error)]
pub enum FhirError {
    /// The transport could not complete the exchange.
    #[error("FHIR request failed ({method} {url}): {source}")]
    Transport {
        method: HttpMethod,
        url: String,
        source: TransportError,
    },

    /// Reading the response body stream failed.
    #[error("FHIR response read failed ({method} {url}): {source}")]
    BodyRead {
        method: HttpMethod,
        url: String,
        source: std::io::Error,
    },

    /// A 2xx response body was larger than the configured ceiling.
    #[error(
        "FHIR response exceeds max. safety limit of {limit} bytes ({method} {url}, status={status})"
    )]
    ResponseTooLarge {
        limit: usize,
        method: HttpMethod,
        url: String,
        status: u16,
    },

    /// The server answered with an OperationOutcome that counts as an error.
    #[error(transparent)]
    OperationOutcome(#[from] OperationOutcomeError),

    /// Non-2xx status without a recognizable OperationOutcome body.
    #[error("FHIR request failed ({method} {url}, status={status})")]
    Status {
        method: HttpMethod,
        url: String,
        status: u16,
    },

    /// The response body could not be decoded into the caller's target.
    #[error("FHIR response unmarshal failed ({method} {url}, status={status}): {source}")]
    Decode {
        method: HttpMethod,
        url: String,
        status: u16,
        source: serde_json::Error,
    },

    /// The resource has no (or an empty) `resourceType`.
    #[error("resourceType not present in resource of type {type_name}")]
    NoResourceType { type_name: String },

    /// The resource could not be serialized, or its bytes are not JSON.
    #[error("invalid resource of type {type_name}: {source}")]
    InvalidResource {
        type_name: String,
        source: serde_json::Error,
    },

    #[error("invalid FHIR base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    /// A "next" link in a search set is not a valid absolute URL.
    #[error("paginate: invalid 'next' link for search set: {0}")]
    InvalidNextLink(#[source] url::ParseError),

    /// Fetching the next search page failed.
    #[error("paginate: query next page failed (url={url}): {source}")]
    NextPage { url: String, source: Box<FhirError> },

    /// The pagination loop guard tripped.
    #[error("paginate: max. search iterations reached ({0}), possible bug")]
    MaxIterations(usize),

    /// Raised by a caller-supplied option hook.
    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl FhirError {
    /// Wrap an arbitrary error raised inside an option hook.
    pub fn other(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        FhirError::Other(error.into())
    }

    /// HTTP status attached to the error, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            FhirError::ResponseTooLarge { status, .. }
            | FhirError::Status { status, .. }
            | FhirError::Decode { status, .. } => Some(*status),
            FhirError::OperationOutcome(outcome) => Some(outcome.http_status),
            FhirError::NextPage { source, .. } => source.status(),
            _ => None,
        }
    }
}
