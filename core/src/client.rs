//! FHIR REST client and request executor.
//!
//! # Design
//! `FhirClient` holds a base URL, a transport and a read-only config; it
//! carries no state between calls. Every operation builds a fresh
//! `HttpRequest`, seeds one location option ahead of the caller's options,
//! and hands everything to `execute`, which runs one exchange:
//!
//! 1. add `Accept`, run pre-request options
//! 2. send through the transport
//! 3. run post-request options
//! 4. read at most `max_response_size + 1` body bytes
//! 5. classify the status and any OperationOutcome
//! 6. decode into the caller's `Target`
//! 7. run post-parse options
//!
//! Every failure is terminal for the call; nothing is retried.

use std::io::Read;

use serde::de::{DeserializeOwned, IgnoredAny};
use url::Url;

use crate::config::{ClientConfig, SearchMethod};
use crate::error::{FhirError, Result};
use crate::http::{HttpMethod, HttpRequest, HttpTransport, FHIR_JSON, FORM_URLENCODED};
use crate::options::{encode_form, set_sorted_query, RequestOption, ResponseBody};
use crate::outcome::check_operation_outcome;
use crate::resource::{describe, ResourcePayload};

/// Largest part of an error body included in the non-2xx log line.
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Where a response body goes.
pub enum Target<'a, T> {
    /// Decode the body as JSON into `T`.
    Decode(&'a mut T),
    /// Decode the body as JSON into a `T` and append it.
    DecodeMany(&'a mut Vec<T>),
    /// Copy the body bytes verbatim.
    Raw(&'a mut Vec<u8>),
}

impl<'a, T> Target<'a, T> {
    pub fn decode(target: &'a mut T) -> Self {
        Target::Decode(target)
    }

    pub fn many(target: &'a mut Vec<T>) -> Self {
        Target::DecodeMany(target)
    }

    /// Shorter-lived target writing to the same place.
    pub fn reborrow(&mut self) -> Target<'_, T> {
        match self {
            Target::Decode(target) => Target::Decode(&mut **target),
            Target::DecodeMany(target) => Target::DecodeMany(&mut **target),
            Target::Raw(target) => Target::Raw(&mut **target),
        }
    }
}

impl<'a> Target<'a, IgnoredAny> {
    pub fn raw(target: &'a mut Vec<u8>) -> Self {
        Target::Raw(target)
    }
}

impl<T: DeserializeOwned> Target<'_, T> {
    fn fill(&mut self, body: Vec<u8>) -> std::result::Result<(), serde_json::Error> {
        match self {
            Target::Decode(target) => **target = serde_json::from_slice(&body)?,
            Target::DecodeMany(target) => target.push(serde_json::from_slice(&body)?),
            Target::Raw(target) => **target = body,
        }
        Ok(())
    }
}

/// Client for a FHIR REST server.
pub struct FhirClient {
    base_url: Url,
    transport: Box<dyn HttpTransport>,
    config: ClientConfig,
}

impl FhirClient {
    /// `base_url` must be absolute, e.g. `https://example.com/fhir`.
    pub fn new(
        base_url: &str,
        transport: impl HttpTransport + 'static,
        config: ClientConfig,
    ) -> Result<Self> {
        let parsed = Url::parse(base_url).map_err(|e| FhirError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if parsed.cannot_be_a_base() {
            return Err(FhirError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: "URL cannot be used as a base".to_string(),
            });
        }
        Ok(Self {
            base_url: parsed,
            transport: Box::new(transport),
            config: config.normalized(),
        })
    }

    /// Client over the bundled `ureq` transport with default configuration.
    #[cfg(feature = "ureq")]
    pub fn with_ureq(base_url: &str) -> Result<Self> {
        Self::new(
            base_url,
            crate::transport::UreqTransport::new(),
            ClientConfig::default(),
        )
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Base URL joined with `segments`. Each segment may contain `/`; empty
    /// pieces are dropped.
    pub fn path<S: AsRef<str>>(&self, segments: &[S]) -> Url {
        let mut url = self.base_url.clone();
        url.set_query(None);
        url.set_fragment(None);
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            for segment in segments {
                path.extend(segment.as_ref().split('/').filter(|piece| !piece.is_empty()));
            }
        }
        url
    }

    /// Read the resource at `path` (relative to the base, or absolute).
    pub fn read<'o, T: DeserializeOwned>(
        &self,
        path: &str,
        target: Target<'_, T>,
        options: impl IntoIterator<Item = RequestOption<'o>>,
    ) -> Result<()> {
        let mut request = HttpRequest::new(HttpMethod::Get, self.base_url.clone());
        request.headers.add("Cache-Control", "no-cache");
        self.execute(request, target, seeded(location(path), options))
    }

    /// Create `resource` at `{base}/{resourceType}`.
    ///
    /// Pass already-encoded JSON as `RawResource(bytes)`; plain byte buffers
    /// are serialized like any other value.
    pub fn create<'o, R, T>(
        &self,
        resource: &R,
        target: Target<'_, T>,
        options: impl IntoIterator<Item = RequestOption<'o>>,
    ) -> Result<()>
    where
        R: ResourcePayload + ?Sized,
        T: DeserializeOwned,
    {
        let description = describe(resource)?;
        let mut request = HttpRequest::new(HttpMethod::Post, self.base_url.clone());
        request.headers.add("Content-Type", FHIR_JSON);
        request.body = Some(description.data);
        self.execute(
            request,
            target,
            seeded(RequestOption::at_path(description.resource_type), options),
        )
    }

    /// Replace the resource at `path` with `resource`.
    pub fn update<'o, R, T>(
        &self,
        path: &str,
        resource: &R,
        target: Target<'_, T>,
        options: impl IntoIterator<Item = RequestOption<'o>>,
    ) -> Result<()>
    where
        R: ResourcePayload + ?Sized,
        T: DeserializeOwned,
    {
        let data = resource
            .to_json()
            .map_err(|source| FhirError::InvalidResource {
                type_name: resource.type_label().to_string(),
                source,
            })?
            .into_owned();
        let mut request = HttpRequest::new(HttpMethod::Put, self.base_url.clone());
        request.headers.add("Content-Type", FHIR_JSON);
        request.body = Some(data);
        self.execute(request, target, seeded(RequestOption::at_path(path), options))
    }

    /// Delete the resource at `path`. Any response body is discarded.
    pub fn delete<'o>(
        &self,
        path: &str,
        options: impl IntoIterator<Item = RequestOption<'o>>,
    ) -> Result<()> {
        let request = HttpRequest::new(HttpMethod::Delete, self.base_url.clone());
        let mut discarded = Vec::new();
        self.execute(
            request,
            Target::raw(&mut discarded),
            seeded(location(path), options),
        )
    }

    /// Search `resource_type` (or the whole server when `None`) with `params`.
    ///
    /// Sent as `POST {base}/{type}/_search` with a form body, or as
    /// `GET {base}/{type}?{params}`, depending on `ClientConfig::search_method`.
    pub fn search<'o, T: DeserializeOwned>(
        &self,
        resource_type: Option<&str>,
        params: &[(&str, &str)],
        target: Target<'_, T>,
        options: impl IntoIterator<Item = RequestOption<'o>>,
    ) -> Result<()> {
        let mut segments: Vec<&str> = resource_type.into_iter().filter(|t| !t.is_empty()).collect();
        let request = match self.config.search_method {
            SearchMethod::Post => {
                segments.push("_search");
                let mut request = HttpRequest::new(HttpMethod::Post, self.base_url.clone());
                request.headers.add("Content-Type", FORM_URLENCODED);
                request.body = Some(encode_form(params).into_bytes());
                request
            }
            SearchMethod::Get => HttpRequest::new(HttpMethod::Get, self.base_url.clone()),
        };
        let mut url = self.path(&segments);
        if request.method == HttpMethod::Get {
            let pairs = params
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect();
            set_sorted_query(&mut url, pairs);
        }
        self.execute(request, target, seeded(RequestOption::at_url(url), options))
    }

    fn execute<T: DeserializeOwned>(
        &self,
        mut request: HttpRequest,
        mut target: Target<'_, T>,
        mut options: Vec<RequestOption<'_>>,
    ) -> Result<()> {
        request.headers.add("Accept", FHIR_JSON);
        for option in &options {
            if let RequestOption::PreRequest(pre) = option {
                pre.apply(self, &mut request);
            }
        }

        let method = request.method;
        let url = request.url.to_string();
        tracing::debug!(%method, %url, "sending FHIR request");

        let response = self
            .transport
            .send(&request)
            .map_err(|source| FhirError::Transport {
                method,
                url: url.clone(),
                source,
            })?;
        for option in options.iter_mut() {
            if let RequestOption::PostRequest(post) = option {
                post.apply(&response)?;
            }
        }

        let status = response.status;
        let limit = self.config.max_response_size;
        let body = read_capped(response.body, limit).map_err(|source| FhirError::BodyRead {
            method,
            url: url.clone(),
            source,
        })?;

        if !(200..300).contains(&status) {
            if let Some(handler) = &self.config.non_2xx_handler {
                handler(status, &body);
            }
            tracing::warn!(
                %method,
                %url,
                status,
                body = %preview(&body),
                "FHIR server returned non-2xx status"
            );
            check_operation_outcome(&body, true, status)?;
            return Err(FhirError::Status {
                method,
                url,
                status,
            });
        }
        if body.len() > limit {
            return Err(FhirError::ResponseTooLarge {
                limit,
                method,
                url,
                status,
            });
        }
        check_operation_outcome(&body, false, status)?;

        let decode_error = |source| FhirError::Decode {
            method,
            url: url.clone(),
            status,
            source,
        };
        let has_post_parse = options
            .iter()
            .any(|option| matches!(option, RequestOption::PostParse(_)));
        let hook_body = has_post_parse.then(|| body.clone());
        target.fill(body).map_err(decode_error)?;

        if let Some(hook_body) = hook_body {
            let view = ResponseBody::new(method, &url, status, &hook_body);
            for option in options.iter_mut() {
                if let RequestOption::PostParse(hook) = option {
                    hook.apply(self, &view)?;
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for FhirClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FhirClient")
            .field("base_url", &self.base_url.as_str())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Location option for a caller-supplied path: absolute URLs are used as-is,
/// anything else is resolved against the base.
fn location<'o>(path: &str) -> RequestOption<'o> {
    match Url::parse(path) {
        Ok(url) => RequestOption::at_url(url),
        Err(_) => RequestOption::at_path(path),
    }
}

fn seeded<'o>(
    first: RequestOption<'o>,
    rest: impl IntoIterator<Item = RequestOption<'o>>,
) -> Vec<RequestOption<'o>> {
    std::iter::once(first).chain(rest).collect()
}

/// Read up to `limit + 1` bytes, so an oversized body is detectable without
/// reading it all.
fn read_capped(body: Box<dyn Read>, limit: usize) -> std::io::Result<Vec<u8>> {
    let mut data = Vec::new();
    body.take((limit as u64).saturating_add(1))
        .read_to_end(&mut data)?;
    Ok(data)
}

/// Truncated, printable-only rendering of a body for logs.
fn preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let mut shown: String = text
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(MAX_LOG_BODY_LENGTH)
        .collect();
    if body.len() > MAX_LOG_BODY_LENGTH {
        shown.push_str(&format!("... [truncated, {} bytes total]", body.len()));
    }
    shown
}
