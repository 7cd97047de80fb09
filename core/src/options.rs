//! Request options.
//!
//! # Design
//! An option hooks into exactly one phase of an exchange, and the phase is
//! part of its type:
//! - `PreRequest` edits the outgoing `HttpRequest` before it is sent.
//! - `PostRequest` observes the response status and headers before the body
//!   is read, and may fail the call.
//! - `PostParse` runs after the body was decoded into the caller's target.
//!
//! Within a phase options run in the order the caller passed them. Options
//! that capture results borrow the caller's storage for the duration of the
//! call.

use std::cell::OnceCell;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::client::{FhirClient, Target};
use crate::error::FhirError;
use crate::http::{Headers, HttpMethod, HttpRequest, HttpResponse};

/// A modifier applied to one call.
pub enum RequestOption<'a> {
    PreRequest(PreRequest),
    PostRequest(PostRequest<'a>),
    PostParse(PostParse<'a>),
}

/// Edits to the outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub enum PreRequest {
    /// Append a query parameter; the query is re-encoded sorted by key.
    QueryParam { key: String, value: String },
    /// Send the request to this absolute URL.
    AtUrl(Url),
    /// Send the request to this path below the client's base URL.
    AtPath(String),
    /// Add each header value unless that exact value is already present.
    AddHeaders(Vec<(String, String)>),
    /// Set a header only when it has no value yet.
    DefaultHeader { name: String, value: String },
}

pub type ResponseCheck<'a> = Box<dyn FnMut(u16, &Headers) -> Result<(), FhirError> + 'a>;

/// Observers of the raw response.
pub enum PostRequest<'a> {
    ResponseHeaders(&'a mut ResponseHeaders),
    StatusCode(&'a mut u16),
    Check(ResponseCheck<'a>),
}

pub type ReferenceSink<'a> = Box<dyn FnMut(&FhirClient, &str) -> Result<(), FhirError> + 'a>;
pub type ResultInspector<'a> = Box<dyn FnMut(&ResponseBody<'_>) -> Result<(), FhirError> + 'a>;

/// Hooks over the body the caller's target was filled from.
pub enum PostParse<'a> {
    /// Resolve the reference(s) held in `field` through `sink`.
    ResolveRef { field: String, sink: ReferenceSink<'a> },
    Inspect(ResultInspector<'a>),
}

impl<'a> RequestOption<'a> {
    pub fn query_param(key: impl Into<String>, value: impl Into<String>) -> Self {
        RequestOption::PreRequest(PreRequest::QueryParam {
            key: key.into(),
            value: value.into(),
        })
    }

    pub fn at_url(url: Url) -> Self {
        RequestOption::PreRequest(PreRequest::AtUrl(url))
    }

    pub fn at_path(path: impl Into<String>) -> Self {
        RequestOption::PreRequest(PreRequest::AtPath(path.into()))
    }

    pub fn request_headers<K, V>(headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        RequestOption::PreRequest(PreRequest::AddHeaders(
            headers
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        ))
    }

    pub fn default_header(name: impl Into<String>, value: impl Into<String>) -> Self {
        RequestOption::PreRequest(PreRequest::DefaultHeader {
            name: name.into(),
            value: value.into(),
        })
    }

    /// Capture the response headers into `headers`.
    pub fn response_headers(headers: &'a mut ResponseHeaders) -> Self {
        RequestOption::PostRequest(PostRequest::ResponseHeaders(headers))
    }

    /// Capture the response status into `status`.
    pub fn response_status(status: &'a mut u16) -> Self {
        RequestOption::PostRequest(PostRequest::StatusCode(status))
    }

    /// Fail the call when `check` rejects the response status or headers.
    pub fn check_response(
        check: impl FnMut(u16, &Headers) -> Result<(), FhirError> + 'a,
    ) -> Self {
        RequestOption::PostRequest(PostRequest::Check(Box::new(check)))
    }

    /// Read the resource(s) referenced by `field` of the result into `target`.
    ///
    /// The field may hold one Reference or an array of them. With
    /// `Target::DecodeMany` every resolved resource is appended; with
    /// `Target::Decode` the last one read is kept.
    pub fn resolve_ref<T>(field: impl Into<String>, mut target: Target<'a, T>) -> Self
    where
        T: DeserializeOwned + 'a,
    {
        let sink = move |client: &FhirClient, reference: &str| {
            client.read(reference, target.reborrow(), [])
        };
        RequestOption::PostParse(PostParse::ResolveRef {
            field: field.into(),
            sink: Box::new(sink),
        })
    }

    /// Run `inspect` against the response body. The body is only parsed as
    /// JSON if `inspect` asks for it, so raw reads of non-JSON bodies work.
    pub fn inspect(
        inspect: impl FnMut(&ResponseBody<'_>) -> Result<(), FhirError> + 'a,
    ) -> Self {
        RequestOption::PostParse(PostParse::Inspect(Box::new(inspect)))
    }
}

impl fmt::Debug for RequestOption<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestOption::PreRequest(pre) => f.debug_tuple("PreRequest").field(pre).finish(),
            RequestOption::PostRequest(_) => f.write_str("PostRequest(..)"),
            RequestOption::PostParse(_) => f.write_str("PostParse(..)"),
        }
    }
}

impl PreRequest {
    pub(crate) fn apply(&self, client: &FhirClient, request: &mut HttpRequest) {
        match self {
            PreRequest::QueryParam { key, value } => {
                let mut pairs: Vec<(String, String)> =
                    request.url.query_pairs().into_owned().collect();
                pairs.push((key.clone(), value.clone()));
                set_sorted_query(&mut request.url, pairs);
            }
            PreRequest::AtUrl(url) => request.url = url.clone(),
            PreRequest::AtPath(path) => request.url = client.path(&[path]),
            PreRequest::AddHeaders(headers) => {
                for (name, value) in headers {
                    request.headers.add_if_not_present(name, value);
                }
            }
            PreRequest::DefaultHeader { name, value } => {
                request.headers.set_if_not_present(name, value);
            }
        }
    }
}

impl PostRequest<'_> {
    pub(crate) fn apply(&mut self, response: &HttpResponse) -> Result<(), FhirError> {
        match self {
            PostRequest::ResponseHeaders(target) => {
                **target = ResponseHeaders::from_headers(&response.headers);
                Ok(())
            }
            PostRequest::StatusCode(target) => {
                **target = response.status;
                Ok(())
            }
            PostRequest::Check(check) => check(response.status, &response.headers),
        }
    }
}

impl PostParse<'_> {
    pub(crate) fn apply(
        &mut self,
        client: &FhirClient,
        body: &ResponseBody<'_>,
    ) -> Result<(), FhirError> {
        match self {
            PostParse::ResolveRef { field, sink } => match body.json()?.get(field.as_str()) {
                Some(Value::Array(items)) => {
                    for reference in items.iter().filter_map(reference_of) {
                        sink(client, reference)?;
                    }
                    Ok(())
                }
                Some(item) => match reference_of(item) {
                    Some(reference) => sink(client, reference),
                    None => Ok(()),
                },
                None => Ok(()),
            },
            PostParse::Inspect(inspect) => inspect(body),
        }
    }
}

/// A successful response body as seen by post-parse options.
///
/// The JSON view is parsed on first use and shared by every option of the
/// call.
pub struct ResponseBody<'b> {
    method: HttpMethod,
    url: &'b str,
    status: u16,
    bytes: &'b [u8],
    json: OnceCell<Value>,
}

impl<'b> ResponseBody<'b> {
    pub(crate) fn new(method: HttpMethod, url: &'b str, status: u16, bytes: &'b [u8]) -> Self {
        Self {
            method,
            url,
            status,
            bytes,
            json: OnceCell::new(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes
    }

    /// The body parsed as JSON. A body that is not JSON fails with
    /// `FhirError::Decode`.
    pub fn json(&self) -> Result<&Value, FhirError> {
        if let Some(value) = self.json.get() {
            return Ok(value);
        }
        let value = serde_json::from_slice(self.bytes).map_err(|source| FhirError::Decode {
            method: self.method,
            url: self.url.to_string(),
            status: self.status,
            source,
        })?;
        Ok(self.json.get_or_init(|| value))
    }
}

impl fmt::Debug for ResponseBody<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("status", &self.status)
            .field("len", &self.bytes.len())
            .finish()
    }
}

fn reference_of(value: &Value) -> Option<&str> {
    value.get("reference").and_then(Value::as_str)
}

/// Encode `pairs` as the query of `url`, sorted by key. Values of a repeated
/// key keep their relative order.
pub(crate) fn set_sorted_query(url: &mut Url, mut pairs: Vec<(String, String)>) {
    if pairs.is_empty() {
        url.set_query(None);
        return;
    }
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    url.set_query(Some(&encode_form(&pairs)));
}

/// `application/x-www-form-urlencoded` encoding of `pairs`, sorted by key.
pub(crate) fn encode_form<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, V)]) -> String {
    let mut sorted: Vec<(&str, &str)> = pairs
        .iter()
        .map(|(key, value)| (key.as_ref(), value.as_ref()))
        .collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(sorted)
        .finish()
}

/// Response headers as received, with the commonly used ones extracted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseHeaders {
    pub headers: Headers,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub date: Option<DateTime<Utc>>,
}

impl ResponseHeaders {
    pub fn from_headers(headers: &Headers) -> Self {
        let last_modified = headers
            .get("Last-Modified")
            .or_else(|| headers.get("LastModified"));
        Self {
            headers: headers.clone(),
            etag: headers.get("ETag").map(str::to_string),
            content_type: headers.get("Content-Type").map(str::to_string),
            last_modified: last_modified.and_then(parse_http_date),
            date: headers.get("Date").and_then(parse_http_date),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }
}

/// Parse an HTTP date (`Sun, 06 Nov 1994 08:49:37 GMT`). Unparsable input
/// yields `None`.
fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|date| date.with_timezone(&Utc))
}
