//! HTTP transport types and the transport seam.
//!
//! # Design
//! Requests and responses are plain data. The client builds an
//! `HttpRequest`, hands it to an `HttpTransport`, and consumes the returned
//! `HttpResponse`. Anything that can "send a request, get a response" can sit
//! behind the trait: the bundled `ureq` transport, a recording stub in tests,
//! or a caller's own stack.
//!
//! The response body stays a stream so the client can cap how much it reads.
//! Dropping the `HttpResponse` releases the underlying connection.

use std::fmt;
use std::io::{Cursor, Read};
use std::sync::Arc;

use url::Url;

use crate::error::TransportError;

/// Media type used for both `Accept` and `Content-Type` on resource exchanges.
pub const FHIR_JSON: &str = "application/fhir+json";

/// Media type of search parameters sent in a POST body.
pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered header multimap with case-insensitive names.
///
/// Values for one name keep their insertion order. Names keep the spelling
/// they were first added with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping any existing values for `name`.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// All values for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Append `value` unless that exact value is already present for `name`.
    pub fn add_if_not_present(&mut self, name: &str, value: &str) {
        if !self.get_all(name).any(|existing| existing == value) {
            self.add(name, value);
        }
    }

    /// Write `value` only when `name` has no value at all.
    pub fn set_if_not_present(&mut self, name: &str, value: &str) {
        if !self.contains(name) {
            self.add(name, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

/// An outgoing HTTP request described as plain data.
///
/// Built fresh per call and only mutated by pre-request options before it is
/// handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Headers::new(),
            body: None,
        }
    }

    /// Body as UTF-8 text, if there is a body and it is valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        self.body
            .as_deref()
            .and_then(|body| std::str::from_utf8(body).ok())
    }
}

/// An HTTP response with a streaming body.
pub struct HttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Box<dyn Read>,
}

impl HttpResponse {
    pub fn new(status: u16, headers: Headers, body: impl Read + 'static) -> Self {
        Self {
            status,
            headers,
            body: Box::new(body),
        }
    }

    /// Response whose body is already fully in memory.
    pub fn from_bytes(status: u16, headers: Headers, body: impl Into<Vec<u8>>) -> Self {
        Self::new(status, headers, Cursor::new(body.into()))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Sends one fully-formed request and returns the response.
///
/// Any `Err` is a transport-level failure: the client wraps it with the
/// method and URL and never retries. Non-2xx statuses are not errors at this
/// layer; they come back as ordinary responses.
pub trait HttpTransport: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request)
    }
}

impl<T: HttpTransport + ?Sized> HttpTransport for Box<T> {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_ignores_case() {
        let mut headers = Headers::new();
        headers.add("Content-Type", FHIR_JSON);
        assert_eq!(headers.get("content-type"), Some(FHIR_JSON));
        assert!(headers.contains("CONTENT-TYPE"));
        assert!(!headers.contains("Accept"));
    }

    #[test]
    fn looked_up_value_outlives_the_name() {
        let headers: Headers = [("ETag", "W/\"1\""), ("etag", "W/\"2\"")].into_iter().collect();
        let etag = {
            let name = String::from("etag");
            headers.get(&name)
        };
        assert_eq!(etag, Some("W/\"1\""));
    }

    #[test]
    fn add_if_not_present_adds_value() {
        let mut headers = Headers::new();
        headers.add_if_not_present("X-Custom", "value");
        assert_eq!(headers.get("X-Custom"), Some("value"));
    }

    #[test]
    fn add_if_not_present_skips_duplicate_value() {
        let mut headers = Headers::new();
        headers.add("X-Custom", "value");
        headers.add_if_not_present("x-custom", "value");
        assert_eq!(headers.get_all("X-Custom").collect::<Vec<_>>(), vec!["value"]);
    }

    #[test]
    fn add_if_not_present_keeps_distinct_values_in_order() {
        let mut headers = Headers::new();
        headers.add_if_not_present("X-Custom", "value1");
        headers.add_if_not_present("X-Custom", "value2");
        assert_eq!(
            headers.get_all("X-Custom").collect::<Vec<_>>(),
            vec!["value1", "value2"]
        );
    }

    #[test]
    fn set_if_not_present_sets_missing_value() {
        let mut headers = Headers::new();
        headers.set_if_not_present("X-Custom", "value");
        assert_eq!(headers.get("X-Custom"), Some("value"));
    }

    #[test]
    fn set_if_not_present_never_overwrites() {
        let mut headers = Headers::new();
        headers.add("X-Custom", "existing");
        headers.set_if_not_present("X-Custom", "new");
        assert_eq!(headers.get_all("X-Custom").collect::<Vec<_>>(), vec!["existing"]);
    }

    #[test]
    fn response_success_range() {
        assert!(HttpResponse::from_bytes(200, Headers::new(), Vec::new()).is_success());
        assert!(HttpResponse::from_bytes(299, Headers::new(), Vec::new()).is_success());
        assert!(!HttpResponse::from_bytes(300, Headers::new(), Vec::new()).is_success());
        assert!(!HttpResponse::from_bytes(199, Headers::new(), Vec::new()).is_success());
    }

    #[test]
    fn body_str_reads_utf8_body() {
        let mut request = HttpRequest::new(
            HttpMethod::Post,
            Url::parse("http://example.com/fhir").unwrap(),
        );
        assert_eq!(request.body_str(), None);
        request.body = Some(b"key=value".to_vec());
        assert_eq!(request.body_str(), Some("key=value"));
    }
}
