//! Synchronous client for FHIR REST servers.
//!
//! # Overview
//! Reads, creates, updates, deletes and searches resources over HTTP with
//! JSON payloads, and walks paginated search results. The transport is a
//! seam (`HttpTransport`); a `ureq` implementation ships behind the default
//! `ureq` feature.
//!
//! # Design
//! - `FhirClient` is stateless: a base URL, a transport, a read-only config.
//! - Per-call behaviour is tuned with `RequestOption`s, each bound to one
//!   phase of the exchange (before send, after send, after decode).
//! - Error responses are classified: an OperationOutcome body becomes
//!   `FhirError::OperationOutcome`, anything else non-2xx becomes
//!   `FhirError::Status`.
//! - Response bodies are read through a size cap; an oversized 2xx body is
//!   an error, never silently truncated.
//! - Resources are opaque JSON to the client apart from their
//!   `resourceType`, Bundle links and Reference fields.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod options;
pub mod outcome;
pub mod pagination;
pub mod resource;
#[cfg(feature = "ureq")]
pub mod transport;
pub mod types;

pub use client::{FhirClient, Target};
pub use config::{ClientConfig, SearchMethod, DEFAULT_MAX_RESPONSE_SIZE};
pub use error::{FhirError, Result, TransportError};
pub use http::{
    Headers, HttpMethod, HttpRequest, HttpResponse, HttpTransport, FHIR_JSON, FORM_URLENCODED,
};
pub use options::{RequestOption, ResponseBody, ResponseHeaders};
pub use outcome::{
    check_operation_outcome, IssueSeverity, OperationOutcome, OperationOutcomeError, OutcomeIssue,
};
pub use pagination::{paginate, paginate_with, PaginateOptions};
pub use resource::{describe, RawResource, ResourceDescription, ResourcePayload};
#[cfg(feature = "ureq")]
pub use transport::UreqTransport;
pub use types::{Bundle, BundleEntry, BundleLink, Reference};
