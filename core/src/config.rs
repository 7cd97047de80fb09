//! Client configuration.
//!
//! Built once and moved into `FhirClient::new`; the client only reads it
//! afterwards, so one client can serve concurrent callers.

use std::fmt;
use std::sync::Arc;

/// Default response size ceiling: 10 MiB.
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

pub const MAX_RESPONSE_SIZE_ENV: &str = "FHIR_CLIENT_MAX_RESPONSE_SIZE";
pub const SEARCH_METHOD_ENV: &str = "FHIR_CLIENT_SEARCH_METHOD";

/// Observer for non-2xx responses, called with the status and the (capped)
/// body. Its only purpose is diagnostics; it cannot change the outcome.
pub type Non2xxHandler = Arc<dyn Fn(u16, &[u8]) + Send + Sync>;

/// How search parameters are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMethod {
    /// `POST {base}/{type}/_search` with a form-encoded body.
    #[default]
    Post,
    /// `GET {base}/{type}?{params}`.
    Get,
}

#[derive(Clone)]
pub struct ClientConfig {
    /// Maximum number of response body bytes accepted. Zero means the default.
    pub max_response_size: usize,
    pub non_2xx_handler: Option<Non2xxHandler>,
    pub search_method: SearchMethod,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
            non_2xx_handler: None,
            search_method: SearchMethod::default(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("max_response_size", &self.max_response_size)
            .field("non_2xx_handler", &self.non_2xx_handler.is_some())
            .field("search_method", &self.search_method)
            .finish()
    }
}

impl ClientConfig {
    /// Defaults overridden by `FHIR_CLIENT_MAX_RESPONSE_SIZE` and
    /// `FHIR_CLIENT_SEARCH_METHOD`. Unset or unparsable values are ignored.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(size) = lookup(MAX_RESPONSE_SIZE_ENV) {
            match size.trim().parse::<usize>() {
                Ok(size) => self.max_response_size = size,
                Err(_) => tracing::warn!(value = %size, "ignoring invalid {MAX_RESPONSE_SIZE_ENV}"),
            }
        }
        if let Some(method) = lookup(SEARCH_METHOD_ENV) {
            match method.trim().to_ascii_lowercase().as_str() {
                "get" => self.search_method = SearchMethod::Get,
                "post" => self.search_method = SearchMethod::Post,
                _ => tracing::warn!(value = %method, "ignoring invalid {SEARCH_METHOD_ENV}"),
            }
        }
        self.normalized()
    }

    pub fn with_max_response_size(mut self, bytes: usize) -> Self {
        self.max_response_size = bytes;
        self
    }

    pub fn with_non_2xx_handler(
        mut self,
        handler: impl Fn(u16, &[u8]) + Send + Sync + 'static,
    ) -> Self {
        self.non_2xx_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_search_method(mut self, method: SearchMethod) -> Self {
        self.search_method = method;
        self
    }

    /// Replace an unset (zero) size ceiling with the default.
    pub(crate) fn normalized(mut self) -> Self {
        if self.max_response_size == 0 {
            self.max_response_size = DEFAULT_MAX_RESPONSE_SIZE;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.max_response_size, 10 * 1024 * 1024);
        assert_eq!(config.search_method, SearchMethod::Post);
        assert!(config.non_2xx_handler.is_none());
    }

    #[test]
    fn zero_size_reverts_to_default() {
        let config = ClientConfig::default().with_max_response_size(0).normalized();
        assert_eq!(config.max_response_size, DEFAULT_MAX_RESPONSE_SIZE);
    }

    #[test]
    fn env_overrides_are_applied() {
        let config = ClientConfig::default().with_overrides(lookup(&[
            (MAX_RESPONSE_SIZE_ENV, "2048"),
            (SEARCH_METHOD_ENV, "GET"),
        ]));
        assert_eq!(config.max_response_size, 2048);
        assert_eq!(config.search_method, SearchMethod::Get);
    }

    #[test]
    fn invalid_env_values_keep_defaults() {
        let config = ClientConfig::default().with_overrides(lookup(&[
            (MAX_RESPONSE_SIZE_ENV, "ten megs"),
            (SEARCH_METHOD_ENV, "PATCH"),
        ]));
        assert_eq!(config.max_response_size, DEFAULT_MAX_RESPONSE_SIZE);
        assert_eq!(config.search_method, SearchMethod::Post);
    }

    #[test]
    fn debug_hides_handler() {
        let config = ClientConfig::default().with_non_2xx_handler(|_, _| {});
        let rendered = format!("{config:?}");
        assert!(rendered.contains("non_2xx_handler: true"));
    }
}
