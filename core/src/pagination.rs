//! Walks the pages of a search result by following "next" links.
//!
//! Each page is handed to a consumer; the walk ends when the consumer
//! declines, a page has no "next" link, or the iteration guard trips. Pages
//! are fetched one at a time, only after the previous one was consumed.

use url::Url;

use crate::client::{FhirClient, Target};
use crate::error::FhirError;
use crate::options::RequestOption;
use crate::types::Bundle;

pub const DEFAULT_MAX_ITERATIONS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginateOptions {
    max_iterations: usize,
}

impl Default for PaginateOptions {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl PaginateOptions {
    /// Guard against servers that keep returning a "next" link. The walk
    /// fails on iteration `max - 1`, so at most `max - 1` pages are consumed.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }
}

/// `paginate_with` using the default options.
pub fn paginate<F, E>(client: &FhirClient, first_page: Bundle, consume: F) -> Result<(), E>
where
    F: FnMut(&Bundle) -> Result<bool, E>,
    E: From<FhirError>,
{
    paginate_with(client, first_page, PaginateOptions::default(), consume)
}

/// Feed `first_page` and every following page to `consume`.
///
/// `consume` returns `Ok(true)` to continue and `Ok(false)` to stop. Its
/// errors are returned unchanged; failures of the walk itself are converted
/// from `FhirError`.
pub fn paginate_with<F, E>(
    client: &FhirClient,
    first_page: Bundle,
    options: PaginateOptions,
    mut consume: F,
) -> Result<(), E>
where
    F: FnMut(&Bundle) -> Result<bool, E>,
    E: From<FhirError>,
{
    let max = options.max_iterations;
    let mut page = first_page;
    for iteration in 0..max {
        if iteration == max - 1 {
            return Err(FhirError::MaxIterations(max).into());
        }
        if !consume(&page)? {
            return Ok(());
        }
        let Some(next) = page.next_link() else {
            return Ok(());
        };
        let next_url = Url::parse(next).map_err(FhirError::InvalidNextLink)?;

        tracing::debug!(url = %next_url, iteration, "fetching next search page");
        let mut next_page = Bundle::default();
        client
            .search(
                None,
                &[],
                Target::decode(&mut next_page),
                [RequestOption::at_url(next_url.clone())],
            )
            .map_err(|source| FhirError::NextPage {
                url: next_url.to_string(),
                source: Box::new(source),
            })?;
        page = next_page;
    }
    Ok(())
}
