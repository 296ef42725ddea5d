//! Source backend trait and implementations for bibliographic APIs.

pub mod arxiv;
pub mod mock;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::SourceError;
use crate::models::{PaperMetadata, ValidatedQuery};

pub use arxiv::Arxiv;
pub use mock::{MockFailure, MockSource};

/// Boxed future returned by every [`PaperSource`] call.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

/// One window of a paged search: results `start..start + size` in the
/// source's newest-first order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub start: usize,
    pub size: usize,
}

/// A bibliographic source that can be searched and fetched from.
///
/// One call is one outbound request. Rate limiting and retries are layered on
/// top by [`RateLimitedClient`](crate::client::RateLimitedClient).
pub trait PaperSource: Send + Sync {
    /// The canonical name of this source (e.g. "arXiv").
    fn name(&self) -> &str;

    /// Endpoint the source queries.
    fn base_url(&self) -> &str;

    /// Largest page the source returns for a single request.
    fn max_results_per_query(&self) -> usize {
        2000
    }

    /// Well-known subject categories offered by the source.
    fn categories(&self) -> &[&'static str] {
        &[]
    }

    /// Fetch one page of a validated search, newest submission first.
    ///
    /// A page shorter than `page.size` means the results are exhausted.
    fn search<'a>(
        &'a self,
        query: &'a ValidatedQuery,
        page: Page,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> SourceFuture<'a, Vec<PaperMetadata>>;

    /// Look up one paper; a missing record is [`SourceError::NotFound`].
    fn fetch_by_id<'a>(
        &'a self,
        id: &'a str,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> SourceFuture<'a, PaperMetadata>;

    /// Retrieve raw PDF bytes. Metadata-only sources keep the default.
    fn fetch_pdf<'a>(
        &'a self,
        _url: &'a str,
        _client: &'a reqwest::Client,
        _timeout: Duration,
    ) -> SourceFuture<'a, Vec<u8>> {
        Box::pin(async { Err(SourceError::Unimplemented("PDF download")) })
    }
}
