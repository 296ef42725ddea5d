//! In-memory source for tests and offline runs.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use super::{Page, PaperSource, SourceFuture};
use crate::error::SourceError;
use crate::models::{PaperMetadata, ValidatedQuery, strip_version};

/// A scripted failure returned by [`MockSource`] instead of real data.
#[derive(Clone, Debug)]
pub enum MockFailure {
    /// Simulate a timeout or 5xx.
    Transient,
    /// Simulate a 429, optionally with a Retry-After.
    RateLimited { retry_after: Option<Duration> },
    /// Simulate a malformed request.
    Permanent(String),
}

impl MockFailure {
    fn into_error(self) -> SourceError {
        match self {
            MockFailure::Transient => SourceError::from_status(503, None),
            MockFailure::RateLimited { retry_after } => SourceError::from_status(429, retry_after),
            MockFailure::Permanent(msg) => SourceError::permanent(msg),
        }
    }
}

/// A hand-rolled [`PaperSource`] backed by a fixed paper list.
///
/// Supports:
/// - A list of papers answered by search and fetch-by-id. Search serves
///   them newest first, one page window per call.
/// - PDF bytes keyed by `pdf_url`.
/// - A failure script consumed one per call before any call succeeds,
///   or a permanent failure mode.
/// - Optional per-call latency.
/// - Call counting and call timestamps (on tokio's clock).
pub struct MockSource {
    papers: Vec<PaperMetadata>,
    pdfs: HashMap<String, Vec<u8>>,
    /// Popped from the back; each call consumes one entry while any remain.
    failures: Mutex<Vec<MockFailure>>,
    always_fail: Option<MockFailure>,
    delay: Option<Duration>,
    page_size: usize,
    pages: Mutex<Vec<Page>>,
    call_count: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
}

impl MockSource {
    pub fn new(papers: Vec<PaperMetadata>) -> Self {
        Self {
            papers,
            pdfs: HashMap::new(),
            failures: Mutex::new(Vec::new()),
            always_fail: None,
            delay: None,
            page_size: 2000,
            pages: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
        }
    }

    /// Serve `bytes` for GETs of `url`.
    pub fn with_pdf(mut self, url: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.pdfs.insert(url.into(), bytes);
        self
    }

    /// Fail the next calls in order, then behave normally.
    pub fn with_failures(self, mut failures: Vec<MockFailure>) -> Self {
        failures.reverse();
        if let Ok(mut f) = self.failures.lock() {
            *f = failures;
        }
        self
    }

    /// Fail every call with `failure`.
    pub fn always_failing(mut self, failure: MockFailure) -> Self {
        self.always_fail = Some(failure);
        self
    }

    /// Set simulated network latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Cap the page a single search call may return.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Page windows requested by search calls, in call order.
    pub fn pages(&self) -> Vec<Page> {
        self.pages.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// How many calls have reached the source.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// When each call reached the source.
    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    /// Record the call and return the scripted failure for it, if any.
    async fn begin_call(&self) -> Result<(), SourceError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut times) = self.call_times.lock() {
            times.push(Instant::now());
        }
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        if let Some(ref failure) = self.always_fail {
            return Err(failure.clone().into_error());
        }
        let scripted = self.failures.lock().ok().and_then(|mut f| f.pop());
        match scripted {
            Some(failure) => Err(failure.into_error()),
            None => Ok(()),
        }
    }

    fn matches(paper: &PaperMetadata, query: &ValidatedQuery) -> bool {
        if let Some(ref cat) = query.category
            && !paper.categories.iter().any(|c| c == cat)
        {
            return false;
        }
        if query.from.is_some_and(|from| paper.published < from)
            || query.to.is_some_and(|to| paper.published > to)
        {
            return false;
        }
        let haystack = format!("{} {}", paper.title, paper.abstract_text).to_lowercase();
        query
            .terms
            .split_whitespace()
            .all(|word| haystack.contains(&word.to_lowercase()))
    }
}

impl PaperSource for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    fn base_url(&self) -> &str {
        "mock://papers"
    }

    fn max_results_per_query(&self) -> usize {
        self.page_size
    }

    fn search<'a>(
        &'a self,
        query: &'a ValidatedQuery,
        page: Page,
        _client: &'a reqwest::Client,
        _timeout: Duration,
    ) -> SourceFuture<'a, Vec<PaperMetadata>> {
        Box::pin(async move {
            if let Ok(mut pages) = self.pages.lock() {
                pages.push(page);
            }
            self.begin_call().await?;
            let mut hits: Vec<&PaperMetadata> =
                self.papers.iter().filter(|p| Self::matches(p, query)).collect();
            hits.sort_by(|a, b| b.published.cmp(&a.published));
            Ok(hits
                .into_iter()
                .skip(page.start)
                .take(page.size.min(self.page_size))
                .cloned()
                .collect())
        })
    }

    fn fetch_by_id<'a>(
        &'a self,
        id: &'a str,
        _client: &'a reqwest::Client,
        _timeout: Duration,
    ) -> SourceFuture<'a, PaperMetadata> {
        Box::pin(async move {
            self.begin_call().await?;
            let wanted = strip_version(id.trim());
            self.papers
                .iter()
                .find(|p| p.base_id() == wanted)
                .cloned()
                .ok_or_else(|| SourceError::NotFound(wanted.to_string()))
        })
    }

    fn fetch_pdf<'a>(
        &'a self,
        url: &'a str,
        _client: &'a reqwest::Client,
        _timeout: Duration,
    ) -> SourceFuture<'a, Vec<u8>> {
        Box::pin(async move {
            self.begin_call().await?;
            self.pdfs
                .get(url)
                .cloned()
                .ok_or_else(|| SourceError::from_status(404, None))
        })
    }
}
