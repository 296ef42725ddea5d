//! Rate-limited, retrying front end over a [`PaperSource`].

use std::sync::Arc;
use std::time::Duration;

use crate::Config;
use crate::error::SourceError;
use crate::models::{PaperMetadata, SearchQuery, SourceInfo};
use crate::rate_limit::MinDelayLimiter;
use crate::retry::{RetryPolicy, with_retry};
use crate::source::{Arxiv, Page, PaperSource, SourceFuture};

/// Spacing, timeout and retry settings for a [`RateLimitedClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub request_delay: Duration,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_secs(3),
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            user_agent: crate::DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl From<&Config> for ClientOptions {
    fn from(config: &Config) -> Self {
        Self {
            request_delay: config.request_delay,
            request_timeout: config.request_timeout,
            retry: config.retry.clone(),
            user_agent: config.user_agent.clone(),
        }
    }
}

/// The only path to the network.
///
/// Every attempt, including retries, first waits on the client's own
/// [`MinDelayLimiter`]; each instance owns its spacing state.
pub struct RateLimitedClient {
    source: Arc<dyn PaperSource>,
    http: reqwest::Client,
    limiter: MinDelayLimiter,
    retry: RetryPolicy,
    timeout: Duration,
}

impl RateLimitedClient {
    pub fn new(source: Arc<dyn PaperSource>, options: ClientOptions) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(options.user_agent.as_str())
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            source,
            http,
            limiter: MinDelayLimiter::new(options.request_delay),
            retry: options.retry,
            timeout: options.request_timeout,
        }
    }

    /// A client for the arXiv export API described by `config`.
    pub fn arxiv(config: &Config) -> Self {
        Self::new(
            Arc::new(Arxiv::new(config.base_url.clone())),
            ClientOptions::from(config),
        )
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn source_info(&self) -> SourceInfo {
        SourceInfo {
            name: self.source.name().to_string(),
            base_url: self.source.base_url().to_string(),
            request_delay: self.limiter.base_delay(),
            max_results_per_query: self.source.max_results_per_query(),
            categories: self
                .source
                .categories()
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }

    /// Search the source, newest submission first, at most `max_results` papers.
    ///
    /// The query is validated before any request is made. Results larger than
    /// the source's per-request limit are fetched page by page, each page
    /// spaced and retried like any other request; a short page ends the walk.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<PaperMetadata>, SourceError> {
        let validated = query.validate()?;
        tracing::info!(
            source = self.source.name(),
            terms = %validated.terms,
            category = validated.category.as_deref().unwrap_or(""),
            max_results = validated.max_results,
            "searching"
        );

        let page_size = self.source.max_results_per_query().max(1);
        let mut papers: Vec<PaperMetadata> = Vec::new();
        while papers.len() < validated.max_results {
            let page = Page {
                start: papers.len(),
                size: page_size.min(validated.max_results - papers.len()),
            };
            let batch = self
                .execute("search", || {
                    self.source.search(&validated, page, &self.http, self.timeout)
                })
                .await?;
            tracing::debug!(start = page.start, returned = batch.len(), "search page");
            let exhausted = batch.len() < page.size;
            papers.extend(batch);
            if exhausted {
                break;
            }
        }

        papers.sort_by(|a, b| b.published.cmp(&a.published));
        papers.truncate(validated.max_results);
        tracing::info!(found = papers.len(), "search complete");
        Ok(papers)
    }

    /// Fetch one paper. Version suffixes are ignored; a missing record is
    /// [`SourceError::NotFound`].
    pub async fn fetch_by_id(&self, id: &str) -> Result<PaperMetadata, SourceError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(SourceError::permanent("paper id is empty"));
        }
        self.execute("fetch_by_id", || {
            self.source.fetch_by_id(id, &self.http, self.timeout)
        })
        .await
    }

    pub async fn fetch_pdf(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        if url.trim().is_empty() {
            return Err(SourceError::permanent("PDF url is empty"));
        }
        self.execute("fetch_pdf", || {
            self.source.fetch_pdf(url, &self.http, self.timeout)
        })
        .await
    }

    async fn execute<'f, T, F>(&'f self, operation: &str, call: F) -> Result<T, SourceError>
    where
        F: Fn() -> SourceFuture<'f, T>,
    {
        with_retry(&self.retry, operation, |attempt| {
            let pending = call();
            async move {
                self.limiter.acquire().await;
                tracing::debug!(operation, attempt, "sending request");
                let result = pending.await;
                if let Err(SourceError::Transient {
                    status: Some(429), ..
                }) = &result
                {
                    self.limiter.on_rate_limited();
                }
                result
            }
        })
        .await
    }
}
