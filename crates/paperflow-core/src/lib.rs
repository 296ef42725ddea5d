use std::path::PathBuf;
use std::time::Duration;

pub mod backend;
pub mod client;
pub mod config_file;
pub mod embed;
pub mod error;
pub mod knowledge;
pub mod models;
pub mod rate_limit;
pub mod retry;
pub mod source;

// Re-export for convenience
pub use backend::{BackendError, PdfBackend};
pub use client::{ClientOptions, RateLimitedClient};
pub use embed::{EmbedError, Embedder, SegmentEmbedding};
pub use error::{ModelError, PipelineError, RelationError, SourceError, Stage};
pub use knowledge::StructuralDeriver;
pub use models::{
    Entity, EntityType, Metadata, PaperMetadata, Relation, RelationType, SearchQuery, Segment,
    SegmentType, SourceInfo, ValidatedQuery,
};
pub use rate_limit::MinDelayLimiter;
pub use retry::{RetryPolicy, with_retry};
pub use source::{Arxiv, MockFailure, MockSource, Page, PaperSource};

pub const DEFAULT_USER_AGENT: &str = concat!("paperflow/", env!("CARGO_PKG_VERSION"));

/// Runtime configuration for a collection run.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub user_agent: String,
    /// Minimum spacing between outbound requests.
    pub request_delay: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    /// Papers processed concurrently.
    pub num_workers: usize,
    /// Concurrent CPU-bound extraction/segmentation jobs.
    pub cpu_workers: usize,
    /// Fewer segments than this triggers the paragraph fallback.
    pub min_segments: usize,
    /// Fallback paragraphs shorter than this are dropped.
    pub min_paragraph_chars: usize,
    /// Where PDFs and metadata summaries are written; `None` keeps everything in memory.
    pub output_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: source::arxiv::DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_delay: Duration::from_secs(3),
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            num_workers: 4,
            cpu_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2),
            min_segments: 3,
            min_paragraph_chars: 50,
            output_dir: None,
        }
    }
}
