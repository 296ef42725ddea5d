//! Error taxonomy shared by the client, the derivers and the pipeline.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while talking to a bibliographic source.
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    /// A fault expected to clear on retry (timeout, connection reset, 5xx, 429).
    #[error("transient source error: {message}")]
    Transient {
        message: String,
        status: Option<u16>,
        retry_after: Option<Duration>,
    },
    /// The request can never succeed as issued (bad query, other 4xx, unparseable response).
    #[error("source rejected request: {message}")]
    Permanent {
        message: String,
        status: Option<u16>,
    },
    /// The source has no record for the requested identifier.
    #[error("paper not found: {0}")]
    NotFound(String),
    /// Every attempt failed with a transient error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<SourceError>,
    },
    #[error("{0} is not supported by this source")]
    Unimplemented(&'static str),
}

impl SourceError {
    pub fn transient(message: impl Into<String>) -> Self {
        SourceError::Transient {
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        SourceError::Permanent {
            message: message.into(),
            status: None,
        }
    }

    /// Classify a non-success HTTP status.
    ///
    /// 408, 429 and every 5xx are transient; all other statuses are permanent.
    pub fn from_status(status: u16, retry_after: Option<Duration>) -> Self {
        let message = format!("HTTP {}", status);
        if status == 408 || status == 429 || (500..600).contains(&status) {
            SourceError::Transient {
                message,
                status: Some(status),
                retry_after,
            }
        } else {
            SourceError::Permanent {
                message,
                status: Some(status),
            }
        }
    }

    /// Classify a transport-level reqwest failure.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return SourceError::from_status(status.as_u16(), None);
        }
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            SourceError::transient(err.to_string())
        } else {
            SourceError::permanent(err.to_string())
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient { .. })
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            SourceError::NotFound(_) => true,
            SourceError::Exhausted { last, .. } => last.is_not_found(),
            _ => false,
        }
    }

    /// Server-suggested wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SourceError::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            SourceError::Transient { status, .. } | SourceError::Permanent { status, .. } => {
                *status
            }
            SourceError::Exhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

/// Violations of the data-model invariants.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("confidence must be within [0, 1], got {0}")]
    InvalidConfidence(f64),
    #[error("segment content is empty")]
    EmptyContent,
    #[error("relation source and target are the same entity ({0})")]
    SelfLoop(Uuid),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelationError {
    #[error("expected at most one paper entity, found {0}")]
    AmbiguousPaper(usize),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Processing stages of the per-paper chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Search,
    Download,
    Extraction,
    Segmentation,
    EntityExtraction,
    RelationExtraction,
    Embedding,
    Storage,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Search => "search",
            Stage::Download => "download",
            Stage::Extraction => "extraction",
            Stage::Segmentation => "segmentation",
            Stage::EntityExtraction => "entity_extraction",
            Stage::RelationExtraction => "relation_extraction",
            Stage::Embedding => "embedding",
            Stage::Storage => "storage",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the per-paper processing chain.
///
/// Every stage variant carries the paper id and a rendered cause.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("source request failed: {0}")]
    Source(#[from] SourceError),
    #[error("PDF download failed for {paper_id}: {reason}")]
    Download { paper_id: String, reason: String },
    #[error("text extraction failed for {paper_id}: {reason}")]
    Extraction { paper_id: String, reason: String },
    #[error("segmentation failed for {paper_id}: {reason}")]
    Segmentation { paper_id: String, reason: String },
    #[error("entity extraction failed for {paper_id}: {reason}")]
    EntityExtraction { paper_id: String, reason: String },
    #[error("relation extraction failed for {paper_id}: {reason}")]
    RelationExtraction { paper_id: String, reason: String },
    #[error("embedding failed for {paper_id}: {reason}")]
    Embedding { paper_id: String, reason: String },
    #[error("storing artifacts failed for {paper_id}: {reason}")]
    Storage { paper_id: String, reason: String },
    #[error("{0} is not implemented by this connector")]
    Unimplemented(&'static str),
}

impl PipelineError {
    /// Wrap a lower-level error with the paper id and the stage it failed in.
    pub fn at(stage: Stage, paper_id: &str, cause: impl std::fmt::Display) -> Self {
        let paper_id = paper_id.to_string();
        let reason = cause.to_string();
        match stage {
            Stage::Search => {
                PipelineError::Source(SourceError::permanent(format!("{paper_id}: {reason}")))
            }
            Stage::Download => PipelineError::Download { paper_id, reason },
            Stage::Extraction => PipelineError::Extraction { paper_id, reason },
            Stage::Segmentation => PipelineError::Segmentation { paper_id, reason },
            Stage::EntityExtraction => PipelineError::EntityExtraction { paper_id, reason },
            Stage::RelationExtraction => PipelineError::RelationExtraction { paper_id, reason },
            Stage::Embedding => PipelineError::Embedding { paper_id, reason },
            Stage::Storage => PipelineError::Storage { paper_id, reason },
        }
    }

    /// The stage this error belongs to; `None` for capabilities a connector lacks.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Source(_) => Some(Stage::Search),
            PipelineError::Download { .. } => Some(Stage::Download),
            PipelineError::Extraction { .. } => Some(Stage::Extraction),
            PipelineError::Segmentation { .. } => Some(Stage::Segmentation),
            PipelineError::EntityExtraction { .. } => Some(Stage::EntityExtraction),
            PipelineError::RelationExtraction { .. } => Some(Stage::RelationExtraction),
            PipelineError::Embedding { .. } => Some(Stage::Embedding),
            PipelineError::Storage { .. } => Some(Stage::Storage),
            PipelineError::Unimplemented(_) => None,
        }
    }
}
