//! Boundary to an external text-embedding model.

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("embedding backend error: {0}")]
    Backend(String),
    #[error("embedding has dimension {actual}, model declares {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// An embedding model: text in, fixed-length vector out.
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    /// Length of every vector this model returns.
    fn dimension(&self) -> usize;

    fn embed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>, EmbedError>> + Send + 'a>>;
}

/// A vector for one segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentEmbedding {
    pub segment_id: Uuid,
    pub model: String,
    pub vector: Vec<f32>,
}

/// Embed `text` and check the result against the declared dimension.
pub async fn embed_checked(
    embedder: &dyn Embedder,
    segment_id: Uuid,
    text: &str,
) -> Result<SegmentEmbedding, EmbedError> {
    let vector = embedder.embed(text).await?;
    if vector.len() != embedder.dimension() {
        return Err(EmbedError::DimensionMismatch {
            expected: embedder.dimension(),
            actual: vector.len(),
        });
    }
    Ok(SegmentEmbedding {
        segment_id,
        model: embedder.model_name().to_string(),
        vector,
    })
}
