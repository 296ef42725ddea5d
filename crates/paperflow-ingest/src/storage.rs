//! On-disk artifacts of a collection run.
//!
//! Layout under the root directory:
//! - `raw/<id>.pdf`: the downloaded PDF
//! - `processed/<id>_metadata.json`: paper metadata plus a segment summary

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use paperflow_core::{PaperMetadata, Segment, SegmentType};

/// Characters of segment content kept in the metadata summary.
const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

/// One segment as recorded in the metadata summary.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentSummary {
    pub id: Uuid,
    pub segment_type: SegmentType,
    pub position: usize,
    pub chars: usize,
    pub preview: String,
}

impl From<&Segment> for SegmentSummary {
    fn from(segment: &Segment) -> Self {
        Self {
            id: segment.id,
            segment_type: segment.segment_type,
            position: segment.position,
            chars: segment.content.chars().count(),
            preview: segment.content.chars().take(PREVIEW_CHARS).collect(),
        }
    }
}

/// Contents of `<id>_metadata.json`.
#[derive(Debug, Clone, Serialize)]
pub struct MetadataSummary<'a> {
    #[serde(flatten)]
    pub paper: &'a PaperMetadata,
    pub text_length: usize,
    pub segments: Vec<SegmentSummary>,
    pub entities_count: usize,
    pub relations_count: usize,
    pub references_count: usize,
    pub collected_at: DateTime<Utc>,
}

/// Identifier usable as a file stem (old-style ids contain `/`).
pub fn file_stem(id: &str) -> String {
    id.chars()
        .map(|c| if c == '/' || c == '\\' || c == ':' { '_' } else { c })
        .collect()
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("raw")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.root.join("processed")
    }

    pub fn pdf_path(&self, id: &str) -> PathBuf {
        self.raw_dir().join(format!("{}.pdf", file_stem(id)))
    }

    pub fn metadata_path(&self, id: &str) -> PathBuf {
        self.processed_dir()
            .join(format!("{}_metadata.json", file_stem(id)))
    }

    /// Create the `raw/` and `processed/` directories.
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.raw_dir()).await?;
        tokio::fs::create_dir_all(self.processed_dir()).await
    }

    pub async fn write_pdf(&self, id: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        let path = self.pdf_path(id);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    pub async fn write_metadata(&self, summary: &MetadataSummary<'_>) -> std::io::Result<PathBuf> {
        let path = self.metadata_path(&summary.paper.id);
        let json = serde_json::to_vec_pretty(summary)?;
        tokio::fs::write(&path, json).await?;
        Ok(path)
    }
}
