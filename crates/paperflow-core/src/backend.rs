use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("cannot open PDF: {0}")]
    Open(String),
    #[error("cannot extract text: {0}")]
    Extraction(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A PDF-to-text engine.
///
/// Output is plain text, one line per text line; pages may be separated by
/// form feeds. Section detection happens afterwards in
/// `paperflow_parsing::SectionSegmenter`.
pub trait PdfBackend: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn extract_text(&self, path: &Path) -> Result<String, BackendError>;
}
