use std::path::Path;

use mupdf::{Document, Page, TextPageFlags};

use paperflow_core::{BackendError, PdfBackend};

/// Separator between pages; `normalize_extracted_text` turns it into a blank line.
const PAGE_BREAK: char = '\u{0C}';

fn extraction(err: mupdf::Error) -> BackendError {
    BackendError::Extraction(err.to_string())
}

/// MuPDF-based implementation of [`PdfBackend`].
///
/// This crate isolates the AGPL mupdf dependency so the rest of the
/// workspace can be built and tested without it.
///
/// Running headers and footers (journal names, page numbers, arXiv stamps)
/// are dropped by excluding the top and bottom bands of each page, so they
/// do not break section text across page boundaries.
pub struct MupdfBackend {
    /// Fraction of page height from bottom to exclude as footer (0.0–1.0).
    footer_exclusion_ratio: Option<f32>,
    /// Fraction of page height from top to exclude as header (0.0–1.0).
    header_exclusion_ratio: Option<f32>,
}

impl Default for MupdfBackend {
    fn default() -> Self {
        Self {
            footer_exclusion_ratio: Some(0.05),
            header_exclusion_ratio: Some(0.04),
        }
    }
}

impl MupdfBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the footer exclusion ratio. Pass `0.0` to disable.
    pub fn with_footer_exclusion(mut self, ratio: f32) -> Self {
        self.footer_exclusion_ratio = (ratio > 0.0).then_some(ratio);
        self
    }

    /// Set the header exclusion ratio. Pass `0.0` to disable.
    pub fn with_header_exclusion(mut self, ratio: f32) -> Self {
        self.header_exclusion_ratio = (ratio > 0.0).then_some(ratio);
        self
    }

    /// Text of one page, one line per text line and a blank line per block.
    fn page_text(&self, page: &Page) -> Result<String, BackendError> {
        let bounds = page.bounds().map_err(extraction)?;
        let height = bounds.y1 - bounds.y0;
        let body_top = self.header_exclusion_ratio.map(|r| bounds.y0 + height * r);
        let body_bottom = self.footer_exclusion_ratio.map(|r| bounds.y1 - height * r);

        let text_page = page
            .to_text_page(TextPageFlags::empty())
            .map_err(extraction)?;

        let mut out = String::new();
        for block in text_page.blocks() {
            let b = block.bounds();
            let in_header = body_top.is_some_and(|t| b.y1 <= t);
            let in_footer = body_bottom.is_some_and(|t| b.y0 >= t);
            if in_header || in_footer {
                continue;
            }
            for line in block.lines() {
                let text: String = line
                    .chars()
                    .map(|c| c.char().unwrap_or('\u{FFFD}'))
                    .collect();
                out.push_str(text.trim_end());
                out.push('\n');
            }
            out.push('\n');
        }
        Ok(out)
    }
}

impl PdfBackend for MupdfBackend {
    fn name(&self) -> &'static str {
        "mupdf"
    }

    fn extract_text(&self, path: &Path) -> Result<String, BackendError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| BackendError::Open("invalid path encoding".into()))?;
        let document =
            Document::open(path_str).map_err(|e| BackendError::Open(e.to_string()))?;

        let mut text = String::new();
        let mut pages = 0usize;
        for page in document.pages().map_err(extraction)? {
            if pages > 0 {
                text.push(PAGE_BREAK);
            }
            text.push_str(&self.page_text(&page.map_err(extraction)?)?);
            pages += 1;
        }
        if pages == 0 {
            return Err(BackendError::Extraction("document has no pages".into()));
        }

        tracing::debug!(path = %path.display(), pages, chars = text.len(), "extracted PDF text");
        Ok(text)
    }
}
