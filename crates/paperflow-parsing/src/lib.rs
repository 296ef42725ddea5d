use thiserror::Error;

pub mod config;
pub mod references;
pub mod section;
pub mod text;

pub use config::{HeadingRule, ListOverride, SegmenterConfig, SegmenterConfigBuilder};
pub use references::extract_references;
pub use section::SectionSegmenter;
pub use text::normalize_extracted_text;

#[derive(Error, Debug)]
pub enum ParsingError {
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}
