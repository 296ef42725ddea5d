use regex::{Regex, RegexBuilder};

use paperflow_core::SegmentType;

use crate::ParsingError;

/// Controls how a list of patterns/values is overridden from its defaults.
#[derive(Debug, Clone, Default)]
pub enum ListOverride<T> {
    /// Use the built-in defaults.
    #[default]
    Default,
    /// Completely replace the defaults with these values.
    Replace(Vec<T>),
    /// Append these values to the defaults.
    Extend(Vec<T>),
}

impl<T: Clone> ListOverride<T> {
    /// Resolve this override against the given defaults.
    pub fn resolve(&self, defaults: &[T]) -> Vec<T> {
        match self {
            ListOverride::Default => defaults.to_vec(),
            ListOverride::Replace(v) => v.clone(),
            ListOverride::Extend(v) => {
                let mut result = defaults.to_vec();
                result.extend(v.iter().cloned());
                result
            }
        }
    }
}

/// A heading pattern and the segment type it opens.
#[derive(Debug, Clone)]
pub struct HeadingRule {
    pub segment_type: SegmentType,
    pub pattern: Regex,
}

impl HeadingRule {
    pub fn matches(&self, line: &str) -> bool {
        self.pattern.is_match(line)
    }
}

pub const DEFAULT_MIN_SEGMENTS: usize = 3;
pub const DEFAULT_MIN_PARAGRAPH_CHARS: usize = 50;

/// Configuration for [`SectionSegmenter`](crate::SectionSegmenter).
///
/// Use [`SegmenterConfigBuilder`] to construct with string patterns.
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Heading rules, tested in order; first match wins.
    pub(crate) headings: ListOverride<HeadingRule>,
    /// Regex for splitting fallback paragraphs. `None` means blank lines.
    pub(crate) paragraph_split_re: Option<Regex>,
    /// Fewer segments than this (synthetic abstract included) triggers the fallback.
    pub(crate) min_segments: usize,
    /// Fallback paragraphs shorter than this many characters are dropped.
    pub(crate) min_paragraph_chars: usize,
    /// Recorded as `source` in every segment's metadata.
    pub(crate) source: String,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            headings: ListOverride::Default,
            paragraph_split_re: None,
            min_segments: DEFAULT_MIN_SEGMENTS,
            min_paragraph_chars: DEFAULT_MIN_PARAGRAPH_CHARS,
            source: paperflow_core::knowledge::DEFAULT_SOURCE.to_string(),
        }
    }
}

impl SegmenterConfig {
    pub fn min_segments(&self) -> usize {
        self.min_segments
    }

    pub fn min_paragraph_chars(&self) -> usize {
        self.min_paragraph_chars
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Builder for [`SegmenterConfig`].
///
/// Accepts string patterns that are compiled case-insensitively in
/// [`build()`](Self::build). Fails fast if any pattern is invalid.
#[derive(Debug, Clone, Default)]
pub struct SegmenterConfigBuilder {
    headings: ListOverride<(SegmentType, String)>,
    paragraph_split_re: Option<String>,
    min_segments: Option<usize>,
    min_paragraph_chars: Option<usize>,
    source: Option<String>,
}

fn compile(pattern: &str) -> Result<Regex, ParsingError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| ParsingError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}

fn compile_rules(rules: &[(SegmentType, String)]) -> Result<Vec<HeadingRule>, ParsingError> {
    rules
        .iter()
        .map(|(segment_type, pattern)| {
            Ok(HeadingRule {
                segment_type: *segment_type,
                pattern: compile(pattern)?,
            })
        })
        .collect()
}

impl SegmenterConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use only these heading rules.
    pub fn replace_headings(mut self, rules: Vec<(SegmentType, String)>) -> Self {
        self.headings = ListOverride::Replace(rules);
        self
    }

    /// Add heading rules after the built-in ones.
    pub fn extend_headings(mut self, rules: Vec<(SegmentType, String)>) -> Self {
        self.headings = ListOverride::Extend(rules);
        self
    }

    pub fn paragraph_split_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.paragraph_split_re = Some(pattern.into());
        self
    }

    pub fn min_segments(mut self, n: usize) -> Self {
        self.min_segments = Some(n);
        self
    }

    pub fn min_paragraph_chars(mut self, n: usize) -> Self {
        self.min_paragraph_chars = Some(n);
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn build(self) -> Result<SegmenterConfig, ParsingError> {
        let defaults = SegmenterConfig::default();
        let headings = match self.headings {
            ListOverride::Default => ListOverride::Default,
            ListOverride::Replace(rules) => ListOverride::Replace(compile_rules(&rules)?),
            ListOverride::Extend(rules) => ListOverride::Extend(compile_rules(&rules)?),
        };
        let paragraph_split_re = self
            .paragraph_split_re
            .as_deref()
            .map(compile)
            .transpose()?;

        Ok(SegmenterConfig {
            headings,
            paragraph_split_re,
            min_segments: self.min_segments.unwrap_or(defaults.min_segments),
            min_paragraph_chars: self
                .min_paragraph_chars
                .unwrap_or(defaults.min_paragraph_chars),
            source: self.source.unwrap_or(defaults.source),
        })
    }
}
