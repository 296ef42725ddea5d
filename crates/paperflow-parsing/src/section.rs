//! Heading-driven section segmentation.
//!
//! The segmenter walks the text line by line. A line matching a heading rule
//! closes the open section and opens a new one seeded with the heading line;
//! every other line is appended to the open section. When too few segments
//! come out, blank-line paragraphs are appended as a fallback.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use uuid::Uuid;

use paperflow_core::{Metadata, PaperMetadata, Segment, SegmentType};

use crate::config::{HeadingRule, SegmenterConfig};
use crate::references;

/// Optional section number in front of a heading: `1`, `2.3.`, `IV.`.
const NUMBER_PREFIX: &str = r"(?:(?:\d+(?:\.\d+)*\.?|[IVX]+\.)\s*)?";

/// What may follow the keyword on a heading line: inline text after a colon,
/// or at most three further title words without sentence punctuation.
const HEADING_TAIL: &str = r"(?:\s*[:：].*|(?:[ \t]+[^\s.,;:。、]+){1,3})?\s*$";

fn heading_rule(segment_type: SegmentType, keywords: &str) -> HeadingRule {
    let pattern = format!(r"(?i)^\s*{NUMBER_PREFIX}(?:{keywords}){HEADING_TAIL}");
    HeadingRule {
        segment_type,
        pattern: Regex::new(&pattern).unwrap(),
    }
}

/// Built-in heading table, in priority order.
static DEFAULT_HEADINGS: Lazy<Vec<HeadingRule>> = Lazy::new(|| {
    vec![
        heading_rule(SegmentType::Abstract, r"abstract|概要|要約"),
        heading_rule(SegmentType::Introduction, r"introduction|はじめに|序論"),
        heading_rule(
            SegmentType::Background,
            r"background|背景|関連研究|previous\s+works?|related\s+works?",
        ),
        heading_rule(
            SegmentType::Method,
            r"methods?|methodology|approach(?:es)?|提案手法|手法|アプローチ|方法",
        ),
        heading_rule(
            SegmentType::Experiment,
            r"experiments?|experimental\s+setup|evaluations?|実験|評価",
        ),
        heading_rule(SegmentType::Result, r"results?|実験結果|結果"),
        heading_rule(SegmentType::Discussion, r"discussions?|考察"),
        heading_rule(
            SegmentType::Conclusion,
            r"conclusions?|concluding\s+remarks|おわりに|結論",
        ),
        heading_rule(
            SegmentType::Reference,
            r"references?|bibliography|参考文献|引用文献",
        ),
    ]
});

static BLANK_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());

/// Segmenter state: either no section is open or one is accumulating lines.
enum State {
    Idle,
    InSection { kind: SegmentType, content: String },
}

/// Collects emitted segments; positions are always `0..len`.
struct Emitter<'a> {
    document_id: Uuid,
    base_metadata: &'a Metadata,
    segments: Vec<Segment>,
}

impl Emitter<'_> {
    /// Emit `content` as the next segment. Blank content is skipped.
    fn emit(&mut self, content: &str, kind: SegmentType, extra: Option<(&str, Value)>) {
        let position = self.segments.len();
        let Ok(segment) = Segment::new(self.document_id, content, kind, position) else {
            return;
        };
        let mut metadata = self.base_metadata.clone();
        metadata.insert("segment_type".into(), Value::from(kind.as_str()));
        if let Some((key, value)) = extra {
            metadata.insert(key.into(), value);
        }
        self.segments.push(segment.with_metadata(metadata));
    }
}

/// Line-oriented section segmenter.
#[derive(Debug, Clone)]
pub struct SectionSegmenter {
    config: SegmenterConfig,
    headings: Vec<HeadingRule>,
}

impl Default for SectionSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl SectionSegmenter {
    pub fn new() -> Self {
        Self::with_config(SegmenterConfig::default())
    }

    pub fn with_config(config: SegmenterConfig) -> Self {
        let headings = config.headings.resolve(&DEFAULT_HEADINGS);
        Self { config, headings }
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// The segment type a heading line opens, if the line is a heading.
    pub fn classify_line(&self, line: &str) -> Option<SegmentType> {
        self.headings
            .iter()
            .find(|rule| rule.matches(line))
            .map(|rule| rule.segment_type)
    }

    /// Segment a paper's extracted text.
    ///
    /// A non-blank metadata abstract becomes a synthetic `abstract` segment
    /// at position 0. Segment metadata carries the paper's id, title,
    /// authors and categories.
    pub fn segment(&self, paper: &PaperMetadata, text: &str) -> Vec<Segment> {
        let metadata = match json!({
            "source": self.config.source,
            "paper_id": paper.id,
            "title": paper.title,
            "authors": paper.authors,
            "categories": paper.categories,
        }) {
            Value::Object(map) => map,
            _ => Metadata::new(),
        };
        let segments =
            self.segment_document(paper.document_id(), Some(&paper.abstract_text), &metadata, text);
        tracing::info!(paper_id = %paper.id, segments = segments.len(), "paper segmented");
        segments
    }

    /// Segment text that is not tied to fetched metadata.
    pub fn segment_document(
        &self,
        document_id: Uuid,
        abstract_text: Option<&str>,
        base_metadata: &Metadata,
        text: &str,
    ) -> Vec<Segment> {
        let mut out = Emitter {
            document_id,
            base_metadata,
            segments: Vec::new(),
        };

        if let Some(abstract_text) = abstract_text {
            out.emit(abstract_text, SegmentType::Abstract, None);
        }

        let mut state = State::Idle;
        for line in text.lines() {
            if let Some(kind) = self.classify_line(line) {
                let opened = State::InSection {
                    kind,
                    content: format!("{line}\n"),
                };
                if let State::InSection {
                    kind: closed,
                    content,
                } = std::mem::replace(&mut state, opened)
                {
                    out.emit(&content, closed, None);
                }
                continue;
            }
            match state {
                State::InSection {
                    ref mut content, ..
                } => {
                    content.push_str(line);
                    content.push('\n');
                }
                // Front matter before the first heading reads as an implicit introduction.
                State::Idle if !line.trim().is_empty() => {
                    state = State::InSection {
                        kind: SegmentType::Introduction,
                        content: format!("{line}\n"),
                    };
                }
                State::Idle => {}
            }
        }
        if let State::InSection { kind, content } = state {
            out.emit(&content, kind, None);
        }

        let structural = out.segments.len();
        if structural < self.config.min_segments {
            let split_re = self
                .config
                .paragraph_split_re
                .as_ref()
                .unwrap_or(&BLANK_LINE_RE);
            for (index, paragraph) in split_re.split(text).enumerate() {
                if paragraph.trim().chars().count() < self.config.min_paragraph_chars {
                    continue;
                }
                out.emit(
                    paragraph,
                    SegmentType::Paragraph,
                    Some(("paragraph_index", Value::from(index))),
                );
            }
            tracing::debug!(
                structural,
                total = out.segments.len(),
                "applied paragraph fallback"
            );
        }

        out.segments
    }

    /// Entries of the last reference section, using this segmenter's heading rules.
    pub fn extract_references(&self, text: &str) -> Vec<String> {
        references::extract_with(text, |line| {
            self.classify_line(line) == Some(SegmentType::Reference)
        })
    }
}
