//! Data model: paper metadata, segments, entities, relations and queries.

use std::time::Duration;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{ModelError, SourceError};

/// Free-form metadata attached to segments, entities and relations.
pub type Metadata = Map<String, Value>;

static VERSION_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"v\d+$").unwrap());

/// Strip a trailing version suffix (`2401.00001v2` -> `2401.00001`).
pub fn strip_version(id: &str) -> &str {
    match VERSION_SUFFIX_RE.find(id) {
        Some(m) => &id[..m.start()],
        None => id,
    }
}

/// Bibliographic record for one paper as returned by the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperMetadata {
    /// Short source identifier, including the version suffix when present.
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub published: NaiveDate,
    pub updated: Option<NaiveDate>,
    pub categories: Vec<String>,
    pub primary_category: Option<String>,
    pub pdf_url: String,
    pub abstract_url: String,
    pub journal_ref: Option<String>,
    pub doi: Option<String>,
    pub comment: Option<String>,
}

impl PaperMetadata {
    /// The identifier without its version suffix.
    pub fn base_id(&self) -> &str {
        strip_version(&self.id)
    }

    /// Stable document id shared by every segment of this paper.
    pub fn document_id(&self) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_URL, self.abstract_url.as_bytes())
    }
}

/// Closed set of segment kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentType {
    Abstract,
    Introduction,
    Background,
    Method,
    Experiment,
    Result,
    Discussion,
    Conclusion,
    Reference,
    Paragraph,
    Heading,
    Table,
    List,
    Figure,
    Code,
    Quote,
}

impl SegmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentType::Abstract => "abstract",
            SegmentType::Introduction => "introduction",
            SegmentType::Background => "background",
            SegmentType::Method => "method",
            SegmentType::Experiment => "experiment",
            SegmentType::Result => "result",
            SegmentType::Discussion => "discussion",
            SegmentType::Conclusion => "conclusion",
            SegmentType::Reference => "reference",
            SegmentType::Paragraph => "paragraph",
            SegmentType::Heading => "heading",
            SegmentType::Table => "table",
            SegmentType::List => "list",
            SegmentType::Figure => "figure",
            SegmentType::Code => "code",
            SegmentType::Quote => "quote",
        }
    }
}

impl std::fmt::Display for SegmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contiguous, typed span of a paper's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    pub segment_type: SegmentType,
    pub position: usize,
    pub metadata: Metadata,
}

impl Segment {
    /// Create a segment; the content is trimmed and must not be empty.
    pub fn new(
        document_id: Uuid,
        content: &str,
        segment_type: SegmentType,
        position: usize,
    ) -> Result<Self, ModelError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ModelError::EmptyContent);
        }
        Ok(Self {
            id: Uuid::new_v4(),
            document_id,
            content: content.to_string(),
            segment_type,
            position,
            metadata: Metadata::new(),
        })
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Paper,
    Person,
    Concept,
    Organization,
    Technology,
    Method,
    Dataset,
    Other,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Paper => "paper",
            EntityType::Person => "person",
            EntityType::Concept => "concept",
            EntityType::Organization => "organization",
            EntityType::Technology => "technology",
            EntityType::Method => "method",
            EntityType::Dataset => "dataset",
            EntityType::Other => "other",
        }
    }
}

fn check_confidence(confidence: f64) -> Result<f64, ModelError> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(confidence)
    } else {
        Err(ModelError::InvalidConfidence(confidence))
    }
}

/// A fact node derived from a paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub name: String,
    pub entity_type: EntityType,
    pub aliases: Vec<String>,
    pub description: Option<String>,
    pub confidence: f64,
    pub source_segments: Vec<Uuid>,
    pub metadata: Metadata,
}

impl Entity {
    /// Create an entity with a fresh id. Fails if `confidence` is outside `[0, 1]`.
    pub fn new(
        name: impl Into<String>,
        entity_type: EntityType,
        confidence: f64,
    ) -> Result<Self, ModelError> {
        let confidence = check_confidence(confidence)?;
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            entity_type,
            aliases: Vec::new(),
            description: None,
            confidence,
            source_segments: Vec::new(),
            metadata: Metadata::new(),
        })
    }

    /// An entity read directly off structured metadata (confidence 1.0).
    pub fn structural(name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            entity_type,
            aliases: Vec::new(),
            description: None,
            confidence: 1.0,
            source_segments: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_aliases(mut self, aliases: Vec<String>) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn with_source_segments(mut self, segments: Vec<Uuid>) -> Self {
        self.source_segments = segments;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    AuthoredBy,
    PartOf,
    Cites,
    Uses,
    Extends,
    RelatedTo,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::AuthoredBy => "authored_by",
            RelationType::PartOf => "part_of",
            RelationType::Cites => "cites",
            RelationType::Uses => "uses",
            RelationType::Extends => "extends",
            RelationType::RelatedTo => "related_to",
        }
    }
}

/// A typed, directed edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: Uuid,
    pub source: Uuid,
    pub target: Uuid,
    pub relation_type: RelationType,
    pub description: Option<String>,
    pub confidence: f64,
    pub source_segments: Vec<Uuid>,
    pub metadata: Metadata,
}

impl Relation {
    /// Create a relation. Fails on a self-loop or an out-of-range confidence.
    pub fn new(
        source: Uuid,
        target: Uuid,
        relation_type: RelationType,
        confidence: f64,
    ) -> Result<Self, ModelError> {
        if source == target {
            return Err(ModelError::SelfLoop(source));
        }
        let confidence = check_confidence(confidence)?;
        Ok(Self {
            id: Uuid::new_v4(),
            source,
            target,
            relation_type,
            description: None,
            confidence,
            source_segments: Vec::new(),
            metadata: Metadata::new(),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_source_segments(mut self, segments: Vec<Uuid>) -> Self {
        self.source_segments = segments;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

pub const DEFAULT_MAX_RESULTS: usize = 100;

/// A search request against the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub category: Option<String>,
    /// Inclusive lower bound on submission date, `YYYY-MM-DD`.
    pub date_from: Option<String>,
    /// Inclusive upper bound on submission date, `YYYY-MM-DD`.
    pub date_to: Option<String>,
    pub max_results: usize,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            query: String::new(),
            category: None,
            date_from: None,
            date_to: None,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

/// A [`SearchQuery`] whose dates have been parsed and checked.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedQuery {
    pub terms: String,
    pub category: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub max_results: usize,
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, SourceError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|e| {
        SourceError::permanent(format!(
            "invalid {field} '{value}': expected YYYY-MM-DD ({e})"
        ))
    })
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// Papers in one category, newest first.
    pub fn by_category(category: impl Into<String>, max_results: usize) -> Self {
        Self {
            category: Some(category.into()),
            max_results,
            ..Default::default()
        }
    }

    /// Papers submitted within `[from, to]`, optionally limited to one category.
    pub fn by_date_range(
        from: impl Into<String>,
        to: Option<String>,
        category: Option<String>,
        max_results: usize,
    ) -> Self {
        Self {
            category,
            date_from: Some(from.into()),
            date_to: to,
            max_results,
            ..Default::default()
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_dates(mut self, from: Option<String>, to: Option<String>) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Check the query without touching the network.
    ///
    /// Every failure is a [`SourceError::Permanent`].
    pub fn validate(&self) -> Result<ValidatedQuery, SourceError> {
        let from = self
            .date_from
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|s| parse_date("date_from", s))
            .transpose()?;
        let to = self
            .date_to
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|s| parse_date("date_to", s))
            .transpose()?;

        if let (Some(f), Some(t)) = (from, to)
            && f > t
        {
            return Err(SourceError::permanent(format!(
                "date_from {f} is after date_to {t}"
            )));
        }
        if self.max_results == 0 {
            return Err(SourceError::permanent("max_results must be positive"));
        }

        let terms = self.query.trim().to_string();
        let category = self
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        if terms.is_empty() && category.is_none() && from.is_none() && to.is_none() {
            return Err(SourceError::permanent(
                "query needs search terms, a category or a date range",
            ));
        }

        Ok(ValidatedQuery {
            terms,
            category,
            from,
            to,
            max_results: self.max_results,
        })
    }
}

/// Static description of a source and how the client talks to it.
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub name: String,
    pub base_url: String,
    #[serde(with = "duration_millis")]
    pub request_delay: Duration,
    pub max_results_per_query: usize,
    pub categories: Vec<String>,
}

mod duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_version_suffix() {
        assert_eq!(strip_version("2401.00001v3"), "2401.00001");
        assert_eq!(strip_version("2401.00001"), "2401.00001");
        assert_eq!(strip_version("hep-th/9901001v1"), "hep-th/9901001");
    }

    #[test]
    fn segment_rejects_blank_content() {
        let doc = Uuid::new_v4();
        assert_eq!(
            Segment::new(doc, "  \n\t ", SegmentType::Paragraph, 0),
            Err(ModelError::EmptyContent)
        );
        let seg = Segment::new(doc, "  body text \n", SegmentType::Method, 2).unwrap();
        assert_eq!(seg.content, "body text");
        assert_eq!(seg.position, 2);
    }

    #[test]
    fn entity_confidence_bounds() {
        assert!(Entity::new("x", EntityType::Concept, 0.0).is_ok());
        assert!(Entity::new("x", EntityType::Concept, 1.0).is_ok());
        assert_eq!(
            Entity::new("x", EntityType::Concept, 1.5).unwrap_err(),
            ModelError::InvalidConfidence(1.5)
        );
        assert!(Entity::new("x", EntityType::Concept, f64::NAN).is_err());
    }

    #[test]
    fn relation_rejects_self_loop() {
        let id = Uuid::new_v4();
        assert_eq!(
            Relation::new(id, id, RelationType::Cites, 1.0).unwrap_err(),
            ModelError::SelfLoop(id)
        );
        assert!(Relation::new(id, Uuid::new_v4(), RelationType::Cites, 1.0).is_ok());
    }

    #[test]
    fn validate_rejects_impossible_month() {
        let q = SearchQuery::new("transformers").with_dates(Some("2023-13-01".into()), None);
        let err = q.validate().unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("2023-13-01"));
    }

    #[test]
    fn validate_rejects_inverted_range_and_zero_max() {
        let q = SearchQuery::new("x").with_dates(Some("2024-02-01".into()), Some("2024-01-01".into()));
        assert!(q.validate().is_err());
        assert!(SearchQuery::new("x").with_max_results(0).validate().is_err());
        assert!(SearchQuery::new("   ").validate().is_err());
    }

    #[test]
    fn validate_accepts_category_only() {
        let v = SearchQuery::by_category("cs.AI", 10).validate().unwrap();
        assert!(v.terms.is_empty());
        assert_eq!(v.category.as_deref(), Some("cs.AI"));
        assert_eq!(v.max_results, 10);
    }

    #[test]
    fn validate_parses_dates() {
        let v = SearchQuery::by_date_range("2024-01-01", Some("2024-01-31".into()), None, 5)
            .validate()
            .unwrap();
        assert_eq!(v.from, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(v.to, NaiveDate::from_ymd_opt(2024, 1, 31));
    }

    #[test]
    fn segment_type_serializes_snake_case() {
        let json = serde_json::to_string(&SegmentType::Introduction).unwrap();
        assert_eq!(json, "\"introduction\"");
        assert_eq!(RelationType::AuthoredBy.as_str(), "authored_by");
    }
}
