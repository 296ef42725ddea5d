//! Rule-based entity and relation derivation from paper metadata.
//!
//! Everything here is read directly off structured fields, so every entity
//! and relation carries confidence 1.0.

use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::RelationError;
use crate::models::{
    Entity, EntityType, Metadata, PaperMetadata, Relation, RelationType, Segment, SegmentType,
};

pub const DEFAULT_SOURCE: &str = "arxiv";

fn object(value: Value) -> Metadata {
    match value {
        Value::Object(map) => map,
        _ => Metadata::new(),
    }
}

/// Derives the paper, author and category graph for one paper.
#[derive(Debug, Clone)]
pub struct StructuralDeriver {
    source: String,
}

impl Default for StructuralDeriver {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE)
    }
}

impl StructuralDeriver {
    /// `source` is recorded in every entity's and relation's metadata.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// One `paper` entity, one `person` per author and one `concept` per
    /// category, in that order.
    ///
    /// All entities point at the abstract-typed segments. Ids are fresh on
    /// every call.
    pub fn entities(&self, paper: &PaperMetadata, segments: &[Segment]) -> Vec<Entity> {
        let abstract_segments: Vec<Uuid> = segments
            .iter()
            .filter(|s| s.segment_type == SegmentType::Abstract)
            .map(|s| s.id)
            .collect();

        let mut entities = Vec::with_capacity(1 + paper.authors.len() + paper.categories.len());

        entities.push(
            Entity::structural(&paper.title, EntityType::Paper)
                .with_description(&paper.abstract_text)
                .with_source_segments(abstract_segments.clone())
                .with_metadata(object(json!({
                    "arxiv_id": paper.id,
                    "authors": paper.authors,
                    "published": paper.published.to_string(),
                    "categories": paper.categories,
                    "source": self.source,
                }))),
        );

        for author in &paper.authors {
            entities.push(
                Entity::structural(author, EntityType::Person)
                    .with_description(format!("Author of '{}'", paper.title))
                    .with_source_segments(abstract_segments.clone())
                    .with_metadata(object(json!({
                        "role": "author",
                        "paper_id": paper.id,
                        "source": self.source,
                    }))),
            );
        }

        for category in &paper.categories {
            entities.push(
                Entity::structural(category, EntityType::Concept)
                    .with_description(format!("arXiv category for paper '{}'", paper.title))
                    .with_source_segments(abstract_segments.clone())
                    .with_metadata(object(json!({
                        "type": "category",
                        "paper_id": paper.id,
                        "source": self.source,
                    }))),
            );
        }

        tracing::debug!(paper_id = %paper.id, count = entities.len(), "derived entities");
        entities
    }

    /// `authored_by` from the paper to each person and `part_of` from the
    /// paper to each category concept.
    ///
    /// No paper entity yields an empty list; more than one is an error.
    pub fn relations(&self, entities: &[Entity]) -> Result<Vec<Relation>, RelationError> {
        let papers: Vec<&Entity> = entities
            .iter()
            .filter(|e| e.entity_type == EntityType::Paper)
            .collect();
        let paper = match papers.as_slice() {
            [] => return Ok(Vec::new()),
            [paper] => *paper,
            many => return Err(RelationError::AmbiguousPaper(many.len())),
        };

        let paper_id = paper
            .metadata
            .get("arxiv_id")
            .cloned()
            .unwrap_or(Value::Null);

        let mut relations = Vec::new();
        for entity in entities {
            match entity.entity_type {
                EntityType::Person => {
                    let relation = Relation::new(paper.id, entity.id, RelationType::AuthoredBy, 1.0)?
                        .with_description(format!(
                            "'{}' is authored by {}",
                            paper.name, entity.name
                        ))
                        .with_source_segments(paper.source_segments.clone())
                        .with_metadata(object(json!({
                            "paper_id": paper_id,
                            "source": self.source,
                        })));
                    relations.push(relation);
                }
                EntityType::Concept if is_category(entity) => {
                    let relation = Relation::new(paper.id, entity.id, RelationType::PartOf, 1.0)?
                        .with_description(format!(
                            "'{}' is part of category {}",
                            paper.name, entity.name
                        ))
                        .with_source_segments(paper.source_segments.clone())
                        .with_metadata(object(json!({
                            "paper_id": paper_id,
                            "relation_type": "categorization",
                            "source": self.source,
                        })));
                    relations.push(relation);
                }
                _ => {}
            }
        }

        tracing::debug!(count = relations.len(), "derived relations");
        Ok(relations)
    }
}

fn is_category(entity: &Entity) -> bool {
    entity.metadata.get("type").and_then(Value::as_str) == Some("category")
}
