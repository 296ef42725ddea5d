//! Capability interface between the pipeline and a paper source.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;

use paperflow_core::embed::embed_checked;
use paperflow_core::{
    Config, Embedder, Entity, PaperMetadata, PdfBackend, PipelineError, RateLimitedClient,
    Relation, SearchQuery, Segment, SegmentEmbedding, SourceInfo, Stage, StructuralDeriver,
};
use paperflow_parsing::{
    ParsingError, SectionSegmenter, SegmenterConfigBuilder, normalize_extracted_text,
};

/// Everything the pipeline needs from a source, one method per stage.
///
/// A capability a connector does not have returns
/// [`PipelineError::Unimplemented`].
#[async_trait]
pub trait Connector: Send + Sync {
    fn name(&self) -> &str;

    /// Prepare the connector for a run (warm-up, credentials, ...).
    async fn initialize(&self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn source_info(&self) -> SourceInfo;

    async fn search(&self, query: &SearchQuery) -> Result<Vec<PaperMetadata>, PipelineError>;

    async fn fetch_by_id(&self, id: &str) -> Result<PaperMetadata, PipelineError>;

    async fn download_pdf(&self, paper: &PaperMetadata) -> Result<Vec<u8>, PipelineError>;

    async fn extract_text(
        &self,
        paper: &PaperMetadata,
        pdf: Vec<u8>,
    ) -> Result<String, PipelineError>;

    async fn segment(
        &self,
        paper: &PaperMetadata,
        text: &str,
    ) -> Result<Vec<Segment>, PipelineError>;

    fn derive_entities(
        &self,
        paper: &PaperMetadata,
        segments: &[Segment],
    ) -> Result<Vec<Entity>, PipelineError>;

    /// Relations over `entities`, or over freshly derived entities when `None`.
    fn derive_relations(
        &self,
        paper: &PaperMetadata,
        segments: &[Segment],
        entities: Option<&[Entity]>,
    ) -> Result<Vec<Relation>, PipelineError>;

    fn extract_references(&self, _text: &str) -> Result<Vec<String>, PipelineError> {
        Err(PipelineError::Unimplemented("reference extraction"))
    }

    async fn embed_segments(
        &self,
        _segments: &[Segment],
    ) -> Result<Vec<SegmentEmbedding>, PipelineError> {
        Err(PipelineError::Unimplemented("embedding"))
    }
}

/// Connector for arXiv (or any [`paperflow_core::PaperSource`] behind the client).
pub struct ArxivConnector {
    client: RateLimitedClient,
    backend: Arc<dyn PdfBackend>,
    segmenter: Arc<SectionSegmenter>,
    deriver: StructuralDeriver,
    embedder: Option<Arc<dyn Embedder>>,
}

impl ArxivConnector {
    pub fn new(
        client: RateLimitedClient,
        backend: Arc<dyn PdfBackend>,
        segmenter: SectionSegmenter,
    ) -> Self {
        let deriver = StructuralDeriver::new(segmenter.config().source());
        Self {
            client,
            backend,
            segmenter: Arc::new(segmenter),
            deriver,
            embedder: None,
        }
    }

    /// An arXiv connector with segmentation thresholds taken from `config`.
    pub fn from_config(config: &Config, backend: Arc<dyn PdfBackend>) -> Result<Self, ParsingError> {
        let segmenter_config = SegmenterConfigBuilder::new()
            .min_segments(config.min_segments)
            .min_paragraph_chars(config.min_paragraph_chars)
            .build()?;
        Ok(Self::new(
            RateLimitedClient::arxiv(config),
            backend,
            SectionSegmenter::with_config(segmenter_config),
        ))
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn client(&self) -> &RateLimitedClient {
        &self.client
    }
}

fn run_extraction(backend: &dyn PdfBackend, pdf: &[u8]) -> Result<String, String> {
    let mut file = tempfile::Builder::new()
        .prefix("paperflow-")
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| format!("creating temp file: {e}"))?;
    file.write_all(pdf)
        .and_then(|_| file.flush())
        .map_err(|e| format!("writing temp file: {e}"))?;
    backend.extract_text(file.path()).map_err(|e| e.to_string())
}

#[async_trait]
impl Connector for ArxivConnector {
    fn name(&self) -> &str {
        self.client.source_name()
    }

    async fn initialize(&self) -> Result<(), PipelineError> {
        tracing::info!(source = self.client.source_name(), "connector initialized");
        Ok(())
    }

    fn source_info(&self) -> SourceInfo {
        self.client.source_info()
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<PaperMetadata>, PipelineError> {
        Ok(self.client.search(query).await?)
    }

    async fn fetch_by_id(&self, id: &str) -> Result<PaperMetadata, PipelineError> {
        Ok(self.client.fetch_by_id(id).await?)
    }

    async fn download_pdf(&self, paper: &PaperMetadata) -> Result<Vec<u8>, PipelineError> {
        if paper.pdf_url.trim().is_empty() {
            return Err(PipelineError::at(Stage::Download, &paper.id, "paper has no PDF url"));
        }
        let bytes = self
            .client
            .fetch_pdf(&paper.pdf_url)
            .await
            .map_err(|e| PipelineError::at(Stage::Download, &paper.id, e))?;
        if bytes.is_empty() {
            return Err(PipelineError::at(Stage::Download, &paper.id, "empty response body"));
        }
        if !bytes.starts_with(b"%PDF") {
            return Err(PipelineError::at(
                Stage::Download,
                &paper.id,
                "response is not a PDF",
            ));
        }
        tracing::info!(paper_id = %paper.id, bytes = bytes.len(), "PDF downloaded");
        Ok(bytes)
    }

    async fn extract_text(
        &self,
        paper: &PaperMetadata,
        pdf: Vec<u8>,
    ) -> Result<String, PipelineError> {
        let backend = Arc::clone(&self.backend);
        let raw = tokio::task::spawn_blocking(move || run_extraction(backend.as_ref(), &pdf))
            .await
            .map_err(|e| PipelineError::at(Stage::Extraction, &paper.id, e))?
            .map_err(|e| PipelineError::at(Stage::Extraction, &paper.id, e))?;

        let text = normalize_extracted_text(&raw);
        if text.trim().is_empty() {
            return Err(PipelineError::at(
                Stage::Extraction,
                &paper.id,
                "no text could be extracted",
            ));
        }
        tracing::info!(
            paper_id = %paper.id,
            backend = self.backend.name(),
            chars = text.len(),
            "text extracted"
        );
        Ok(text)
    }

    async fn segment(
        &self,
        paper: &PaperMetadata,
        text: &str,
    ) -> Result<Vec<Segment>, PipelineError> {
        let segmenter = Arc::clone(&self.segmenter);
        let owned_paper = paper.clone();
        let owned_text = text.to_string();
        let segments =
            tokio::task::spawn_blocking(move || segmenter.segment(&owned_paper, &owned_text))
                .await
                .map_err(|e| PipelineError::at(Stage::Segmentation, &paper.id, e))?;
        if segments.is_empty() {
            return Err(PipelineError::at(
                Stage::Segmentation,
                &paper.id,
                "no segments produced",
            ));
        }
        Ok(segments)
    }

    fn derive_entities(
        &self,
        paper: &PaperMetadata,
        segments: &[Segment],
    ) -> Result<Vec<Entity>, PipelineError> {
        let entities = self.deriver.entities(paper, segments);
        tracing::debug!(paper_id = %paper.id, entities = entities.len(), "entities derived");
        Ok(entities)
    }

    fn derive_relations(
        &self,
        paper: &PaperMetadata,
        segments: &[Segment],
        entities: Option<&[Entity]>,
    ) -> Result<Vec<Relation>, PipelineError> {
        let derived;
        let entities = match entities {
            Some(e) => e,
            None => {
                derived = self.derive_entities(paper, segments)?;
                &derived
            }
        };
        self.deriver
            .relations(entities)
            .map_err(|e| PipelineError::at(Stage::RelationExtraction, &paper.id, e))
    }

    fn extract_references(&self, text: &str) -> Result<Vec<String>, PipelineError> {
        Ok(self.segmenter.extract_references(text))
    }

    async fn embed_segments(
        &self,
        segments: &[Segment],
    ) -> Result<Vec<SegmentEmbedding>, PipelineError> {
        let Some(ref embedder) = self.embedder else {
            return Err(PipelineError::Unimplemented("embedding"));
        };
        let mut out = Vec::with_capacity(segments.len());
        for segment in segments {
            let embedding = embed_checked(embedder.as_ref(), segment.id, &segment.content)
                .await
                .map_err(|e| {
                    let paper_id = segment
                        .metadata
                        .get("paper_id")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown");
                    PipelineError::at(Stage::Embedding, paper_id, e)
                })?;
            out.push(embedding);
        }
        Ok(out)
    }
}
