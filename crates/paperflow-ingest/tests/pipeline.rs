use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use paperflow_core::{
    BackendError, ClientOptions, EmbedError, Embedder, Entity, EntityType, MockSource,
    PaperMetadata, PdfBackend, PipelineError, RateLimitedClient, Relation, RelationType,
    RetryPolicy, SearchQuery, Segment, SegmentType, SourceError, SourceInfo, Stage,
};
use paperflow_ingest::{
    ArtifactStore, ArxivConnector, Connector, PaperStatus, Pipeline, ProgressEvent,
};
use paperflow_parsing::SectionSegmenter;

const PDF_HEADER: &str = "%PDF-1.4\n";

/// Treats the "PDF" as UTF-8 text after its header line.
struct PlainTextBackend;

impl PdfBackend for PlainTextBackend {
    fn extract_text(&self, path: &Path) -> Result<String, BackendError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(raw.strip_prefix(PDF_HEADER).unwrap_or(&raw).to_string())
    }
}

struct WrongDimension;

impl Embedder for WrongDimension {
    fn model_name(&self) -> &str {
        "wrong-dimension"
    }

    fn dimension(&self) -> usize {
        8
    }

    fn embed<'a>(
        &'a self,
        _text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>, EmbedError>> + Send + 'a>> {
        Box::pin(async { Ok(vec![0.5; 3]) })
    }
}

const QUANTUM_TEXT: &str = "\
Scalable Surface Codes for Quantum Computing
A. Researcher, B. Scientist

1 Introduction
Quantum computing promises exponential speedups for selected problems.

2 Methods
We simulate surface codes under circuit-level noise.

3 Results
Logical error rates fall as the code distance grows.

4 Conclusion
Surface codes remain the most practical route to fault tolerance.

References
[1] P. Shor. Scheme for reducing decoherence in quantum computer memory. 1995.
[2] A. Kitaev. Fault-tolerant quantum computation by anyons. 2003.
";

const UNSTRUCTURED_TEXT: &str = "\
This note records a handful of observations about qubit coherence in our lab.

The first observation concerns the dependence of coherence on the fridge temperature.

The second observation concerns the effect of shielding on low-frequency noise.
";

fn paper(id: &str, title: &str, authors: &[&str], categories: &[&str]) -> PaperMetadata {
    PaperMetadata {
        id: id.to_string(),
        title: title.to_string(),
        authors: authors.iter().map(|a| a.to_string()).collect(),
        abstract_text: format!("An abstract about {title}."),
        published: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
        updated: None,
        categories: categories.iter().map(|c| c.to_string()).collect(),
        primary_category: categories.first().map(|c| c.to_string()),
        pdf_url: format!("https://arxiv.org/pdf/{id}"),
        abstract_url: format!("https://arxiv.org/abs/{id}"),
        journal_ref: None,
        doi: None,
        comment: None,
    }
}

fn quantum_paper() -> PaperMetadata {
    paper(
        "2401.00001v1",
        "Scalable Surface Codes for Quantum Computing",
        &["A. Researcher", "B. Scientist"],
        &["quant-ph", "cs.ET"],
    )
}

fn pdf(text: &str) -> Vec<u8> {
    format!("{PDF_HEADER}{text}").into_bytes()
}

fn client(source: Arc<MockSource>) -> RateLimitedClient {
    RateLimitedClient::new(
        source,
        ClientOptions {
            request_delay: Duration::ZERO,
            retry: RetryPolicy::none(),
            ..Default::default()
        },
    )
}

fn connector(source: Arc<MockSource>) -> ArxivConnector {
    ArxivConnector::new(client(source), Arc::new(PlainTextBackend), SectionSegmenter::new())
}

fn pipeline(source: Arc<MockSource>) -> Pipeline {
    Pipeline::new(Arc::new(connector(source)))
}

#[tokio::test]
async fn quantum_paper_end_to_end() {
    let qp = quantum_paper();
    let source = Arc::new(MockSource::new(vec![qp.clone()]).with_pdf(&qp.pdf_url, pdf(QUANTUM_TEXT)));

    let outcomes = pipeline(source)
        .collect(
            &SearchQuery::new("quantum computing"),
            |_| {},
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];
    assert_eq!(outcome.status, PaperStatus::Success, "{:?}", outcome.errors);
    assert!(outcome.segments_count >= 5);
    assert_eq!(outcome.entity_ids.len(), 5);
    assert_eq!(outcome.relation_ids.len(), 4);
    assert_eq!(outcome.references_count, 2);

    let processed = outcome.processed.as_ref().unwrap();
    assert_eq!(processed.segments[0].segment_type, SegmentType::Abstract);
    for (i, seg) in processed.segments.iter().enumerate() {
        assert_eq!(seg.position, i);
    }
    for kind in [
        SegmentType::Introduction,
        SegmentType::Method,
        SegmentType::Result,
        SegmentType::Conclusion,
    ] {
        assert!(processed.segments.iter().any(|s| s.segment_type == kind), "missing {kind}");
    }

    assert!(processed.entities.iter().all(|e| e.confidence == 1.0));
    let persons = processed
        .entities
        .iter()
        .filter(|e| e.entity_type == EntityType::Person)
        .count();
    assert_eq!(persons, 2);

    let paper_entity = &processed.entities[0];
    assert_eq!(paper_entity.entity_type, EntityType::Paper);
    assert!(processed.relations.iter().all(|r| r.source == paper_entity.id));
    let authored = processed
        .relations
        .iter()
        .filter(|r| r.relation_type == RelationType::AuthoredBy)
        .count();
    assert_eq!(authored, 2);
}

#[tokio::test]
async fn few_headings_fall_back_to_paragraphs() {
    let p = paper("2402.00002", "Coherence notes", &["C. Person"], &["quant-ph"]);
    let source =
        Arc::new(MockSource::new(vec![p.clone()]).with_pdf(&p.pdf_url, pdf(UNSTRUCTURED_TEXT)));

    let outcome = pipeline(source).process_id("2402.00002").await.unwrap();

    assert_eq!(outcome.status, PaperStatus::Success);
    let segments = &outcome.processed.as_ref().unwrap().segments;
    let paragraphs = segments
        .iter()
        .filter(|s| s.segment_type == SegmentType::Paragraph)
        .count();
    assert_eq!(paragraphs, 3);
    assert!(segments.len() > paragraphs);
    assert!(
        segments
            .iter()
            .filter(|s| s.segment_type == SegmentType::Paragraph)
            .all(|s| s.metadata.contains_key("paragraph_index"))
    );
}

#[tokio::test]
async fn unknown_id_is_not_found() {
    let source = Arc::new(MockSource::new(vec![quantum_paper()]));
    let connector = connector(Arc::clone(&source));

    let err = connector.fetch_by_id("9999.99999").await.unwrap_err();
    assert!(matches!(err, PipelineError::Source(SourceError::NotFound(_))));
    assert_eq!(source.call_count(), 1);
}

#[tokio::test]
async fn invalid_date_fails_without_network_calls() {
    let source = Arc::new(MockSource::new(vec![quantum_paper()]));
    let pipeline = pipeline(Arc::clone(&source));

    let query = SearchQuery::by_date_range("2023-13-01", None, None, 10);
    let err = pipeline
        .collect(&query, |_| {}, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Source(SourceError::Permanent { .. })));
    assert_eq!(err.stage(), Some(Stage::Search));
    assert_eq!(source.call_count(), 0);
}

#[tokio::test]
async fn missing_pdf_marks_paper_failed_without_stopping_batch() {
    let good = quantum_paper();
    let missing = paper("2401.00002", "Quantum computing without a PDF", &["D. Person"], &["quant-ph"]);
    let source = Arc::new(
        MockSource::new(vec![good.clone(), missing]).with_pdf(&good.pdf_url, pdf(QUANTUM_TEXT)),
    );

    let outcomes = pipeline(source)
        .collect(
            &SearchQuery::new("quantum computing"),
            |_| {},
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 2);
    let failed = outcomes.iter().find(|o| o.id == "2401.00002").unwrap();
    assert_eq!(failed.status, PaperStatus::Failed);
    assert_eq!(failed.errors[0].stage, Some(Stage::Download));
    assert_eq!(failed.text_length, 0);

    let ok = outcomes.iter().find(|o| o.id == "2401.00001v1").unwrap();
    assert_eq!(ok.status, PaperStatus::Success);
}

#[tokio::test]
async fn non_pdf_body_is_a_download_error() {
    let p = quantum_paper();
    let source = Arc::new(
        MockSource::new(vec![p.clone()]).with_pdf(&p.pdf_url, b"<html>captcha</html>".to_vec()),
    );

    let outcome = pipeline(source).process_id(&p.id).await.unwrap();
    assert_eq!(outcome.status, PaperStatus::Failed);
    assert_eq!(outcome.errors[0].stage, Some(Stage::Download));
}

#[tokio::test]
async fn empty_text_is_an_extraction_failure() {
    let p = quantum_paper();
    let source = Arc::new(MockSource::new(vec![p.clone()]).with_pdf(&p.pdf_url, pdf("\n\n")));

    let outcome = pipeline(source).process_id(&p.id).await.unwrap();
    assert_eq!(outcome.status, PaperStatus::Failed);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].stage, Some(Stage::Extraction));
}

#[tokio::test]
async fn failure_after_extraction_is_partial() {
    let p = quantum_paper();
    let source = Arc::new(MockSource::new(vec![p.clone()]).with_pdf(&p.pdf_url, pdf(QUANTUM_TEXT)));
    let connector = connector(source).with_embedder(Arc::new(WrongDimension));

    let outcome = Pipeline::new(Arc::new(connector))
        .process_id(&p.id)
        .await
        .unwrap();

    assert_eq!(outcome.status, PaperStatus::Partial);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].stage, Some(Stage::Embedding));
    assert!(outcome.errors[0].message.contains("dimension"));
    // Derivation still ran on the segments.
    assert_eq!(outcome.entity_ids.len(), 5);
    assert_eq!(outcome.relation_ids.len(), 4);
}

#[tokio::test]
async fn artifacts_are_written_under_output_dir() {
    let dir = tempfile::tempdir().unwrap();
    let p = paper("hep-th/9901001v1", "Quantum strings", &["E. Person"], &["hep-th"]);
    let source = Arc::new(MockSource::new(vec![p.clone()]).with_pdf(&p.pdf_url, pdf(QUANTUM_TEXT)));

    let outcome = pipeline(source)
        .with_store(ArtifactStore::new(dir.path()))
        .process_id("hep-th/9901001")
        .await
        .unwrap();

    assert_eq!(outcome.status, PaperStatus::Success, "{:?}", outcome.errors);
    let pdf_path = outcome.pdf_path.clone().unwrap();
    assert_eq!(pdf_path, dir.path().join("raw").join("hep-th_9901001v1.pdf"));
    assert!(std::fs::read(&pdf_path).unwrap().starts_with(b"%PDF"));

    let metadata_path = outcome.metadata_path.clone().unwrap();
    assert_eq!(
        metadata_path,
        dir.path().join("processed").join("hep-th_9901001v1_metadata.json")
    );
    let summary: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&metadata_path).unwrap()).unwrap();
    assert_eq!(summary["id"], "hep-th/9901001v1");
    assert_eq!(summary["title"], "Quantum strings");
    assert_eq!(summary["entities_count"], 3);
    assert_eq!(summary["references_count"], 2);
    assert_eq!(
        summary["segments"].as_array().unwrap().len(),
        outcome.segments_count
    );
    assert!(summary["collected_at"].is_string());
}

/// `count` quantum papers published on consecutive days, each with a PDF.
fn dated_papers(count: u32) -> MockSource {
    let papers: Vec<PaperMetadata> = (1..=count)
        .map(|day| {
            let mut p = paper(
                &format!("2401.0000{day}"),
                &format!("Quantum computing part {day}"),
                &["F. Person"],
                &["quant-ph"],
            );
            p.published = NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
            p
        })
        .collect();
    let urls: Vec<String> = papers.iter().map(|p| p.pdf_url.clone()).collect();
    urls.into_iter()
        .fold(MockSource::new(papers), |source, url| {
            source.with_pdf(url, pdf(QUANTUM_TEXT))
        })
}

#[tokio::test]
async fn outcomes_follow_search_order() {
    let source = dated_papers(6).with_delay(Duration::from_millis(1));

    let outcomes = pipeline(Arc::new(source))
        .with_workers(3)
        .collect(
            &SearchQuery::new("quantum computing"),
            |_| {},
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let ids: Vec<&str> = outcomes.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "2401.00006",
            "2401.00005",
            "2401.00004",
            "2401.00003",
            "2401.00002",
            "2401.00001"
        ]
    );
    assert!(outcomes.iter().all(|o| o.status == PaperStatus::Success));
}

#[tokio::test]
async fn cancellation_stops_dispatch_of_remaining_papers() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let outcomes = pipeline(Arc::new(dated_papers(3)))
        .with_workers(1)
        .collect(
            &SearchQuery::new("quantum computing"),
            move |event| {
                if let ProgressEvent::PaperFinished { .. } = event {
                    trigger.cancel();
                }
            },
            cancel,
        )
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0].status, PaperStatus::Success);
    for skipped in &outcomes[1..] {
        assert_eq!(skipped.status, PaperStatus::Failed);
        assert!(skipped.errors[0].message.contains("cancelled"));
        assert_eq!(skipped.errors[0].stage, None);
    }
}

#[tokio::test]
async fn progress_events_bracket_the_batch() {
    let qp = quantum_paper();
    let source = Arc::new(MockSource::new(vec![qp.clone()]).with_pdf(&qp.pdf_url, pdf(QUANTUM_TEXT)));
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);

    pipeline(source)
        .collect(
            &SearchQuery::new("quantum"),
            move |event| sink.lock().unwrap().push(event),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert!(matches!(events.first(), Some(ProgressEvent::Searching { .. })));
    assert!(matches!(events.get(1), Some(ProgressEvent::Found { total: 1 })));
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::StageFinished {
            stage: Stage::Segmentation,
            ok: true,
            ..
        }
    )));
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Complete {
            total: 1,
            succeeded: 1,
            partial: 0,
            failed: 0
        })
    ));
}

/// Delegates to an [`ArxivConnector`] but panics while downloading one paper.
struct PanicsOnDownload {
    inner: ArxivConnector,
    paper_id: &'static str,
}

#[async_trait]
impl Connector for PanicsOnDownload {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn source_info(&self) -> SourceInfo {
        self.inner.source_info()
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<PaperMetadata>, PipelineError> {
        self.inner.search(query).await
    }

    async fn fetch_by_id(&self, id: &str) -> Result<PaperMetadata, PipelineError> {
        self.inner.fetch_by_id(id).await
    }

    async fn download_pdf(&self, paper: &PaperMetadata) -> Result<Vec<u8>, PipelineError> {
        if paper.id == self.paper_id {
            panic!("download of {} blew up", paper.id);
        }
        self.inner.download_pdf(paper).await
    }

    async fn extract_text(
        &self,
        paper: &PaperMetadata,
        pdf: Vec<u8>,
    ) -> Result<String, PipelineError> {
        self.inner.extract_text(paper, pdf).await
    }

    async fn segment(
        &self,
        paper: &PaperMetadata,
        text: &str,
    ) -> Result<Vec<Segment>, PipelineError> {
        self.inner.segment(paper, text).await
    }

    fn derive_entities(
        &self,
        paper: &PaperMetadata,
        segments: &[Segment],
    ) -> Result<Vec<Entity>, PipelineError> {
        self.inner.derive_entities(paper, segments)
    }

    fn derive_relations(
        &self,
        paper: &PaperMetadata,
        segments: &[Segment],
        entities: Option<&[Entity]>,
    ) -> Result<Vec<Relation>, PipelineError> {
        self.inner.derive_relations(paper, segments, entities)
    }
}

#[tokio::test]
async fn worker_panic_is_reported_as_aborted_not_cancelled() {
    let connector = PanicsOnDownload {
        inner: connector(Arc::new(dated_papers(3))),
        paper_id: "2401.00003",
    };
    let outcomes = Pipeline::new(Arc::new(connector))
        .with_workers(1)
        .collect(
            &SearchQuery::new("quantum computing"),
            |_| {},
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0].id, "2401.00003");
    for outcome in &outcomes {
        assert_eq!(outcome.status, PaperStatus::Failed);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].stage, None);
        assert!(outcome.errors[0].message.contains("worker aborted"));
        assert!(!outcome.errors[0].message.contains("cancelled"));
    }
}
