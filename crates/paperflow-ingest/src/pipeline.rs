//! Batch collection: search, then run the per-paper chain on a worker pool.
//!
//! Per paper: download → extract text → segment → derive entities →
//! derive relations → (embed) → store. A paper that fails aborts only
//! itself; a failed search aborts the batch.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Semaphore, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use paperflow_core::{
    Config, Entity, PaperMetadata, PipelineError, Relation, SearchQuery, Segment,
    SegmentEmbedding, Stage,
};

use crate::connector::Connector;
use crate::storage::{ArtifactStore, MetadataSummary, SegmentSummary};

const DEFAULT_WORKERS: usize = 4;

/// Events emitted while a batch runs.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Searching {
        query: String,
    },
    Found {
        total: usize,
    },
    PaperStarted {
        index: usize,
        total: usize,
        paper_id: String,
        title: String,
    },
    StageFinished {
        index: usize,
        paper_id: String,
        stage: Stage,
        ok: bool,
    },
    PaperFinished {
        index: usize,
        total: usize,
        paper_id: String,
        status: PaperStatus,
    },
    Complete {
        total: usize,
        succeeded: usize,
        partial: usize,
        failed: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperStatus {
    Success,
    /// Text was extracted but a later stage failed.
    Partial,
    /// No text was obtained.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageError {
    /// `None` when the paper never reached a stage (e.g. cancelled).
    pub stage: Option<Stage>,
    pub message: String,
}

impl From<&PipelineError> for StageError {
    fn from(err: &PipelineError) -> Self {
        Self {
            stage: err.stage(),
            message: err.to_string(),
        }
    }
}

/// What the chain derived for one paper, handed over by value.
#[derive(Debug, Clone)]
pub struct ProcessedPaper {
    pub metadata: PaperMetadata,
    pub segments: Vec<Segment>,
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    pub references: Vec<String>,
    pub embeddings: Vec<SegmentEmbedding>,
}

/// Result record for one searched paper.
#[derive(Debug, Clone, Serialize)]
pub struct PaperOutcome {
    pub id: String,
    pub title: String,
    pub status: PaperStatus,
    pub errors: Vec<StageError>,
    pub pdf_path: Option<PathBuf>,
    pub metadata_path: Option<PathBuf>,
    pub text_length: usize,
    pub segments_count: usize,
    pub entity_ids: Vec<Uuid>,
    pub relation_ids: Vec<Uuid>,
    pub references_count: usize,
    #[serde(skip)]
    pub processed: Option<ProcessedPaper>,
}

impl PaperOutcome {
    fn empty(paper: &PaperMetadata, status: PaperStatus) -> Self {
        Self {
            id: paper.id.clone(),
            title: paper.title.clone(),
            status,
            errors: Vec::new(),
            pdf_path: None,
            metadata_path: None,
            text_length: 0,
            segments_count: 0,
            entity_ids: Vec::new(),
            relation_ids: Vec::new(),
            references_count: 0,
            processed: None,
        }
    }

    /// The worker running this paper died without reporting back.
    fn aborted(paper: &PaperMetadata) -> Self {
        let mut outcome = Self::empty(paper, PaperStatus::Failed);
        outcome.errors.push(StageError {
            stage: None,
            message: "worker aborted before reporting an outcome".into(),
        });
        outcome
    }

    fn cancelled(paper: &PaperMetadata) -> Self {
        let mut outcome = Self::empty(paper, PaperStatus::Failed);
        outcome.errors.push(StageError {
            stage: None,
            message: "cancelled before processing started".into(),
        });
        outcome
    }
}

/// State shared by every worker.
struct Chain {
    connector: Arc<dyn Connector>,
    store: Option<ArtifactStore>,
    cpu_permits: Semaphore,
}

struct Job {
    paper: PaperMetadata,
    index: usize,
    total: usize,
    result_tx: oneshot::Sender<PaperOutcome>,
}

type Progress = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Orchestrates a collection run over one [`Connector`].
pub struct Pipeline {
    chain: Arc<Chain>,
    num_workers: usize,
}

impl Pipeline {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let cpu_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            chain: Arc::new(Chain {
                connector,
                store: None,
                cpu_permits: Semaphore::new(cpu_workers),
            }),
            num_workers: DEFAULT_WORKERS,
        }
    }

    /// Worker counts and output directory taken from `config`.
    pub fn from_config(connector: Arc<dyn Connector>, config: &Config) -> Self {
        Self {
            chain: Arc::new(Chain {
                connector,
                store: config.output_dir.clone().map(ArtifactStore::new),
                cpu_permits: Semaphore::new(config.cpu_workers.max(1)),
            }),
            num_workers: config.num_workers.max(1),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.num_workers = workers.max(1);
        self
    }

    /// Write PDFs and metadata summaries under `store`.
    ///
    /// Must be called before the pipeline is shared.
    pub fn with_store(mut self, store: ArtifactStore) -> Self {
        if let Some(chain) = Arc::get_mut(&mut self.chain) {
            chain.store = Some(store);
        }
        self
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.chain.connector
    }

    /// Search, then process every hit. Outcomes come back in search order.
    ///
    /// Cancelling `cancel` stops dispatch; papers not yet started are
    /// recorded as failed.
    pub async fn collect(
        &self,
        query: &SearchQuery,
        progress: impl Fn(ProgressEvent) + Send + Sync + 'static,
        cancel: CancellationToken,
    ) -> Result<Vec<PaperOutcome>, PipelineError> {
        let progress: Progress = Arc::new(progress);
        let connector = &self.chain.connector;

        connector.initialize().await?;
        if let Some(ref store) = self.chain.store {
            store.ensure_dirs().await.map_err(|e| PipelineError::Storage {
                paper_id: String::new(),
                reason: format!("{}: {e}", store.root().display()),
            })?;
        }

        progress(ProgressEvent::Searching {
            query: query.query.clone(),
        });
        let papers = connector.search(query).await?;
        let total = papers.len();
        progress(ProgressEvent::Found { total });
        tracing::info!(source = connector.name(), papers = total, "collection started");

        let (job_tx, job_rx) = async_channel::unbounded::<Job>();
        let workers: Vec<JoinHandle<()>> = (0..self.num_workers.min(total.max(1)))
            .map(|_| {
                tokio::spawn(worker_loop(
                    job_rx.clone(),
                    Arc::clone(&self.chain),
                    progress.clone(),
                    cancel.clone(),
                ))
            })
            .collect();
        drop(job_rx);

        let mut receivers = Vec::with_capacity(total);
        for (index, paper) in papers.iter().enumerate() {
            let (result_tx, result_rx) = oneshot::channel();
            let job = Job {
                paper: paper.clone(),
                index,
                total,
                result_tx,
            };
            if job_tx.send(job).await.is_err() {
                break;
            }
            receivers.push(result_rx);
        }
        // Once every worker is gone, queued jobs drop with the channel.
        drop(job_tx);

        let mut outcomes = Vec::with_capacity(total);
        for (index, paper) in papers.iter().enumerate() {
            let outcome = match receivers.get_mut(index) {
                Some(rx) => rx.await.unwrap_or_else(|_| PaperOutcome::aborted(paper)),
                None => PaperOutcome::aborted(paper),
            };
            outcomes.push(outcome);
        }

        for handle in workers {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "pipeline worker aborted");
            }
        }

        let count = |status| outcomes.iter().filter(|o| o.status == status).count();
        let (succeeded, partial, failed) = (
            count(PaperStatus::Success),
            count(PaperStatus::Partial),
            count(PaperStatus::Failed),
        );
        tracing::info!(total, succeeded, partial, failed, "collection complete");
        progress(ProgressEvent::Complete {
            total,
            succeeded,
            partial,
            failed,
        });
        Ok(outcomes)
    }

    /// Fetch one paper by id and run the chain on it.
    pub async fn process_id(&self, id: &str) -> Result<PaperOutcome, PipelineError> {
        let paper = self.chain.connector.fetch_by_id(id).await?;
        if let Some(ref store) = self.chain.store {
            store.ensure_dirs().await.map_err(|e| PipelineError::Storage {
                paper_id: paper.id.clone(),
                reason: e.to_string(),
            })?;
        }
        let progress: Progress = Arc::new(|_: ProgressEvent| {});
        Ok(self.chain.process(paper, 0, 1, &progress).await)
    }
}

async fn worker_loop(
    job_rx: async_channel::Receiver<Job>,
    chain: Arc<Chain>,
    progress: Progress,
    cancel: CancellationToken,
) {
    while let Ok(job) = job_rx.recv().await {
        let outcome = if cancel.is_cancelled() {
            tracing::debug!(paper_id = %job.paper.id, "skipping paper after cancellation");
            PaperOutcome::cancelled(&job.paper)
        } else {
            chain.process(job.paper, job.index, job.total, &progress).await
        };
        let _ = job.result_tx.send(outcome);
    }
}

/// Records one paper's stage results.
struct Run<'a> {
    index: usize,
    progress: &'a Progress,
    outcome: PaperOutcome,
    failed: bool,
}

impl Run<'_> {
    fn finished(&self, stage: Stage, ok: bool) {
        (self.progress)(ProgressEvent::StageFinished {
            index: self.index,
            paper_id: self.outcome.id.clone(),
            stage,
            ok,
        });
    }

    /// Keep the value, or note the error. Unimplemented capabilities are skipped silently.
    fn check<T>(&mut self, stage: Stage, result: Result<T, PipelineError>) -> Option<T> {
        match result {
            Ok(value) => {
                self.finished(stage, true);
                Some(value)
            }
            Err(PipelineError::Unimplemented(what)) => {
                tracing::debug!(paper_id = %self.outcome.id, what, "capability not available");
                None
            }
            Err(err) => {
                tracing::warn!(paper_id = %self.outcome.id, stage = %stage, error = %err, "stage failed");
                self.finished(stage, false);
                self.outcome.errors.push(StageError::from(&err));
                None
            }
        }
    }

    fn abort(&mut self) {
        self.failed = true;
    }

    fn status(&self) -> PaperStatus {
        if self.failed {
            PaperStatus::Failed
        } else if self.outcome.errors.is_empty() {
            PaperStatus::Success
        } else {
            PaperStatus::Partial
        }
    }
}

impl Chain {
    async fn process(
        &self,
        paper: PaperMetadata,
        index: usize,
        total: usize,
        progress: &Progress,
    ) -> PaperOutcome {
        progress(ProgressEvent::PaperStarted {
            index,
            total,
            paper_id: paper.id.clone(),
            title: paper.title.clone(),
        });
        tracing::info!(paper_id = %paper.id, index, total, "processing paper");

        let mut run = Run {
            index,
            progress,
            outcome: PaperOutcome::empty(&paper, PaperStatus::Success),
            failed: false,
        };
        let mut processed = ProcessedPaper {
            metadata: paper,
            segments: Vec::new(),
            entities: Vec::new(),
            relations: Vec::new(),
            references: Vec::new(),
            embeddings: Vec::new(),
        };

        self.run_stages(&mut run, &mut processed).await;

        if let Some(ref store) = self.store {
            let summary = MetadataSummary {
                paper: &processed.metadata,
                text_length: run.outcome.text_length,
                segments: processed.segments.iter().map(SegmentSummary::from).collect(),
                entities_count: processed.entities.len(),
                relations_count: processed.relations.len(),
                references_count: processed.references.len(),
                collected_at: Utc::now(),
            };
            let written = store
                .write_metadata(&summary)
                .await
                .map_err(|e| PipelineError::at(Stage::Storage, &processed.metadata.id, e));
            run.outcome.metadata_path = run.check(Stage::Storage, written);
        }

        let status = run.status();
        let mut outcome = run.outcome;
        outcome.status = status;
        outcome.processed = Some(processed);

        progress(ProgressEvent::PaperFinished {
            index,
            total,
            paper_id: outcome.id.clone(),
            status,
        });
        outcome
    }

    async fn run_stages(&self, run: &mut Run<'_>, processed: &mut ProcessedPaper) {
        let connector = self.connector.as_ref();
        let paper = &processed.metadata;

        let downloaded = connector.download_pdf(paper).await;
        let Some(pdf) = run.check(Stage::Download, downloaded) else {
            run.abort();
            return;
        };

        if let Some(ref store) = self.store {
            let written = store
                .write_pdf(&paper.id, &pdf)
                .await
                .map_err(|e| PipelineError::at(Stage::Storage, &paper.id, e));
            run.outcome.pdf_path = run.check(Stage::Storage, written);
        }

        let extracted = {
            let _permit = self.cpu_permits.acquire().await.ok();
            connector.extract_text(paper, pdf).await
        };
        let Some(text) = run.check(Stage::Extraction, extracted) else {
            run.abort();
            return;
        };
        run.outcome.text_length = text.chars().count();

        let references = connector.extract_references(&text);
        if let Some(references) = run.check(Stage::Extraction, references) {
            run.outcome.references_count = references.len();
            processed.references = references;
        }

        let segmented = {
            let _permit = self.cpu_permits.acquire().await.ok();
            connector.segment(paper, &text).await
        };
        let Some(segments) = run.check(Stage::Segmentation, segmented) else {
            return;
        };
        run.outcome.segments_count = segments.len();

        let embedded = connector.embed_segments(&segments).await;
        if let Some(embeddings) = run.check(Stage::Embedding, embedded) {
            processed.embeddings = embeddings;
        }

        let derived = connector.derive_entities(paper, &segments);
        let Some(entities) = run.check(Stage::EntityExtraction, derived) else {
            processed.segments = segments;
            return;
        };
        run.outcome.entity_ids = entities.iter().map(|e| e.id).collect();

        let related = connector.derive_relations(paper, &segments, Some(&entities));
        if let Some(relations) = run.check(Stage::RelationExtraction, related) {
            run.outcome.relation_ids = relations.iter().map(|r| r.id).collect();
            processed.relations = relations;
        }

        processed.segments = segments;
        processed.entities = entities;
    }
}
