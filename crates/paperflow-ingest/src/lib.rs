pub mod connector;
pub mod pipeline;
pub mod storage;

pub use connector::{ArxivConnector, Connector};
pub use pipeline::{
    PaperOutcome, PaperStatus, Pipeline, ProcessedPaper, ProgressEvent, StageError,
};
pub use storage::ArtifactStore;
