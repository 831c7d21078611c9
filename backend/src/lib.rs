pub mod adapters;
pub mod config;
pub mod error;
pub mod inference;
pub mod media;
pub mod pipeline;
pub mod routes;
pub mod storage;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use inference::InferenceContext;
pub use pipeline::{Analysis, AnalysisRequest, Orchestrator};
pub use storage::ArtifactStore;
