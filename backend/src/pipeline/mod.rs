//! Request orchestration: sampling, face localization, classification,
//! aggregation, verdict banding and best-effort explanation.

pub mod aggregate;
pub mod explain;
pub mod face;
pub mod orchestrator;
pub mod sampler;
pub mod verdict;

pub use orchestrator::{Analysis, AnalysisRequest, Orchestrator};
