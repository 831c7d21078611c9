pub mod artifacts;

pub use artifacts::{ArtifactStore, PendingArtifacts, StorageError, TransientUpload};
