use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use image::ImageFormat;
use sha2::{Digest, Sha256};
use shared::{MediaKind, RequestId, SaliencyStatus};
use tempfile::NamedTempFile;

use crate::pipeline::explain::SaliencyResult;

pub const OVERLAY_FILE: &str = "overlay.png";
pub const HEATMAP_FILE: &str = "heatmap.png";
/// URL prefix under which `results_dir` is served.
pub const RESULTS_ROUTE: &str = "/results";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image encoding error: {0}")]
    Encode(#[from] image::ImageError),
    #[error("Upload is empty")]
    Empty,
    #[error("Upload of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
}

/// Owns the scratch area for uploads and the results area for saliency images.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    temp_dir: PathBuf,
    results_dir: PathBuf,
    max_upload_bytes: usize,
}

impl ArtifactStore {
    pub fn new(temp_dir: PathBuf, results_dir: PathBuf, max_upload_bytes: usize) -> Self {
        Self {
            temp_dir,
            results_dir,
            max_upload_bytes,
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.temp_dir)?;
        fs::create_dir_all(&self.results_dir)
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    pub fn calculate_hash(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    pub fn validate_upload(&self, data: &[u8]) -> Result<(), StorageError> {
        if data.is_empty() {
            return Err(StorageError::Empty);
        }
        if data.len() > self.max_upload_bytes {
            return Err(StorageError::TooLarge {
                size: data.len(),
                limit: self.max_upload_bytes,
            });
        }
        Ok(())
    }

    /// Writes the upload to a scratch file that is removed when released or dropped.
    pub fn spool_upload(&self, data: &[u8], kind: MediaKind) -> Result<TransientUpload, StorageError> {
        self.validate_upload(data)?;
        fs::create_dir_all(&self.temp_dir)?;
        let suffix = match kind {
            MediaKind::Image => ".img",
            MediaKind::Video => ".mp4",
        };
        let mut file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(suffix)
            .tempfile_in(&self.temp_dir)?;
        file.write_all(data)?;
        file.flush()?;
        log::debug!("Spooled {} byte upload to {}", data.len(), file.path().display());
        Ok(TransientUpload { file: Some(file) })
    }

    fn request_dir(&self, id: &RequestId) -> PathBuf {
        self.results_dir.join(id.to_string())
    }

    /// Writes heatmap and overlay PNGs under `results_dir/{id}/`.
    pub fn store_saliency(
        &self,
        id: &RequestId,
        result: &SaliencyResult,
    ) -> Result<PendingArtifacts, StorageError> {
        let dir = self.request_dir(id);
        fs::create_dir_all(&dir)?;
        // Armed before writing so a failed write still cleans up the folder.
        let pending = PendingArtifacts {
            dir: Some(dir.clone()),
            overlay_uri: format!("{}/{}/{}", RESULTS_ROUTE, id, OVERLAY_FILE),
            heatmap_uri: format!("{}/{}/{}", RESULTS_ROUTE, id, HEATMAP_FILE),
        };
        result
            .overlay
            .save_with_format(dir.join(OVERLAY_FILE), ImageFormat::Png)?;
        result
            .heatmap_image()
            .save_with_format(dir.join(HEATMAP_FILE), ImageFormat::Png)?;
        Ok(pending)
    }

    /// Removes everything stored for `id`. Returns whether anything existed.
    pub fn cleanup(&self, id: &RequestId) -> Result<bool, StorageError> {
        let dir = self.request_dir(id);
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&dir)?;
        log::info!("Removed artifacts for request {}", id);
        Ok(true)
    }
}

/// Scratch copy of an upload. Release is idempotent; drop releases too.
#[derive(Debug)]
pub struct TransientUpload {
    file: Option<NamedTempFile>,
}

impl TransientUpload {
    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path())
    }

    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            let path = file.path().to_path_buf();
            if let Err(e) = file.close() {
                log::warn!("Failed to remove upload {}: {}", path.display(), e);
            }
        }
    }
}

impl Drop for TransientUpload {
    fn drop(&mut self) {
        self.release();
    }
}

/// Saliency files not yet handed to the caller. Dropped without
/// [`PendingArtifacts::commit`], the request folder is deleted.
#[derive(Debug)]
pub struct PendingArtifacts {
    dir: Option<PathBuf>,
    overlay_uri: String,
    heatmap_uri: String,
}

impl PendingArtifacts {
    /// Where the files will be served once committed.
    pub fn status(&self) -> SaliencyStatus {
        SaliencyStatus::Available {
            overlay_uri: self.overlay_uri.clone(),
            heatmap_uri: self.heatmap_uri.clone(),
        }
    }

    /// Keeps the files; they now belong to the caller.
    pub fn commit(mut self) {
        self.dir = None;
    }

    pub fn discard(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = fs::remove_dir_all(&dir) {
                log::warn!("Failed to remove artifacts {}: {}", dir.display(), e);
            }
        }
    }
}

impl Drop for PendingArtifacts {
    fn drop(&mut self) {
        self.discard();
    }
}
