use std::fs::File;
use std::path::Path;

use image::{imageops, RgbImage};

use crate::config::FaceConfig;

/// Bounding box in coordinates relative to the image size (0..1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelativeBox {
    pub xmin: f32,
    pub ymin: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceCandidate {
    pub bbox: RelativeBox,
    pub score: f64,
}

/// Pluggable face detection backend.
pub trait FaceDetector: Send + Sync {
    /// Candidates ranked best first; may be empty.
    fn detect(&self, image: &RgbImage) -> Vec<FaceCandidate>;
}

#[derive(Debug, thiserror::Error)]
pub enum DetectorLoadError {
    #[error("Failed to open face model {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse face model: {0}")]
    Parse(String),
}

/// SeetaFace cascade detector via `rustface`.
pub struct RustfaceDetector {
    model: rustface::Model,
    settings: FaceConfig,
}

impl RustfaceDetector {
    pub fn load(path: &Path, settings: FaceConfig) -> Result<Self, DetectorLoadError> {
        let file = File::open(path).map_err(|source| DetectorLoadError::Open {
            path: path.display().to_string(),
            source,
        })?;
        let model = rustface::read_model(file)
            .map_err(|e| DetectorLoadError::Parse(format!("{:?}", e)))?;
        log::info!("Loaded face detection model from {}", path.display());
        Ok(Self { model, settings })
    }
}

impl FaceDetector for RustfaceDetector {
    fn detect(&self, image: &RgbImage) -> Vec<FaceCandidate> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Vec::new();
        }
        let gray = imageops::grayscale(image);

        // The cascade keeps per-scan state, so each call gets its own detector.
        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(self.settings.min_face_size);
        detector.set_score_thresh(self.settings.score_thresh);
        detector.set_pyramid_scale_factor(self.settings.pyramid_scale_factor);
        detector.set_slide_window_step(
            self.settings.slide_window_step,
            self.settings.slide_window_step,
        );

        let mut faces = detector.detect(&rustface::ImageData::new(gray.as_raw(), width, height));
        faces.sort_by(|a, b| b.score().total_cmp(&a.score()));

        faces
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                FaceCandidate {
                    bbox: RelativeBox {
                        xmin: bbox.x() as f32 / width as f32,
                        ymin: bbox.y() as f32 / height as f32,
                        width: bbox.width() as f32 / width as f32,
                        height: bbox.height() as f32 / height as f32,
                    },
                    score: face.score(),
                }
            })
            .collect()
    }
}
