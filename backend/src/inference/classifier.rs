use std::panic::{self, AssertUnwindSafe};

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use shared::{ClassLabel, ClassProbabilities};

/// Side length of the square input the detector was trained on.
pub const CANONICAL_SIZE: u32 = 224;

/// ImageNet statistics used during training.
pub const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Classifier returned {0} scores, expected 2")]
    UnexpectedOutput(usize),
    #[error("Classifier returned non-finite scores")]
    NonFinite,
    #[error("Classifier backend error: {0}")]
    Backend(String),
}

/// A loaded binary real/fake model. Implementations must be safe to call
/// concurrently once constructed.
pub trait Classifier: Send + Sync {
    /// Raw scores (logits) for a `[1, 3, 224, 224]` normalized tensor.
    fn infer(&self, input: &Array4<f32>) -> Result<Vec<f32>, ClassifierError>;

    fn device(&self) -> String {
        "cpu".to_string()
    }
}

/// RGB raster at the canonical size.
#[derive(Debug, Clone)]
pub struct CanonicalImage(RgbImage);

impl CanonicalImage {
    /// Resizes with bilinear filtering regardless of the source aspect ratio.
    pub fn from_image(image: &RgbImage) -> Self {
        if image.dimensions() == (CANONICAL_SIZE, CANONICAL_SIZE) {
            return Self(image.clone());
        }
        Self(imageops::resize(
            image,
            CANONICAL_SIZE,
            CANONICAL_SIZE,
            FilterType::Triangle,
        ))
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.0
    }

    /// NCHW tensor normalized with the training statistics.
    pub fn to_tensor(&self) -> Array4<f32> {
        let size = CANONICAL_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in self.0.enumerate_pixels() {
            for channel in 0..3 {
                let value = pixel[channel] as f32 / 255.0;
                tensor[[0, channel, y as usize, x as usize]] =
                    (value - CHANNEL_MEAN[channel]) / CHANNEL_STD[channel];
            }
        }
        tensor
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitPrediction {
    pub class: ClassLabel,
    pub confidence: f32,
    pub probabilities: ClassProbabilities,
}

impl UnitPrediction {
    /// Argmax over the probability vector; the lower index wins an exact tie.
    pub fn from_probabilities(probabilities: ClassProbabilities) -> Self {
        let class = if probabilities.real > probabilities.fake {
            ClassLabel::Real
        } else {
            ClassLabel::Fake
        };
        Self {
            class,
            confidence: probabilities.get(class),
            probabilities,
        }
    }
}

pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|&s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|&e| e / sum).collect()
}

pub fn probabilities_from_scores(scores: &[f32]) -> Result<ClassProbabilities, ClassifierError> {
    if scores.len() != 2 {
        return Err(ClassifierError::UnexpectedOutput(scores.len()));
    }
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(ClassifierError::NonFinite);
    }
    let probs = softmax(scores);
    Ok(ClassProbabilities {
        fake: probs[ClassLabel::Fake.index()],
        real: probs[ClassLabel::Real.index()],
    })
}

/// Runs one forward pass. A panicking backend is reported as
/// [`ClassifierError::Backend`] instead of unwinding into the caller.
pub fn classify(
    classifier: &dyn Classifier,
    image: &CanonicalImage,
) -> Result<UnitPrediction, ClassifierError> {
    let input = image.to_tensor();
    let scores = match panic::catch_unwind(AssertUnwindSafe(|| classifier.infer(&input))) {
        Ok(scores) => scores?,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            return Err(ClassifierError::Backend(format!("inference panicked: {}", message)));
        }
    };
    let probabilities = probabilities_from_scores(&scores)?;
    Ok(UnitPrediction::from_probabilities(probabilities))
}
