use std::sync::Arc;

use ndarray::{s, Array2};
use shared::ClassLabel;

use super::classifier::{probabilities_from_scores, CanonicalImage, Classifier, ClassifierError};

#[derive(Debug, thiserror::Error)]
pub enum SaliencyError {
    #[error("Saliency engine error: {0}")]
    Engine(String),
    #[error("Heatmap is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    ShapeMismatch {
        expected_width: usize,
        expected_height: usize,
        actual_width: usize,
        actual_height: usize,
    },
    #[error("Heatmap contains non-finite values")]
    NonFinite,
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
}

/// Produces a per-pixel attribution map for one output class.
pub trait SaliencyEngine: Send + Sync {
    /// Single-channel map shaped `(height, width)` of `image`.
    fn compute(&self, image: &CanonicalImage, target: ClassLabel)
        -> Result<Array2<f32>, SaliencyError>;

    fn name(&self) -> &'static str;
}

/// Occlusion sensitivity: slides a mean-valued patch over the input and
/// records how much the target probability drops. Works with any classifier.
pub struct OcclusionSaliency {
    classifier: Arc<dyn Classifier>,
    patch: usize,
    stride: usize,
}

impl OcclusionSaliency {
    pub fn new(classifier: Arc<dyn Classifier>, patch: u32, stride: u32) -> Self {
        Self {
            classifier,
            patch: patch.max(1) as usize,
            stride: stride.max(1) as usize,
        }
    }

    fn target_probability(
        &self,
        tensor: &ndarray::Array4<f32>,
        target: ClassLabel,
    ) -> Result<f32, SaliencyError> {
        let scores = self.classifier.infer(tensor)?;
        Ok(probabilities_from_scores(&scores)?.get(target))
    }
}

/// Window offsets along one axis; the last window is pinned to the edge.
fn window_offsets(size: usize, patch: usize, stride: usize) -> Vec<usize> {
    if patch >= size {
        return vec![0];
    }
    let last = size - patch;
    let mut offsets: Vec<usize> = (0..=last).step_by(stride).collect();
    if offsets.last() != Some(&last) {
        offsets.push(last);
    }
    offsets
}

impl SaliencyEngine for OcclusionSaliency {
    fn compute(
        &self,
        image: &CanonicalImage,
        target: ClassLabel,
    ) -> Result<Array2<f32>, SaliencyError> {
        let tensor = image.to_tensor();
        let (height, width) = (tensor.shape()[2], tensor.shape()[3]);
        let baseline = self.target_probability(&tensor, target)?;

        let mut heat = Array2::<f32>::zeros((height, width));
        let mut hits = Array2::<f32>::zeros((height, width));
        let patch_h = self.patch.min(height);
        let patch_w = self.patch.min(width);

        for y in window_offsets(height, patch_h, self.stride) {
            for x in window_offsets(width, patch_w, self.stride) {
                let mut occluded = tensor.clone();
                // Zero is the channel mean after normalization.
                occluded
                    .slice_mut(s![0, .., y..y + patch_h, x..x + patch_w])
                    .fill(0.0);
                let drop = (baseline - self.target_probability(&occluded, target)?).max(0.0);
                heat.slice_mut(s![y..y + patch_h, x..x + patch_w])
                    .mapv_inplace(|v| v + drop);
                hits.slice_mut(s![y..y + patch_h, x..x + patch_w])
                    .mapv_inplace(|v| v + 1.0);
            }
        }

        heat.zip_mut_with(&hits, |h, &n| {
            if n > 0.0 {
                *h /= n;
            }
        });
        Ok(heat)
    }

    fn name(&self) -> &'static str {
        "occlusion"
    }
}
