//! Response shapes of the original `/api/predict/*` endpoints.

use serde::{Deserialize, Serialize};

use crate::{ClassLabel, ClassProbabilities};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradCamImages {
    /// `data:image/png;base64,...`
    pub heatmap: String,
    pub overlay: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictImageResponse {
    pub prediction: ClassLabel,
    pub prediction_class: usize,
    pub confidence: f32,
    pub probabilities: ClassProbabilities,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gradcam: Option<GradCamImages>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gradcam_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyFramePrediction {
    pub frame: usize,
    pub prediction: ClassLabel,
    pub prediction_class: usize,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacySummary {
    pub fake_frames: usize,
    pub real_frames: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictVideoResponse {
    pub prediction: ClassLabel,
    pub prediction_class: usize,
    pub confidence: f32,
    pub frames_analyzed: usize,
    pub frame_predictions: Vec<LegacyFramePrediction>,
    pub summary: LegacySummary,
}
