use chrono::{DateTime, Utc};
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use strum::IntoEnumIterator;

pub mod legacy;

/// Output classes of the detector, in the order the model emits them.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumIter,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ClassLabel {
    Fake,
    Real,
}

impl ClassLabel {
    pub fn index(self) -> usize {
        match self {
            ClassLabel::Fake => 0,
            ClassLabel::Real => 1,
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum VerdictLabel {
    Fake,
    Real,
    Uncertain,
}

impl From<ClassLabel> for VerdictLabel {
    fn from(class: ClassLabel) -> Self {
        match class {
            ClassLabel::Fake => VerdictLabel::Fake,
            ClassLabel::Real => VerdictLabel::Real,
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// How an image upload reaches the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ImageMode {
    /// The whole image is resized to the canonical size.
    Direct,
    /// A face must be located first; no face fails the request.
    FaceRequired,
}

/// Opaque per-request identifier; also names the request's results folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw).ok().map(Self)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassProbabilities {
    pub fake: f32,
    pub real: f32,
}

impl ClassProbabilities {
    pub fn get(&self, class: ClassLabel) -> f32 {
        match class {
            ClassLabel::Fake => self.fake,
            ClassLabel::Real => self.real,
        }
    }
}

/// Pixel rectangle inside the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramePredictionRecord {
    /// 1-based position among the analyzed frames.
    pub frame: usize,
    pub frame_index: u64,
    pub prediction: ClassLabel,
    pub confidence: f32,
    pub probabilities: ClassProbabilities,
    pub face_box: FaceBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Unreadable,
    NoFace,
    ClassifierFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedFrame {
    pub frame_index: u64,
    pub reason: SkipReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameBreakdown {
    pub frames_sampled: usize,
    pub frames_analyzed: usize,
    pub fake_frames: usize,
    pub real_frames: usize,
    pub predictions: Vec<FramePredictionRecord>,
    pub skipped: Vec<SkippedFrame>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SaliencyStatus {
    Available {
        overlay_uri: String,
        heatmap_uri: String,
    },
    Unavailable {
        reason: String,
    },
    Skipped,
}

impl SaliencyStatus {
    pub fn overlay_uri(&self) -> Option<&str> {
        match self {
            SaliencyStatus::Available { overlay_uri, .. } => Some(overlay_uri),
            _ => None,
        }
    }
}

/// Result of one analysis request, identical for image and video uploads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub request_id: RequestId,
    pub kind: MediaKind,
    pub verdict: VerdictLabel,
    pub prediction: ClassLabel,
    pub confidence_percent: f32,
    pub explanation: String,
    pub probabilities: ClassProbabilities,
    pub input_sha256: String,
    pub analyzed_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_mode: Option<ImageMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_box: Option<FaceBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frames: Option<FrameBreakdown>,
    pub saliency: SaliencyStatus,
}
