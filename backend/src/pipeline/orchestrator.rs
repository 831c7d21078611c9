use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use image::RgbImage;
use shared::{
    AnalysisRecord, ClassLabel, ClassProbabilities, FaceBox, FrameBreakdown,
    FramePredictionRecord, ImageMode, MediaKind, RequestId, SaliencyStatus, SkipReason,
    SkippedFrame,
};

use crate::config::{PipelineConfig, VideoConfig};
use crate::error::PipelineError;
use crate::inference::classifier::{classify, CanonicalImage, ClassifierError, UnitPrediction};
use crate::inference::InferenceContext;
use crate::storage::{ArtifactStore, PendingArtifacts};

use super::aggregate::{aggregate, representative, AggregateError, FramePrediction};
use super::explain::{explain, Explanation, SaliencyResult};
use super::face::{locate, FaceLocation};
use super::sampler::sample_indices;
use super::verdict::resolve;

/// One upload to analyze.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub kind: MediaKind,
    pub bytes: Vec<u8>,
    /// Ignored for video, where every frame goes through face localization.
    pub image_mode: ImageMode,
    pub frames_wanted: Option<usize>,
    pub explain: bool,
}

impl AnalysisRequest {
    pub fn image(bytes: Vec<u8>, image_mode: ImageMode) -> Self {
        Self {
            kind: MediaKind::Image,
            bytes,
            image_mode,
            frames_wanted: None,
            explain: true,
        }
    }

    pub fn video(bytes: Vec<u8>, frames_wanted: Option<usize>) -> Self {
        Self {
            kind: MediaKind::Video,
            bytes,
            image_mode: ImageMode::FaceRequired,
            frames_wanted,
            explain: true,
        }
    }

    pub fn with_explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }
}

/// A finished analysis. Saliency files referenced by the record are removed
/// when this is dropped unless [`Analysis::commit`] was called.
#[derive(Debug)]
pub struct Analysis {
    pub record: AnalysisRecord,
    pub saliency: Option<SaliencyResult>,
    artifacts: Option<PendingArtifacts>,
}

impl Analysis {
    pub fn commit(mut self) -> Self {
        if let Some(artifacts) = self.artifacts.take() {
            artifacts.commit();
        }
        self
    }
}

/// Classification of one unit (an image or the decisive video frame) plus
/// everything the record needs besides the verdict.
struct Outcome {
    class: ClassLabel,
    confidence: f32,
    probabilities: ClassProbabilities,
    face_box: Option<FaceBox>,
    frames: Option<FrameBreakdown>,
    /// Canonical image the explanation is computed on.
    subject: CanonicalImage,
}

#[derive(Clone)]
pub struct Orchestrator {
    context: InferenceContext,
    store: ArtifactStore,
    video: VideoConfig,
    image_weight: f32,
}

impl Orchestrator {
    pub fn new(context: InferenceContext, store: ArtifactStore, config: &PipelineConfig) -> Self {
        Self {
            context,
            store,
            video: config.video.clone(),
            image_weight: config.explain.image_weight,
        }
    }

    pub fn context(&self) -> &InferenceContext {
        &self.context
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn analyze(&self, request: AnalysisRequest) -> Result<Analysis, PipelineError> {
        let started = Instant::now();
        let request_id = RequestId::new();
        let input_sha256 = ArtifactStore::calculate_hash(&request.bytes);

        let mut upload = self.store.spool_upload(&request.bytes, request.kind)?;
        let result = match upload.path() {
            Some(path) => match request.kind {
                MediaKind::Image => self.analyze_image(path, request.image_mode),
                MediaKind::Video => self.analyze_video(path, request.frames_wanted),
            },
            None => Err(PipelineError::Io(std::io::Error::other("upload already released"))),
        };
        upload.release();

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Request {} ({}) failed: {}", request_id, request.kind, e);
                return Err(e);
            }
        };

        let verdict = resolve(outcome.class, outcome.confidence);
        let (saliency_status, saliency, artifacts) = if request.explain {
            self.explain_subject(&request_id, &outcome.subject, outcome.class)
        } else {
            (SaliencyStatus::Skipped, None, None)
        };

        let record = AnalysisRecord {
            request_id,
            kind: request.kind,
            verdict: verdict.label,
            prediction: outcome.class,
            confidence_percent: verdict.confidence_percent as f32,
            explanation: verdict.explanation,
            probabilities: outcome.probabilities,
            input_sha256,
            analyzed_at: Utc::now(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            image_mode: (request.kind == MediaKind::Image).then_some(request.image_mode),
            face_box: outcome.face_box,
            frames: outcome.frames,
            saliency: saliency_status,
        };
        log::info!(
            "Request {} ({}): {} at {:.1}% in {} ms",
            record.request_id,
            record.kind,
            record.verdict,
            record.confidence_percent,
            record.elapsed_ms
        );

        Ok(Analysis {
            record,
            saliency,
            artifacts,
        })
    }

    fn analyze_image(&self, path: &Path, mode: ImageMode) -> Result<Outcome, PipelineError> {
        let image = decode_image(path)?;
        let (subject, face_box) = match mode {
            ImageMode::Direct => (CanonicalImage::from_image(&image), None),
            ImageMode::FaceRequired => match locate(self.context.detector.as_ref(), &image) {
                FaceLocation::Found(region) => {
                    let face_box = region.source_box();
                    (region.into_image(), Some(face_box))
                }
                FaceLocation::NoFaceFound => {
                    return Err(PipelineError::NoFaceDetected(MediaKind::Image));
                }
            },
        };

        let prediction = classify(self.context.classifier.as_ref(), &subject)?;
        Ok(Outcome {
            class: prediction.class,
            confidence: prediction.confidence,
            probabilities: prediction.probabilities,
            face_box,
            frames: None,
            subject,
        })
    }

    fn analyze_video(
        &self,
        path: &Path,
        frames_wanted: Option<usize>,
    ) -> Result<Outcome, PipelineError> {
        let decoder = self.context.decoder.as_ref();
        let total = decoder
            .frame_count(path)
            .map_err(|e| PipelineError::Decode(e.to_string()))?;
        if total == 0 {
            return Err(PipelineError::Decode("video contains no frames".into()));
        }

        let indices = sample_indices(total, self.video.frames_wanted(frames_wanted));
        log::debug!("Sampling frames {:?} of {}", indices, total);

        let mut predictions: Vec<FramePrediction> = Vec::new();
        let mut subjects: Vec<CanonicalImage> = Vec::new();
        let mut skipped: Vec<SkippedFrame> = Vec::new();
        let mut faces_found = 0usize;
        let mut last_failure: Option<ClassifierError> = None;

        for &index in &indices {
            let frame = match decoder.read_frame(path, index) {
                Ok(frame) => frame,
                Err(e) => {
                    log::warn!("Skipping unreadable frame {}: {}", index, e);
                    skipped.push(skip(index, SkipReason::Unreadable, Some(e.to_string())));
                    continue;
                }
            };
            let region = match locate(self.context.detector.as_ref(), &frame) {
                FaceLocation::Found(region) => region,
                FaceLocation::NoFaceFound => {
                    log::debug!("No face in frame {}", index);
                    skipped.push(skip(index, SkipReason::NoFace, None));
                    continue;
                }
            };
            faces_found += 1;

            match classify(self.context.classifier.as_ref(), region.image()) {
                Ok(prediction) => {
                    log::debug!(
                        "Frame {}: {} ({:.4})",
                        index,
                        prediction.class,
                        prediction.confidence
                    );
                    predictions.push(FramePrediction {
                        frame: predictions.len() + 1,
                        frame_index: index,
                        prediction,
                        face_box: region.source_box(),
                    });
                    subjects.push(region.into_image());
                }
                Err(e) => {
                    log::warn!("Excluding frame {} after classifier failure: {}", index, e);
                    skipped.push(skip(
                        index,
                        SkipReason::ClassifierFailure,
                        Some(e.to_string()),
                    ));
                    last_failure = Some(e);
                }
            }
        }

        let verdict = match aggregate(&predictions) {
            Ok(verdict) => verdict,
            Err(AggregateError::Empty) => {
                return Err(no_usable_frames(&skipped, faces_found, last_failure));
            }
        };

        let subject = representative(&predictions, verdict.final_class)
            .and_then(|i| subjects.get(i).cloned())
            .ok_or_else(|| PipelineError::Io(std::io::Error::other("representative frame missing")))?;

        let frames = FrameBreakdown {
            frames_sampled: indices.len(),
            frames_analyzed: predictions.len(),
            fake_frames: verdict.fake_count,
            real_frames: verdict.real_count,
            predictions: predictions.iter().map(frame_record).collect(),
            skipped,
        };

        Ok(Outcome {
            class: verdict.final_class,
            confidence: verdict.confidence,
            probabilities: mean_probabilities(&predictions),
            face_box: None,
            frames: Some(frames),
            subject,
        })
    }

    fn explain_subject(
        &self,
        request_id: &RequestId,
        subject: &CanonicalImage,
        target: ClassLabel,
    ) -> (SaliencyStatus, Option<SaliencyResult>, Option<PendingArtifacts>) {
        let Some(engine) = self.context.saliency.as_ref() else {
            return (SaliencyStatus::Skipped, None, None);
        };

        match explain(engine.as_ref(), subject, target, self.image_weight) {
            Explanation::Ready(result) => match self.store.store_saliency(request_id, &result) {
                Ok(artifacts) => (artifacts.status(), Some(result), Some(artifacts)),
                Err(e) => {
                    log::warn!("Could not store saliency for {}: {}", request_id, e);
                    let reason = format!("saliency images could not be stored: {}", e);
                    (SaliencyStatus::Unavailable { reason }, Some(result), None)
                }
            },
            Explanation::Failed(failure) => {
                log::warn!(
                    "{} saliency failed for {}: {}",
                    engine.name(),
                    request_id,
                    failure.message
                );
                (
                    SaliencyStatus::Unavailable {
                        reason: failure.message,
                    },
                    None,
                    None,
                )
            }
        }
    }
}

fn decode_image(path: &Path) -> Result<RgbImage, PipelineError> {
    let reader = image::ImageReader::open(path)?
        .with_guessed_format()
        .map_err(PipelineError::Io)?;
    let image = reader
        .decode()
        .map_err(|e| PipelineError::Decode(e.to_string()))?;
    Ok(image.to_rgb8())
}

fn skip(frame_index: u64, reason: SkipReason, message: Option<String>) -> SkippedFrame {
    SkippedFrame {
        frame_index,
        reason,
        message,
    }
}

/// Picks the failure that explains why no frame produced a prediction.
fn no_usable_frames(
    skipped: &[SkippedFrame],
    faces_found: usize,
    last_failure: Option<ClassifierError>,
) -> PipelineError {
    if faces_found > 0 {
        if let Some(e) = last_failure {
            return PipelineError::Classifier(e);
        }
    }
    if !skipped.is_empty() && skipped.iter().all(|s| s.reason == SkipReason::Unreadable) {
        return PipelineError::Decode(format!(
            "none of the {} sampled frames could be decoded",
            skipped.len()
        ));
    }
    PipelineError::NoFaceDetected(MediaKind::Video)
}

fn frame_record(frame: &FramePrediction) -> FramePredictionRecord {
    let UnitPrediction {
        class,
        confidence,
        probabilities,
    } = frame.prediction;
    FramePredictionRecord {
        frame: frame.frame,
        frame_index: frame.frame_index,
        prediction: class,
        confidence,
        probabilities,
        face_box: frame.face_box,
    }
}

fn mean_probabilities(predictions: &[FramePrediction]) -> ClassProbabilities {
    let n = predictions.len().max(1) as f32;
    let (fake, real) = predictions.iter().fold((0.0f32, 0.0f32), |(f, r), p| {
        (f + p.prediction.probabilities.fake, r + p.prediction.probabilities.real)
    });
    ClassProbabilities {
        fake: fake / n,
        real: real / n,
    }
}
