pub mod classifier;
pub mod detector;
#[cfg(feature = "libtorch")]
pub mod model;
pub mod saliency;

use std::sync::Arc;

use crate::config::{ExplainConfig, PipelineConfig, SaliencyKind};
use crate::media::{FfmpegDecoder, VideoDecoder};

use classifier::{Classifier, ClassifierError};
use detector::{DetectorLoadError, FaceDetector, RustfaceDetector};
use saliency::{OcclusionSaliency, SaliencyEngine};

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Failed to load classifier: {0}")]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Detector(#[from] DetectorLoadError),
    #[error("No classifier backend compiled in; rebuild with --features libtorch")]
    NoClassifierBackend,
}

/// Loaded collaborators shared read-only by every request.
#[derive(Clone)]
pub struct InferenceContext {
    pub classifier: Arc<dyn Classifier>,
    pub detector: Arc<dyn FaceDetector>,
    /// `None` when explanations are disabled.
    pub saliency: Option<Arc<dyn SaliencyEngine>>,
    pub decoder: Arc<dyn VideoDecoder>,
}

impl InferenceContext {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        detector: Arc<dyn FaceDetector>,
        saliency: Option<Arc<dyn SaliencyEngine>>,
        decoder: Arc<dyn VideoDecoder>,
    ) -> Self {
        Self {
            classifier,
            detector,
            saliency,
            decoder,
        }
    }

    /// Loads every backend named by the config. Called once at startup.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ContextError> {
        let detector = Arc::new(RustfaceDetector::load(
            &config.model.face_model_path,
            config.face.clone(),
        )?);
        let (classifier, saliency) = load_model(config)?;
        log::info!(
            "Inference context ready: device={}, saliency={}",
            classifier.device(),
            saliency.as_ref().map(|s| s.name()).unwrap_or("disabled")
        );
        Ok(Self::new(
            classifier,
            detector,
            saliency,
            Arc::new(FfmpegDecoder::new()),
        ))
    }

    pub fn saliency_name(&self) -> &'static str {
        self.saliency.as_ref().map(|s| s.name()).unwrap_or("disabled")
    }
}

/// Occlusion engine sized by the `explain` config section.
pub fn occlusion_engine(
    explain: &ExplainConfig,
    classifier: Arc<dyn Classifier>,
) -> Arc<dyn SaliencyEngine> {
    Arc::new(OcclusionSaliency::new(
        classifier,
        explain.occlusion_patch,
        explain.occlusion_stride,
    ))
}

type LoadedModel = (Arc<dyn Classifier>, Option<Arc<dyn SaliencyEngine>>);

#[cfg(feature = "libtorch")]
fn load_model(config: &PipelineConfig) -> Result<LoadedModel, ContextError> {
    use model::{TorchClassifier, TorchGradientSaliency};

    let torch = TorchClassifier::load(&config.model.classifier_path, config.model.use_cuda)?;
    let classifier: Arc<dyn Classifier> = Arc::new(torch.clone());
    let saliency = match (config.explain.enabled, config.explain.engine) {
        (false, _) => None,
        (true, SaliencyKind::Gradient) => {
            Some(Arc::new(TorchGradientSaliency::new(torch)) as Arc<dyn SaliencyEngine>)
        }
        (true, SaliencyKind::Occlusion) => Some(occlusion_engine(&config.explain, classifier.clone())),
    };
    Ok((classifier, saliency))
}

#[cfg(not(feature = "libtorch"))]
fn load_model(config: &PipelineConfig) -> Result<LoadedModel, ContextError> {
    if config.explain.engine == SaliencyKind::Gradient {
        log::warn!("Gradient saliency needs the libtorch feature");
    }
    Err(ContextError::NoClassifierBackend)
}
