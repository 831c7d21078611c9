#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use deeptrust::config::PipelineConfig;
use deeptrust::inference::classifier::{CanonicalImage, Classifier, ClassifierError};
use deeptrust::inference::detector::{FaceCandidate, FaceDetector, RelativeBox};
use deeptrust::inference::saliency::{SaliencyEngine, SaliencyError};
use deeptrust::media::{DecodeError, VideoDecoder};
use deeptrust::{ArtifactStore, InferenceContext, Orchestrator};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use ndarray::{Array2, Array4};
use shared::ClassLabel;
use tempfile::TempDir;

/// Logits whose softmax gives `class` exactly `confidence`.
pub fn scores_for(class: ClassLabel, confidence: f32) -> Vec<f32> {
    let logit = (confidence / (1.0 - confidence)).ln();
    match class {
        ClassLabel::Fake => vec![logit, 0.0],
        ClassLabel::Real => vec![0.0, logit],
    }
}

/// Replays queued outputs in order; repeats the fallback once drained.
pub struct ScriptedClassifier {
    script: Mutex<VecDeque<Result<Vec<f32>, String>>>,
    fallback: Vec<f32>,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn new(script: Vec<Result<Vec<f32>, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: scores_for(ClassLabel::Real, 0.9),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(scores: Vec<f32>) -> Self {
        let mut classifier = Self::new(Vec::new());
        classifier.fallback = scores;
        classifier
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Classifier for ScriptedClassifier {
    fn infer(&self, input: &Array4<f32>) -> Result<Vec<f32>, ClassifierError> {
        assert_eq!(input.shape(), &[1, 3, 224, 224]);
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(scores)) => Ok(scores),
            Some(Err(message)) => Err(ClassifierError::Backend(message)),
            None => Ok(self.fallback.clone()),
        }
    }
}

/// Panics on the `nth` call (1-based) while holding its lock, like a
/// backend that dies mid forward pass.
pub struct PanicOnCall {
    calls: Mutex<usize>,
    nth: usize,
    scores: Vec<f32>,
}

impl PanicOnCall {
    pub fn new(nth: usize, scores: Vec<f32>) -> Self {
        Self {
            calls: Mutex::new(0),
            nth,
            scores,
        }
    }
}

impl Classifier for PanicOnCall {
    fn infer(&self, _input: &Array4<f32>) -> Result<Vec<f32>, ClassifierError> {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        *calls += 1;
        if *calls == self.nth {
            panic!("CUDA error: an illegal memory access was encountered");
        }
        Ok(self.scores.clone())
    }
}

/// Reports one face covering the centre of every image.
#[derive(Default)]
pub struct CentreFaceDetector {
    pub calls: AtomicUsize,
}

impl FaceDetector for CentreFaceDetector {
    fn detect(&self, _image: &RgbImage) -> Vec<FaceCandidate> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        vec![FaceCandidate {
            bbox: RelativeBox {
                xmin: 0.25,
                ymin: 0.25,
                width: 0.5,
                height: 0.5,
            },
            score: 10.0,
        }]
    }
}

#[derive(Default)]
pub struct NoFaceDetector {
    pub calls: AtomicUsize,
}

impl FaceDetector for NoFaceDetector {
    fn detect(&self, _image: &RgbImage) -> Vec<FaceCandidate> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Vec::new()
    }
}

pub struct PanickingDetector;

impl FaceDetector for PanickingDetector {
    fn detect(&self, _image: &RgbImage) -> Vec<FaceCandidate> {
        panic!("cascade model corrupted");
    }
}

/// Gradient map, or a fixed error.
pub struct StubSaliency {
    pub failure: Option<String>,
}

impl StubSaliency {
    pub fn working() -> Self {
        Self { failure: None }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
        }
    }
}

impl SaliencyEngine for StubSaliency {
    fn compute(
        &self,
        image: &CanonicalImage,
        _target: ClassLabel,
    ) -> Result<Array2<f32>, SaliencyError> {
        if let Some(message) = &self.failure {
            return Err(SaliencyError::Engine(message.clone()));
        }
        let (width, height) = image.as_rgb().dimensions();
        Ok(Array2::from_shape_fn(
            (height as usize, width as usize),
            |(y, x)| (x + y) as f32,
        ))
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// Frames held in memory; `None` marks a frame that fails to decode.
pub struct MemoryDecoder {
    frames: Vec<Option<RgbImage>>,
}

impl MemoryDecoder {
    pub fn new(frames: Vec<Option<RgbImage>>) -> Self {
        Self { frames }
    }

    pub fn readable(count: usize) -> Self {
        Self::new((0..count).map(|i| Some(frame(i as u8))).collect())
    }
}

impl VideoDecoder for MemoryDecoder {
    fn frame_count(&self, path: &Path) -> Result<u64, DecodeError> {
        assert!(path.exists(), "upload should be spooled while decoding");
        Ok(self.frames.len() as u64)
    }

    fn read_frame(&self, _path: &Path, index: u64) -> Result<RgbImage, DecodeError> {
        match self.frames.get(index as usize) {
            Some(Some(image)) => Ok(image.clone()),
            Some(None) => Err(DecodeError::ToolFailed {
                tool: "ffmpeg",
                stderr: "corrupt packet".into(),
            }),
            None => Err(DecodeError::FrameOutOfRange(index)),
        }
    }
}

pub fn frame(shade: u8) -> RgbImage {
    RgbImage::from_fn(160, 120, |x, y| Rgb([shade, (x % 256) as u8, (y % 256) as u8]))
}

pub fn png_bytes(image: &RgbImage) -> Vec<u8> {
    let mut buffer = Vec::new();
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .unwrap();
    buffer
}

pub fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

pub struct Fixture {
    pub root: TempDir,
    pub orchestrator: Orchestrator,
}

impl Fixture {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        detector: Arc<dyn FaceDetector>,
        saliency: Option<Arc<dyn SaliencyEngine>>,
        decoder: Arc<dyn VideoDecoder>,
    ) -> Self {
        let root = TempDir::new().unwrap();
        let config = PipelineConfig::default();
        let store = ArtifactStore::new(
            root.path().join("temp"),
            root.path().join("results"),
            config.server.max_upload_bytes,
        );
        store.ensure_dirs().unwrap();
        let context = InferenceContext::new(classifier, detector, saliency, decoder);
        Self {
            orchestrator: Orchestrator::new(context, store, &config),
            root,
        }
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.path().join("temp")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.path().join("results")
    }
}
