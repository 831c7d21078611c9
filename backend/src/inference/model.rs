use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use ndarray::{Array2, Array4};
use shared::ClassLabel;
use tch::{CModule, Device, Kind, TchError, Tensor};

use super::classifier::{CanonicalImage, Classifier, ClassifierError, CANONICAL_SIZE};
use super::saliency::{SaliencyEngine, SaliencyError};

impl From<TchError> for ClassifierError {
    fn from(e: TchError) -> Self {
        ClassifierError::Backend(e.to_string())
    }
}

fn engine_error(e: TchError) -> SaliencyError {
    SaliencyError::Engine(e.to_string())
}

/// TorchScript export of the trained detector.
#[derive(Clone)]
pub struct TorchClassifier {
    model: Arc<Mutex<CModule>>,
    device: Device,
}

impl TorchClassifier {
    pub fn load(model_path: &Path, use_cuda: bool) -> Result<Self, ClassifierError> {
        let device = if use_cuda {
            Device::cuda_if_available()
        } else {
            Device::Cpu
        };
        let mut model = CModule::load_on_device(model_path, device)?;
        model.set_eval();
        log::info!("Loaded classifier {} on {:?}", model_path.display(), device);
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            device,
        })
    }

    fn to_input(&self, input: &Array4<f32>) -> Result<Tensor, ClassifierError> {
        let shape: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
        let data = input
            .as_slice()
            .ok_or_else(|| ClassifierError::Backend("input tensor is not contiguous".into()))?;
        Ok(Tensor::f_from_slice(data)?
            .f_view(shape.as_slice())?
            .f_to(self.device)?)
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor, ClassifierError> {
        // The module holds no state a failed forward pass could corrupt.
        let model = self.model.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(model.forward_ts(&[input])?)
    }
}

/// Copies a tensor to a flat host vector of `f32`.
fn to_host(tensor: &Tensor) -> Result<Vec<f32>, TchError> {
    let flat = tensor.f_to_kind(Kind::Float)?.f_to(Device::Cpu)?.f_view([-1])?;
    let num_elements = flat.size()[0] as usize;
    let mut values = vec![0.0f32; num_elements];
    flat.f_copy_data(&mut values, num_elements)?;
    Ok(values)
}

impl Classifier for TorchClassifier {
    fn infer(&self, input: &Array4<f32>) -> Result<Vec<f32>, ClassifierError> {
        let input = self.to_input(input)?;
        let output = tch::no_grad(|| self.forward(&input))?;
        Ok(to_host(&output)?)
    }

    fn device(&self) -> String {
        format!("{:?}", self.device).to_lowercase()
    }
}

/// Input-gradient saliency: |d score_target / d input|, max over channels.
pub struct TorchGradientSaliency {
    classifier: TorchClassifier,
}

impl TorchGradientSaliency {
    pub fn new(classifier: TorchClassifier) -> Self {
        Self { classifier }
    }
}

impl SaliencyEngine for TorchGradientSaliency {
    fn compute(
        &self,
        image: &CanonicalImage,
        target: ClassLabel,
    ) -> Result<Array2<f32>, SaliencyError> {
        let input = self
            .classifier
            .to_input(&image.to_tensor())?
            .set_requires_grad(true);
        let logits = self.classifier.forward(&input)?;
        let score = logits
            .f_select(0, 0)
            .and_then(|row| row.f_select(0, target.index() as i64))
            .map_err(engine_error)?;
        let gradients =
            Tensor::f_run_backward(&[&score], &[&input], false, false).map_err(engine_error)?;
        let gradient = gradients
            .into_iter()
            .next()
            .ok_or_else(|| SaliencyError::Engine("no gradient for the input".into()))?;

        let saliency = gradient
            .f_abs()
            .and_then(|g| g.f_amax(&[1i64][..], false))
            .and_then(|g| g.f_squeeze())
            .map_err(engine_error)?;
        let values = to_host(&saliency).map_err(engine_error)?;
        let size = CANONICAL_SIZE as usize;
        if values.len() != size * size {
            return Err(SaliencyError::Engine(format!(
                "gradient has {} elements, expected {}",
                values.len(),
                size * size
            )));
        }
        Array2::from_shape_vec((size, size), values)
            .map_err(|e| SaliencyError::Engine(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "gradient"
    }
}
