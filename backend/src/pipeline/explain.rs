use std::panic::{self, AssertUnwindSafe};

use image::{GrayImage, Luma, Rgb, RgbImage};
use ndarray::Array2;
use shared::ClassLabel;

use crate::inference::classifier::CanonicalImage;
use crate::inference::saliency::{SaliencyEngine, SaliencyError};

#[derive(Debug, Clone)]
pub struct SaliencyResult {
    /// Min-max normalized to `[0, 1]`, shaped `(height, width)`.
    pub heatmap: Array2<f32>,
    pub overlay: RgbImage,
}

impl SaliencyResult {
    pub fn heatmap_image(&self) -> GrayImage {
        let (height, width) = self.heatmap.dim();
        GrayImage::from_fn(width as u32, height as u32, |x, y| {
            Luma([(self.heatmap[[y as usize, x as usize]] * 255.0).round() as u8])
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExplainFailure {
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum Explanation {
    Ready(SaliencyResult),
    Failed(ExplainFailure),
}

impl Explanation {
    fn failed(message: impl Into<String>) -> Self {
        Explanation::Failed(ExplainFailure {
            message: message.into(),
        })
    }
}

/// Saliency for `target` on `image`. Never fails the caller: engine errors,
/// panics and malformed maps all come back as [`Explanation::Failed`].
pub fn explain(
    engine: &dyn SaliencyEngine,
    image: &CanonicalImage,
    target: ClassLabel,
    image_weight: f32,
) -> Explanation {
    if !(0.0..=1.0).contains(&image_weight) {
        return Explanation::failed(format!(
            "image_weight should be in the range [0, 1], got {}",
            image_weight
        ));
    }

    let computed = panic::catch_unwind(AssertUnwindSafe(|| engine.compute(image, target)));
    let raw = match computed {
        Ok(Ok(heatmap)) => heatmap,
        Ok(Err(e)) => return Explanation::failed(e.to_string()),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            return Explanation::failed(format!("{} engine panicked: {}", engine.name(), message));
        }
    };

    let source = image.as_rgb();
    let (width, height) = (source.width() as usize, source.height() as usize);
    if raw.dim() != (height, width) {
        let (actual_height, actual_width) = raw.dim();
        return Explanation::failed(
            SaliencyError::ShapeMismatch {
                expected_width: width,
                expected_height: height,
                actual_width,
                actual_height,
            }
            .to_string(),
        );
    }
    if raw.iter().any(|v| !v.is_finite()) {
        return Explanation::failed(SaliencyError::NonFinite.to_string());
    }

    let heatmap = normalize(raw);
    let overlay = overlay(source, &heatmap, image_weight);
    Explanation::Ready(SaliencyResult { heatmap, overlay })
}

fn normalize(mut map: Array2<f32>) -> Array2<f32> {
    let min = map.iter().copied().fold(f32::INFINITY, f32::min);
    let max = map.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    if range <= f32::EPSILON {
        map.fill(0.0);
    } else {
        map.mapv_inplace(|v| (v - min) / range);
    }
    map
}

/// JET colormap, blue for 0 through red for 1.
fn jet(v: f32) -> [f32; 3] {
    let channel = |offset: f32| (1.5 - (4.0 * v - offset).abs()).clamp(0.0, 1.0);
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// `(1 - w) * jet(heatmap) + w * source`, rescaled so the brightest value is 1.
fn overlay(source: &RgbImage, heatmap: &Array2<f32>, image_weight: f32) -> RgbImage {
    let blended: Vec<[f32; 3]> = source
        .enumerate_pixels()
        .map(|(x, y, pixel)| {
            let color = jet(heatmap[[y as usize, x as usize]]);
            let mut out = [0.0f32; 3];
            for c in 0..3 {
                out[c] = (1.0 - image_weight) * color[c] + image_weight * pixel[c] as f32 / 255.0;
            }
            out
        })
        .collect();

    let peak = blended
        .iter()
        .flat_map(|p| p.iter().copied())
        .fold(0.0f32, f32::max)
        .max(f32::EPSILON);

    let mut image = RgbImage::new(source.width(), source.height());
    for (pixel, value) in image.pixels_mut().zip(blended) {
        *pixel = Rgb(value.map(|v| (v / peak * 255.0).round().clamp(0.0, 255.0) as u8));
    }
    image
}
