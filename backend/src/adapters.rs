//! Conversions from the unified analysis into the legacy `predict` shapes.

use std::io::Cursor;

use base64::Engine;
use image::{DynamicImage, ImageFormat};
use shared::legacy::{
    GradCamImages, LegacyFramePrediction, LegacySummary, PredictImageResponse,
    PredictVideoResponse,
};
use shared::{AnalysisRecord, SaliencyStatus};

use crate::pipeline::explain::SaliencyResult;
use crate::pipeline::Analysis;

fn png_data_uri(image: DynamicImage) -> Result<String, image::ImageError> {
    let mut buffer = Vec::new();
    image.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
    Ok(format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(&buffer)
    ))
}

fn gradcam_images(saliency: &SaliencyResult) -> Result<GradCamImages, image::ImageError> {
    Ok(GradCamImages {
        heatmap: png_data_uri(DynamicImage::ImageLuma8(saliency.heatmap_image()))?,
        overlay: png_data_uri(DynamicImage::ImageRgb8(saliency.overlay.clone()))?,
    })
}

pub fn predict_image_response(analysis: &Analysis) -> PredictImageResponse {
    let record = &analysis.record;
    let (gradcam, gradcam_error) = match (&record.saliency, &analysis.saliency) {
        (SaliencyStatus::Skipped, _) => (None, None),
        (SaliencyStatus::Unavailable { reason }, None) => (None, Some(reason.clone())),
        (_, Some(saliency)) => match gradcam_images(saliency) {
            Ok(images) => (Some(images), None),
            Err(e) => {
                log::warn!("Failed to encode saliency images: {}", e);
                (None, Some(e.to_string()))
            }
        },
        (SaliencyStatus::Available { .. }, None) => (None, None),
    };

    PredictImageResponse {
        prediction: record.prediction,
        prediction_class: record.prediction.index(),
        confidence: record.probabilities.get(record.prediction),
        probabilities: record.probabilities,
        gradcam,
        gradcam_error,
    }
}

pub fn predict_video_response(record: &AnalysisRecord) -> PredictVideoResponse {
    let (frame_predictions, frames_analyzed, summary) = match &record.frames {
        Some(frames) => (
            frames
                .predictions
                .iter()
                .map(|p| LegacyFramePrediction {
                    frame: p.frame,
                    prediction: p.prediction,
                    prediction_class: p.prediction.index(),
                    confidence: p.confidence,
                })
                .collect(),
            frames.frames_analyzed,
            LegacySummary {
                fake_frames: frames.fake_frames,
                real_frames: frames.real_frames,
            },
        ),
        None => (
            Vec::new(),
            0,
            LegacySummary {
                fake_frames: 0,
                real_frames: 0,
            },
        ),
    };

    PredictVideoResponse {
        prediction: record.prediction,
        prediction_class: record.prediction.index(),
        confidence: record.confidence_percent / 100.0,
        frames_analyzed,
        frame_predictions,
        summary,
    }
}
