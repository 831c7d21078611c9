use shared::{ClassLabel, FaceBox, IntoEnumIterator};

use crate::inference::classifier::UnitPrediction;

/// A unit prediction for one analyzed video frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePrediction {
    /// 1-based position among analyzed frames.
    pub frame: usize,
    pub frame_index: u64,
    pub prediction: UnitPrediction,
    pub face_box: FaceBox,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregateVerdict {
    pub final_class: ClassLabel,
    /// Mean confidence of the frames that voted for `final_class`.
    pub confidence: f32,
    pub frame_count: usize,
    pub fake_count: usize,
    pub real_count: usize,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AggregateError {
    #[error("Cannot aggregate zero frame predictions")]
    Empty,
}

/// Majority vote over per-frame classes.
///
/// Classes are scanned in model order and only a strictly larger count
/// replaces the leader, so FAKE wins a tie.
pub fn aggregate(predictions: &[FramePrediction]) -> Result<AggregateVerdict, AggregateError> {
    if predictions.is_empty() {
        return Err(AggregateError::Empty);
    }

    let count = |class: ClassLabel| {
        predictions
            .iter()
            .filter(|p| p.prediction.class == class)
            .count()
    };

    let mut final_class = ClassLabel::Fake;
    let mut best = 0;
    for class in ClassLabel::iter() {
        let n = count(class);
        if n > best {
            best = n;
            final_class = class;
        }
    }

    let agreeing: Vec<f32> = predictions
        .iter()
        .filter(|p| p.prediction.class == final_class)
        .map(|p| p.prediction.confidence)
        .collect();
    let confidence = agreeing.iter().sum::<f32>() / agreeing.len() as f32;

    Ok(AggregateVerdict {
        final_class,
        confidence,
        frame_count: predictions.len(),
        fake_count: count(ClassLabel::Fake),
        real_count: count(ClassLabel::Real),
    })
}

/// Highest-confidence frame of `class`, earliest on ties.
pub fn representative(predictions: &[FramePrediction], class: ClassLabel) -> Option<usize> {
    predictions
        .iter()
        .enumerate()
        .filter(|(_, p)| p.prediction.class == class)
        .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
            Some((_, c)) if c >= p.prediction.confidence => best,
            _ => Some((i, p.prediction.confidence)),
        })
        .map(|(i, _)| i)
}
