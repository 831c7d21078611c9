use shared::{ClassLabel, VerdictLabel};

/// Above this percentage the explanation uses high-confidence wording.
pub const HIGH_CONFIDENCE_PERCENT: f64 = 80.0;
/// Inclusive band in which a binary answer is withheld.
pub const UNCERTAIN_BAND_PERCENT: (f64, f64) = (45.0, 65.0);

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub label: VerdictLabel,
    pub confidence_percent: f64,
    pub explanation: String,
}

/// Fraction to percent, rounded to 4 decimals so float noise cannot cross a band edge.
pub fn to_percent(confidence: f32) -> f64 {
    ((confidence as f64) * 100.0 * 10_000.0).round() / 10_000.0
}

pub fn resolve(class: ClassLabel, confidence: f32) -> Verdict {
    let percent = to_percent(confidence);
    let high = percent > HIGH_CONFIDENCE_PERCENT;

    let mut label = VerdictLabel::from(class);
    let mut explanation = match (class, high) {
        (ClassLabel::Fake, true) => format!(
            "High confidence ({:.1}%) that this media has been manipulated. \
             The analyzed content shows artifacts consistent with deepfake generation.",
            percent
        ),
        (ClassLabel::Fake, false) => format!(
            "Moderate confidence ({:.1}%) that this media has been manipulated. \
             Some regions show signs of synthetic generation.",
            percent
        ),
        (ClassLabel::Real, true) => format!(
            "High confidence ({:.1}%) that this media is authentic. \
             No significant manipulation artifacts were detected.",
            percent
        ),
        (ClassLabel::Real, false) => format!(
            "Moderate confidence ({:.1}%) that this media is authentic. \
             Minor irregularities were found but are consistent with natural capture.",
            percent
        ),
    };

    let (low, high_edge) = UNCERTAIN_BAND_PERCENT;
    if (low..=high_edge).contains(&percent) {
        label = VerdictLabel::Uncertain;
        explanation = format!(
            "The model is uncertain ({:.1}% confidence). \
             Manual verification by a reviewer is recommended before drawing conclusions.",
            percent
        );
    }

    Verdict {
        label,
        confidence_percent: percent,
        explanation,
    }
}
