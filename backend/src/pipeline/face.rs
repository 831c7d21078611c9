use image::{imageops, RgbImage};
use shared::FaceBox;

use crate::inference::classifier::CanonicalImage;
use crate::inference::detector::{FaceDetector, RelativeBox};

/// Canonical-size crop of the detected face.
#[derive(Debug, Clone)]
pub struct FaceRegion {
    image: CanonicalImage,
    source_box: FaceBox,
}

impl FaceRegion {
    pub fn image(&self) -> &CanonicalImage {
        &self.image
    }

    pub fn into_image(self) -> CanonicalImage {
        self.image
    }

    /// Clamped pixel box the crop was taken from.
    pub fn source_box(&self) -> FaceBox {
        self.source_box
    }
}

#[derive(Debug, Clone)]
pub enum FaceLocation {
    Found(FaceRegion),
    NoFaceFound,
}

/// Converts a relative box to pixels, clamped into the image.
/// Returns `None` when nothing of the box is left inside.
pub fn clamp_to_pixels(bbox: &RelativeBox, width: u32, height: u32) -> Option<FaceBox> {
    let (w, h) = (width as i64, height as i64);
    let x1 = ((bbox.xmin * width as f32) as i64).clamp(0, w);
    let y1 = ((bbox.ymin * height as f32) as i64).clamp(0, h);
    let x2 = (((bbox.xmin + bbox.width) * width as f32) as i64).clamp(0, w);
    let y2 = (((bbox.ymin + bbox.height) * height as f32) as i64).clamp(0, h);

    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(FaceBox {
        x: x1 as u32,
        y: y1 as u32,
        width: (x2 - x1) as u32,
        height: (y2 - y1) as u32,
    })
}

/// Crops the detector's top-ranked face. Further faces are ignored.
pub fn locate(detector: &dyn FaceDetector, image: &RgbImage) -> FaceLocation {
    let (width, height) = image.dimensions();
    let Some(candidate) = detector.detect(image).into_iter().next() else {
        return FaceLocation::NoFaceFound;
    };
    let Some(source_box) = clamp_to_pixels(&candidate.bbox, width, height) else {
        log::debug!("Face candidate {:?} lies outside the image", candidate.bbox);
        return FaceLocation::NoFaceFound;
    };

    let crop = imageops::crop_imm(
        image,
        source_box.x,
        source_box.y,
        source_box.width,
        source_box.height,
    )
    .to_image();
    FaceLocation::Found(FaceRegion {
        image: CanonicalImage::from_image(&crop),
        source_box,
    })
}
