use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use shared::MediaKind;

use crate::inference::classifier::ClassifierError;
use crate::storage::StorageError;

/// Fatal outcome of one request. Non-fatal conditions (skipped frames,
/// explanation failures) are reported inside the result record instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("No face detected in the {0}")]
    NoFaceDetected(MediaKind),
    #[error("Could not decode input: {0}")]
    Decode(String),
    #[error("Classification failed: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("Upload of {size} bytes exceeds the {limit} byte limit")]
    UploadTooLarge { size: usize, limit: usize },
    #[error("Upload is empty")]
    EmptyUpload,
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Analysis did not finish within {0} seconds")]
    Timeout(u64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::NoFaceDetected(_) => "no_face_detected",
            PipelineError::Decode(_) => "decode_failure",
            PipelineError::Classifier(_) => "classifier_failure",
            PipelineError::UploadTooLarge { .. } => "upload_too_large",
            PipelineError::EmptyUpload => "empty_upload",
            PipelineError::InvalidRequest(_) => "invalid_request",
            PipelineError::Timeout(_) => "timeout",
            PipelineError::Io(_) => "io_error",
        }
    }
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Empty => PipelineError::EmptyUpload,
            StorageError::TooLarge { size, limit } => PipelineError::UploadTooLarge { size, limit },
            StorageError::Io(e) => PipelineError::Io(e),
            StorageError::Encode(e) => PipelineError::Io(std::io::Error::other(e)),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    detail: String,
}

impl ResponseError for PipelineError {
    fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::NoFaceDetected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::Decode(_)
            | PipelineError::EmptyUpload
            | PipelineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            PipelineError::UploadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            PipelineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            PipelineError::Classifier(_) | PipelineError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.code(),
            detail: self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (PipelineError::NoFaceDetected(MediaKind::Video), 422),
            (PipelineError::Decode("truncated".into()), 400),
            (PipelineError::Classifier(ClassifierError::NonFinite), 500),
            (PipelineError::UploadTooLarge { size: 2, limit: 1 }, 413),
            (PipelineError::EmptyUpload, 400),
            (PipelineError::Timeout(120), 504),
        ];
        for (err, status) in cases {
            assert_eq!(err.status_code().as_u16(), status, "{}", err);
        }
    }

    #[test]
    fn test_storage_errors_map_to_upload_errors() {
        let err: PipelineError = StorageError::TooLarge { size: 10, limit: 5 }.into();
        assert!(matches!(err, PipelineError::UploadTooLarge { size: 10, limit: 5 }));
        let err: PipelineError = StorageError::Empty.into();
        assert_eq!(err.code(), "empty_upload");
    }

    #[test]
    fn test_no_face_message_names_media() {
        assert_eq!(
            PipelineError::NoFaceDetected(MediaKind::Image).to_string(),
            "No face detected in the image"
        );
    }
}
