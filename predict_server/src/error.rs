//! Errors surfaced at the request boundary.
//!
use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::protocol::ErrorBody;
use thiserror::Error;

/// Failure of a prediction request, rendered as `{"error": ...}`.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("Model could not be loaded")]
    ModelUnavailable,

    #[error("No file part in the request")]
    MissingFile,

    #[error("No file selected for uploading")]
    EmptyFilename,

    #[error("Error processing image")]
    Processing(#[from] ProcessingError),
}

/// Cause of a processing failure. Only logged, clients see one generic message.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("failed to read upload: {0}")]
    Read(#[from] MultipartError),

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("inference failed: {0:#}")]
    Inference(anyhow::Error),

    #[error("inference task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl PredictError {
    pub fn status(&self) -> StatusCode {
        match self {
            PredictError::MissingFile | PredictError::EmptyFilename => StatusCode::BAD_REQUEST,
            PredictError::ModelUnavailable | PredictError::Processing(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        match &self {
            PredictError::Processing(cause) => log::error!("Error during prediction: {cause}"),
            PredictError::ModelUnavailable => log::error!("Prediction requested without model"),
            _ => log::warn!("Rejected prediction request: {self}"),
        }

        (self.status(), Json(ErrorBody::new(self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            PredictError::ModelUnavailable.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(PredictError::MissingFile.status(), StatusCode::BAD_REQUEST);
        assert_eq!(PredictError::EmptyFilename.status(), StatusCode::BAD_REQUEST);

        let inference = ProcessingError::Inference(anyhow::anyhow!("bad output"));
        assert_eq!(
            PredictError::from(inference).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_processing_errors_share_client_message() {
        let decode = image::load_from_memory(b"not an image").unwrap_err();
        let decode = PredictError::from(ProcessingError::from(decode));
        let inference = PredictError::from(ProcessingError::Inference(anyhow::anyhow!("boom")));

        assert_eq!(decode.to_string(), "Error processing image");
        assert_eq!(inference.to_string(), "Error processing image");
    }
}
