use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use shared::ErrorResponse;

use crate::inference::InferenceError;

/// Failures surfaced to HTTP clients. Internal details stay in the logs.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("No file uploaded")]
    MissingFile,
    #[error("Malformed upload")]
    MalformedUpload(String),
    #[error("Could not decode image")]
    InvalidImage(#[source] InferenceError),
    #[error("File too large")]
    PayloadTooLarge,
    #[error("Inference timed out")]
    Timeout,
    #[error("Internal server error")]
    Internal(String),
}

impl From<InferenceError> for ServiceError {
    fn from(err: InferenceError) -> Self {
        if err.is_client_error() {
            ServiceError::InvalidImage(err)
        } else {
            ServiceError::Internal(err.to_string())
        }
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::MissingFile
            | ServiceError::MalformedUpload(_)
            | ServiceError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            ServiceError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse::new(self.to_string()))
    }
}
