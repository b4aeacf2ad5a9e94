// HTTP error mapping: every failure is a JSON body {"detail": message}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use thiserror::Error;
use tracing::error;

use crate::core::errors::PipelineError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Malformed transport (multipart, JSON, query string)
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Pipeline(PipelineError::InvalidInput { .. }) => StatusCode::BAD_REQUEST,
            ApiError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed ({}): {}", status, self);
        }

        (status, Json(serde_json::json!({ "detail": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::{ModelLoadError, ProcessingStage};

    #[test]
    fn test_status_mapping() {
        let invalid = ApiError::from(PipelineError::invalid_input("image", "Image is empty"));
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
        assert_eq!(invalid.to_string(), "Image is empty");

        let unavailable = ApiError::from(PipelineError::ServiceUnavailable(ModelLoadError::new(
            "u2net",
            "missing weights",
        )));
        assert_eq!(unavailable.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let processing = ApiError::from(PipelineError::ProcessingError {
            stage: ProcessingStage::Inference,
            cause: "boom".to_string(),
        });
        assert_eq!(processing.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(processing.to_string().contains("boom"));

        assert_eq!(
            ApiError::BadRequest("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
