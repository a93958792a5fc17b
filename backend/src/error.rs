use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};

use crate::db::RepositoryError;
use crate::detection::DetectionError;
use crate::inference::predictor::PredictorError;
use crate::report::ReportError;
use crate::storage::StorageError;
use crate::validation::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("{0}")]
    UnsupportedMediaType(String),
    #[error("{0}")]
    Unprocessable(String),
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error("{0}")]
    Timeout(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn forbidden(action: &str) -> Self {
        ApiError::Forbidden(format!("You do not have permission to {}", action))
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            log::error!("Request failed: {}", self);
        }
        HttpResponse::build(self.status_code()).json(serde_json::json!({"error": self.to_string()}))
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::FileTooLarge { .. } => ApiError::PayloadTooLarge(err.to_string()),
            ValidationError::UnsupportedContentType(_) => {
                ApiError::UnsupportedMediaType(err.to_string())
            }
            _ => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => ApiError::NotFound(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => ApiError::NotFound(err.to_string()),
            StorageError::InvalidPath(_) => ApiError::BadRequest(err.to_string()),
            StorageError::Timeout(_) => ApiError::Timeout(err.to_string()),
            _ => ApiError::ServiceUnavailable(err.to_string()),
        }
    }
}

impl From<PredictorError> for ApiError {
    fn from(err: PredictorError) -> Self {
        match err {
            PredictorError::ModelLoadError { .. } => ApiError::ServiceUnavailable(err.to_string()),
            PredictorError::InferenceError { .. } => ApiError::Internal(err.to_string()),
            PredictorError::Timeout { .. } => ApiError::Timeout(err.to_string()),
        }
    }
}

impl From<DetectionError> for ApiError {
    fn from(err: DetectionError) -> Self {
        match err {
            DetectionError::Decode(_) => ApiError::Unprocessable(err.to_string()),
            DetectionError::Storage(e) => e.into(),
            DetectionError::Prediction(e) => e.into(),
            DetectionError::Repository(e) => e.into(),
            DetectionError::NotFound(_) => ApiError::NotFound(err.to_string()),
            DetectionError::AlreadyProcessed(_)
            | DetectionError::AlreadyProcessing(_)
            | DetectionError::Entity(_) => ApiError::Conflict(err.to_string()),
            DetectionError::Task(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ReportError> for ApiError {
    fn from(err: ReportError) -> Self {
        match err {
            ReportError::ImageNotFound(_) => ApiError::NotFound(err.to_string()),
            ReportError::NoPredictions(_) | ReportError::Finalized(_) => {
                ApiError::Conflict(err.to_string())
            }
            ReportError::Storage(e) => e.into(),
            ReportError::Repository(e) => e.into(),
            ReportError::Render(_) | ReportError::Task(_) => ApiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;
    use shared::ModelName;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn pipeline_errors_map_to_status_codes() {
        let status = |e: ApiError| e.status_code();
        assert_eq!(
            status(DetectionError::AlreadyProcessed(Uuid::nil()).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(
                DetectionError::Prediction(PredictorError::Timeout {
                    model: ModelName::Vgg16,
                    timeout: Duration::from_secs(1)
                })
                .into()
            ),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status(StorageError::Unavailable("disk full".into()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(
                ValidationError::FileTooLarge {
                    size: 11,
                    max: 10
                }
                .into()
            ),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            status(
                ReportError::Finalized(crate::db::models::EntityError::ReportFinalized(
                    Uuid::nil()
                ))
                .into()
            ),
            StatusCode::CONFLICT
        );
    }

    #[actix_web::test]
    async fn body_is_json_error() {
        let response = ApiError::NotFound("Image not found".into()).error_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "Image not found");
    }
}
