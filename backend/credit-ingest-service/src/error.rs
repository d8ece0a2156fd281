/// HTTP-facing errors for credit-ingest-service.
///
/// Component errors (`StoreError`, `PublishError`) convert into [`AppError`],
/// which renders as `{"error", "statusCode", "timestamp"}`.
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::services::PublishError;
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Message broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    status_code: u16,
    timestamp: String,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::BrokerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::PublishFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();

        // Server-side details stay in the logs.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "Request failed");
            "An error occurred while processing your request".to_string()
        } else {
            self.to_string()
        };

        HttpResponse::build(status).json(ErrorBody {
            error: message,
            status_code: status.as_u16(),
            timestamp: Utc::now().to_rfc3339(),
        })
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => AppError::NotFound(format!("Credit consult with id {id} not found")),
            StoreError::Database(e) => AppError::Database(e.to_string()),
        }
    }
}

impl From<PublishError> for AppError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Unavailable(e) => AppError::BrokerUnavailable(e.to_string()),
            e @ PublishError::PublishFailed { .. } => AppError::PublishFailed(e.to_string()),
            e @ PublishError::Serialization { .. } => AppError::Internal(e.to_string()),
        }
    }
}
