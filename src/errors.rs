use axum::{http::StatusCode, response::Json};
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::api::ApiResponse;

/// Errors raised by the scheduling core and the card store.
///
/// `InvalidGrade` and `OutOfOrderReview` are caller errors and never worth
/// retrying. `StaleWrite` is a concurrency conflict the caller resolves by
/// re-reading and recomputing. `Storage` failures are potentially transient.
#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("invalid grade value {0}: expected 1 (Again) through 4 (Easy)")]
    InvalidGrade(i32),

    #[error("out-of-order review: {now} predates the last recorded review at {last_review}")]
    OutOfOrderReview {
        now: DateTime<Utc>,
        last_review: DateTime<Utc>,
    },

    #[error("card for user '{user_id}' and question '{question_id}' was updated concurrently")]
    StaleWrite { user_id: Uuid, question_id: Uuid },

    #[error("no card for user '{user_id}' and question '{question_id}'")]
    CardNotFound { user_id: Uuid, question_id: Uuid },

    #[error("corrupt card record for user '{user_id}', question '{question_id}': {detail}")]
    CorruptRecord {
        user_id: Uuid,
        question_id: Uuid,
        detail: String,
    },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl ReviewError {
    /// Whether the caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReviewError::StaleWrite { .. } | ReviewError::Storage(_)
        )
    }
}

/// Centralized error types for consistent API error handling
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] anyhow::Error),
}

impl From<ReviewError> for ApiError {
    fn from(err: ReviewError) -> Self {
        match err {
            ReviewError::InvalidGrade(_) => ApiError::ValidationError(err.to_string()),
            ReviewError::OutOfOrderReview { .. } => ApiError::Conflict(err.to_string()),
            ReviewError::StaleWrite { .. } => ApiError::Conflict(format!(
                "{err}; the review was not recorded, please retry"
            )),
            ReviewError::CardNotFound { .. } => ApiError::NotFound(err.to_string()),
            ReviewError::CorruptRecord { .. } | ReviewError::Storage(_) => {
                ApiError::DatabaseError(anyhow::Error::from(err))
            }
        }
    }
}

/// Error context for structured logging
#[derive(Debug)]
pub struct ErrorContext {
    pub operation: String,
    pub resource_id: Option<String>,
    pub resource_type: String,
}

impl ErrorContext {
    pub fn new(operation: &str, resource_type: &str) -> Self {
        Self {
            operation: operation.to_string(),
            resource_id: None,
            resource_type: resource_type.to_string(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }
}

impl ApiError {
    /// Convert API error to HTTP response with consistent structure and logging
    pub fn to_response_with_context(
        self,
        context: ErrorContext,
    ) -> (StatusCode, Json<ApiResponse<()>>) {
        match &self {
            ApiError::NotFound(_) => {
                info!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Resource not found"
                );
                (
                    StatusCode::NOT_FOUND,
                    Json(ApiResponse::error(self.to_string())),
                )
            }
            ApiError::ValidationError(_) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Validation error"
                );
                (
                    StatusCode::BAD_REQUEST,
                    Json(ApiResponse::error(self.to_string())),
                )
            }
            ApiError::Conflict(_) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Conflicting update"
                );
                (
                    StatusCode::CONFLICT,
                    Json(ApiResponse::error(self.to_string())),
                )
            }
            ApiError::DatabaseError(_) => {
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Database error"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiResponse::error(
                        "Database operation failed. Please try again.".to_string(),
                    )),
                )
            }
        }
    }

    /// Simple conversion without context
    #[allow(dead_code)]
    pub fn to_response(self) -> (StatusCode, Json<ApiResponse<()>>) {
        let context = ErrorContext::new("unknown", "resource");
        self.to_response_with_context(context)
    }
}
