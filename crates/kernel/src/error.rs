//! Application error types.
//!
//! `AppError` is the taxonomy every core operation returns. Persistence
//! failures arrive as [`StoreError`] and are tagged with the operation that
//! triggered them before they leave the core.

use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

/// Input that failed validation. Returned to the caller, never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unsupported operator '{operator}' on field '{field}'")]
    InvalidOperator { field: String, operator: String },

    #[error("'{key}' must be an integer, got '{value}'")]
    InvalidPaginationValue { key: String, value: String },

    #[error("invalid field name '{0}'")]
    InvalidField(String),

    #[error("{0}")]
    InvalidDocument(String),

    #[error("duplicate value for unique key ({}) in {collection}", fields.join(", "))]
    ConstraintViolation {
        collection: String,
        fields: Vec<String>,
    },
}

/// Application errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("no {entity} found with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("you are not logged in")]
    Unauthorized,

    #[error("incorrect email or password")]
    InvalidCredentials,

    #[error("you do not have permission to perform this action")]
    AuthorizationDenied,

    #[error("{operation} failed: {source}")]
    Persistence {
        operation: String,
        #[source]
        source: StoreError,
    },

    #[error("rating summary recompute failed for tour {parent}")]
    ConsistencyRecompute {
        parent: Uuid,
        #[source]
        source: Box<AppError>,
    },

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Tag a persistence failure with the operation that produced it.
    ///
    /// Unique-key violations are caller mistakes and surface as validation
    /// errors; everything else keeps the engine error as its source.
    pub fn store(operation: impl Into<String>, source: StoreError) -> Self {
        match source {
            StoreError::UniqueViolation { collection, fields } => {
                AppError::Validation(ValidationError::ConstraintViolation { collection, fields })
            }
            source => AppError::Persistence {
                operation: operation.into(),
                source,
            },
        }
    }

    /// Shorthand for a missing document.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        AppError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the caller may retry the same request unchanged.
    ///
    /// The core never retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Persistence { source, .. } => source.is_transient(),
            AppError::ConsistencyRecompute { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Unauthorized | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::AuthorizationDenied => StatusCode::FORBIDDEN,
            AppError::Persistence { .. } if self.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Persistence { .. }
            | AppError::ConsistencyRecompute { .. }
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retryable = self.is_retryable();

        // Client errors are echoed back; server-side details are logged only.
        let (kind, message) = if status.is_client_error() {
            ("fail", self.to_string())
        } else {
            tracing::error!(error = %self, source = ?std::error::Error::source(&self), "request failed");
            let message = if retryable {
                "the data store is temporarily unavailable, please retry".to_string()
            } else {
                "internal server error".to_string()
            };
            ("error", message)
        };

        let body = Json(json!({ "status": kind, "message": message }));
        if retryable {
            (status, [(header::RETRY_AFTER, "1")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;
