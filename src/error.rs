//! Error types for the school library server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Request field that carries the batch of book identifiers
pub const BOOK_UUIDS_FIELD: &str = "book_uuids";

/// Stable error codes reported in response bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    DbFailure = 2,
    NotFound = 3,
    MissingField = 4,
    InvalidIdentifier = 5,
    QuotaViolation = 6,
    DuplicateLoan = 7,
    OutOfStock = 8,
    AlreadyReturned = 9,
    ExtendLimitReached = 10,
    Conflict = 11,
    Validation = 12,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("This field is required.")]
    MissingField { field: &'static str },

    #[error("“{value}” is not a valid UUID.")]
    InvalidIdentifier { field: &'static str, value: String },

    #[error("{message}")]
    QuotaViolation { field: &'static str, message: String },

    #[error("Choosen book have been borrowed. book title: {title}")]
    DuplicateLoan { field: &'static str, title: String },

    #[error("Choosen book out of stok. book title: {title}")]
    OutOfStock { field: &'static str, title: String },

    #[error("Choosen book have been returned. book title: {title}")]
    AlreadyReturned { field: &'static str, title: String },

    #[error("Choosen book can't be extended. book title: {title}")]
    ExtendLimitReached { field: &'static str, title: String },

    #[error("{message}")]
    Validation { field: String, message: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn student_not_found() -> Self {
        AppError::NotFound("Student not found.".to_string())
    }

    pub fn too_few_books(min: usize) -> Self {
        AppError::QuotaViolation {
            field: BOOK_UUIDS_FIELD,
            message: format!("Choose at least {} book.", min),
        }
    }

    pub fn too_many_books(max: usize) -> Self {
        AppError::QuotaViolation {
            field: BOOK_UUIDS_FIELD,
            message: format!("Exceed the quota, maximum {} books.", max),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::InvalidIdentifier { .. } => ErrorCode::InvalidIdentifier,
            AppError::QuotaViolation { .. } => ErrorCode::QuotaViolation,
            AppError::DuplicateLoan { .. } => ErrorCode::DuplicateLoan,
            AppError::OutOfStock { .. } => ErrorCode::OutOfStock,
            AppError::AlreadyReturned { .. } => ErrorCode::AlreadyReturned,
            AppError::ExtendLimitReached { .. } => ErrorCode::ExtendLimitReached,
            AppError::Validation { .. } => ErrorCode::Validation,
            AppError::Conflict(_) => ErrorCode::Conflict,
            AppError::Database(_) => ErrorCode::DbFailure,
            AppError::Internal(_) => ErrorCode::Failure,
        }
    }

    /// Request field a validation failure is scoped to, if any
    pub fn field(&self) -> Option<&str> {
        match self {
            AppError::MissingField { field }
            | AppError::InvalidIdentifier { field, .. }
            | AppError::QuotaViolation { field, .. }
            | AppError::DuplicateLoan { field, .. }
            | AppError::OutOfStock { field, .. }
            | AppError::AlreadyReturned { field, .. }
            | AppError::ExtendLimitReached { field, .. } => Some(*field),
            AppError::Validation { field, .. } => Some(field.as_str()),
            _ => None,
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    /// First failing field in name order, with its first message
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        match fields.first() {
            Some((field, failures)) => AppError::Validation {
                field: field.to_string(),
                message: failures
                    .first()
                    .and_then(|failure| failure.message.as_ref())
                    .map(|message| message.to_string())
                    .unwrap_or_else(|| "Invalid value.".to_string()),
            },
            None => AppError::Validation {
                field: "non_field_errors".to_string(),
                message: errors.to_string(),
            },
        }
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            validation => (StatusCode::BAD_REQUEST, validation.to_string()),
        };

        let code = self.code();
        let body = Json(ErrorResponse {
            code: code as u32,
            error: format!("{:?}", code),
            field: self.field().map(str::to_string),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
