//! API error responses.
//!
//! | Code | HTTP | Usage |
//! |------|------|-------|
//! | `INVALID_REQUEST` | 400 | Malformed body or failed validation |
//! | `NOT_FOUND` | 404 | Unknown job id |
//! | `UNAVAILABLE` | 503 | Submission during shutdown |
//! | `INTERNAL_ERROR` | 500 | Anything else |

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::services::SchedulerError;

/// Error codes returned in API error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Invalid request format or failed validation.
    InvalidRequest,
    /// Job not found.
    NotFound,
    /// Service is shutting down.
    Unavailable,
    /// Internal server error.
    InternalError,
}

impl ErrorCode {
    /// HTTP status for this code.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Wire name of the code.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::NotFound => "NOT_FOUND",
            Self::Unavailable => "UNAVAILABLE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason())
    }
}

/// Error body: `{success: false, error, code}`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// Always false.
    pub success: bool,
    /// Human-readable message.
    pub error: String,
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Offending request field, for validation errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<&'static str>,
}

/// Error returned from API handlers.
#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
    field: Option<&'static str>,
}

impl ApiError {
    /// Create an error with a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
        }
    }

    /// Shorthand for a 400.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// Error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        match &e {
            SchedulerError::Validation(inner) => Self {
                code: ErrorCode::InvalidRequest,
                message: inner.to_string(),
                field: Some(inner.field()),
            },
            SchedulerError::NotFound(_) => Self::new(ErrorCode::NotFound, e.to_string()),
            SchedulerError::ShuttingDown => Self::new(ErrorCode::Unavailable, e.to_string()),
            SchedulerError::Internal(_) => {
                tracing::error!(error = %e, "Internal scheduler error");
                Self::new(ErrorCode::InternalError, e.to_string())
            }
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::invalid(format!("invalid JSON body: {e}"))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::invalid(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.message,
            code: self.code,
            field: self.field,
        };
        (self.code.status(), Json(body)).into_response()
    }
}
