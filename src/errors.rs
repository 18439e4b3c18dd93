//! Structured error handling for the API boundary.
//!
//! Every non-2xx response carries the closed envelope
//! `{"error": {"code", "message", "details?"}}` where `code` is one of the
//! nine wire codes below. Internals use `anyhow` and convert at the edge.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire-level error detail.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code (closed set)
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Additional error context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Standard error envelope for API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Application error types, categorized by cause.
#[derive(Debug)]
pub enum AppError {
    // 400 - bad scope/agent combination, unknown enum value, malformed input
    InvalidArgument { field: String, reason: String },

    // 401 / 403
    Unauthenticated(String),
    PermissionDenied(String),

    // 404
    NotFound(String),

    // 409 - uniqueness or lineage violation on write
    Conflict {
        message: String,
        details: Option<serde_json::Value>,
    },

    // 429 - queue or pool saturation
    ResourceExhausted(String),

    // 504 - deadline expiry
    Timeout(String),

    // 503 - store or model dependency down
    Unavailable(String),

    // 500 - anything unexpected; never leaks internals to the client
    Internal(anyhow::Error),
}

impl AppError {
    pub fn invalid_argument(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn conflict(message: impl Into<String>, details: Option<serde_json::Value>) -> Self {
        Self::Conflict {
            message: message.into(),
            details,
        }
    }

    /// Wire code for client identification (closed set).
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::PermissionDenied(_) => "permission_denied",
            Self::NotFound(_) => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::ResourceExhausted(_) => "resource_exhausted",
            Self::Timeout(_) => "timeout",
            Self::Unavailable(_) => "unavailable",
            Self::Internal(_) => "internal",
        }
    }

    /// HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::ResourceExhausted(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message.
    pub fn message(&self) -> String {
        match self {
            Self::InvalidArgument { field, reason } => {
                format!("Invalid value for '{field}': {reason}")
            }
            Self::Unauthenticated(msg) => msg.clone(),
            Self::PermissionDenied(msg) => msg.clone(),
            Self::NotFound(what) => format!("{what} not found"),
            Self::Conflict { message, .. } => message.clone(),
            Self::ResourceExhausted(msg) => msg.clone(),
            Self::Timeout(msg) => msg.clone(),
            Self::Unavailable(msg) => msg.clone(),
            // Correlate via logs; the raw error stays server-side.
            Self::Internal(_) => "Internal error".to_string(),
        }
    }

    /// Convert to the wire envelope.
    pub fn to_response(&self) -> ErrorResponse {
        let details = match self {
            Self::Conflict { details, .. } => details.clone(),
            _ => None,
        };
        ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.message(),
                details,
            },
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(err) => write!(f, "internal: {err}"),
            other => write!(f, "{}: {}", other.code(), other.message()),
        }
    }
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Self::Internal(ref err) = self {
            let correlation_id = uuid::Uuid::new_v4();
            tracing::error!(%correlation_id, error = %err, "internal error");
        }
        (self.status_code(), Json(self.to_response())).into_response()
    }
}

/// Helper trait to convert validation failures into `invalid_argument`.
pub trait ValidationErrorExt<T> {
    fn map_validation_err(self, field: &str) -> Result<T>;
}

impl<T> ValidationErrorExt<T> for anyhow::Result<T> {
    fn map_validation_err(self, field: &str) -> Result<T> {
        self.map_err(|e| AppError::InvalidArgument {
            field: field.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Type alias for Results using AppError.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_closed_set() {
        assert_eq!(
            AppError::invalid_argument("scope", "bad").code(),
            "invalid_argument"
        );
        assert_eq!(AppError::NotFound("memory".into()).code(), "not_found");
        assert_eq!(
            AppError::ResourceExhausted("queue full".into()).code(),
            "resource_exhausted"
        );
        assert_eq!(AppError::Timeout("deadline".into()).code(), "timeout");
        assert_eq!(AppError::Unavailable("store".into()).code(), "unavailable");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::invalid_argument("x", "y").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotFound("memory".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::conflict("dup", None).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Internal(anyhow::anyhow!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_error_does_not_leak() {
        let err = AppError::Internal(anyhow::anyhow!("secret database path"));
        let body = err.to_response();
        assert_eq!(body.error.code, "internal");
        assert!(!body.error.message.contains("secret"));
    }

    #[test]
    fn test_envelope_shape() {
        let err = AppError::conflict(
            "duplicate content",
            Some(serde_json::json!({"existing_id": "abc"})),
        );
        let json = serde_json::to_value(err.to_response()).unwrap();
        assert_eq!(json["error"]["code"], "conflict");
        assert_eq!(json["error"]["details"]["existing_id"], "abc");
    }
}
