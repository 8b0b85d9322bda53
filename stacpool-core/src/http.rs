//! HTTP status mapping for session errors
//!
//! Request handlers return `SessionResult<T>` and let `?` turn failures into
//! responses. Bodies carry the generic error message only.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::SessionError;

impl SessionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Conflict => StatusCode::CONFLICT,
            Self::ForeignKeyViolation => StatusCode::FAILED_DEPENDENCY,
            Self::PoolExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Database => StatusCode::FAILED_DEPENDENCY,
            Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Conflict => "conflict",
            Self::ForeignKeyViolation => "foreign_key_violation",
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::Database => "database_error",
            Self::Configuration(_) => "internal_error",
        }
    }
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::Configuration(e) => {
                tracing::error!("Configuration error: {}", e);
                "an internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": self.code(),
            "message": message,
        }));

        (status, body).into_response()
    }
}
