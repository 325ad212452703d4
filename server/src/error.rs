//! Mapping of engine failures to HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use mirrortv_engine::EngineError;
use mirrortv_playback::ReadinessError;

/// An error response: a status plus a JSON body with at least `error`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: Value,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": message.into() }),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        match err {
            EngineError::InvalidRequest(_) => Self::bad_request(message),
            EngineError::DuplicateSession(_) | EngineError::StartCancelled(_) => {
                Self::new(StatusCode::CONFLICT, message)
            }
            EngineError::CapacityExceeded { max } => Self {
                status: StatusCode::TOO_MANY_REQUESTS,
                body: json!({ "error": message, "max": max }),
            },
            EngineError::ResolutionFailed {
                target,
                suggestions,
            } => Self {
                status: StatusCode::NOT_FOUND,
                body: json!({ "error": message, "target": target, "suggestions": suggestions }),
            },
            EngineError::SessionNotFound(_) => Self::new(StatusCode::NOT_FOUND, message),
            EngineError::EngineUnavailable => Self::new(StatusCode::SERVICE_UNAVAILABLE, message),
            EngineError::SpawnFailed { .. } | EngineError::Io(_) | EngineError::Json(_) => {
                Self::internal(message)
            }
        }
    }
}

impl From<ReadinessError> for ApiError {
    fn from(err: ReadinessError) -> Self {
        match err {
            ReadinessError::StartupTimeout { attempts } => Self {
                status: StatusCode::GATEWAY_TIMEOUT,
                body: json!({ "error": err.to_string(), "attempts": attempts }),
            },
            other => Self::internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
