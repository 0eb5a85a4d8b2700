use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::{models::upload::UploadParamError, services::proxy_service::ProxyError};

/// An HTTP error response: status, client-facing message and any extra
/// headers the status requires.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub headers: HeaderMap,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    pub fn with_header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, self.headers, body).into_response()
    }
}

impl From<ProxyError> for AppError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::NotFound(_) => AppError::not_found("File not found"),
            ProxyError::Expired { .. } => AppError::new(StatusCode::GONE, "File has expired"),
            ProxyError::AccessDenied { reason, .. } => {
                AppError::new(StatusCode::FORBIDDEN, reason.to_string())
            }
            ProxyError::BadRequest(msg) => AppError::bad_request(msg),
            ProxyError::RangeNotSatisfiable { size } => {
                let content_range = format!("bytes */{size}");
                let error = AppError::new(StatusCode::RANGE_NOT_SATISFIABLE, "Range not satisfiable");
                match HeaderValue::from_str(&content_range) {
                    Ok(value) => error.with_header(header::CONTENT_RANGE, value),
                    Err(_) => error,
                }
            }
            ProxyError::ConcurrentModification { .. } => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, "File is being replaced")
                    .with_header(header::RETRY_AFTER, HeaderValue::from_static("1"))
            }
            // Details are logged where they occur; clients get a generic body.
            ProxyError::CorruptPolicy { .. } => AppError::internal("Stored file metadata is unreadable"),
            ProxyError::Upstream { .. } => AppError::internal("Storage backend request failed"),
        }
    }
}

impl From<UploadParamError> for AppError {
    fn from(err: UploadParamError) -> Self {
        AppError::bad_request(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
