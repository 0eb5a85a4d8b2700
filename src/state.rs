use axum::http::{HeaderMap, header};
use std::sync::Arc;

use crate::{errors::AppError, services::proxy_service::ProxyService};

/// Header carrying the service credential on mutating requests.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub proxy: ProxyService,
    pub credentials: ServiceCredential,
}

impl AppState {
    pub fn new(proxy: ProxyService, credentials: ServiceCredential) -> Self {
        Self { proxy, credentials }
    }
}

/// The service-level API key required for uploads and deletes.
#[derive(Clone)]
pub struct ServiceCredential {
    api_key: Arc<str>,
}

impl ServiceCredential {
    pub fn new(api_key: impl Into<Arc<str>>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    /// Accept `X-API-Key: <key>` or `Authorization: Bearer <key>`.
    pub fn authorize(&self, headers: &HeaderMap) -> Result<(), AppError> {
        let presented = headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .or_else(|| {
                headers
                    .get(header::AUTHORIZATION)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.strip_prefix("Bearer "))
            })
            .map(str::trim);

        match presented {
            None => Err(AppError::unauthorized("Missing API key")),
            Some(key) if key.as_bytes() == self.api_key.as_bytes() => Ok(()),
            Some(_) => Err(AppError::unauthorized("Invalid API key")),
        }
    }
}
