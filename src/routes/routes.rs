//! Defines routes for file delivery and health checks.
//!
//! ## Structure
//! - `PUT    /{*key}`: upload a file with its access policy (API key)
//! - `GET    /{*key}`: download, honouring `Range: bytes=start-end`
//! - `HEAD   /{*key}`: headers only, same policy checks as GET
//! - `DELETE /{*key}`: delete a file (API key)
//! - `POST   /{*key}/verify`: check a password without reading the file
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        file_handlers::{delete_file, get_file, head_file, upload_file, verify_password},
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::{MatchedPath, Request},
    routing::{get, put},
};
use tower_http::trace::TraceLayer;

/// Build the router with shared `AppState` already attached.
pub fn routes(state: AppState) -> Router {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/{*key}",
            put(upload_file)
                .get(get_file)
                .head(head_file)
                .delete(delete_file)
                .post(verify_password),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    let method = req.method();
                    let uri = req.uri();
                    let matched_path = req
                        .extensions()
                        .get::<MatchedPath>()
                        .map(|matched_path| matched_path.as_str());

                    tracing::debug_span!("request", %method, %uri, matched_path)
                })
                .on_failure(()),
        )
        .with_state(state)
}
