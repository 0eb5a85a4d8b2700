//! HTTP handlers for file operations.
//! Bodies stream in both directions; access decisions and storage calls are
//! delegated to `ProxyService`.

use crate::{
    errors::AppError,
    models::upload::UploadRequest,
    services::{
        blob_store::{BlobError, ObjectBody},
        proxy_service::FileInfo,
    },
    state::AppState,
};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::SecondsFormat;
use futures::TryStreamExt;
use serde::Deserialize;
use serde_json::json;
use std::io;

pub const PASSWORD_HEADER: &str = "x-password";
pub const EXPIRES_AT_HEADER: &str = "x-expires-at";
const CACHE_CONTROL_VALUE: &str = "public, max-age=86400, immutable";
const VERIFY_SUFFIX: &str = "/verify";
const FILE_METHODS: &str = "GET, HEAD, PUT, DELETE";

/// Query params accepted by `PUT /{*key}`.
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Lifetime in hours for temporary uploads.
    pub expiration: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PasswordQuery {
    pub password: Option<String>,
}

/// Body of `POST /{*key}/verify`.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub password: Option<String>,
}

/// Upload a file to `/{*key}`.
pub async fn upload_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    state.credentials.authorize(&headers)?;

    let password = supplied_password(&headers, query.password);
    let request = UploadRequest::from_params(query.kind.as_deref(), query.expiration, password)?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let declared_length = match headers.get(header::CONTENT_LENGTH) {
        Some(value) => Some(
            value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .ok_or_else(|| AppError::bad_request("Invalid Content-Length header"))?,
        ),
        None => None,
    };

    let stream = body
        .into_data_stream()
        .map_err(|err| BlobError::BodyRead(io::Error::other(err)));
    let body = ObjectBody::from_stream(stream, declared_length)
        .await
        .map_err(|err| AppError::bad_request(format!("Failed to read request body: {err}")))?;

    let receipt = state
        .proxy
        .upload(&key, body, request, content_type)
        .await?;
    Ok(Json(receipt))
}

/// Download `/{*key}`, whole or as a single byte range.
pub async fn get_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<PasswordQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let password = supplied_password(&headers, query.password);
    let range = headers
        .get(header::RANGE)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| AppError::bad_request("Range header is not valid text"))
        })
        .transpose()?;

    let retrieval = state
        .proxy
        .retrieve(&key, range, password.as_deref())
        .await?;
    let content_length = retrieval.content_length();
    let range = retrieval.range;

    let mut response = Response::new(Body::from_stream(retrieval.body));
    set_file_headers(response.headers_mut(), &retrieval.info, content_length);
    match range {
        Some(range) => {
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            if let Ok(value) = HeaderValue::from_str(&range.to_string()) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
        }
        None => *response.status_mut() = StatusCode::OK,
    }

    Ok(response)
}

/// HEAD `/{*key}`: same headers as a full GET but no body.
pub async fn head_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<PasswordQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let password = supplied_password(&headers, query.password);
    let info = state.proxy.head(&key, password.as_deref()).await?;

    let mut response = Response::new(Body::empty());
    set_file_headers(response.headers_mut(), &info, info.head.size);
    Ok(response)
}

/// POST `/{*key}/verify`: check a password without reading the file.
pub async fn verify_password(
    State(state): State<AppState>,
    Path(path): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    let Some(key) = path.strip_suffix(VERIFY_SUFFIX) else {
        return Err(
            AppError::new(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
                .with_header(header::ALLOW, HeaderValue::from_static(FILE_METHODS)),
        );
    };

    let request: VerifyRequest = serde_json::from_slice(&body)
        .map_err(|err| AppError::bad_request(format!("Invalid verification body: {err}")))?;
    let password = request
        .password
        .filter(|password| !password.is_empty())
        .ok_or_else(|| AppError::bad_request("Password is required"))?;

    state.proxy.verify(key, &password).await?;
    Ok(Json(json!({ "verified": true })).into_response())
}

/// DELETE `/{*key}`
pub async fn delete_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    state.credentials.authorize(&headers)?;
    state.proxy.delete(&key).await?;
    Ok(Json(json!({ "deleted": key })))
}

/// `X-Password` wins over the query parameter.
fn supplied_password(headers: &HeaderMap, query: Option<String>) -> Option<String> {
    headers
        .get(PASSWORD_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .or(query)
}

/// Framing headers shared by full, ranged and HEAD responses.
fn set_file_headers(headers: &mut HeaderMap, info: &FileInfo, content_length: u64) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&info.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(content_length));
    headers.insert(header::CONTENT_DISPOSITION, HeaderValue::from_static("inline"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(CACHE_CONTROL_VALUE),
    );
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    if let Some(etag) = info.head.etag.as_deref() {
        let quoted = if etag.starts_with('"') {
            etag.to_string()
        } else {
            format!("\"{}\"", etag)
        };
        if let Ok(value) = HeaderValue::from_str(&quoted) {
            headers.insert(header::ETAG, value);
        }
    }

    let last_modified = info
        .head
        .last_modified
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }

    if let Some(expires_at) = info.policy.expires_at {
        let rfc3339 = expires_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        if let Ok(value) = HeaderValue::from_str(&rfc3339) {
            headers.insert(HeaderName::from_static(EXPIRES_AT_HEADER), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_header_takes_precedence_over_query() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            supplied_password(&headers, Some("query".into())).as_deref(),
            Some("query")
        );

        headers.insert(PASSWORD_HEADER, HeaderValue::from_static("header"));
        assert_eq!(
            supplied_password(&headers, Some("query".into())).as_deref(),
            Some("header")
        );
    }
}
