use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use super::object_store_error;
use crate::api::response::{ApiError, AppPath};
use crate::object_store::validate_key;
use crate::AppState;

/// Serve an uploaded blob by its object store key.
/// Route: GET /media/*key
pub async fn serve_media(
    State(state): State<Arc<AppState>>,
    AppPath(key): AppPath<String>,
) -> Result<Response, ApiError> {
    if validate_key(&key).is_err() {
        return Err(ApiError::not_found("File not found"));
    }

    let data = state
        .object_store
        .get(&key)
        .await
        .map_err(object_store_error)?;

    let mut response = (StatusCode::OK, data).into_response();
    let headers = response.headers_mut();

    let mime_type = mime_guess::from_path(&key).first_or_octet_stream();
    headers.insert(
        header::CONTENT_TYPE,
        mime_type
            .as_ref()
            .parse()
            .unwrap_or(header::HeaderValue::from_static("application/octet-stream")),
    );

    let filename = key.rsplit('/').next().unwrap_or(&key);
    if let Ok(value) = format!("inline; filename=\"{filename}\"").parse() {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    // Keys are never reused, so a blob's bytes never change
    headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("public, max-age=3600"),
    );

    Ok(response)
}
