//! services/api/src/web/photos.rs
//!
//! Upload and download of a child's profile photo.

use crate::web::{
    rest::{owned_child, port_error, HandlerError},
    state::AppState,
};
use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Extension,
};
use bytes::Bytes;
use companion_core::photos::{child_photo_path, is_jpeg, load_photo, store_photo, MAX_PHOTO_BYTES};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Checks an uploaded file before it reaches storage.
fn validate_photo(data: &[u8]) -> Result<(), HandlerError> {
    if data.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Photo is empty".to_string()));
    }
    if data.len() > MAX_PHOTO_BYTES {
        return Err((
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Photo must be at most {} bytes", MAX_PHOTO_BYTES),
        ));
    }
    if !is_jpeg(data) {
        return Err((StatusCode::BAD_REQUEST, "Photo must be a JPEG image".to_string()));
    }
    Ok(())
}

/// Replace a child's profile photo.
///
/// Accepts a multipart/form-data request with a single JPEG file part.
#[utoipa::path(
    put,
    path = "/children/{child_id}/photo",
    params(("child_id" = Uuid, Path, description = "The child's id")),
    request_body(content_type = "multipart/form-data", description = "The JPEG photo to upload."),
    responses(
        (status = 204, description = "Photo stored"),
        (status = 400, description = "Missing file or not a JPEG"),
        (status = 404, description = "Child not found"),
        (status = 413, description = "Photo too large")
    )
)]
pub async fn upload_photo_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(child_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<StatusCode, HandlerError> {
    let child = owned_child(&app_state, user_id, child_id).await?;

    let data: Bytes = match multipart.next_field().await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            format!("Failed to read multipart data: {}", e),
        )
    })? {
        Some(field) => field.bytes().await.map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                format!("Failed to read file bytes: {}", e),
            )
        })?,
        None => {
            return Err((
                StatusCode::BAD_REQUEST,
                "Multipart form must include a file".to_string(),
            ))
        }
    };
    validate_photo(&data)?;

    let path = child_photo_path(user_id, child.id);
    store_photo(app_state.photo_store.as_ref(), &path, &data)
        .await
        .map_err(|e| port_error("Store photo", e))?;
    app_state
        .db
        .set_child_photo_path(child.id, &path)
        .await
        .map_err(|e| port_error("Store photo", e))?;

    info!("Stored {} byte photo for child {}", data.len(), child.id);
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/children/{child_id}/photo",
    params(("child_id" = Uuid, Path, description = "The child's id")),
    responses(
        (status = 200, description = "The JPEG photo", content_type = "image/jpeg"),
        (status = 404, description = "Child or photo not found")
    )
)]
pub async fn download_photo_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(child_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let child = owned_child(&app_state, user_id, child_id).await?;
    let path = child
        .photo_path
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Child has no photo".to_string()))?;

    let jpeg = load_photo(app_state.photo_store.as_ref(), &path)
        .await
        .map_err(|e| port_error("Load photo", e))?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], Bytes::from(jpeg)))
}
