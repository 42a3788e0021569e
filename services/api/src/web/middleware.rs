//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::warn;

use crate::web::{auth::session_id_from_headers, state::AppState};

/// Validates the session cookie and stores the parent's user id in the request extensions.
/// Missing, unknown or expired sessions get 401.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_session_id = session_id_from_headers(req.headers())
        .ok_or(StatusCode::UNAUTHORIZED)?
        .to_string();

    let user_id = state
        .db
        .validate_auth_session(&auth_session_id)
        .await
        .map_err(|e| {
            warn!("Rejected auth session: {:?}", e);
            StatusCode::UNAUTHORIZED
        })?;

    req.extensions_mut().insert(user_id);
    Ok(next.run(req).await)
}
