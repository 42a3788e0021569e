//! services/api/src/web/auth.rs
//!
//! Parent account endpoints: signup, login, and logout, plus the session cookie
//! helpers shared with the auth middleware.

use crate::web::{
    rest::{port_error, HandlerError},
    state::AppState,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{Duration, Utc};
use companion_core::ports::PortError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "session";
pub const SESSION_DAYS: i64 = 30;
pub const MIN_PASSWORD_CHARS: usize = 8;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub email: String,
}

//=========================================================================================
// Cookie Helpers
//=========================================================================================

/// Finds the auth session id in the request's `Cookie` header.
pub fn session_id_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())?
        .split(';')
        .find_map(|c| {
            c.trim()
                .strip_prefix(SESSION_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
        })
        .filter(|id| !id.is_empty())
}

fn session_cookie(session_id: &str, max_age_seconds: i64) -> String {
    format!(
        "{}={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        SESSION_COOKIE, session_id, max_age_seconds
    )
}

fn normalize_email(email: &str) -> Result<String, HandlerError> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if !valid {
        return Err((StatusCode::BAD_REQUEST, "A valid email is required".to_string()));
    }
    Ok(email)
}

/// Creates an auth session for `user_id` and returns its `Set-Cookie` value.
async fn start_auth_session(state: &AppState, user_id: Uuid) -> Result<String, HandlerError> {
    let auth_session_id = Uuid::new_v4().to_string();
    let expires_at = Utc::now() + Duration::days(SESSION_DAYS);
    state
        .db
        .create_auth_session(&auth_session_id, user_id, expires_at)
        .await
        .map_err(|e| port_error("Create session", e))?;
    Ok(session_cookie(
        &auth_session_id,
        Duration::days(SESSION_DAYS).num_seconds(),
    ))
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/signup - Create a parent account
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 400, description = "Invalid email or short password"),
        (status = 409, description = "Email already registered"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let email = normalize_email(&req.email)?;
    if req.password.chars().count() < MIN_PASSWORD_CHARS {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Password must be at least {} characters", MIN_PASSWORD_CHARS),
        ));
    }

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to hash password".to_string())
        })?
        .to_string();

    let user = state
        .db
        .create_user_with_email(&email, &password_hash)
        .await
        .map_err(|e| port_error("Signup", e))?;

    let cookie = start_auth_session(&state, user.user_id).await?;
    info!("New parent account: {}", user.user_id);

    let response = AuthResponse {
        user_id: user.user_id,
        email: user.email.unwrap_or(email),
    };
    Ok((StatusCode::CREATED, [(header::SET_COOKIE, cookie)], Json(response)))
}

/// POST /auth/login - Login with an existing account
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let invalid = || (StatusCode::UNAUTHORIZED, "Invalid email or password".to_string());

    let email = normalize_email(&req.email).map_err(|_| invalid())?;
    let user_creds = match state.db.get_user_by_email(&email).await {
        Ok(creds) => creds,
        Err(PortError::NotFound(_)) => return Err(invalid()),
        Err(e) => return Err(port_error("Login", e)),
    };

    let parsed_hash = PasswordHash::new(&user_creds.hashed_password).map_err(|e| {
        error!("Failed to parse password hash: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Authentication error".to_string())
    })?;
    if Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .is_err()
    {
        return Err(invalid());
    }

    let cookie = start_auth_session(&state, user_creds.user_id).await?;
    let response = AuthResponse {
        user_id: user_creds.user_id,
        email: user_creds.email,
    };
    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie)], Json(response)))
}

/// POST /auth/logout - Invalidate the current session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logout successful"),
        (status = 401, description = "No active session")
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HandlerError> {
    let auth_session_id = session_id_from_headers(&headers)
        .ok_or((StatusCode::UNAUTHORIZED, "No session found".to_string()))?;

    state
        .db
        .delete_auth_session(auth_session_id)
        .await
        .map_err(|e| port_error("Logout", e))?;

    Ok((StatusCode::OK, [(header::SET_COOKIE, session_cookie("", 0))]))
}
