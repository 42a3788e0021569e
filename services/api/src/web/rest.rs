//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for children and conversation sessions, the shared
//! error mapping used by every REST handler, and the master definition for the
//! OpenAPI specification.

use crate::web::{
    auth::{self, AuthResponse, LoginRequest, SignupRequest},
    phrase_cards::{self, CreatePhraseCardRequest, PhraseCardResponse},
    photos,
    reports::{self, WeeklyReportResponse},
    state::AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use companion_core::{
    domain::{ChildProfile, ConversationSession, Turn},
    ports::{NewChild, PortError},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::signup_handler,
        auth::login_handler,
        auth::logout_handler,
        create_child_handler,
        list_children_handler,
        create_conversation_session_handler,
        list_conversation_sessions_handler,
        end_conversation_session_handler,
        list_turns_handler,
        reports::weekly_report_handler,
        photos::upload_photo_handler,
        photos::download_photo_handler,
        phrase_cards::create_phrase_card_handler,
        phrase_cards::list_phrase_cards_handler,
        phrase_cards::use_phrase_card_handler,
        phrase_cards::delete_phrase_card_handler,
    ),
    components(
        schemas(
            SignupRequest, LoginRequest, AuthResponse,
            CreateChildRequest, ChildResponse,
            SessionResponse, TurnResponse,
            WeeklyReportResponse,
            CreatePhraseCardRequest, PhraseCardResponse,
        )
    ),
    tags(
        (name = "Companion API", description = "API endpoints for the children's conversational companion.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Error Mapping and Ownership Checks
//=========================================================================================

pub type HandlerError = (StatusCode, String);

/// Maps a port failure to an HTTP response, logging anything unexpected.
pub fn port_error(context: &str, e: PortError) -> HandlerError {
    match e {
        PortError::NotFound(_) => (StatusCode::NOT_FOUND, format!("{}: not found", context)),
        PortError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
        PortError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        PortError::Unexpected(msg) => {
            error!("{}: {}", context, msg);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{} failed", context))
        }
    }
}

/// Loads a child and checks that `user_id` owns it. Other users' children read as missing.
pub async fn owned_child(
    app_state: &AppState,
    user_id: Uuid,
    child_id: Uuid,
) -> Result<ChildProfile, HandlerError> {
    let child = app_state
        .db
        .get_child(child_id)
        .await
        .map_err(|e| port_error("Load child", e))?;
    if child.user_id != user_id {
        return Err((StatusCode::NOT_FOUND, "Load child: not found".to_string()));
    }
    Ok(child)
}

async fn owned_session(
    app_state: &AppState,
    user_id: Uuid,
    session_id: Uuid,
) -> Result<ConversationSession, HandlerError> {
    let session = app_state
        .db
        .get_conversation_session(session_id)
        .await
        .map_err(|e| port_error("Load session", e))?;
    if session.user_id != user_id {
        return Err((StatusCode::NOT_FOUND, "Load session: not found".to_string()));
    }
    Ok(session)
}

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct CreateChildRequest {
    pub name: String,
    pub age: Option<u8>,
    #[serde(default)]
    pub interests: Vec<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ChildResponse {
    id: Uuid,
    name: String,
    age: Option<u8>,
    interests: Vec<String>,
    has_photo: bool,
    created_at: DateTime<Utc>,
}

impl From<ChildProfile> for ChildResponse {
    fn from(child: ChildProfile) -> Self {
        Self {
            id: child.id,
            name: child.name,
            age: child.age,
            interests: child.interests,
            has_photo: child.photo_path.is_some(),
            created_at: child.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct SessionResponse {
    id: Uuid,
    child_id: Uuid,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    turn_count: u32,
    opening_line: Option<String>,
    duration_seconds: Option<i64>,
}

impl From<ConversationSession> for SessionResponse {
    fn from(session: ConversationSession) -> Self {
        Self {
            duration_seconds: session.duration().map(|d| d.num_seconds()),
            id: session.id,
            child_id: session.child_id,
            started_at: session.started_at,
            ended_at: session.ended_at,
            turn_count: session.turn_count,
            opening_line: session.opening_line,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct TurnResponse {
    sequence: u32,
    speaker: String,
    text: String,
    created_at: DateTime<Utc>,
}

impl From<Turn> for TurnResponse {
    fn from(turn: Turn) -> Self {
        Self {
            sequence: turn.sequence,
            speaker: turn.speaker.to_string(),
            text: turn.text,
            created_at: turn.created_at,
        }
    }
}

//=========================================================================================
// Children
//=========================================================================================

/// Add a child profile to the signed-in parent's account.
#[utoipa::path(
    post,
    path = "/children",
    request_body = CreateChildRequest,
    responses(
        (status = 201, description = "Child created", body = ChildResponse),
        (status = 400, description = "Missing name or implausible age"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn create_child_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<CreateChildRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Name is required".to_string()));
    }
    if matches!(req.age, Some(age) if age > 17) {
        return Err((StatusCode::BAD_REQUEST, "Age must be between 0 and 17".to_string()));
    }
    let interests = req
        .interests
        .into_iter()
        .map(|i| i.trim().to_string())
        .filter(|i| !i.is_empty())
        .collect();

    let child = app_state
        .db
        .create_child(
            user_id,
            NewChild {
                name,
                age: req.age,
                interests,
            },
        )
        .await
        .map_err(|e| port_error("Create child", e))?;
    Ok((StatusCode::CREATED, Json(ChildResponse::from(child))))
}

#[utoipa::path(
    get,
    path = "/children",
    responses((status = 200, description = "The parent's children", body = [ChildResponse]))
)]
pub async fn list_children_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<Json<Vec<ChildResponse>>, HandlerError> {
    let children = app_state
        .db
        .list_children(user_id)
        .await
        .map_err(|e| port_error("List children", e))?;
    Ok(Json(children.into_iter().map(ChildResponse::from).collect()))
}

//=========================================================================================
// Conversation Sessions
//=========================================================================================

/// Start a new conversation for a child. Connect to `/ws` with the returned id.
#[utoipa::path(
    post,
    path = "/children/{child_id}/sessions",
    params(("child_id" = Uuid, Path, description = "The child's id")),
    responses(
        (status = 201, description = "Session created", body = SessionResponse),
        (status = 404, description = "Child not found")
    )
)]
pub async fn create_conversation_session_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(child_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let child = owned_child(&app_state, user_id, child_id).await?;
    let session = app_state
        .db
        .create_conversation_session(user_id, child.id)
        .await
        .map_err(|e| port_error("Create session", e))?;
    Ok((StatusCode::CREATED, Json(SessionResponse::from(session))))
}

#[utoipa::path(
    get,
    path = "/children/{child_id}/sessions",
    params(("child_id" = Uuid, Path, description = "The child's id")),
    responses(
        (status = 200, description = "Sessions, newest first", body = [SessionResponse]),
        (status = 404, description = "Child not found")
    )
)]
pub async fn list_conversation_sessions_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(child_id): Path<Uuid>,
) -> Result<Json<Vec<SessionResponse>>, HandlerError> {
    let child = owned_child(&app_state, user_id, child_id).await?;
    let sessions = app_state
        .db
        .list_sessions_for_child(child.id)
        .await
        .map_err(|e| port_error("List sessions", e))?;
    Ok(Json(sessions.into_iter().map(SessionResponse::from).collect()))
}

/// End a session. Ending an already ended session keeps its first end time.
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/end",
    params(("session_id" = Uuid, Path, description = "The session's id")),
    responses(
        (status = 200, description = "Session ended", body = SessionResponse),
        (status = 404, description = "Session not found")
    )
)]
pub async fn end_conversation_session_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionResponse>, HandlerError> {
    owned_session(&app_state, user_id, session_id).await?;
    let session = app_state
        .db
        .end_conversation_session(session_id, Utc::now())
        .await
        .map_err(|e| port_error("End session", e))?;
    Ok(Json(SessionResponse::from(session)))
}

#[utoipa::path(
    get,
    path = "/sessions/{session_id}/turns",
    params(("session_id" = Uuid, Path, description = "The session's id")),
    responses(
        (status = 200, description = "Transcript in order", body = [TurnResponse]),
        (status = 404, description = "Session not found")
    )
)]
pub async fn list_turns_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Vec<TurnResponse>>, HandlerError> {
    owned_session(&app_state, user_id, session_id).await?;
    let turns = app_state
        .db
        .get_turns_for_session(session_id)
        .await
        .map_err(|e| port_error("List turns", e))?;
    Ok(Json(turns.into_iter().map(TurnResponse::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn port_errors_map_to_status_codes() {
        assert_eq!(
            port_error("Load child", PortError::NotFound("x".into())).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(port_error("x", PortError::Unauthorized).0, StatusCode::UNAUTHORIZED);
        let (status, body) = port_error("Signup", PortError::Conflict("Email taken".into()));
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body, "Email taken");
        let (status, body) = port_error("List turns", PortError::Unexpected("pool closed".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.contains("pool closed"));
    }

    #[test]
    fn session_response_reports_duration_once_ended() {
        let started_at = Utc::now();
        let mut session = ConversationSession {
            id: Uuid::new_v4(),
            child_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            started_at,
            ended_at: None,
            turn_count: 4,
            opening_line: Some("I saw a frog".to_string()),
        };
        assert_eq!(SessionResponse::from(session.clone()).duration_seconds, None);

        session.ended_at = Some(started_at + Duration::seconds(95));
        assert_eq!(SessionResponse::from(session).duration_seconds, Some(95));
    }
}
