//! services/api/src/web/phrase_cards.rs
//!
//! Phrase cards: short ready-made sentences a child can tap instead of speaking.

use crate::web::{
    rest::{port_error, HandlerError},
    state::AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use companion_core::domain::{PhraseCard, PhraseCategory};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

/// Longest phrase a card may hold.
pub const MAX_PHRASE_CHARS: usize = 120;

#[derive(Deserialize, ToSchema)]
pub struct CreatePhraseCardRequest {
    pub text: String,
    /// One of greeting, feelings, routine, play, learning, custom.
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_category() -> String {
    PhraseCategory::Custom.as_str().to_string()
}

#[derive(Serialize, ToSchema)]
pub struct PhraseCardResponse {
    id: Uuid,
    text: String,
    category: String,
    is_preset: bool,
    usage_count: u32,
    last_used_at: Option<DateTime<Utc>>,
}

impl From<PhraseCard> for PhraseCardResponse {
    fn from(card: PhraseCard) -> Self {
        Self {
            id: card.id,
            text: card.text,
            category: card.category.as_str().to_string(),
            is_preset: card.is_preset,
            usage_count: card.usage_count,
            last_used_at: card.last_used_at,
        }
    }
}

fn validate_card(req: &CreatePhraseCardRequest) -> Result<(String, PhraseCategory), HandlerError> {
    let text = req.text.trim();
    if text.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Phrase text is required".to_string()));
    }
    if text.chars().count() > MAX_PHRASE_CHARS {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Phrase text must be at most {} characters", MAX_PHRASE_CHARS),
        ));
    }
    let category = req
        .category
        .trim()
        .to_lowercase()
        .parse::<PhraseCategory>()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok((text.to_string(), category))
}

#[utoipa::path(
    post,
    path = "/phrase-cards",
    request_body = CreatePhraseCardRequest,
    responses(
        (status = 201, description = "Card created", body = PhraseCardResponse),
        (status = 400, description = "Empty text or unknown category")
    )
)]
pub async fn create_phrase_card_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<CreatePhraseCardRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let (text, category) = validate_card(&req)?;
    let card = app_state
        .db
        .create_phrase_card(user_id, &text, category)
        .await
        .map_err(|e| port_error("Create phrase card", e))?;
    Ok((StatusCode::CREATED, Json(PhraseCardResponse::from(card))))
}

/// List the parent's cards, most used first.
#[utoipa::path(
    get,
    path = "/phrase-cards",
    responses((status = 200, description = "Phrase cards", body = [PhraseCardResponse]))
)]
pub async fn list_phrase_cards_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<Json<Vec<PhraseCardResponse>>, HandlerError> {
    let cards = app_state
        .db
        .list_phrase_cards(user_id)
        .await
        .map_err(|e| port_error("List phrase cards", e))?;
    Ok(Json(cards.into_iter().map(PhraseCardResponse::from).collect()))
}

/// Record that the child tapped a card.
#[utoipa::path(
    post,
    path = "/phrase-cards/{card_id}/use",
    params(("card_id" = Uuid, Path, description = "The card's id")),
    responses(
        (status = 200, description = "Usage recorded", body = PhraseCardResponse),
        (status = 404, description = "Card not found")
    )
)]
pub async fn use_phrase_card_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(card_id): Path<Uuid>,
) -> Result<Json<PhraseCardResponse>, HandlerError> {
    let card = app_state
        .db
        .record_phrase_card_usage(user_id, card_id, Utc::now())
        .await
        .map_err(|e| port_error("Use phrase card", e))?;
    Ok(Json(PhraseCardResponse::from(card)))
}

#[utoipa::path(
    delete,
    path = "/phrase-cards/{card_id}",
    params(("card_id" = Uuid, Path, description = "The card's id")),
    responses(
        (status = 204, description = "Card deleted"),
        (status = 404, description = "Card not found")
    )
)]
pub async fn delete_phrase_card_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(card_id): Path<Uuid>,
) -> Result<StatusCode, HandlerError> {
    app_state
        .db
        .delete_phrase_card(user_id, card_id)
        .await
        .map_err(|e| port_error("Delete phrase card", e))?;
    Ok(StatusCode::NO_CONTENT)
}
