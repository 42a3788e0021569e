//! crates/companion_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    ChildProfile, ConversationSession, PhraseCard, PhraseCategory, Speaker, Turn, User,
    UserCredentials, WeekId, WeeklyReport,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Input for a new child profile.
#[derive(Debug, Clone)]
pub struct NewChild {
    pub name: String,
    pub age: Option<u8>,
    pub interests: Vec<String>,
}

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Auth ---
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Returns the owning user, or `Unauthorized` when missing or expired.
    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;

    // --- Children ---
    async fn create_child(&self, user_id: Uuid, child: NewChild) -> PortResult<ChildProfile>;

    async fn get_child(&self, child_id: Uuid) -> PortResult<ChildProfile>;

    async fn list_children(&self, user_id: Uuid) -> PortResult<Vec<ChildProfile>>;

    async fn set_child_photo_path(&self, child_id: Uuid, photo_path: &str) -> PortResult<()>;

    // --- Conversation Sessions ---
    async fn create_conversation_session(
        &self,
        user_id: Uuid,
        child_id: Uuid,
    ) -> PortResult<ConversationSession>;

    async fn get_conversation_session(&self, session_id: Uuid) -> PortResult<ConversationSession>;

    async fn end_conversation_session(
        &self,
        session_id: Uuid,
        ended_at: DateTime<Utc>,
    ) -> PortResult<ConversationSession>;

    /// Newest first.
    async fn list_sessions_for_child(&self, child_id: Uuid) -> PortResult<Vec<ConversationSession>>;

    async fn count_sessions_for_child(&self, child_id: Uuid) -> PortResult<u32>;

    /// Sessions with `start <= started_at < end`, oldest first.
    async fn list_sessions_between(
        &self,
        child_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PortResult<Vec<ConversationSession>>;

    // --- Turns ---
    /// Appends a turn and increments the session's turn count in one step.
    async fn append_turn(&self, session_id: Uuid, speaker: Speaker, text: &str) -> PortResult<Turn>;

    /// Ordered by sequence.
    async fn get_turns_for_session(&self, session_id: Uuid) -> PortResult<Vec<Turn>>;

    // --- Phrase Cards ---
    async fn create_phrase_card(
        &self,
        user_id: Uuid,
        text: &str,
        category: PhraseCategory,
    ) -> PortResult<PhraseCard>;

    async fn list_phrase_cards(&self, user_id: Uuid) -> PortResult<Vec<PhraseCard>>;

    async fn record_phrase_card_usage(
        &self,
        user_id: Uuid,
        card_id: Uuid,
        used_at: DateTime<Utc>,
    ) -> PortResult<PhraseCard>;

    async fn delete_phrase_card(&self, user_id: Uuid, card_id: Uuid) -> PortResult<()>;

    // --- Weekly Reports ---
    async fn get_weekly_report(
        &self,
        child_id: Uuid,
        week: WeekId,
    ) -> PortResult<Option<WeeklyReport>>;

    /// Inserts or replaces the report for `(child_id, week)`.
    async fn upsert_weekly_report(&self, report: &WeeklyReport) -> PortResult<()>;
}

#[async_trait]
pub trait SpeechToTextService: Send + Sync {
    /// Transcribes a slice of audio data into text.
    async fn transcribe_audio(&self, audio_data: &[u8]) -> PortResult<String>;
}

#[async_trait]
pub trait TextToSpeechService: Send + Sync {
    /// Generates audio data from a string of text.
    async fn generate_audio(&self, text: &str) -> PortResult<Vec<u8>>;
}

#[async_trait]
pub trait CompanionReplyService: Send + Sync {
    /// Produces the companion's next line given recent turns and the child's utterance.
    async fn reply(
        &self,
        child: &ChildProfile,
        history: &[Turn],
        utterance: &str,
    ) -> PortResult<String>;
}

#[async_trait]
pub trait ReportGenerationService: Send + Sync {
    /// Sends a weekly-report prompt to the model and returns its raw text.
    async fn generate_report(&self, prompt: &str) -> PortResult<String>;
}

#[async_trait]
pub trait PhotoStorageService: Send + Sync {
    async fn upload_photo(&self, path: &str, jpeg: &[u8]) -> PortResult<()>;

    /// Fails if the object is larger than `max_bytes`.
    async fn download_photo(&self, path: &str, max_bytes: usize) -> PortResult<Vec<u8>>;

    /// Resolves a URL the object can be fetched from directly.
    async fn download_url(&self, path: &str) -> PortResult<String>;

    async fn fetch_url(&self, url: &str, max_bytes: usize) -> PortResult<Vec<u8>>;
}
