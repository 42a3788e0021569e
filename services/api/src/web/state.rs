//! services/api/src/web/state.rs
//!
//! Defines the application's shared and conversation-specific states.

use companion_core::{
    conversation::ConversationLoop,
    domain::{ChildProfile, Turn},
    ports::{
        CompanionReplyService, DatabaseService, PhotoStorageService, PortError, PortResult,
        ReportGenerationService, SpeechToTextService, TextToSpeechService,
    },
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Number of previous turns sent to the companion model as context.
pub const HISTORY_TURNS: usize = 10;

/// About one minute of 16 kHz mono PCM16.
pub const MAX_AUDIO_BYTES: usize = 16_000 * 2 * 60;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub sst_adapter: Arc<dyn SpeechToTextService>,
    pub tts_adapter: Arc<dyn TextToSpeechService>,
    pub companion_adapter: Arc<dyn CompanionReplyService>,
    pub report_adapter: Arc<dyn ReportGenerationService>,
    pub photo_store: Arc<dyn PhotoStorageService>,
}

//=========================================================================================
// ConversationState (Specific to One WebSocket Connection)
//=========================================================================================

pub struct ConversationState {
    pub session_id: Uuid,
    pub child: ChildProfile,
    pub turn_loop: ConversationLoop,
    /// Raw microphone audio for the current recording, if the device streams it.
    pub audio_buffer: Vec<u8>,
    /// Every turn of this session so far, oldest first.
    pub history: Vec<Turn>,
    /// Cancels the in-flight reply. Replaced for every turn.
    pub cancellation_token: CancellationToken,
}

impl ConversationState {
    /// Loads the session, checks that `user_id` owns it and that it is still open.
    pub async fn load(app_state: &AppState, user_id: Uuid, session_id: Uuid) -> PortResult<Self> {
        let session = app_state.db.get_conversation_session(session_id).await?;
        if session.user_id != user_id {
            return Err(PortError::Unauthorized);
        }
        if !session.is_active() {
            return Err(PortError::Conflict(format!("Session {} has ended", session_id)));
        }

        let child = app_state.db.get_child(session.child_id).await?;
        let history = app_state.db.get_turns_for_session(session_id).await?;

        Ok(Self {
            session_id,
            child,
            turn_loop: ConversationLoop::new(),
            audio_buffer: Vec::new(),
            history,
            cancellation_token: CancellationToken::new(),
        })
    }

    /// The most recent turns to give the companion as context.
    pub fn recent_history(&self) -> Vec<Turn> {
        let start = self.history.len().saturating_sub(HISTORY_TURNS);
        self.history[start..].to_vec()
    }

    /// Appends microphone audio, dropping anything past the cap.
    pub fn buffer_audio(&mut self, data: &[u8]) -> bool {
        let room = MAX_AUDIO_BYTES.saturating_sub(self.audio_buffer.len());
        let take = room.min(data.len());
        self.audio_buffer.extend_from_slice(&data[..take]);
        take == data.len()
    }
}
