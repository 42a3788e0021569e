//! In-memory port fakes for exercising the WebSocket turn handling.

use crate::web::{
    protocol::{shared_sender, WsSender},
    state::{AppState, ConversationState},
};
use async_trait::async_trait;
use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use companion_core::{
    domain::{
        ChildProfile, ConversationSession, PhraseCard, PhraseCategory, Speaker, Turn, User,
        UserCredentials, WeekId, WeeklyReport,
    },
    ports::{
        CompanionReplyService, DatabaseService, NewChild, PhotoStorageService, PortError,
        PortResult, ReportGenerationService, SpeechToTextService, TextToSpeechService,
    },
};
use futures::{
    channel::mpsc::{unbounded, UnboundedReceiver},
    SinkExt, StreamExt,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn unused<T>() -> PortResult<T> {
    Err(PortError::Unexpected("not used by this test".to_string()))
}

#[derive(Default)]
pub struct MemoryDb {
    pub children: Mutex<HashMap<Uuid, ChildProfile>>,
    pub sessions: Mutex<HashMap<Uuid, ConversationSession>>,
    pub turns: Mutex<Vec<Turn>>,
}

impl MemoryDb {
    pub fn turn_texts(&self) -> Vec<(Speaker, String)> {
        self.turns
            .lock()
            .unwrap()
            .iter()
            .map(|t| (t.speaker, t.text.clone()))
            .collect()
    }

    pub fn turn_count(&self, session_id: Uuid) -> u32 {
        self.sessions.lock().unwrap()[&session_id].turn_count
    }
}

#[async_trait]
impl DatabaseService for MemoryDb {
    async fn create_user_with_email(&self, _: &str, _: &str) -> PortResult<User> {
        unused()
    }
    async fn get_user_by_email(&self, _: &str) -> PortResult<UserCredentials> {
        unused()
    }
    async fn create_auth_session(&self, _: &str, _: Uuid, _: DateTime<Utc>) -> PortResult<()> {
        unused()
    }
    async fn validate_auth_session(&self, _: &str) -> PortResult<Uuid> {
        unused()
    }
    async fn delete_auth_session(&self, _: &str) -> PortResult<()> {
        unused()
    }
    async fn create_child(&self, _: Uuid, _: NewChild) -> PortResult<ChildProfile> {
        unused()
    }
    async fn get_child(&self, child_id: Uuid) -> PortResult<ChildProfile> {
        self.children
            .lock()
            .unwrap()
            .get(&child_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(child_id.to_string()))
    }
    async fn list_children(&self, _: Uuid) -> PortResult<Vec<ChildProfile>> {
        unused()
    }
    async fn set_child_photo_path(&self, _: Uuid, _: &str) -> PortResult<()> {
        unused()
    }
    async fn create_conversation_session(&self, _: Uuid, _: Uuid) -> PortResult<ConversationSession> {
        unused()
    }
    async fn get_conversation_session(&self, session_id: Uuid) -> PortResult<ConversationSession> {
        self.sessions
            .lock()
            .unwrap()
            .get(&session_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(session_id.to_string()))
    }
    async fn end_conversation_session(
        &self,
        session_id: Uuid,
        ended_at: DateTime<Utc>,
    ) -> PortResult<ConversationSession> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| PortError::NotFound(session_id.to_string()))?;
        session.ended_at.get_or_insert(ended_at);
        Ok(session.clone())
    }
    async fn list_sessions_for_child(&self, _: Uuid) -> PortResult<Vec<ConversationSession>> {
        unused()
    }
    async fn count_sessions_for_child(&self, _: Uuid) -> PortResult<u32> {
        unused()
    }
    async fn list_sessions_between(
        &self,
        _: Uuid,
        _: DateTime<Utc>,
        _: DateTime<Utc>,
    ) -> PortResult<Vec<ConversationSession>> {
        unused()
    }
    async fn append_turn(&self, session_id: Uuid, speaker: Speaker, text: &str) -> PortResult<Turn> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(&session_id)
            .filter(|s| s.is_active())
            .ok_or_else(|| PortError::NotFound(format!("Active session {} not found", session_id)))?;
        session.turn_count += 1;
        if session.opening_line.is_none() && speaker == Speaker::Child {
            session.opening_line = Some(text.to_string());
        }
        let turn = Turn {
            id: Uuid::new_v4(),
            session_id,
            sequence: session.turn_count,
            speaker,
            text: text.to_string(),
            created_at: Utc::now(),
        };
        self.turns.lock().unwrap().push(turn.clone());
        Ok(turn)
    }
    async fn get_turns_for_session(&self, session_id: Uuid) -> PortResult<Vec<Turn>> {
        Ok(self
            .turns
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect())
    }
    async fn create_phrase_card(&self, _: Uuid, _: &str, _: PhraseCategory) -> PortResult<PhraseCard> {
        unused()
    }
    async fn list_phrase_cards(&self, _: Uuid) -> PortResult<Vec<PhraseCard>> {
        unused()
    }
    async fn record_phrase_card_usage(&self, _: Uuid, _: Uuid, _: DateTime<Utc>) -> PortResult<PhraseCard> {
        unused()
    }
    async fn delete_phrase_card(&self, _: Uuid, _: Uuid) -> PortResult<()> {
        unused()
    }
    async fn get_weekly_report(&self, _: Uuid, _: WeekId) -> PortResult<Option<WeeklyReport>> {
        unused()
    }
    async fn upsert_weekly_report(&self, _: &WeeklyReport) -> PortResult<()> {
        unused()
    }
}

/// Returns a fixed transcript and remembers how much audio it was given.
pub struct FakeStt {
    pub transcript: String,
    pub calls: AtomicUsize,
    pub last_audio_len: AtomicUsize,
}

#[async_trait]
impl SpeechToTextService for FakeStt {
    async fn transcribe_audio(&self, audio_data: &[u8]) -> PortResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_audio_len.store(audio_data.len(), Ordering::SeqCst);
        Ok(self.transcript.clone())
    }
}

/// "Synthesizes" a sentence as its UTF-8 bytes.
pub struct EchoTts;

#[async_trait]
impl TextToSpeechService for EchoTts {
    async fn generate_audio(&self, text: &str) -> PortResult<Vec<u8>> {
        Ok(text.as_bytes().to_vec())
    }
}

/// Answers with `reply`, optionally cancelling `cancel_on_reply` first to mimic a barge-in.
pub struct FakeCompanion {
    pub reply: Result<String, String>,
    pub cancel_on_reply: Option<CancellationToken>,
    pub calls: AtomicUsize,
}

impl FakeCompanion {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            cancel_on_reply: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            cancel_on_reply: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CompanionReplyService for FakeCompanion {
    async fn reply(&self, _: &ChildProfile, _: &[Turn], _: &str) -> PortResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.cancel_on_reply {
            token.cancel();
        }
        self.reply.clone().map_err(PortError::Unexpected)
    }
}

pub struct NoReports;

#[async_trait]
impl ReportGenerationService for NoReports {
    async fn generate_report(&self, _: &str) -> PortResult<String> {
        unused()
    }
}

pub struct NoPhotos;

#[async_trait]
impl PhotoStorageService for NoPhotos {
    async fn upload_photo(&self, _: &str, _: &[u8]) -> PortResult<()> {
        unused()
    }
    async fn download_photo(&self, _: &str, _: usize) -> PortResult<Vec<u8>> {
        unused()
    }
    async fn download_url(&self, _: &str) -> PortResult<String> {
        unused()
    }
    async fn fetch_url(&self, _: &str, _: usize) -> PortResult<Vec<u8>> {
        unused()
    }
}

/// One child with one open session, wired into an `AppState` of fakes.
pub struct Harness {
    pub app_state: Arc<AppState>,
    pub db: Arc<MemoryDb>,
    pub stt: Arc<FakeStt>,
    pub companion: Arc<FakeCompanion>,
    pub user_id: Uuid,
    pub session_id: Uuid,
}

impl Harness {
    pub fn new(companion: FakeCompanion, stt_transcript: &str) -> Self {
        let user_id = Uuid::new_v4();
        let child = ChildProfile {
            id: Uuid::new_v4(),
            user_id,
            name: "Mia".to_string(),
            age: Some(6),
            interests: vec!["frogs".to_string()],
            photo_path: None,
            created_at: Utc::now(),
        };
        let session = ConversationSession {
            id: Uuid::new_v4(),
            child_id: child.id,
            user_id,
            started_at: Utc::now(),
            ended_at: None,
            turn_count: 0,
            opening_line: None,
        };
        let session_id = session.id;

        let db = Arc::new(MemoryDb::default());
        db.children.lock().unwrap().insert(child.id, child);
        db.sessions.lock().unwrap().insert(session_id, session);

        let stt = Arc::new(FakeStt {
            transcript: stt_transcript.to_string(),
            calls: AtomicUsize::new(0),
            last_audio_len: AtomicUsize::new(0),
        });
        let companion = Arc::new(companion);

        let app_state = Arc::new(AppState {
            db: db.clone(),
            sst_adapter: stt.clone(),
            tts_adapter: Arc::new(EchoTts),
            companion_adapter: companion.clone(),
            report_adapter: Arc::new(NoReports),
            photo_store: Arc::new(NoPhotos),
        });

        Self {
            app_state,
            db,
            stt,
            companion,
            user_id,
            session_id,
        }
    }

    pub async fn conversation(&self) -> Arc<tokio::sync::Mutex<ConversationState>> {
        let state = ConversationState::load(&self.app_state, self.user_id, self.session_id)
            .await
            .unwrap();
        Arc::new(tokio::sync::Mutex::new(state))
    }
}

/// A sender whose frames land in the returned receiver.
pub fn capture_sender() -> (WsSender, UnboundedReceiver<Message>) {
    let (tx, rx) = unbounded::<Message>();
    (shared_sender(tx.sink_map_err(axum::Error::new)), rx)
}

/// Collects every frame once all senders are dropped. Control frames become their
/// `type` tag and audio frames become `"audio"`.
pub async fn sent_frames(rx: UnboundedReceiver<Message>) -> Vec<String> {
    rx.map(|msg| match msg {
        Message::Text(text) => {
            let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            value["type"].as_str().unwrap_or_default().to_string()
        }
        Message::Binary(_) => "audio".to_string(),
        other => format!("{:?}", other),
    })
    .collect()
    .await
}

/// Like `sent_frames`, but returns the raw JSON of control frames only.
pub async fn sent_json(rx: UnboundedReceiver<Message>) -> Vec<serde_json::Value> {
    rx.filter_map(|msg| async move {
        match msg {
            Message::Text(text) => serde_json::from_str(text.as_str()).ok(),
            _ => None,
        }
    })
    .collect()
    .await
}
