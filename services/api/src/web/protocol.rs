//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the companion app and the API server.

use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// The write half of a socket, shared between the control loop and the turn task.
pub type WsSender = Arc<Mutex<Pin<Box<dyn Sink<Message, Error = axum::Error> + Send>>>>;

pub fn shared_sender<S>(sink: S) -> WsSender
where
    S: Sink<Message, Error = axum::Error> + Send + 'static,
{
    Arc::new(Mutex::new(Box::pin(sink)))
}

// User-facing strings. Details go to the log, not to the child.
pub const RECOGNIZER_ERROR_MESSAGE: &str = "I couldn't hear that. Can you try again?";
pub const REPLY_ERROR_MESSAGE: &str = "Oops, I got a little mixed up. Can you say that again?";
pub const BUSY_MESSAGE: &str = "Hang on, I'm still thinking!";
pub const SESSION_LOAD_ERROR_MESSAGE: &str = "Failed to load session data.";

//=========================================================================================
// Messages Sent FROM the Client (App) TO the Server
//=========================================================================================
// NOTE: When the device has no on-device recognizer it streams microphone audio
// (16 kHz mono PCM16) as Binary frames between StartRecording and StopRecording.
//=========================================================================================

#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Must be the first message sent on the connection.
    Init { session_id: Uuid },

    /// The child pressed the talk button. Interrupts the companion if it is speaking.
    StartRecording,

    /// An in-progress result from the device's recognizer.
    TranscriptPartial { text: String },

    /// The recognizer's final result for this turn.
    TranscriptFinal { text: String },

    /// The device's recognizer failed.
    RecognizerError { message: String },

    /// The child released the talk button.
    StopRecording,

    /// Cut the companion off mid-reply.
    StopSpeaking,

    /// Close the conversation.
    EndSession,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (App)
//=========================================================================================
// NOTE: The companion's voice is sent as Binary frames between SpeakingStarted and
// SpeakingEnded.
//=========================================================================================

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SessionInitialized { session_id: Uuid, turn_count: u32 },

    /// Recording has started; the app can show its listening animation.
    Listening,

    /// Echo of the current transcript for display.
    Transcript { text: String, is_final: bool },

    /// Recording ended without anything recognized.
    NothingHeard,

    /// The companion is preparing a reply.
    Thinking,

    /// The reply text, sent before its audio.
    Reply { text: String },

    SpeakingStarted,

    SpeakingEnded,

    SessionEnded { turn_count: u32 },

    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

/// Serializes and sends one control message.
pub async fn send_message(ws_sender: &WsSender, msg: &ServerMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
    ws_sender.lock().await.send(Message::Text(json.into())).await
}

pub async fn send_audio(ws_sender: &WsSender, audio: Vec<u8>) -> Result<(), axum::Error> {
    ws_sender.lock().await.send(Message::Binary(audio.into())).await
}
