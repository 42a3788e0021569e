//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a conversation WebSocket.
//! It owns the turn loop state machine and delegates each reply to a turn task.

use crate::web::{
    protocol::{
        send_audio, send_message, shared_sender, ClientMessage, ServerMessage, WsSender,
        BUSY_MESSAGE, RECOGNIZER_ERROR_MESSAGE, SESSION_LOAD_ERROR_MESSAGE,
    },
    state::{AppState, ConversationState},
    turn_task::turn_process,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use chrono::Utc;
use companion_core::{
    conversation::TurnPhase,
    ports::PortError,
    speech::{SpeechUpdate, TranscriptEvent},
};
use futures::stream::StreamExt;
use std::sync::Arc;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, user_id))
}

/// What the control loop should do after a client message.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, user_id: Uuid) {
    info!("New conversation WebSocket for user: {}", user_id);

    let (sender, mut receiver) = socket.split();
    let ws_sender = shared_sender(sender);

    // --- 1. Initialization Phase ---
    let session_id = match receiver.next().await {
        Some(Ok(Message::Text(init_json))) => match serde_json::from_str::<ClientMessage>(&init_json) {
            Ok(ClientMessage::Init { session_id }) => session_id,
            _ => {
                error!("First message was not a valid Init message.");
                return;
            }
        },
        _ => {
            error!("Client disconnected before sending Init message.");
            return;
        }
    };

    info!("Initializing conversation session: {}", session_id);
    let state = match ConversationState::load(&app_state, user_id, session_id).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize session {}: {:?}", session_id, e);
            let message = match e {
                PortError::Unauthorized => "Unauthorized: Session does not belong to this user.",
                PortError::Conflict(_) => "This conversation has already ended.",
                _ => SESSION_LOAD_ERROR_MESSAGE,
            };
            let _ = send_message(&ws_sender, &ServerMessage::error(message)).await;
            return;
        }
    };

    let is_new_session = state.history.is_empty();
    let child_name = state.child.name.clone();
    let init_msg = ServerMessage::SessionInitialized {
        session_id,
        turn_count: state.history.len() as u32,
    };
    let state_lock = Arc::new(Mutex::new(state));
    if send_message(&ws_sender, &init_msg).await.is_err() {
        error!("Failed to send session initialized message.");
        return;
    }

    if is_new_session {
        let greeting = format!("Hi {}! I'm Pip. What would you like to talk about today?", child_name);
        match app_state.tts_adapter.generate_audio(&greeting).await {
            Ok(audio) => {
                if send_audio(&ws_sender, audio).await.is_err() {
                    error!("Failed to send greeting audio.");
                    return;
                }
            }
            // Not fatal: the child can still start talking.
            Err(e) => warn!("Failed to generate greeting audio: {:?}", e),
        }
    }

    // --- 2. Main Message Loop ---
    let mut turn_task_handle: Option<JoinHandle<()>> = None;
    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                let flow = handle_text_message(
                    text.as_str(),
                    &app_state,
                    &state_lock,
                    &ws_sender,
                    &mut turn_task_handle,
                )
                .await;
                if flow == Flow::Close {
                    break;
                }
            }
            Some(Ok(Message::Binary(data))) => {
                let mut state = state_lock.lock().await;
                if state.turn_loop.phase().is_capturing() && !state.buffer_audio(&data) {
                    warn!("Recording exceeded the audio cap; extra audio dropped.");
                }
            }
            Some(Ok(Message::Close(_))) => {
                info!("Client sent close message.");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
            None => {
                info!("Client disconnected.");
                break;
            }
        }
    }

    // --- 3. Cleanup ---
    state_lock.lock().await.cancellation_token.cancel();
    if let Some(handle) = turn_task_handle {
        handle.abort();
    }
    if let Err(e) = app_state.db.end_conversation_session(session_id, Utc::now()).await {
        error!("Failed to end session {}: {:?}", session_id, e);
    }
    info!("Conversation WebSocket closed.");
}

/// Helper function to handle the logic for different `ClientMessage` variants.
async fn handle_text_message(
    text: &str,
    app_state: &Arc<AppState>,
    state_lock: &Arc<Mutex<ConversationState>>,
    ws_sender: &WsSender,
    turn_task_handle: &mut Option<JoinHandle<()>>,
) -> Flow {
    let client_msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
            return Flow::Continue;
        }
    };

    let reply = match client_msg {
        ClientMessage::StartRecording => Some(start_recording(state_lock).await),
        ClientMessage::TranscriptPartial { text } => {
            apply_transcript(state_lock, TranscriptEvent::Partial(text)).await
        }
        ClientMessage::TranscriptFinal { text } => {
            apply_transcript(state_lock, TranscriptEvent::Final(text)).await
        }
        ClientMessage::RecognizerError { message } => {
            apply_transcript(state_lock, TranscriptEvent::Error(message)).await
        }
        ClientMessage::StopRecording => {
            stop_recording(app_state, state_lock, ws_sender, turn_task_handle).await
        }
        ClientMessage::StopSpeaking => stop_speaking(state_lock).await,
        ClientMessage::EndSession => {
            let session_id = {
                let mut state = state_lock.lock().await;
                state.cancellation_token.cancel();
                state.turn_loop.abort("session ended");
                state.session_id
            };
            match app_state.db.end_conversation_session(session_id, Utc::now()).await {
                Ok(session) => {
                    let msg = ServerMessage::SessionEnded {
                        turn_count: session.turn_count,
                    };
                    if send_message(ws_sender, &msg).await.is_err() {
                        warn!("Failed to send SessionEnded message.");
                    }
                }
                Err(e) => error!("Failed to end session {}: {:?}", session_id, e),
            }
            return Flow::Close;
        }
        ClientMessage::Init { .. } => {
            warn!("Received subsequent Init message, which is ignored.");
            None
        }
    };

    if let Some(msg) = reply {
        if send_message(ws_sender, &msg).await.is_err() {
            error!("Failed to send {:?} to client.", msg);
        }
    }
    Flow::Continue
}

/// Starts a turn. Talking over the companion cancels its reply first.
async fn start_recording(state_lock: &Arc<Mutex<ConversationState>>) -> ServerMessage {
    let mut state = state_lock.lock().await;
    if state.turn_loop.phase() == TurnPhase::Speaking {
        info!("Child interrupted the companion.");
        state.cancellation_token.cancel();
        state.turn_loop.abort("interrupted by child");
    }
    match state.turn_loop.begin_recording() {
        Ok(()) => {
            state.audio_buffer.clear();
            ServerMessage::Listening
        }
        Err(e) => {
            warn!("Cannot start recording: {}", e);
            ServerMessage::error(BUSY_MESSAGE)
        }
    }
}

/// Drops the in-flight reply. `SpeakingEnded` is only sent if speaking had started.
async fn stop_speaking(state_lock: &Arc<Mutex<ConversationState>>) -> Option<ServerMessage> {
    let mut state = state_lock.lock().await;
    let phase = state.turn_loop.phase();
    if !matches!(phase, TurnPhase::AwaitingResponse | TurnPhase::Speaking) {
        return None;
    }
    state.cancellation_token.cancel();
    state.turn_loop.abort("stopped by child");
    (phase == TurnPhase::Speaking).then_some(ServerMessage::SpeakingEnded)
}

async fn apply_transcript(
    state_lock: &Arc<Mutex<ConversationState>>,
    event: TranscriptEvent,
) -> Option<ServerMessage> {
    let mut state = state_lock.lock().await;
    match state.turn_loop.on_transcript(event) {
        Ok(SpeechUpdate::Partial(text)) => Some(ServerMessage::Transcript { text, is_final: false }),
        Ok(SpeechUpdate::Final(text)) => Some(ServerMessage::Transcript { text, is_final: true }),
        Ok(SpeechUpdate::Failed(_)) => Some(ServerMessage::error(RECOGNIZER_ERROR_MESSAGE)),
        Ok(SpeechUpdate::Ignored) => None,
        Err(e) => {
            warn!("Transcript event rejected: {}", e);
            None
        }
    }
}

/// Ends the recording and, if something final was heard, starts the reply.
///
/// When the device streamed raw audio instead of recognizer events, the buffer is
/// transcribed here and delivered to the loop as the final result.
async fn stop_recording(
    app_state: &Arc<AppState>,
    state_lock: &Arc<Mutex<ConversationState>>,
    ws_sender: &WsSender,
    turn_task_handle: &mut Option<JoinHandle<()>>,
) -> Option<ServerMessage> {
    let audio = {
        let mut state = state_lock.lock().await;
        if !state.turn_loop.phase().is_capturing() {
            warn!("StopRecording received while not recording.");
            return None;
        }
        if state.turn_loop.has_final_transcript() {
            Vec::new()
        } else {
            std::mem::take(&mut state.audio_buffer)
        }
    };

    if !audio.is_empty() {
        let stt_start = std::time::Instant::now();
        let result = app_state.sst_adapter.transcribe_audio(&audio).await;
        info!("⏱️ STT took: {:?}", stt_start.elapsed());

        let mut state = state_lock.lock().await;
        let event = match result {
            Ok(text) => TranscriptEvent::Final(text),
            Err(e) => TranscriptEvent::Error(e.to_string()),
        };
        if let Ok(SpeechUpdate::Failed(_)) = state.turn_loop.on_transcript(event) {
            return Some(ServerMessage::error(RECOGNIZER_ERROR_MESSAGE));
        }
    }

    let mut state = state_lock.lock().await;
    let transcript = match state.turn_loop.finish_recording() {
        Ok(Some(transcript)) => transcript,
        Ok(None) => return Some(ServerMessage::NothingHeard),
        Err(e) => {
            warn!("StopRecording rejected: {}", e);
            return None;
        }
    };
    info!("Child said: '{}'", transcript);

    if send_message(ws_sender, &ServerMessage::Thinking).await.is_err() {
        warn!("Failed to send Thinking message.");
    }

    state.cancellation_token = CancellationToken::new();
    let task = {
        let app_state = app_state.clone();
        let state_lock = state_lock.clone();
        let ws_sender = ws_sender.clone();
        let token = state.cancellation_token.clone();
        tokio::spawn(async move {
            turn_process(app_state, state_lock, ws_sender, token, transcript).await;
        })
    };
    *turn_task_handle = Some(task);
    None
}
