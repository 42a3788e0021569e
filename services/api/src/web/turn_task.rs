//! services/api/src/web/turn_task.rs
//!
//! This module contains the asynchronous "worker" responsible for one
//! conversation turn: persist what the child said, get the companion's reply,
//! persist it, and speak it.

use crate::web::{
    protocol::{send_audio, send_message, ServerMessage, WsSender, REPLY_ERROR_MESSAGE},
    state::{AppState, ConversationState},
};
use companion_core::{
    domain::Speaker,
    ports::{PortError, PortResult},
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Runs `run_turn` and turns any failure into an aborted turn plus a friendly error.
pub async fn turn_process(
    app_state: Arc<AppState>,
    state_lock: Arc<Mutex<ConversationState>>,
    ws_sender: WsSender,
    token: CancellationToken,
    transcript: String,
) {
    if let Err(e) = run_turn(&app_state, &state_lock, &ws_sender, &token, transcript).await {
        error!("Conversation turn failed: {}", e);
        {
            let mut state = state_lock.lock().await;
            if token.is_cancelled() {
                return;
            }
            state.turn_loop.abort(e.to_string());
        }
        if send_message(&ws_sender, &ServerMessage::error(REPLY_ERROR_MESSAGE))
            .await
            .is_err()
        {
            warn!("Failed to send turn error. Client may have disconnected.");
        }
    }
}

/// One turn of the loop. Returns early, without touching the phase, once `token` is cancelled.
pub async fn run_turn(
    app_state: &AppState,
    state_lock: &Mutex<ConversationState>,
    ws_sender: &WsSender,
    token: &CancellationToken,
    transcript: String,
) -> PortResult<()> {
    let start_time = Instant::now();
    let (session_id, child, history) = {
        let state = state_lock.lock().await;
        (state.session_id, state.child.clone(), state.recent_history())
    };

    let child_turn = app_state
        .db
        .append_turn(session_id, Speaker::Child, &transcript)
        .await?;
    state_lock.lock().await.history.push(child_turn);

    let llm_start = Instant::now();
    let reply = app_state
        .companion_adapter
        .reply(&child, &history, &transcript)
        .await?;
    info!("⏱️ Companion LLM took: {:?}", llm_start.elapsed());

    if token.is_cancelled() {
        info!("Turn cancelled before the reply was spoken.");
        return Ok(());
    }

    let companion_turn = app_state
        .db
        .append_turn(session_id, Speaker::Companion, &reply)
        .await?;

    {
        let mut state = state_lock.lock().await;
        state.history.push(companion_turn);
        if token.is_cancelled() {
            return Ok(());
        }
        state
            .turn_loop
            .reply_ready()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
    }

    send_message(ws_sender, &ServerMessage::Reply { text: reply.clone() })
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
    send_message(ws_sender, &ServerMessage::SpeakingStarted)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

    // Generate all sentences in parallel, then send them in order.
    let tts_start = Instant::now();
    let sentences = split_into_sentences(&reply);
    let tts_tasks: Vec<_> = sentences
        .into_iter()
        .map(|sentence| {
            let tts_adapter = app_state.tts_adapter.clone();
            tokio::spawn(async move { tts_adapter.generate_audio(&sentence).await })
        })
        .collect();

    for (i, task) in tts_tasks.into_iter().enumerate() {
        let audio = tokio::select! {
            _ = token.cancelled() => {
                info!("Speaking interrupted at sentence {}.", i + 1);
                return Ok(());
            }
            joined = task => joined.map_err(|e| PortError::Unexpected(e.to_string()))??,
        };
        if send_audio(ws_sender, audio).await.is_err() {
            return Err(PortError::Unexpected(
                "Failed to send reply audio chunk to client.".to_string(),
            ));
        }
    }
    info!("⏱️ TTS (parallel) took: {:?}", tts_start.elapsed());

    {
        let mut state = state_lock.lock().await;
        if token.is_cancelled() {
            return Ok(());
        }
        state
            .turn_loop
            .speaking_finished()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
    }

    if send_message(ws_sender, &ServerMessage::SpeakingEnded).await.is_err() {
        warn!("Failed to send SpeakingEnded message. Client may have disconnected.");
    }
    info!("⏱️ Total turn took: {:?}", start_time.elapsed());
    Ok(())
}

/// Splits a reply into sentences for per-sentence speech synthesis.
pub(crate) fn split_into_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        let at_boundary = matches!(c, '.' | '!' | '?')
            && chars.peek().map_or(true, |next| next.is_whitespace());
        if at_boundary {
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }

    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::test_support::{capture_sender, sent_frames, sent_json, FakeCompanion, Harness};
    use companion_core::{conversation::TurnPhase, speech::TranscriptEvent};
    use std::sync::atomic::Ordering;

    async fn awaiting_reply(state_lock: &Mutex<ConversationState>, said: &str) {
        let mut state = state_lock.lock().await;
        state.turn_loop.begin_recording().unwrap();
        state
            .turn_loop
            .on_transcript(TranscriptEvent::Final(said.to_string()))
            .unwrap();
        state.turn_loop.finish_recording().unwrap();
    }

    #[tokio::test]
    async fn reply_is_saved_and_spoken() {
        let harness = Harness::new(
            FakeCompanion::replying("Frogs are great. Do you like frogs?"),
            "",
        );
        let state_lock = harness.conversation().await;
        awaiting_reply(&state_lock, "I like frogs").await;
        let token = state_lock.lock().await.cancellation_token.clone();
        let (ws_sender, rx) = capture_sender();

        run_turn(&harness.app_state, &state_lock, &ws_sender, &token, "I like frogs".to_string())
            .await
            .unwrap();
        drop(ws_sender);

        assert_eq!(
            harness.db.turn_texts(),
            vec![
                (Speaker::Child, "I like frogs".to_string()),
                (Speaker::Companion, "Frogs are great. Do you like frogs?".to_string()),
            ]
        );
        assert_eq!(harness.db.turn_count(harness.session_id), 2);
        {
            let state = state_lock.lock().await;
            assert_eq!(state.turn_loop.phase(), TurnPhase::Idle);
            assert_eq!(state.history.len(), 2);
        }
        assert_eq!(
            sent_frames(rx).await,
            vec!["reply", "speaking_started", "audio", "audio", "speaking_ended"]
        );
    }

    #[tokio::test]
    async fn cancelling_while_thinking_drops_the_reply() {
        let token = CancellationToken::new();
        let mut companion = FakeCompanion::replying("Too late.");
        companion.cancel_on_reply = Some(token.clone());
        let harness = Harness::new(companion, "");
        let state_lock = harness.conversation().await;
        awaiting_reply(&state_lock, "wait").await;
        let (ws_sender, rx) = capture_sender();

        run_turn(&harness.app_state, &state_lock, &ws_sender, &token, "wait".to_string())
            .await
            .unwrap();
        drop(ws_sender);

        assert_eq!(harness.companion.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            harness.db.turn_texts(),
            vec![(Speaker::Child, "wait".to_string())]
        );
        assert_eq!(
            state_lock.lock().await.turn_loop.phase(),
            TurnPhase::AwaitingResponse
        );
        assert!(sent_frames(rx).await.is_empty());
    }

    #[tokio::test]
    async fn failed_reply_returns_to_idle_with_a_friendly_error() {
        let harness = Harness::new(FakeCompanion::failing("rate limited"), "");
        let state_lock = harness.conversation().await;
        awaiting_reply(&state_lock, "tell me a joke").await;
        let token = state_lock.lock().await.cancellation_token.clone();
        let (ws_sender, rx) = capture_sender();

        turn_process(
            harness.app_state.clone(),
            state_lock.clone(),
            ws_sender,
            token,
            "tell me a joke".to_string(),
        )
        .await;

        assert_eq!(state_lock.lock().await.turn_loop.phase(), TurnPhase::Idle);
        assert_eq!(harness.db.turn_texts().len(), 1);
        assert_eq!(
            sent_json(rx).await,
            vec![serde_json::json!({"type": "error", "message": REPLY_ERROR_MESSAGE})]
        );
    }

    #[tokio::test]
    async fn failure_after_cancel_stays_silent() {
        let token = CancellationToken::new();
        let mut companion = FakeCompanion::failing("connection reset");
        companion.cancel_on_reply = Some(token.clone());
        let harness = Harness::new(companion, "");
        let state_lock = harness.conversation().await;
        awaiting_reply(&state_lock, "bye").await;
        let (ws_sender, rx) = capture_sender();

        turn_process(
            harness.app_state.clone(),
            state_lock.clone(),
            ws_sender,
            token,
            "bye".to_string(),
        )
        .await;

        assert_eq!(
            state_lock.lock().await.turn_loop.phase(),
            TurnPhase::AwaitingResponse
        );
        assert!(sent_frames(rx).await.is_empty());
    }

    #[test]
    fn splits_on_sentence_punctuation() {
        assert_eq!(
            split_into_sentences("Wow! A frog? Frogs jump really far. What else"),
            vec!["Wow!", "A frog?", "Frogs jump really far.", "What else"]
        );
    }

    #[test]
    fn keeps_decimals_and_abbreviations_together() {
        assert_eq!(
            split_into_sentences("It is 3.5 meters long. Dr.Frog agrees."),
            vec!["It is 3.5 meters long.", "Dr.Frog agrees."]
        );
    }

    #[test]
    fn empty_reply_has_no_sentences() {
        assert!(split_into_sentences("   ").is_empty());
    }
}
