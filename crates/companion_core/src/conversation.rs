//! crates/companion_core/src/conversation.rs
//!
//! Turn loop state machine for a conversation session.
//!
//! Valid transitions:
//! - Idle -> Recording (child starts talking)
//! - Recording -> Transcribing (first partial result)
//! - Recording | Transcribing -> Finalized (final result)
//! - Finalized -> AwaitingResponse (recording stopped with a transcript)
//! - AwaitingResponse -> Speaking (reply text and audio ready)
//! - Speaking -> Idle (playback finished)
//! - any state -> Idle (abort)

use std::fmt;

use tracing::{debug, warn};

use crate::speech::{SpeechSession, SpeechUpdate, TranscriptEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnPhase {
    Idle,
    Recording,
    Transcribing,
    Finalized,
    AwaitingResponse,
    Speaking,
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnPhase::Idle => "Idle",
            TurnPhase::Recording => "Recording",
            TurnPhase::Transcribing => "Transcribing",
            TurnPhase::Finalized => "Finalized",
            TurnPhase::AwaitingResponse => "AwaitingResponse",
            TurnPhase::Speaking => "Speaking",
        };
        f.write_str(name)
    }
}

impl TurnPhase {
    pub fn can_transition_to(&self, target: &TurnPhase) -> bool {
        matches!(
            (self, target),
            (TurnPhase::Idle, TurnPhase::Recording)
                | (TurnPhase::Recording, TurnPhase::Transcribing)
                | (TurnPhase::Recording, TurnPhase::Finalized)
                | (TurnPhase::Transcribing, TurnPhase::Finalized)
                | (TurnPhase::Finalized, TurnPhase::AwaitingResponse)
                | (TurnPhase::AwaitingResponse, TurnPhase::Speaking)
                | (TurnPhase::Speaking, TurnPhase::Idle)
        ) || (*target == TurnPhase::Idle && *self != TurnPhase::Idle)
    }

    /// True while the recognizer is running for the current turn.
    pub fn is_capturing(&self) -> bool {
        matches!(
            self,
            TurnPhase::Recording | TurnPhase::Transcribing | TurnPhase::Finalized
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TurnError {
    #[error("Invalid turn transition: {from} -> {to}")]
    InvalidTransition { from: TurnPhase, to: TurnPhase },
}

/// Drives one conversation's turns. Only one turn is ever in flight.
#[derive(Debug)]
pub struct ConversationLoop {
    phase: TurnPhase,
    speech: SpeechSession,
}

impl Default for ConversationLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationLoop {
    pub fn new() -> Self {
        Self {
            phase: TurnPhase::Idle,
            speech: SpeechSession::new(),
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// Whether the recognizer has delivered a final result for the current turn.
    pub fn has_final_transcript(&self) -> bool {
        self.speech.has_final()
    }

    fn transition(&mut self, target: TurnPhase) -> Result<(), TurnError> {
        if self.phase.can_transition_to(&target) {
            debug!("Turn phase: {} -> {}", self.phase, target);
            self.phase = target;
            Ok(())
        } else {
            Err(TurnError::InvalidTransition {
                from: self.phase,
                to: target,
            })
        }
    }

    pub fn begin_recording(&mut self) -> Result<(), TurnError> {
        self.transition(TurnPhase::Recording)?;
        self.speech.start();
        Ok(())
    }

    /// Feeds a recognizer event into the current turn.
    ///
    /// Events that arrive when no recording is active are dropped.
    pub fn on_transcript(&mut self, event: TranscriptEvent) -> Result<SpeechUpdate, TurnError> {
        if !self.phase.is_capturing() {
            debug!("Dropping transcript event in phase {}", self.phase);
            return Ok(SpeechUpdate::Ignored);
        }

        let update = self.speech.apply(event);
        match &update {
            SpeechUpdate::Partial(_) if self.phase == TurnPhase::Recording => {
                self.transition(TurnPhase::Transcribing)?;
            }
            SpeechUpdate::Final(_) if self.phase != TurnPhase::Finalized => {
                self.transition(TurnPhase::Finalized)?;
            }
            SpeechUpdate::Failed(message) => {
                let message = message.clone();
                self.abort(message);
            }
            _ => {}
        }
        Ok(update)
    }

    /// Stops recording. Returns the final transcript, or `None` when nothing final was heard.
    pub fn finish_recording(&mut self) -> Result<Option<String>, TurnError> {
        if !self.phase.is_capturing() {
            return Err(TurnError::InvalidTransition {
                from: self.phase,
                to: TurnPhase::AwaitingResponse,
            });
        }

        let transcript = self.speech.stop();
        if transcript.is_empty() {
            debug!("Recording stopped without a final transcript.");
            self.phase = TurnPhase::Idle;
            return Ok(None);
        }

        self.transition(TurnPhase::AwaitingResponse)?;
        Ok(Some(transcript))
    }

    pub fn reply_ready(&mut self) -> Result<(), TurnError> {
        self.transition(TurnPhase::Speaking)
    }

    pub fn speaking_finished(&mut self) -> Result<(), TurnError> {
        self.transition(TurnPhase::Idle)
    }

    /// Abandons the current turn and returns to Idle. `reason` is logged.
    pub fn abort(&mut self, reason: impl Into<String>) {
        if self.phase != TurnPhase::Idle {
            warn!("Aborting turn in phase {}: {}", self.phase, reason.into());
        }
        self.speech.cancel();
        self.phase = TurnPhase::Idle;
    }
}
