//! crates/companion_core/src/speech.rs
//!
//! Transcript state for a single speech-recognition task.
//!
//! The recognizer (on the device, or the server-side transcription fallback)
//! emits a stream of partial results followed by at most one final result.
//! `SpeechSession` folds those events into the transcript for the current turn.

use tracing::{debug, warn};

/// An event emitted by a speech recognizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    Partial(String),
    Final(String),
    Error(String),
}

/// What applying an event changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechUpdate {
    Partial(String),
    Final(String),
    /// The recognizer failed; the session was cancelled.
    Failed(String),
    /// The event arrived outside of a recording or after the final result.
    Ignored,
}

#[derive(Debug, Default)]
pub struct SpeechSession {
    recording: bool,
    partial: Option<String>,
    final_text: Option<String>,
}

impl SpeechSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins a new recognition task, discarding anything left from the previous one.
    pub fn start(&mut self) {
        self.recording = true;
        self.partial = None;
        self.final_text = None;
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn has_final(&self) -> bool {
        self.final_text.is_some()
    }

    /// The best text to show right now: the final result if there is one, else the latest partial.
    pub fn current_text(&self) -> Option<&str> {
        self.final_text.as_deref().or(self.partial.as_deref())
    }

    pub fn apply(&mut self, event: TranscriptEvent) -> SpeechUpdate {
        if !self.recording {
            debug!("Ignoring transcript event while not recording: {:?}", event);
            return SpeechUpdate::Ignored;
        }

        match event {
            TranscriptEvent::Partial(text) => {
                if self.final_text.is_some() {
                    debug!("Ignoring partial transcript after final result.");
                    return SpeechUpdate::Ignored;
                }
                let text = text.trim().to_string();
                self.partial = Some(text.clone());
                SpeechUpdate::Partial(text)
            }
            TranscriptEvent::Final(text) => {
                let text = text.trim().to_string();
                self.partial = None;
                self.final_text = Some(text.clone());
                SpeechUpdate::Final(text)
            }
            TranscriptEvent::Error(message) => {
                warn!("Speech recognizer reported an error: {}", message);
                self.cancel();
                SpeechUpdate::Failed(message)
            }
        }
    }

    /// Ends recording and returns the final transcript.
    ///
    /// Partial results are never promoted: without a final result the transcript is empty.
    pub fn stop(&mut self) -> String {
        self.recording = false;
        self.partial = None;
        self.final_text.take().unwrap_or_default()
    }

    pub fn cancel(&mut self) {
        self.recording = false;
        self.partial = None;
        self.final_text = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> SpeechSession {
        let mut session = SpeechSession::new();
        session.start();
        session
    }

    #[test]
    fn partials_replace_each_other() {
        let mut session = recording();
        session.apply(TranscriptEvent::Partial("I saw".into()));
        let update = session.apply(TranscriptEvent::Partial("I saw a dog".into()));
        assert_eq!(update, SpeechUpdate::Partial("I saw a dog".into()));
        assert_eq!(session.current_text(), Some("I saw a dog"));
    }

    #[test]
    fn final_supersedes_partial() {
        let mut session = recording();
        session.apply(TranscriptEvent::Partial("I saw a dock".into()));
        session.apply(TranscriptEvent::Final("I saw a dog".into()));
        assert_eq!(session.current_text(), Some("I saw a dog"));

        // A late partial for the same turn does not override the final result.
        let late = session.apply(TranscriptEvent::Partial("I saw a duck".into()));
        assert_eq!(late, SpeechUpdate::Ignored);
        assert_eq!(session.stop(), "I saw a dog");
    }

    #[test]
    fn stop_without_final_is_empty() {
        let mut session = recording();
        session.apply(TranscriptEvent::Partial("half a sentence".into()));
        assert_eq!(session.stop(), "");
        assert!(!session.is_recording());
    }

    #[test]
    fn restart_discards_previous_turn() {
        let mut session = recording();
        session.apply(TranscriptEvent::Final("first".into()));
        session.start();
        assert_eq!(session.current_text(), None);
        assert_eq!(session.stop(), "");
    }

    #[test]
    fn error_cancels_recording() {
        let mut session = recording();
        session.apply(TranscriptEvent::Partial("hel".into()));
        let update = session.apply(TranscriptEvent::Error("audio engine stopped".into()));
        assert_eq!(update, SpeechUpdate::Failed("audio engine stopped".into()));
        assert!(!session.is_recording());
        assert_eq!(session.current_text(), None);
    }

    #[test]
    fn events_while_idle_are_ignored() {
        let mut session = SpeechSession::new();
        assert_eq!(
            session.apply(TranscriptEvent::Final("hello".into())),
            SpeechUpdate::Ignored
        );
        assert_eq!(session.stop(), "");
    }
}
