//! services/api/src/adapters/tts.rs
//!
//! This module contains the adapter for OpenAI's Text-to-Speech (TTS) service.
//! It implements the `TextToSpeechService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::audio::{CreateSpeechRequest, SpeechModel, Voice},
    Client,
};
use async_trait::async_trait;
use companion_core::ports::{PortError, PortResult, TextToSpeechService};

/// Maps a configured voice name to an OpenAI voice.
pub fn parse_voice(name: &str) -> Option<Voice> {
    match name.to_lowercase().as_str() {
        "alloy" => Some(Voice::Alloy),
        "echo" => Some(Voice::Echo),
        "fable" => Some(Voice::Fable),
        "onyx" => Some(Voice::Onyx),
        "nova" => Some(Voice::Nova),
        "shimmer" => Some(Voice::Shimmer),
        _ => None,
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `TextToSpeechService` port using the OpenAI TTS API.
#[derive(Clone)]
pub struct OpenAiTtsAdapter {
    client: Client<OpenAIConfig>,
    model: SpeechModel,
    voice: Voice,
    /// Children follow slower speech more easily.
    speed: f32,
}

impl OpenAiTtsAdapter {
    /// Creates a new `OpenAiTtsAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: SpeechModel, voice: Voice) -> Self {
        Self {
            client,
            model,
            voice,
            speed: 0.9,
        }
    }
}

//=========================================================================================
// `TextToSpeechService` Trait Implementation
//=========================================================================================

#[async_trait]
impl TextToSpeechService for OpenAiTtsAdapter {
    async fn generate_audio(&self, text: &str) -> PortResult<Vec<u8>> {
        let request = CreateSpeechRequest {
            model: self.model.clone(),
            input: text.to_string(),
            voice: self.voice.clone(),
            speed: Some(self.speed),
            ..Default::default()
        };

        let response = self
            .client
            .audio()
            .speech()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        Ok(response.bytes.to_vec())
    }
}
