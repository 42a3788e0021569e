//! services/api/src/adapters/sst.rs
//!
//! This module contains the adapter for OpenAI's Speech-to-Text (Whisper) service.
//! It is used when the device streams raw microphone audio instead of running
//! its own recognizer. It implements the `SpeechToTextService` port.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::audio::{AudioInput, CreateTranscriptionRequest},
    Client,
};
use async_trait::async_trait;
use companion_core::ports::{PortError, PortResult, SpeechToTextService};
use hound::{WavSpec, WavWriter};

/// Sample rate of the mono PCM16 audio the companion app records.
pub const DEVICE_SAMPLE_RATE: u32 = 16_000;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `SpeechToTextService` port using the OpenAI Whisper API.
#[derive(Clone)]
pub struct OpenAiSstAdapter {
    client: Client<OpenAIConfig>,
    model: String,
    sample_rate: u32,
}

impl OpenAiSstAdapter {
    /// Creates a new `OpenAiSstAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self {
            client,
            model,
            sample_rate: DEVICE_SAMPLE_RATE,
        }
    }

    /// Wraps little-endian PCM16 mono samples in a WAV container.
    pub(crate) fn pcm16_to_wav(pcm_data: &[u8], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = WavWriter::new(&mut cursor, spec)?;
        // A trailing odd byte is dropped.
        for chunk in pcm_data.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))?;
        }
        writer.finalize()?;
        Ok(cursor.into_inner())
    }
}

//=========================================================================================
// `SpeechToTextService` Trait Implementation
//=========================================================================================

#[async_trait]
impl SpeechToTextService for OpenAiSstAdapter {
    async fn transcribe_audio(&self, audio_data: &[u8]) -> PortResult<String> {
        if audio_data.len() < 2 {
            return Ok(String::new());
        }

        let wav_data = Self::pcm16_to_wav(audio_data, self.sample_rate)
            .map_err(|e| PortError::Unexpected(format!("Failed to encode WAV: {}", e)))?;
        let input = AudioInput::from_vec_u8("child_audio.wav".into(), wav_data);

        let request = CreateTranscriptionRequest {
            file: input,
            model: self.model.clone(),
            ..Default::default()
        };

        // Map the error manually, which respects the orphan rule.
        let response = self
            .client
            .audio()
            .transcription()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        Ok(response.text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_wrapper_preserves_samples() {
        let samples: [i16; 3] = [0, -1200, 32000];
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

        let wav = OpenAiSstAdapter::pcm16_to_wav(&pcm, DEVICE_SAMPLE_RATE).unwrap();
        let mut reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();

        assert_eq!(reader.spec().sample_rate, DEVICE_SAMPLE_RATE);
        assert_eq!(reader.spec().channels, 1);
        let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn odd_trailing_byte_is_dropped() {
        let wav = OpenAiSstAdapter::pcm16_to_wav(&[1, 0, 7], 8_000).unwrap();
        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.len(), 1);
    }
}
