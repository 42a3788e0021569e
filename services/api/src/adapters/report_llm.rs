//! services/api/src/adapters/report_llm.rs
//!
//! This module contains the adapter for the weekly-report LLM.
//! It implements the `ReportGenerationService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use companion_core::ports::{PortError, PortResult, ReportGenerationService};

/// Fixed sampling parameters for every report.
const TEMPERATURE: f32 = 0.7;
const MAX_REPORT_TOKENS: u32 = 800;

const SYSTEM_INSTRUCTIONS: &str = "You summarize a child's week of conversations for their parent. \
Be warm, specific and brief. Only use facts present in the session list. \
Always answer with a single JSON object and nothing else.";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ReportGenerationService` using an OpenAI chat model.
#[derive(Clone)]
pub struct OpenAiReportAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiReportAdapter {
    /// Creates a new `OpenAiReportAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

//=========================================================================================
// `ReportGenerationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ReportGenerationService for OpenAiReportAdapter {
    async fn generate_report(&self, prompt: &str) -> PortResult<String> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_INSTRUCTIONS)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt.to_string())
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(TEMPERATURE)
            .max_completion_tokens(MAX_REPORT_TOKENS)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        if let Some(choice) = response.choices.into_iter().next() {
            if let Some(content) = choice.message.content {
                Ok(content)
            } else {
                Err(PortError::Unexpected(
                    "Report LLM response contained no text content.".to_string(),
                ))
            }
        } else {
            Err(PortError::Unexpected(
                "Report LLM returned no choices in its response.".to_string(),
            ))
        }
    }
}
