//! services/api/src/adapters/companion_llm.rs
//!
//! This module contains the adapter for the companion's conversational LLM.
//! It implements the `CompanionReplyService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use companion_core::{
    domain::{ChildProfile, Speaker, Turn},
    ports::{CompanionReplyService, PortError, PortResult},
};

const TEMPERATURE: f32 = 0.8;
const MAX_REPLY_TOKENS: u32 = 150;

const SYSTEM_INSTRUCTIONS: &str = r#"You are Pip, a warm and playful talking friend for young children.

How you talk:
- Use short, simple sentences a five-year-old understands. Two or three sentences per reply.
- Be curious about the child. Ask one easy follow-up question most of the time.
- Celebrate effort and feelings. Never shame, scold, or use sarcasm.
- Your words are read aloud, so never use lists, emojis, markdown, or links.

Safety:
- Never ask for the child's address, school, phone number, or passwords.
- If the child seems hurt, scared, or in danger, gently tell them to find a grown-up they trust right now.
- Do not talk about violence, scary or adult topics. Steer kindly back to something fun."#;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `CompanionReplyService` using an OpenAI chat model.
#[derive(Clone)]
pub struct OpenAiCompanionAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiCompanionAdapter {
    /// Creates a new `OpenAiCompanionAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

/// Adds what we know about the child to the fixed instructions.
pub(crate) fn system_prompt(child: &ChildProfile) -> String {
    let mut prompt = format!("{}\n\nYou are talking with {}", SYSTEM_INSTRUCTIONS, child.name);
    if let Some(age) = child.age {
        prompt.push_str(&format!(", who is {} years old", age));
    }
    prompt.push('.');
    if !child.interests.is_empty() {
        prompt.push_str(&format!(" They love {}.", child.interests.join(", ")));
    }
    prompt
}

/// Strips characters that read badly through text-to-speech.
pub(crate) fn clean_reply(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '*' | '#' | '_' | '`'))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn builder_error(e: OpenAIError) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// `CompanionReplyService` Trait Implementation
//=========================================================================================

#[async_trait]
impl CompanionReplyService for OpenAiCompanionAdapter {
    async fn reply(
        &self,
        child: &ChildProfile,
        history: &[Turn],
        utterance: &str,
    ) -> PortResult<String> {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(history.len() + 2);
        messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt(child))
                .build()
                .map_err(builder_error)?
                .into(),
        );

        for turn in history {
            let message: ChatCompletionRequestMessage = match turn.speaker {
                Speaker::Child => ChatCompletionRequestUserMessageArgs::default()
                    .content(turn.text.clone())
                    .build()
                    .map_err(builder_error)?
                    .into(),
                Speaker::Companion => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(turn.text.clone())
                    .build()
                    .map_err(builder_error)?
                    .into(),
            };
            messages.push(message);
        }

        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(utterance.to_string())
                .build()
                .map_err(builder_error)?
                .into(),
        );

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(TEMPERATURE)
            .max_completion_tokens(MAX_REPLY_TOKENS)
            .n(1)
            .build()
            .map_err(builder_error)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::Unexpected("Companion LLM returned no text content.".to_string())
            })?;

        let reply = clean_reply(&content);
        if reply.is_empty() {
            return Err(PortError::Unexpected("Companion LLM returned an empty reply.".to_string()));
        }
        Ok(reply)
    }
}
