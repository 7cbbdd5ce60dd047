// SPDX-License-Identifier: MIT OR Apache-2.0
//! Provider wire dialects.
//!
//! Each supported provider gets a serde model of the request/response
//! subset the router needs: OpenAI-compatible chat completions and
//! embeddings, Anthropic messages, and Gemini `generateContent`.  The
//! provider set is closed; adding one means extending [`ProviderKind`] and
//! the dialect functions here.

use crate::{ChatMessage, Role};
use serde::{Deserialize, Serialize};
use tl_error::{ErrorCode, ServiceError};

/// Supported LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI or any API-compatible server.
    OpenAi,
    /// Anthropic messages API.
    Anthropic,
    /// Google Gemini.
    Gemini,
}

impl ProviderKind {
    /// Parse a configuration provider name.
    pub fn parse(name: &str) -> Result<Self, ServiceError> {
        match name.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "gemini" | "google" => Ok(Self::Gemini),
            other => Err(ServiceError::new(
                ErrorCode::ConfigInvalid,
                format!("unknown llm provider '{other}'"),
            )),
        }
    }

    /// Stable lowercase tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible chat completions
// ---------------------------------------------------------------------------

/// `POST /v1/chat/completions` request body.
#[derive(Debug, Clone, Serialize)]
pub struct OpenAiChatRequest {
    /// Target model.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<OpenAiMessage>,
    /// Completion cap.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
    /// Request SSE streaming.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

/// One OpenAI-dialect message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiMessage {
    /// `system` / `user` / `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
}

/// Chat completion response (non-streaming).
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiChatResponse {
    /// Completion choices (one requested).
    pub choices: Vec<OpenAiChoice>,
    /// Token usage, when the server reports it.
    #[serde(default)]
    pub usage: Option<OpenAiUsage>,
}

/// One completion choice.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiChoice {
    /// The generated message.
    pub message: OpenAiMessage,
}

/// Token usage block.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiUsage {
    /// Prompt tokens.
    pub prompt_tokens: u64,
    /// Completion tokens.
    pub completion_tokens: u64,
}

/// A streaming chunk (`chat.completion.chunk`).
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiStreamChunk {
    /// Streaming choices.
    #[serde(default)]
    pub choices: Vec<OpenAiStreamChoice>,
}

/// One streaming choice.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiStreamChoice {
    /// Incremental delta.
    #[serde(default)]
    pub delta: OpenAiDelta,
}

/// Delta payload; only changed fields are present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiDelta {
    /// Incremental text.
    #[serde(default)]
    pub content: Option<String>,
}

/// Build an OpenAI-dialect request from neutral messages.
pub fn openai_request(
    model: &str,
    messages: &[ChatMessage],
    max_tokens: u32,
    temperature: f64,
    stream: bool,
) -> OpenAiChatRequest {
    OpenAiChatRequest {
        model: model.to_string(),
        messages: messages
            .iter()
            .map(|m| OpenAiMessage {
                role: match m.role {
                    Role::System => "system".into(),
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                },
                content: m.content.clone(),
            })
            .collect(),
        max_tokens,
        temperature,
        stream,
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible embeddings
// ---------------------------------------------------------------------------

/// `POST /v1/embeddings` request body.
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingsRequest {
    /// Embedding model.
    pub model: String,
    /// Inputs, order-preserving.
    pub input: Vec<String>,
}

/// Embeddings response.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsResponse {
    /// Per-input rows.
    pub data: Vec<EmbeddingRow>,
}

/// One embedding row.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingRow {
    /// Position in the input batch.
    pub index: usize,
    /// The vector.
    pub embedding: Vec<f32>,
}

// ---------------------------------------------------------------------------
// Anthropic messages
// ---------------------------------------------------------------------------

/// `POST /v1/messages` request body.
#[derive(Debug, Clone, Serialize)]
pub struct AnthropicRequest {
    /// Target model.
    pub model: String,
    /// System instruction (Anthropic keeps it outside `messages`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// User/assistant turns.
    pub messages: Vec<AnthropicMessage>,
    /// Completion cap.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
    /// Request SSE streaming.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

/// One Anthropic-dialect message.
#[derive(Debug, Clone, Serialize)]
pub struct AnthropicMessage {
    /// `user` / `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
}

/// Messages API response.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicResponse {
    /// Content blocks; text blocks are concatenated.
    pub content: Vec<AnthropicContentBlock>,
    /// Token usage.
    #[serde(default)]
    pub usage: Option<AnthropicUsage>,
}

/// One content block.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicContentBlock {
    /// Block text, present for `text` blocks.
    #[serde(default)]
    pub text: Option<String>,
}

/// Anthropic token usage.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicUsage {
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
}

/// Streaming event for the messages API; only deltas carry text.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicStreamEvent {
    /// Event type tag (`content_block_delta`, `message_stop`, …).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Delta payload for `content_block_delta` events.
    #[serde(default)]
    pub delta: Option<AnthropicStreamDelta>,
}

/// Delta payload.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicStreamDelta {
    /// Incremental text.
    #[serde(default)]
    pub text: Option<String>,
}

/// Build an Anthropic-dialect request from neutral messages.
///
/// Leading system messages are folded into the `system` field; the rest
/// become turns.
pub fn anthropic_request(
    model: &str,
    messages: &[ChatMessage],
    max_tokens: u32,
    temperature: f64,
    stream: bool,
) -> AnthropicRequest {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut turns: Vec<AnthropicMessage> = Vec::new();
    for m in messages {
        match m.role {
            Role::System => system_parts.push(&m.content),
            Role::User => turns.push(AnthropicMessage {
                role: "user".into(),
                content: m.content.clone(),
            }),
            Role::Assistant => turns.push(AnthropicMessage {
                role: "assistant".into(),
                content: m.content.clone(),
            }),
        }
    }
    AnthropicRequest {
        model: model.to_string(),
        system: (!system_parts.is_empty()).then(|| system_parts.join("\n\n")),
        messages: turns,
        max_tokens,
        temperature,
        stream,
    }
}

// ---------------------------------------------------------------------------
// Gemini generateContent
// ---------------------------------------------------------------------------

/// `POST /v1beta/models/{model}:generateContent` request body.
#[derive(Debug, Clone, Serialize)]
pub struct GeminiRequest {
    /// Conversation contents.
    pub contents: Vec<GeminiContent>,
    /// Generation parameters.
    #[serde(rename = "generationConfig")]
    pub generation_config: GeminiGenerationConfig,
}

/// One content entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiContent {
    /// `user` / `model`.
    pub role: String,
    /// Text parts.
    pub parts: Vec<GeminiPart>,
}

/// One text part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiPart {
    /// The text.
    pub text: String,
}

/// Generation parameters.
#[derive(Debug, Clone, Serialize)]
pub struct GeminiGenerationConfig {
    /// Completion cap.
    #[serde(rename = "maxOutputTokens")]
    pub max_output_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
}

/// generateContent response.
#[derive(Debug, Clone, Deserialize)]
pub struct GeminiResponse {
    /// Candidates; the first is used.
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
}

/// One candidate.
#[derive(Debug, Clone, Deserialize)]
pub struct GeminiCandidate {
    /// Candidate content.
    pub content: GeminiContent,
}

/// Build a Gemini-dialect request from neutral messages.
///
/// Gemini has no system role in this endpoint; system content is prefixed
/// to the first user turn.
pub fn gemini_request(
    messages: &[ChatMessage],
    max_tokens: u32,
    temperature: f64,
) -> GeminiRequest {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut contents: Vec<GeminiContent> = Vec::new();
    for m in messages {
        match m.role {
            Role::System => system_parts.push(&m.content),
            Role::User => contents.push(GeminiContent {
                role: "user".into(),
                parts: vec![GeminiPart {
                    text: m.content.clone(),
                }],
            }),
            Role::Assistant => contents.push(GeminiContent {
                role: "model".into(),
                parts: vec![GeminiPart {
                    text: m.content.clone(),
                }],
            }),
        }
    }
    if !system_parts.is_empty() {
        let prefix = system_parts.join("\n\n");
        match contents.iter_mut().find(|c| c.role == "user") {
            Some(first_user) => {
                let original = first_user
                    .parts
                    .first()
                    .map(|p| p.text.clone())
                    .unwrap_or_default();
                first_user.parts = vec![GeminiPart {
                    text: format!("{prefix}\n\n{original}"),
                }];
            }
            None => contents.insert(
                0,
                GeminiContent {
                    role: "user".into(),
                    parts: vec![GeminiPart { text: prefix }],
                },
            ),
        }
    }
    GeminiRequest {
        contents,
        generation_config: GeminiGenerationConfig {
            max_output_tokens: max_tokens,
            temperature,
        },
    }
}
