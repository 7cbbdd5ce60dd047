// SPDX-License-Identifier: MIT OR Apache-2.0
//! Use-case-routed LLM access.
//!
//! The [`LlmRouter`] resolves `(provider, model)` per use-case from the
//! environment on every call, executes with per-call timeouts and jittered
//! retries, walks a bounded fallback chain, caches responses by request
//! digest, and streams deltas with prompt cancellation.  Downstream crates
//! depend on the [`TextGenerator`] and [`EmbeddingTransport`] seams rather
//! than the router struct so tests can script them.

#![deny(unsafe_code)]

/// TTL response cache.
pub mod cache;
/// Cancellation primitives.
pub mod cancel;
/// Scripted generator/embedder for tests.
pub mod mock;
/// Provider wire dialects.
pub mod provider;
/// The router.
pub mod router;
/// SSE frame parsing.
pub mod sse;

pub use cancel::CancellationToken;
pub use provider::ProviderKind;
pub use router::{LlmRouter, ProviderEndpoints};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tl_config::UseCase;
use tl_error::ServiceError;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// System instruction.
    System,
    /// End-user content.
    User,
    /// Model output (for few-shot context).
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author role.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Options & results
// ---------------------------------------------------------------------------

/// Per-call overrides on top of the resolved use-case route.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Override the route's completion cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Override the route's temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Scope the cache key to a tenant for tenant-specific inputs.
    ///
    /// Summaries and search answers set this; embedding calls never do.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_cache_key: Option<String>,
    /// Skip the response cache for this call.
    #[serde(default)]
    pub bypass_cache: bool,
}

/// Where a generation's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// Served from the response cache.
    Hit,
    /// Generated by a provider call.
    Miss,
    /// Cache bypassed (streaming / realtime).
    Bypass,
}

/// Metadata attached to every generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationMeta {
    /// Provider that actually produced the text (fallbacks change this).
    pub provider: String,
    /// Model that produced the text.
    pub model: String,
    /// Cache disposition.
    pub cache: CacheStatus,
    /// Estimated prompt tokens.
    pub input_tokens: u64,
    /// Estimated completion tokens.
    pub output_tokens: u64,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// A completed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    /// Generated text.
    pub text: String,
    /// Call metadata.
    pub meta: GenerationMeta,
}

/// A stream of text deltas.
pub type ChunkStream = BoxStream<'static, Result<String, ServiceError>>;

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Text generation seam used by the summarizer, query analyzer, and HyDE.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate to completion.
    async fn generate(
        &self,
        use_case: UseCase,
        messages: &[ChatMessage],
        options: GenerateOptions,
        cancel: &CancellationToken,
    ) -> Result<Generation, ServiceError>;

    /// Generate as a delta stream.  Dropping the stream (or cancelling the
    /// token) aborts the upstream request within one in-flight chunk.
    async fn stream(
        &self,
        use_case: UseCase,
        messages: &[ChatMessage],
        options: GenerateOptions,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, ServiceError>;
}

/// Embedding transport seam used by the embedder.
#[async_trait]
pub trait EmbeddingTransport: Send + Sync {
    /// Embed a batch of texts with `model`, preserving order.
    async fn embed_batch(
        &self,
        model: &str,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, ServiceError>;
}

/// Deterministic token estimate: ceil(chars / 4).
///
/// Providers report exact counts only on some dialects; the estimate keeps
/// meta comparable across them.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}
