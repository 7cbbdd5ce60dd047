// SPDX-License-Identifier: MIT OR Apache-2.0
//! Scripted generator and embedder for tests.
//!
//! [`ScriptedGenerator`] replays queued responses (or errors) in order and
//! records the calls it saw; [`HashEmbedder`] produces deterministic
//! pseudo-embeddings so retrieval tests can assert on rankings without a
//! network.

use crate::cancel::CancellationToken;
use crate::{
    CacheStatus, ChatMessage, ChunkStream, EmbeddingTransport, GenerateOptions, Generation,
    GenerationMeta, TextGenerator, estimate_tokens,
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Mutex;
use tl_config::UseCase;
use tl_error::{ErrorCode, ServiceError, ServiceErrorDto};

/// One scripted reply.
enum Scripted {
    Text(String),
    Error(ServiceErrorDto),
}

/// A recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Use-case of the call.
    pub use_case: UseCase,
    /// Concatenated message contents, `\n`-joined.
    pub prompt: String,
}

/// Replays queued responses in order; errors replay as themselves.
///
/// An exhausted script returns `LLM_UNAVAILABLE`, which is usually the
/// clearest failure a test can hit.
#[derive(Default)]
pub struct ScriptedGenerator {
    script: Mutex<Vec<Scripted>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedGenerator {
    /// Empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a text reply.
    pub fn push_text(&self, text: impl Into<String>) {
        self.script
            .lock()
            .expect("script lock poisoned")
            .push(Scripted::Text(text.into()));
    }

    /// Queue an error reply.
    pub fn push_error(&self, code: ErrorCode, message: impl Into<String>) {
        let err = ServiceError::new(code, message);
        self.script
            .lock()
            .expect("script lock poisoned")
            .push(Scripted::Error((&err).into()));
    }

    /// Calls observed so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    fn next(&self, use_case: UseCase, messages: &[ChatMessage]) -> Result<String, ServiceError> {
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .push(RecordedCall {
                use_case,
                prompt: messages
                    .iter()
                    .map(|m| m.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
            });
        let mut script = self.script.lock().expect("script lock poisoned");
        if script.is_empty() {
            return Err(ServiceError::new(
                ErrorCode::LlmUnavailable,
                "scripted generator exhausted",
            ));
        }
        match script.remove(0) {
            Scripted::Text(text) => Ok(text),
            Scripted::Error(dto) => Err(dto.into()),
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        use_case: UseCase,
        messages: &[ChatMessage],
        _options: GenerateOptions,
        cancel: &CancellationToken,
    ) -> Result<Generation, ServiceError> {
        if cancel.is_cancelled() {
            return Err(ServiceError::new(ErrorCode::Cancelled, "cancelled"));
        }
        let text = self.next(use_case, messages)?;
        let output_tokens = estimate_tokens(&text);
        Ok(Generation {
            text,
            meta: GenerationMeta {
                provider: "scripted".into(),
                model: "scripted".into(),
                cache: CacheStatus::Bypass,
                input_tokens: messages.iter().map(|m| estimate_tokens(&m.content)).sum(),
                output_tokens,
                duration_ms: 0,
            },
        })
    }

    async fn stream(
        &self,
        use_case: UseCase,
        messages: &[ChatMessage],
        options: GenerateOptions,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, ServiceError> {
        let generation = self.generate(use_case, messages, options, cancel).await?;
        // Split into word chunks so stream consumers see several frames.
        let chunks: Vec<Result<String, ServiceError>> = generation
            .text
            .split_inclusive(' ')
            .map(|s| Ok(s.to_string()))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

// ---------------------------------------------------------------------------
// Deterministic embedder
// ---------------------------------------------------------------------------

/// Embeds text as a deterministic unit vector derived from its SHA-256.
///
/// Identical texts embed identically; similar texts do not embed close to
/// each other (hashes scatter), so ranking tests seed identical or
/// near-identical texts where similarity matters.
pub struct HashEmbedder {
    /// Vector dimensionality.
    pub dimensions: usize,
}

impl HashEmbedder {
    /// Embedder with the given dimensionality.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(4),
        }
    }

    /// Deterministic embedding of one text.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let mut v: Vec<f32> = (0..self.dimensions)
            .map(|i| {
                let b = digest[i % digest.len()];
                (b as f32 / 127.5) - 1.0 + (i as f32 * 1e-3)
            })
            .collect();
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingTransport for HashEmbedder {
    async fn embed_batch(
        &self,
        _model: &str,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, ServiceError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt as _;

    #[tokio::test]
    async fn replays_in_order_and_records_calls() {
        let generator = ScriptedGenerator::new();
        generator.push_text("first");
        generator.push_error(ErrorCode::RateLimited, "slow down");
        generator.push_text("second");

        let cancel = CancellationToken::new();
        let msgs = [ChatMessage::user("hello")];

        let a = generator
            .generate(UseCase::Summary, &msgs, GenerateOptions::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(a.text, "first");

        let err = generator
            .generate(UseCase::Summary, &msgs, GenerateOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::RateLimited);

        let b = generator
            .generate(UseCase::Hyde, &msgs, GenerateOptions::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(b.text, "second");

        let calls = generator.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2].use_case, UseCase::Hyde);
        assert_eq!(calls[0].prompt, "hello");
    }

    #[tokio::test]
    async fn exhausted_script_is_unavailable() {
        let generator = ScriptedGenerator::new();
        let err = generator
            .generate(
                UseCase::Summary,
                &[ChatMessage::user("x")],
                GenerateOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::LlmUnavailable);
    }

    #[tokio::test]
    async fn stream_yields_multiple_chunks() {
        let generator = ScriptedGenerator::new();
        generator.push_text("one two three");
        let mut stream = generator
            .stream(
                UseCase::Realtime,
                &[ChatMessage::user("x")],
                GenerateOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let mut n = 0;
        let mut collected = String::new();
        while let Some(chunk) = stream.next().await {
            collected.push_str(&chunk.unwrap());
            n += 1;
        }
        assert_eq!(collected, "one two three");
        assert!(n >= 3);
    }

    #[tokio::test]
    async fn hash_embedder_is_deterministic_and_normalised() {
        let embedder = HashEmbedder::new(32);
        let a = embedder.embed_batch("m", &["text".into()]).await.unwrap();
        let b = embedder.embed_batch("m", &["text".into()]).await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn different_texts_embed_differently() {
        let embedder = HashEmbedder::new(32);
        let out = embedder
            .embed_batch("m", &["a".into(), "b".into()])
            .await
            .unwrap();
        assert_ne!(out[0], out[1]);
    }
}
