// SPDX-License-Identifier: MIT OR Apache-2.0
//! Embedding pipeline.
//!
//! Wraps an [`EmbeddingTransport`] with the behaviour the ingest and search
//! paths rely on: truncation to the model's input window, positional
//! alignment for empty texts, bounded batches, a per-text content-hash
//! cache, and zero-vector degradation when a batch fails outright.

#![deny(unsafe_code)]

/// Sparse keyword vectors.
pub mod sparse;

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tl_error::ServiceError;
use tl_llm::EmbeddingTransport;
use tracing::{debug, warn};

/// Marker appended when a text is truncated.
const TRUNCATION_MARKER: &str = "…";
/// Replaces empty inputs so batch positions stay aligned.
const EMPTY_SENTINEL: &str = "[empty]";
/// Per-text cache TTL.
const CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

struct CacheEntry {
    vector: Vec<f32>,
    inserted: Instant,
}

/// What one embedding run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedOutcome {
    /// One vector per input, order-preserving.  Failed positions hold zero
    /// vectors.
    pub vectors: Vec<Vec<f32>>,
    /// Positions whose batch failed; recorded into the job error log by
    /// callers.  Zero vectors score as far outliers downstream.
    pub failed_positions: Vec<usize>,
}

/// Batching, caching embedder.
pub struct Embedder {
    transport: Arc<dyn EmbeddingTransport>,
    model: String,
    max_chars: usize,
    batch_size: usize,
    /// Dimensionality used for zero vectors before any success is seen.
    fallback_dimensions: usize,
    cache: std::sync::Mutex<HashMap<String, CacheEntry>>,
    /// One outstanding batch per model at a time.
    batch_gate: tokio::sync::Mutex<()>,
}

impl Embedder {
    /// Build an embedder over `transport` for `model`.
    pub fn new(transport: Arc<dyn EmbeddingTransport>, model: impl Into<String>) -> Self {
        Self {
            transport,
            model: model.into(),
            max_chars: 32_000,
            batch_size: 100,
            fallback_dimensions: 1536,
            cache: std::sync::Mutex::new(HashMap::new()),
            batch_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Override the batch size (default 100).
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Override the truncation window (default 32 000 chars).
    pub fn with_max_chars(mut self, max: usize) -> Self {
        self.max_chars = max.max(8);
        self
    }

    /// The model this embedder is bound to.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embed `texts`, preserving order.
    ///
    /// Cache hits skip the network.  A failed batch degrades to zero
    /// vectors at its positions rather than failing the whole run.
    pub async fn embed(&self, texts: &[String]) -> Result<EmbedOutcome, ServiceError> {
        let prepared: Vec<String> = texts.iter().map(|t| self.prepare(t)).collect();

        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; prepared.len()];
        let mut misses: Vec<usize> = Vec::new();
        {
            let cache = self.cache.lock().expect("embed cache lock poisoned");
            for (i, text) in prepared.iter().enumerate() {
                match cache.get(&self.cache_key(text)) {
                    Some(entry) if entry.inserted.elapsed() <= CACHE_TTL => {
                        vectors[i] = Some(entry.vector.clone());
                    }
                    _ => misses.push(i),
                }
            }
        }
        debug!(
            total = prepared.len(),
            misses = misses.len(),
            "embedding batch prepared"
        );

        let mut failed_positions: Vec<usize> = Vec::new();
        let mut known_dims: Option<usize> = None;

        for chunk in misses.chunks(self.batch_size) {
            let batch: Vec<String> = chunk.iter().map(|&i| prepared[i].clone()).collect();
            let gate = self.batch_gate.lock().await;
            let result = self.transport.embed_batch(&self.model, &batch).await;
            drop(gate);

            match result {
                Ok(rows) if rows.len() == batch.len() => {
                    let mut cache = self.cache.lock().expect("embed cache lock poisoned");
                    for (&position, vector) in chunk.iter().zip(rows) {
                        known_dims = known_dims.or(Some(vector.len()));
                        cache.insert(
                            self.cache_key(&prepared[position]),
                            CacheEntry {
                                vector: vector.clone(),
                                inserted: Instant::now(),
                            },
                        );
                        vectors[position] = Some(vector);
                    }
                }
                Ok(rows) => {
                    warn!(
                        expected = batch.len(),
                        got = rows.len(),
                        "embedding batch row mismatch, degrading to zero vectors"
                    );
                    failed_positions.extend_from_slice(chunk);
                }
                Err(err) => {
                    warn!(code = err.code.as_str(), "embedding batch failed");
                    failed_positions.extend_from_slice(chunk);
                }
            }
        }

        // Fill failures (and any cache-dimension gaps) with zero vectors.
        let dims = known_dims
            .or_else(|| {
                vectors
                    .iter()
                    .flatten()
                    .map(|v| v.len())
                    .next()
            })
            .unwrap_or(self.fallback_dimensions);
        let out = vectors
            .into_iter()
            .map(|v| v.unwrap_or_else(|| vec![0.0; dims]))
            .collect();

        failed_positions.sort_unstable();
        Ok(EmbedOutcome {
            vectors: out,
            failed_positions,
        })
    }

    /// Embed a single text; zero vector on batch failure.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let outcome = self.embed(std::slice::from_ref(&text.to_string())).await?;
        Ok(outcome
            .vectors
            .into_iter()
            .next()
            .unwrap_or_else(|| vec![0.0; self.fallback_dimensions]))
    }

    fn prepare(&self, text: &str) -> String {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return EMPTY_SENTINEL.to_string();
        }
        let count = trimmed.chars().count();
        if count <= self.max_chars {
            return trimmed.to_string();
        }
        let mut cut: String = trimmed
            .chars()
            .take(self.max_chars - TRUNCATION_MARKER.chars().count())
            .collect();
        cut.push_str(TRUNCATION_MARKER);
        cut
    }

    /// Cache key deliberately excludes the tenant: identical public text
    /// embeds identically.
    fn cache_key(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.model.as_bytes());
        hasher.update([0]);
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(64);
        for b in digest {
            use std::fmt::Write as _;
            let _ = write!(out, "{b:02x}");
        }
        out
    }
}
