// SPDX-License-Identifier: MIT OR Apache-2.0
//! The LLM router.
//!
//! Resolves `(provider, model)` per use-case from the environment on every
//! call, executes with a per-call timeout, retries retryable failures with
//! jittered exponential backoff, walks the configured fallback chain, and
//! caches responses by request digest.

use crate::cache::ResponseCache;
use crate::cancel::CancellationToken;
use crate::provider::{
    AnthropicStreamEvent, EmbeddingsRequest, EmbeddingsResponse, OpenAiStreamChunk, ProviderKind,
    anthropic_request, gemini_request, openai_request,
};
use crate::sse::{DONE_MARKER, SseParser};
use crate::{
    CacheStatus, ChatMessage, ChunkStream, EmbeddingTransport, GenerateOptions, Generation,
    GenerationMeta, TextGenerator, estimate_tokens,
};
use async_trait::async_trait;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tl_config::{UseCase, UseCaseRoute, resolve_use_case};
use tl_error::{ErrorCode, ServiceError, ServiceErrorDto};
use tokio::sync::Semaphore;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// Retries per hop on retryable errors.
const MAX_RETRIES: u32 = 3;
/// Base backoff delay.
const BACKOFF_BASE_MS: u64 = 500;
/// Response cache capacity (entries).
const CACHE_CAPACITY: usize = 4_096;

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// Base URLs and keys per provider.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    /// OpenAI-compatible base URL.
    pub openai_base: String,
    /// OpenAI API key.
    pub openai_key: Option<String>,
    /// Anthropic base URL.
    pub anthropic_base: String,
    /// Anthropic API key.
    pub anthropic_key: Option<String>,
    /// Gemini base URL.
    pub gemini_base: String,
    /// Gemini API key.
    pub gemini_key: Option<String>,
}

impl ProviderEndpoints {
    /// Read endpoints from the process environment.
    pub fn from_env() -> Self {
        let get = |key: &str| std::env::var(key).ok();
        Self {
            openai_base: get("OPENAI_BASE_URL").unwrap_or_else(|| "https://api.openai.com".into()),
            openai_key: get("OPENAI_API_KEY"),
            anthropic_base: get("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|| "https://api.anthropic.com".into()),
            anthropic_key: get("ANTHROPIC_API_KEY"),
            gemini_base: get("GEMINI_BASE_URL")
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".into()),
            gemini_key: get("GEMINI_API_KEY"),
        }
    }

    /// Point every provider at one base URL (tests).
    pub fn all_at(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            openai_base: base.clone(),
            openai_key: Some("test-key".into()),
            anthropic_base: base.clone(),
            anthropic_key: Some("test-key".into()),
            gemini_base: base,
            gemini_key: Some("test-key".into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Use-case-routed LLM client.
pub struct LlmRouter {
    http: reqwest::Client,
    endpoints: ProviderEndpoints,
    cache: ResponseCache,
    realtime_slots: Arc<Semaphore>,
    batch_slots: Arc<Semaphore>,
}

impl LlmRouter {
    /// Build a router with explicit endpoints.
    ///
    /// `CONNECTION_POOL_SIZE` bounds the idle connections kept per
    /// provider host.
    pub fn new(endpoints: ProviderEndpoints) -> Result<Self, ServiceError> {
        let pool_size = std::env::var("CONNECTION_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(64);
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(pool_size)
            .build()
            .map_err(|e| {
                ServiceError::new(ErrorCode::Internal, "failed to build http client")
                    .with_source(e)
            })?;
        Ok(Self {
            http,
            endpoints,
            cache: ResponseCache::new(CACHE_CAPACITY),
            realtime_slots: Arc::new(Semaphore::new(10)),
            batch_slots: Arc::new(Semaphore::new(20)),
        })
    }

    /// Build a router from environment endpoints.
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::new(ProviderEndpoints::from_env())
    }

    fn slots(&self, use_case: UseCase) -> &Arc<Semaphore> {
        match use_case {
            UseCase::Realtime | UseCase::QueryAnalysis | UseCase::Hyde => &self.realtime_slots,
            UseCase::Batch | UseCase::Summary => &self.batch_slots,
        }
    }

    /// Primary + fallback hops for a route, unknown providers skipped.
    fn hops(route: &UseCaseRoute) -> Vec<(ProviderKind, String)> {
        let mut hops = Vec::with_capacity(1 + route.fallback.len());
        match ProviderKind::parse(&route.provider) {
            Ok(kind) => hops.push((kind, route.model.clone())),
            Err(_) => warn!(provider = %route.provider, "unknown primary provider, skipping"),
        }
        for hop in &route.fallback {
            match ProviderKind::parse(&hop.provider) {
                Ok(kind) => hops.push((kind, hop.model.clone())),
                Err(_) => warn!(provider = %hop.provider, "unknown fallback provider, skipping"),
            }
        }
        hops
    }

    fn cache_key(
        use_case: UseCase,
        provider: ProviderKind,
        model: &str,
        messages: &[ChatMessage],
        options: &GenerateOptions,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(use_case.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(provider.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(model.as_bytes());
        hasher.update([0]);
        if let Some(tenant) = &options.tenant_cache_key {
            hasher.update(tenant.as_bytes());
        }
        hasher.update([0]);
        // Canonical message serialisation: serde_json is deterministic for
        // struct fields in declaration order.
        if let Ok(bytes) = serde_json::to_vec(messages) {
            hasher.update(&bytes);
        }
        hasher.update([0]);
        hasher.update(options.max_tokens.unwrap_or(0).to_le_bytes());
        hasher.update(options.temperature.unwrap_or(-1.0).to_le_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(64);
        for b in digest {
            use std::fmt::Write as _;
            let _ = write!(out, "{b:02x}");
        }
        out
    }

    // -- single provider call (no retries) ---------------------------------

    async fn call_provider(
        &self,
        provider: ProviderKind,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f64,
    ) -> Result<(String, Option<(u64, u64)>), ServiceError> {
        match provider {
            ProviderKind::OpenAi => {
                let body = openai_request(model, messages, max_tokens, temperature, false);
                let url = format!("{}/v1/chat/completions", self.endpoints.openai_base);
                let mut req = self.http.post(&url).json(&body);
                if let Some(key) = &self.endpoints.openai_key {
                    req = req.bearer_auth(key);
                }
                let response = check_status(req.send().await, provider)?;
                let parsed: crate::provider::OpenAiChatResponse =
                    decode_body(response, provider).await?;
                let text = parsed
                    .choices
                    .into_iter()
                    .next()
                    .map(|c| c.message.content)
                    .ok_or_else(|| empty_completion(provider))?;
                let usage = parsed
                    .usage
                    .map(|u| (u.prompt_tokens, u.completion_tokens));
                Ok((text, usage))
            }
            ProviderKind::Anthropic => {
                let body = anthropic_request(model, messages, max_tokens, temperature, false);
                let url = format!("{}/v1/messages", self.endpoints.anthropic_base);
                let mut req = self
                    .http
                    .post(&url)
                    .header("anthropic-version", "2023-06-01")
                    .json(&body);
                if let Some(key) = &self.endpoints.anthropic_key {
                    req = req.header("x-api-key", key);
                }
                let response = check_status(req.send().await, provider)?;
                let parsed: crate::provider::AnthropicResponse =
                    decode_body(response, provider).await?;
                let text: String = parsed
                    .content
                    .iter()
                    .filter_map(|b| b.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("");
                if text.is_empty() {
                    return Err(empty_completion(provider));
                }
                let usage = parsed.usage.map(|u| (u.input_tokens, u.output_tokens));
                Ok((text, usage))
            }
            ProviderKind::Gemini => {
                let body = gemini_request(messages, max_tokens, temperature);
                let key = self.endpoints.gemini_key.as_deref().unwrap_or_default();
                let url = format!(
                    "{}/v1beta/models/{model}:generateContent?key={key}",
                    self.endpoints.gemini_base
                );
                let response = check_status(self.http.post(&url).json(&body).send().await, provider)?;
                let parsed: crate::provider::GeminiResponse =
                    decode_body(response, provider).await?;
                let text: String = parsed
                    .candidates
                    .into_iter()
                    .next()
                    .map(|c| {
                        c.content
                            .parts
                            .into_iter()
                            .map(|p| p.text)
                            .collect::<Vec<_>>()
                            .join("")
                    })
                    .ok_or_else(|| empty_completion(provider))?;
                Ok((text, None))
            }
        }
    }

    // -- streaming ----------------------------------------------------------

    async fn open_stream(
        &self,
        provider: ProviderKind,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f64,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, ServiceError> {
        let response = match provider {
            ProviderKind::OpenAi => {
                let body = openai_request(model, messages, max_tokens, temperature, true);
                let url = format!("{}/v1/chat/completions", self.endpoints.openai_base);
                let mut req = self.http.post(&url).json(&body);
                if let Some(key) = &self.endpoints.openai_key {
                    req = req.bearer_auth(key);
                }
                check_status(req.send().await, provider)?
            }
            ProviderKind::Anthropic => {
                let body = anthropic_request(model, messages, max_tokens, temperature, true);
                let url = format!("{}/v1/messages", self.endpoints.anthropic_base);
                let mut req = self
                    .http
                    .post(&url)
                    .header("anthropic-version", "2023-06-01")
                    .json(&body);
                if let Some(key) = &self.endpoints.anthropic_key {
                    req = req.header("x-api-key", key);
                }
                check_status(req.send().await, provider)?
            }
            ProviderKind::Gemini => {
                // No SSE endpoint wired for this dialect; emit the full
                // completion as a single chunk.
                let (text, _) = self
                    .call_provider(provider, model, messages, max_tokens, temperature)
                    .await?;
                let (tx, rx) = tokio::sync::mpsc::channel(1);
                let _ = tx.send(Ok(text)).await;
                return Ok(Box::pin(ReceiverStream::new(rx)));
            }
        };

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<String, ServiceError>>(32);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut parser = SseParser::new();
            let mut bytes = response.bytes_stream();
            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = tx
                            .send(Err(ServiceError::new(
                                ErrorCode::Cancelled,
                                "stream cancelled by caller",
                            )))
                            .await;
                        // Dropping `bytes` aborts the upstream request.
                        return;
                    }
                    chunk = bytes.next() => chunk,
                };
                match chunk {
                    Some(Ok(data)) => {
                        for payload in parser.feed(&data) {
                            if payload == DONE_MARKER {
                                return;
                            }
                            let delta = match provider {
                                ProviderKind::OpenAi => {
                                    serde_json::from_str::<OpenAiStreamChunk>(&payload)
                                        .ok()
                                        .and_then(|c| {
                                            c.choices.into_iter().next().and_then(|ch| ch.delta.content)
                                        })
                                }
                                ProviderKind::Anthropic => {
                                    serde_json::from_str::<AnthropicStreamEvent>(&payload)
                                        .ok()
                                        .filter(|e| e.event_type == "content_block_delta")
                                        .and_then(|e| e.delta.and_then(|d| d.text))
                                }
                                ProviderKind::Gemini => None,
                            };
                            if let Some(text) = delta
                                && !text.is_empty()
                            {
                                if tx.send(Ok(text)).await.is_err() {
                                    // Receiver dropped: caller went away.
                                    return;
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx
                            .send(Err(ServiceError::new(
                                ErrorCode::TransientNetwork,
                                "stream transport failed",
                            )
                            .with_source(e)))
                            .await;
                        return;
                    }
                    None => return,
                }
            }
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    // -- retry / fallback core ----------------------------------------------

    async fn generate_inner(
        &self,
        use_case: UseCase,
        messages: &[ChatMessage],
        options: &GenerateOptions,
        cancel: &CancellationToken,
    ) -> Result<Generation, ServiceError> {
        let route = resolve_use_case(use_case);
        let hops = Self::hops(&route);
        if hops.is_empty() {
            return Err(ServiceError::new(
                ErrorCode::ConfigInvalid,
                "no usable provider configured for use-case",
            )
            .with_context("use_case", use_case.as_str()));
        }

        let max_tokens = options.max_tokens.unwrap_or(route.max_tokens);
        let temperature = options.temperature.unwrap_or(route.temperature);
        let timeout = Duration::from_secs(route.timeout_secs);

        // Cache lookup against the primary hop identity.
        let ttl = use_case.default_cache_ttl();
        let key = Self::cache_key(use_case, hops[0].0, &hops[0].1, messages, options);
        if ttl.is_some() && !options.bypass_cache {
            if let Some(text) = self.cache.get(&key) {
                let input_tokens = prompt_tokens(messages);
                let output_tokens = estimate_tokens(&text);
                debug!(use_case = use_case.as_str(), "llm cache hit");
                return Ok(Generation {
                    text,
                    meta: GenerationMeta {
                        provider: hops[0].0.as_str().into(),
                        model: hops[0].1.clone(),
                        cache: CacheStatus::Hit,
                        input_tokens,
                        output_tokens,
                        duration_ms: 0,
                    },
                });
            }
        }

        let _permit = self.slots(use_case).acquire().await.map_err(|_| {
            ServiceError::new(ErrorCode::Internal, "llm concurrency semaphore closed")
        })?;

        let mut trail: Vec<ServiceErrorDto> = Vec::new();
        for (provider, model) in &hops {
            let mut attempt: u32 = 0;
            loop {
                if cancel.is_cancelled() {
                    return Err(ServiceError::new(
                        ErrorCode::Cancelled,
                        "generation cancelled by caller",
                    ));
                }

                let started = Instant::now();
                let outcome = tokio::time::timeout(
                    timeout,
                    self.call_provider(*provider, model, messages, max_tokens, temperature),
                )
                .await;

                let result = match outcome {
                    Ok(inner) => inner,
                    Err(_) => Err(ServiceError::new(
                        ErrorCode::UpstreamTimeout,
                        "provider call exceeded the use-case timeout",
                    )
                    .with_context("timeout_secs", route.timeout_secs)),
                };

                match result {
                    Ok((text, usage)) => {
                        let (input_tokens, output_tokens) = usage.unwrap_or_else(|| {
                            (prompt_tokens(messages), estimate_tokens(&text))
                        });
                        if let Some(ttl) = ttl
                            && !options.bypass_cache
                        {
                            self.cache.put(key.as_str(), text.as_str(), ttl);
                        }
                        let cache = if ttl.is_none() || options.bypass_cache {
                            CacheStatus::Bypass
                        } else {
                            CacheStatus::Miss
                        };
                        return Ok(Generation {
                            text,
                            meta: GenerationMeta {
                                provider: provider.as_str().into(),
                                model: model.clone(),
                                cache,
                                input_tokens,
                                output_tokens,
                                duration_ms: started.elapsed().as_millis() as u64,
                            },
                        });
                    }
                    Err(err) => {
                        let retryable = err.is_retryable();
                        warn!(
                            provider = provider.as_str(),
                            model = %model,
                            attempt,
                            code = err.code.as_str(),
                            "provider call failed"
                        );
                        trail.push((&err).into());
                        if retryable && attempt < MAX_RETRIES {
                            tokio::time::sleep(retry_delay(attempt)).await;
                            attempt += 1;
                            continue;
                        }
                        // Exhausted this hop; move to the next.
                        break;
                    }
                }
            }
        }

        Err(ServiceError::new(
            ErrorCode::LlmUnavailable,
            "every provider in the fallback chain failed",
        )
        .with_context("use_case", use_case.as_str())
        .with_context("trail", &trail))
    }
}

fn prompt_tokens(messages: &[ChatMessage]) -> u64 {
    messages.iter().map(|m| estimate_tokens(&m.content)).sum()
}

fn retry_delay(attempt: u32) -> Duration {
    use rand::Rng as _;
    let exp = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(10));
    let jitter = rand::thread_rng().gen_range(0..=exp / 4);
    Duration::from_millis(exp + jitter)
}

fn check_status(
    result: Result<reqwest::Response, reqwest::Error>,
    provider: ProviderKind,
) -> Result<reqwest::Response, ServiceError> {
    let response = result.map_err(|e| {
        let code = if e.is_timeout() {
            ErrorCode::UpstreamTimeout
        } else {
            ErrorCode::TransientNetwork
        };
        ServiceError::new(code, "provider request failed")
            .with_context("provider", provider.as_str())
            .with_source(e)
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let code = match status.as_u16() {
        429 => ErrorCode::RateLimited,
        401 | 403 => ErrorCode::AuthFailure,
        s if (500..600).contains(&s) => ErrorCode::TransientNetwork,
        _ => ErrorCode::PermanentClientError,
    };
    Err(ServiceError::new(code, "provider returned an error status")
        .with_context("provider", provider.as_str())
        .with_context("status", status.as_u16()))
}

async fn decode_body<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    provider: ProviderKind,
) -> Result<T, ServiceError> {
    response.json::<T>().await.map_err(|e| {
        ServiceError::new(ErrorCode::TransientNetwork, "provider body decode failed")
            .with_context("provider", provider.as_str())
            .with_source(e)
    })
}

fn empty_completion(provider: ProviderKind) -> ServiceError {
    ServiceError::new(
        ErrorCode::TransientNetwork,
        "provider returned an empty completion",
    )
    .with_context("provider", provider.as_str())
}

// ---------------------------------------------------------------------------
// Trait impls
// ---------------------------------------------------------------------------

#[async_trait]
impl TextGenerator for LlmRouter {
    async fn generate(
        &self,
        use_case: UseCase,
        messages: &[ChatMessage],
        options: GenerateOptions,
        cancel: &CancellationToken,
    ) -> Result<Generation, ServiceError> {
        self.generate_inner(use_case, messages, &options, cancel)
            .await
    }

    async fn stream(
        &self,
        use_case: UseCase,
        messages: &[ChatMessage],
        options: GenerateOptions,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, ServiceError> {
        let route = resolve_use_case(use_case);
        let hops = Self::hops(&route);
        if hops.is_empty() {
            return Err(ServiceError::new(
                ErrorCode::ConfigInvalid,
                "no usable provider configured for use-case",
            ));
        }
        let max_tokens = options.max_tokens.unwrap_or(route.max_tokens);
        let temperature = options.temperature.unwrap_or(route.temperature);

        let mut trail: Vec<ServiceErrorDto> = Vec::new();
        for (provider, model) in &hops {
            if cancel.is_cancelled() {
                return Err(ServiceError::new(
                    ErrorCode::Cancelled,
                    "stream cancelled by caller",
                ));
            }
            match self
                .open_stream(*provider, model, messages, max_tokens, temperature, cancel)
                .await
            {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    warn!(
                        provider = provider.as_str(),
                        code = err.code.as_str(),
                        "stream open failed"
                    );
                    trail.push((&err).into());
                }
            }
        }
        Err(ServiceError::new(
            ErrorCode::LlmUnavailable,
            "no provider accepted the stream request",
        )
        .with_context("trail", &trail))
    }
}

#[async_trait]
impl EmbeddingTransport for LlmRouter {
    async fn embed_batch(
        &self,
        model: &str,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, ServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = EmbeddingsRequest {
            model: model.to_string(),
            input: texts.to_vec(),
        };
        let url = format!("{}/v1/embeddings", self.endpoints.openai_base);

        let mut attempt: u32 = 0;
        loop {
            let mut req = self.http.post(&url).json(&body);
            if let Some(key) = &self.endpoints.openai_key {
                req = req.bearer_auth(key);
            }
            match check_status(req.send().await, ProviderKind::OpenAi) {
                Ok(response) => {
                    let parsed: EmbeddingsResponse =
                        decode_body(response, ProviderKind::OpenAi).await?;
                    let mut rows = parsed.data;
                    rows.sort_by_key(|r| r.index);
                    if rows.len() != texts.len() {
                        return Err(ServiceError::new(
                            ErrorCode::TransientNetwork,
                            "embedding row count does not match the batch",
                        )
                        .with_context("expected", texts.len())
                        .with_context("got", rows.len()));
                    }
                    return Ok(rows.into_iter().map(|r| r.embedding).collect());
                }
                Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                    tokio::time::sleep(retry_delay(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
