// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP service daemon.
//!
//! Thin axum routes over the cores: context initialization (buffered and
//! SSE-streamed), conditional RAG queries, raw hybrid search, ingest job
//! control, and health.  Every route resolves a [`TenantContext`] from
//! request headers before touching anything, and every error leaves as a
//! `{code, message, trace_id}` envelope.

#![deny(unsafe_code)]

/// Request/response envelopes.
pub mod api;

use api::{
    ContextDoc, ControlRequest, ControlResponse, CreateJobRequest, CreateJobResponse,
    HealthDeps, HealthResponse, HybridSearchRequest, HybridSearchResponse, JobStatusResponse,
    ProviderHealth, QueryMeta, QueryMode, QueryRequest, QueryResponse,
};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, extract::Path as AxPath, extract::State};
use futures::StreamExt as _;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tl_config::{UseCase, resolve_use_case};
use tl_context::ContextAssembler;
use tl_core::query::{AnalyzedQuery, QueryIntent, SearchStrategy};
use tl_core::TenantContext;
use tl_core::tenant::resolve_tenant;
use tl_error::{ErrorCode, ServiceError};
use tl_ingest::{ControlAction, Orchestrator};
use tl_llm::{CancellationToken, ChatMessage, GenerateOptions, TextGenerator};
use tl_query::QueryAnalyzer;
use tl_search::{SearchEngine, SearchHit};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Default result count for `/query`.
const QUERY_TOP_K: usize = 5;
/// Default result count for `/hybrid-search`.
const HYBRID_TOP_K: usize = 10;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Shared daemon state.
pub struct AppState {
    /// Context assembler (C11).
    pub assembler: Arc<ContextAssembler>,
    /// Query analyzer (C9).
    pub analyzer: Arc<QueryAnalyzer>,
    /// Conditional search engine (C10).
    pub engine: Arc<SearchEngine>,
    /// Ingest orchestrator (C8).
    pub orchestrator: Arc<Orchestrator>,
    /// Answer generator for `/query`.
    pub generator: Arc<dyn TextGenerator>,
    /// `TENANT_DOMAIN` fallback for header-less requests.
    pub default_tenant_domain: Option<String>,
    /// Vector store location shown in `/health`.
    pub vector_db_label: String,
}

/// Build the axum router with all daemon routes.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(cmd_health))
        .route("/init/{ticket_id}", get(cmd_init))
        .route("/init/{ticket_id}/stream", get(cmd_init_stream))
        .route("/query", post(cmd_query))
        .route("/hybrid-search", post(cmd_hybrid_search))
        .route("/ingest/jobs", post(cmd_create_job).get(cmd_list_jobs))
        .route("/ingest/jobs/{job_id}", get(cmd_get_job))
        .route("/ingest/jobs/{job_id}/control", post(cmd_control_job))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error envelope
// ---------------------------------------------------------------------------

/// API error carrying the uniform envelope.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: ErrorCode,
    message: String,
    trace_id: Uuid,
}

impl ApiError {
    fn from_service(err: ServiceError) -> Self {
        let trace_id = Uuid::new_v4();
        let status = match err.code {
            ErrorCode::InvalidTenant | ErrorCode::InvalidQuery => StatusCode::BAD_REQUEST,
            ErrorCode::ValidationFailure => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::PermanentClientError => StatusCode::NOT_FOUND,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::AuthFailure => StatusCode::BAD_GATEWAY,
            ErrorCode::LlmUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::TransientNetwork | ErrorCode::PermanentServerError => {
                StatusCode::BAD_GATEWAY
            }
            // A missing tenant filter is a bug in this process, not the
            // caller's request.
            ErrorCode::MissingTenantFilter
            | ErrorCode::TenantLeak
            | ErrorCode::QualityBelowThreshold
            | ErrorCode::Cancelled
            | ErrorCode::ConfigInvalid
            | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Operator-oriented message: never echoes tenant content.
        error!(trace_id = %trace_id, code = err.code.as_str(), error = %err, "request failed");
        Self {
            status,
            code: err.code,
            message: err.message,
            trace_id,
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self::from_service(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "code": self.code.as_str(),
            "message": self.message,
            "trace_id": self.trace_id,
        }));
        (self.status, body).into_response()
    }
}

// ---------------------------------------------------------------------------
// Tenant extraction
// ---------------------------------------------------------------------------

fn tenant_from(headers: &HeaderMap, state: &AppState) -> Result<TenantContext, ApiError> {
    let pairs = headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)));
    resolve_tenant(pairs, state.default_tenant_domain.as_deref()).map_err(ApiError::from)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn cmd_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let llm_providers = UseCase::ALL
        .iter()
        .map(|use_case| {
            let route = resolve_use_case(*use_case);
            ProviderHealth {
                use_case: use_case.as_str().to_string(),
                provider: route.provider,
                model: route.model,
            }
        })
        .collect();
    Json(HealthResponse {
        status: "ok".into(),
        deps: HealthDeps {
            vector_db: state.vector_db_label.clone(),
            llm_providers,
        },
    })
}

async fn cmd_init(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxPath(ticket_id): AxPath<String>,
) -> Result<Json<tl_context::TicketContext>, ApiError> {
    let ctx = tenant_from(&headers, &state)?;
    let cancel = CancellationToken::new();
    let context = state.assembler.assemble(&ctx, &ticket_id, &cancel).await?;
    Ok(Json(context))
}

async fn cmd_init_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxPath(ticket_id): AxPath<String>,
) -> Result<
    Sse<axum::response::sse::KeepAliveStream<ReceiverStream<Result<SseEvent, Infallible>>>>,
    ApiError,
> {
    let ctx = tenant_from(&headers, &state)?;
    let cancel = CancellationToken::new();
    let (_object, mut chunks) = state
        .assembler
        .stream_summary(&ctx, &ticket_id, &cancel)
        .await?;

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<SseEvent, Infallible>>(32);
    tokio::spawn(async move {
        // Keep the upstream alive for the duration of the response.
        let _cancel = cancel;
        let started = SseEvent::default()
            .json_data(json!({"type": "summary_start", "ticket_id": ticket_id}))
            .unwrap_or_default();
        if tx.send(Ok(started)).await.is_err() {
            return;
        }

        let mut full = String::new();
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(text) => {
                    full.push_str(&text);
                    let event = SseEvent::default()
                        .json_data(json!({"type": "summary_chunk", "text": text}))
                        .unwrap_or_default();
                    if tx.send(Ok(event)).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    let event = SseEvent::default()
                        .json_data(json!({
                            "type": "error",
                            "code": err.code.as_str(),
                            "message": err.message,
                        }))
                        .unwrap_or_default();
                    let _ = tx.send(Ok(event)).await;
                    return;
                }
            }
        }

        let complete = SseEvent::default()
            .json_data(json!({"type": "summary_complete", "text": full}))
            .unwrap_or_default();
        let _ = tx.send(Ok(complete)).await;
    });

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}

async fn cmd_query(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let ctx = tenant_from(&headers, &state)?;
    let cancel = CancellationToken::new();
    let top_k = request.top_k.unwrap_or(QUERY_TOP_K);

    let mut analyzed = state.analyzer.analyze(&request.query, &cancel).await?;
    if let Some(filters) = &request.filters {
        filters.merge_into(&mut analyzed.conditions);
    }

    let (context_docs, search_degraded, hits) = match request.mode {
        QueryMode::Chat => (Vec::new(), false, Vec::new()),
        QueryMode::Rag => {
            let outcome = state.engine.search(&ctx, &analyzed, top_k, &cancel).await?;
            let docs = outcome.hits.iter().map(context_doc).collect();
            (docs, outcome.degraded, outcome.hits)
        }
    };

    let (answer, answer_degraded, provider) =
        answer_for(&state, &request.query, &hits, request.mode, &ctx, &cancel).await;

    Ok(Json(QueryResponse {
        answer,
        context_docs,
        meta: QueryMeta {
            intent: intent_tag(analyzed.intent).to_string(),
            strategy: strategy_tag(analyzed.strategy).to_string(),
            confidence: analyzed.confidence,
            search_degraded,
            answer_degraded,
            provider,
        },
    }))
}

async fn cmd_hybrid_search(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<HybridSearchRequest>,
) -> Result<Json<HybridSearchResponse>, ApiError> {
    let ctx = tenant_from(&headers, &state)?;
    let cancel = CancellationToken::new();
    let top_k = request.top_k.unwrap_or(HYBRID_TOP_K);

    // Raw retrieval: no analyzer pass, just the caller's pinned filters.
    let mut conditions = tl_core::query::QueryConditions::default();
    if let Some(filters) = &request.filters {
        filters.merge_into(&mut conditions);
    }
    let analyzed = AnalyzedQuery {
        intent: QueryIntent::SimpleSemantic,
        conditions,
        search_text: request.query.clone(),
        strategy: SearchStrategy::Hybrid,
        confidence: 1.0,
    };

    let outcome = state.engine.search(&ctx, &analyzed, top_k, &cancel).await?;
    Ok(Json(HybridSearchResponse {
        hits: outcome.hits,
    }))
}

async fn cmd_create_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateJobRequest>,
) -> Result<Json<CreateJobResponse>, ApiError> {
    let mut ctx = tenant_from(&headers, &state)?;
    if let Some(platform) = request.platform {
        ctx.platform = platform;
    }

    let job = state
        .orchestrator
        .create_job(&ctx, request.scope, request.since)
        .await?;
    spawn_run(&state, job.job_id);

    Ok(Json(CreateJobResponse {
        job_id: job.job_id,
        status: job.status,
    }))
}

async fn cmd_list_jobs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<JobStatusResponse>>, ApiError> {
    let ctx = tenant_from(&headers, &state)?;
    let jobs = state.orchestrator.store().list(&ctx.tenant_id).await?;
    Ok(Json(jobs.into_iter().map(job_status_response).collect()))
}

async fn cmd_get_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxPath(job_id): AxPath<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let ctx = tenant_from(&headers, &state)?;
    let job = state
        .orchestrator
        .store()
        .get(job_id)
        .await?
        .filter(|j| j.tenant_id == ctx.tenant_id)
        .ok_or_else(|| {
            ApiError::from(ServiceError::new(
                ErrorCode::PermanentClientError,
                "no such job",
            ))
        })?;
    Ok(Json(job_status_response(job)))
}

async fn cmd_control_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxPath(job_id): AxPath<Uuid>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<ControlResponse>, ApiError> {
    let ctx = tenant_from(&headers, &state)?;
    // Job ownership check before any control reaches the orchestrator.
    let owned = state
        .orchestrator
        .store()
        .get(job_id)
        .await?
        .is_some_and(|j| j.tenant_id == ctx.tenant_id);
    if !owned {
        return Err(ApiError::from(ServiceError::new(
            ErrorCode::PermanentClientError,
            "no such job",
        )));
    }

    let status = state.orchestrator.control(job_id, request.action).await?;
    if request.action == ControlAction::Resume {
        spawn_run(&state, job_id);
    }
    Ok(Json(ControlResponse { status }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn spawn_run(state: &Arc<AppState>, job_id: Uuid) {
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(err) = orchestrator.run(job_id, CancellationToken::new()).await {
            warn!(job_id = %job_id, code = err.code.as_str(), "ingest run ended in error");
        } else {
            info!(job_id = %job_id, "ingest run finished");
        }
    });
}

fn job_status_response(job: tl_core::job::IngestJob) -> JobStatusResponse {
    JobStatusResponse {
        job_id: job.job_id,
        status: job.status,
        progress: job.progress,
        errors: job.error_log,
    }
}

fn context_doc(hit: &SearchHit) -> ContextDoc {
    let snippet: String = hit.payload.summary_text.chars().take(400).collect();
    ContextDoc {
        original_id: hit.payload.original_id.clone(),
        object_type: hit.payload.object_type.as_str().to_string(),
        subject: hit.payload.subject.clone(),
        snippet,
        score: hit.score,
        low_confidence: hit.low_confidence,
    }
}

fn intent_tag(intent: QueryIntent) -> &'static str {
    match intent {
        QueryIntent::SimpleKeyword => "simple_keyword",
        QueryIntent::SimpleSemantic => "simple_semantic",
        QueryIntent::ComplexConditional => "complex_conditional",
        QueryIntent::SimilaritySearch => "similarity_search",
        QueryIntent::Functional => "functional",
    }
}

fn strategy_tag(strategy: SearchStrategy) -> &'static str {
    match strategy {
        SearchStrategy::MetadataFirst => "metadata_first",
        SearchStrategy::Hybrid => "hybrid",
        SearchStrategy::SemanticFirst => "semantic_first",
    }
}

/// Produce the answer text.  An unavailable LLM degrades to an extractive
/// answer built from the top context documents rather than failing the
/// request.
async fn answer_for(
    state: &Arc<AppState>,
    query: &str,
    hits: &[SearchHit],
    mode: QueryMode,
    ctx: &TenantContext,
    cancel: &CancellationToken,
) -> (String, bool, Option<String>) {
    let mut messages = vec![ChatMessage::system(
        "You are a support assistant. Answer the question using ONLY the provided context \
         documents. Cite ticket ids when you rely on them. If the context does not cover \
         the question, say so.",
    )];
    let mut prompt = String::new();
    if mode == QueryMode::Rag {
        for hit in hits {
            prompt.push_str(&format!(
                "[{} {}] {}\n{}\n\n",
                hit.payload.object_type.as_str(),
                hit.payload.original_id,
                hit.payload.subject,
                hit.payload.summary_text
            ));
        }
    }
    prompt.push_str(&format!("Question: {query}"));
    messages.push(ChatMessage::user(prompt));

    let options = GenerateOptions {
        tenant_cache_key: Some(ctx.tenant_id.as_str().to_string()),
        ..Default::default()
    };
    match state
        .generator
        .generate(UseCase::Realtime, &messages, options, cancel)
        .await
    {
        Ok(generation) => (generation.text, false, Some(generation.meta.provider)),
        Err(err) => {
            warn!(code = err.code.as_str(), "answer generation failed, extractive fallback");
            let fallback = hits
                .iter()
                .take(3)
                .map(|h| format!("- {}: {}", h.payload.subject, snippet(&h.payload.summary_text)))
                .collect::<Vec<_>>()
                .join("\n");
            (fallback, true, None)
        }
    }
}

fn snippet(text: &str) -> String {
    text.chars().take(160).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
