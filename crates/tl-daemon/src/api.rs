// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request/response envelopes for the daemon REST API.

use serde::{Deserialize, Serialize};
use tl_core::TicketStatus;
use tl_core::job::{IngestScope, JobProgress, JobStatus};
use tl_error::ServiceErrorDto;
use tl_ingest::ControlAction;
use tl_search::SearchHit;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// /query
// ---------------------------------------------------------------------------

/// How `/query` should answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    /// Retrieve context and answer grounded in it.
    #[default]
    Rag,
    /// Answer without retrieval.
    Chat,
}

/// Optional hard filters a caller can pin on `/query` and
/// `/hybrid-search`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestFilters {
    /// Category facets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub category: Vec<String>,
    /// Status facets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status: Vec<TicketStatus>,
    /// Tag preferences.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl RequestFilters {
    /// Merge these pinned filters into extracted conditions (pinned values
    /// win over extracted ones on conflict).
    pub fn merge_into(&self, conditions: &mut tl_core::query::QueryConditions) {
        if !self.category.is_empty() {
            conditions.category = self.category.clone();
        }
        if !self.status.is_empty() {
            conditions.status = self.status.clone();
        }
        if !self.tags.is_empty() {
            conditions.tags = self.tags.clone();
        }
    }
}

/// `POST /query` body.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    /// Natural-language query.
    pub query: String,
    /// Answer mode.
    #[serde(default)]
    pub mode: QueryMode,
    /// Pinned filters.
    #[serde(default)]
    pub filters: Option<RequestFilters>,
    /// Result count (default 5).
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// One context document in a `/query` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextDoc {
    /// Platform id of the source object.
    pub original_id: String,
    /// `ticket` / `kb_article`.
    pub object_type: String,
    /// Subject line.
    pub subject: String,
    /// Summary snippet.
    pub snippet: String,
    /// Retrieval score.
    pub score: f64,
    /// Set on a prevent-empty fallback hit.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub low_confidence: bool,
}

/// Metadata block on a `/query` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryMeta {
    /// Classified intent.
    pub intent: String,
    /// Chosen strategy.
    pub strategy: String,
    /// Analyzer confidence.
    pub confidence: f64,
    /// Retrieval fell back to plain dense search.
    pub search_degraded: bool,
    /// The answer LLM was unavailable; `answer` is extractive.
    pub answer_degraded: bool,
    /// Provider that generated the answer, when one did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// `POST /query` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    /// The answer text.
    pub answer: String,
    /// Documents the answer is grounded in.
    pub context_docs: Vec<ContextDoc>,
    /// Metadata.
    pub meta: QueryMeta,
}

// ---------------------------------------------------------------------------
// /hybrid-search
// ---------------------------------------------------------------------------

/// `POST /hybrid-search` body.
#[derive(Debug, Clone, Deserialize)]
pub struct HybridSearchRequest {
    /// Query text.
    pub query: String,
    /// Dense fusion weight override.
    #[serde(default)]
    pub dense_weight: Option<f64>,
    /// Sparse fusion weight override.
    #[serde(default)]
    pub sparse_weight: Option<f64>,
    /// Pinned filters.
    #[serde(default)]
    pub filters: Option<RequestFilters>,
    /// Result count (default 10).
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// `POST /hybrid-search` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridSearchResponse {
    /// Raw ranked hits.
    pub hits: Vec<SearchHit>,
}

// ---------------------------------------------------------------------------
// /ingest
// ---------------------------------------------------------------------------

/// `POST /ingest/jobs` body.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateJobRequest {
    /// Full or incremental.
    pub scope: IngestScope,
    /// Platform (defaults to the tenant context's platform).
    #[serde(default)]
    pub platform: Option<String>,
    /// Explicit lower bound for incremental scope.
    #[serde(default)]
    pub since: Option<chrono::DateTime<chrono::Utc>>,
}

/// `POST /ingest/jobs` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobResponse {
    /// New job id.
    pub job_id: Uuid,
    /// Initial status.
    pub status: JobStatus,
}

/// `GET /ingest/jobs/{id}` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    /// Job id.
    pub job_id: Uuid,
    /// Current status.
    pub status: JobStatus,
    /// Progress counters.
    pub progress: JobProgress,
    /// Recorded errors.
    pub errors: Vec<ServiceErrorDto>,
}

/// `POST /ingest/jobs/{id}/control` body.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlRequest {
    /// Pause, resume, or cancel.
    pub action: ControlAction,
}

/// `POST /ingest/jobs/{id}/control` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    /// Status after the action was applied.
    pub status: JobStatus,
}

// ---------------------------------------------------------------------------
// /health
// ---------------------------------------------------------------------------

/// One configured LLM route in the health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    /// Use-case tag.
    pub use_case: String,
    /// Configured provider.
    pub provider: String,
    /// Configured model.
    pub model: String,
}

/// `GET /health` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `"ok"`.
    pub status: String,
    /// Dependency report.
    pub deps: HealthDeps,
}

/// Dependency block of the health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthDeps {
    /// Vector store location (`"memory"` for the in-process store).
    pub vector_db: String,
    /// Configured LLM routes per use-case.
    pub llm_providers: Vec<ProviderHealth>,
}
