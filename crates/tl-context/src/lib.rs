// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ticket context assembly.
//!
//! For an open ticket: fetch the latest state from the platform (not the
//! vector store, which lags the conversation), generate a realtime
//! summary, and retrieve similar tickets and related KB articles in
//! parallel.  The subject ticket is excluded from its own similar list
//! after retrieval — a pre-filter would also knock out legitimate
//! near-duplicates that share its content hash.

#![deny(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tl_core::{IntegratedObject, ObjectType, Summary, SummaryType, TenantContext};
use tl_error::ServiceError;
use tl_llm::{CancellationToken, ChunkStream};
use tl_object::build_ticket;
use tl_platform::PlatformAdapter;
use tl_search::{SearchEngine, SearchHit};
use tl_summarize::Summarizer;
use tracing::info;

/// Default similar-ticket and KB result counts.
pub const DEFAULT_TOP_K: usize = 5;
/// How much of the body joins the subject in the similarity query.
const QUERY_BODY_CHARS: usize = 2_000;

/// Per-phase wall-clock timings, milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTimings {
    /// Platform fetch + object build.
    pub fetch_ms: u64,
    /// Realtime summary generation.
    pub summary_ms: u64,
    /// Both retrieval calls (they run in parallel).
    pub search_ms: u64,
    /// End to end.
    pub total_ms: u64,
}

/// The assembled context for one open ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketContext {
    /// Realtime four-section summary.
    pub summary: Summary,
    /// Similar tickets, subject ticket excluded.
    pub similar_tickets: Vec<SearchHit>,
    /// Related KB articles.
    pub kb_articles: Vec<SearchHit>,
    /// Phase timings for the caller's performance block.
    pub performance: PhaseTimings,
}

/// Assembles ticket contexts.
pub struct ContextAssembler {
    adapter: Arc<dyn PlatformAdapter>,
    summarizer: Arc<Summarizer>,
    engine: Arc<SearchEngine>,
    top_k: usize,
}

impl ContextAssembler {
    /// Assemble with the default top-K.
    pub fn new(
        adapter: Arc<dyn PlatformAdapter>,
        summarizer: Arc<Summarizer>,
        engine: Arc<SearchEngine>,
    ) -> Self {
        Self {
            adapter,
            summarizer,
            engine,
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Override the per-list result count.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Fetch the ticket fresh and build its integrated object.
    pub async fn fetch_object(
        &self,
        ctx: &TenantContext,
        ticket_id: &str,
    ) -> Result<IntegratedObject, ServiceError> {
        let bundle = self.adapter.fetch_ticket(ticket_id).await?;
        build_ticket(ctx, &bundle)
    }

    /// Full context: summary + similar tickets + related KB.
    pub async fn assemble(
        &self,
        ctx: &TenantContext,
        ticket_id: &str,
        cancel: &CancellationToken,
    ) -> Result<TicketContext, ServiceError> {
        let started = Instant::now();

        let object = self.fetch_object(ctx, ticket_id).await?;
        let fetch_ms = started.elapsed().as_millis() as u64;

        let query_text = similarity_query(&object);

        // Summary and both retrievals are independent; run them together,
        // timing each phase on its own clock.
        let summary_fut = async {
            let phase_started = Instant::now();
            let result = self
                .summarizer
                .summarize(&object, SummaryType::Realtime, cancel)
                .await;
            (result, phase_started.elapsed().as_millis() as u64)
        };
        let retrieval_fut = async {
            let phase_started = Instant::now();
            let similar_fut = self.engine.search_similar(
                ctx,
                &query_text,
                ObjectType::Ticket,
                // One extra so self-exclusion still fills the list.
                self.top_k + 1,
                cancel,
            );
            let kb_fut = self.engine.search_similar(
                ctx,
                &query_text,
                ObjectType::KbArticle,
                self.top_k,
                cancel,
            );
            let (similar, kb) = tokio::join!(similar_fut, kb_fut);
            (similar, kb, phase_started.elapsed().as_millis() as u64)
        };

        let ((summary, summary_ms), (similar, kb_articles, search_ms)) =
            tokio::join!(summary_fut, retrieval_fut);
        let summary = summary?;
        let similar = similar?;
        let kb_articles = kb_articles?;

        let similar_tickets = exclude_self(similar, &object, self.top_k);

        info!(
            ticket = ticket_id,
            similar = similar_tickets.len(),
            kb = kb_articles.len(),
            "context assembled"
        );
        Ok(TicketContext {
            summary,
            similar_tickets,
            kb_articles,
            performance: PhaseTimings {
                fetch_ms,
                summary_ms,
                search_ms,
                total_ms: started.elapsed().as_millis() as u64,
            },
        })
    }

    /// Stream the realtime summary for SSE delivery.  Returns the fresh
    /// object alongside the stream so the caller can retrieve context in
    /// parallel.
    pub async fn stream_summary(
        &self,
        ctx: &TenantContext,
        ticket_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(IntegratedObject, ChunkStream), ServiceError> {
        let object = self.fetch_object(ctx, ticket_id).await?;
        let stream = self.summarizer.stream_realtime(&object, cancel).await?;
        Ok((object, stream))
    }
}

/// Subject + leading body slice as the similarity query.
fn similarity_query(object: &IntegratedObject) -> String {
    let body: String = object.body_text.chars().take(QUERY_BODY_CHARS).collect();
    format!("{}\n{body}", object.subject)
}

/// Drop the subject ticket from its own similar list, post-retrieval.
fn exclude_self(
    hits: Vec<SearchHit>,
    object: &IntegratedObject,
    top_k: usize,
) -> Vec<SearchHit> {
    let mut out: Vec<SearchHit> = hits
        .into_iter()
        .filter(|hit| {
            !(hit.payload.platform == object.platform
                && hit.payload.original_id == object.original_id)
        })
        .collect();
    out.truncate(top_k);
    out
}
