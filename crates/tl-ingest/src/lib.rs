// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ingest orchestration.
//!
//! Drives the per-object pipeline (fetch → build → summarize → embed →
//! upsert) in bounded-concurrency batches under a restart-safe job
//! record: pages are processed in ascending `(updated_at, original_id)`
//! order, the cursor watermark advances only after a page completes, and
//! a stale `running` job is reclaimed to `created` at process start with
//! its cursor intact.

#![deny(unsafe_code)]

/// Job persistence.
pub mod store;

pub use store::{FileJobStore, JobStore, MemoryJobStore};

use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt as _;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tl_core::job::{IngestJob, IngestScope, JobStatus};
use tl_core::{IntegratedObject, ObjectType, SummaryType, TenantContext, VectorPoint};
use tl_embed::Embedder;
use tl_embed::sparse::sparse_vector;
use tl_error::{ErrorCode, ServiceError, ServiceErrorDto};
use tl_llm::CancellationToken;
use tl_object::{build_article, build_ticket};
use tl_platform::{ObjectDescriptor, PlatformAdapter, backoff_delay};
use tl_summarize::Summarizer;
use tl_summarize::validate::found_sections;
use tl_vector::{Condition, Filter, VectorGateway};
use tracing::{info, warn};
use uuid::Uuid;

/// Per-object retry budget for retryable errors.
const OBJECT_RETRIES: u32 = 3;
/// Default bounded worker pool per job.
const DEFAULT_WORKERS: usize = 5;
/// Heartbeat write interval.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
/// Stale multiplier: a running job whose heartbeat is older than
/// `3 × HEARTBEAT_INTERVAL` is reclaimable.
const STALE_MULTIPLIER: i64 = 3;
/// Incremental overlap absorbing platform clock skew.
const INCREMENTAL_OVERLAP_SECS: i64 = 300;
/// Error log entries kept per job.
const ERROR_LOG_CAP: usize = 100;

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Which listing a job is currently draining.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum IngestPhase {
    /// `list_updated` ticket pages.
    #[default]
    Tickets,
    /// `list_kb` article pages.
    Kb,
}

/// Opaque-to-the-platform cursor persisted on the job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct CursorState {
    /// Lower bound for `list_updated`.
    since_epoch: i64,
    /// Listing currently being drained.
    #[serde(default)]
    phase: IngestPhase,
    /// Platform page cursor for the next page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    page: Option<String>,
    /// Last fully-processed page's final `(updated_at, original_id)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    watermark_updated_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    watermark_original_id: Option<String>,
}

impl CursorState {
    fn decode(raw: Option<&str>) -> Self {
        raw.and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default()
    }

    fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// True when `descriptor` was already processed by an earlier run.
    fn already_processed(&self, descriptor: &ObjectDescriptor) -> bool {
        match (self.watermark_updated_at, &self.watermark_original_id) {
            (Some(at), Some(id)) => {
                (descriptor.updated_at, descriptor.original_id.as_str()) <= (at, id.as_str())
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Control
// ---------------------------------------------------------------------------

/// Control actions accepted for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    /// Suspend after the current page.
    Pause,
    /// Continue a paused job (the caller spawns [`Orchestrator::run`]).
    Resume,
    /// Terminate.
    Cancel,
}

#[derive(Clone)]
struct JobControl {
    cancel: CancellationToken,
    pause: Arc<AtomicBool>,
}

/// Outcome of processing one object.
enum ObjectOutcome {
    /// Summarised, embedded, and upserted.  Carries a recoverable warning
    /// when the embedding degraded to a zero vector.
    Ingested(Option<ServiceErrorDto>),
    /// Content hash unchanged; nothing rewritten.
    Unchanged,
    /// Rejected by validation; recorded and skipped.
    Rejected(ServiceErrorDto),
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives ingest jobs for one tenant context at a time.
pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    adapter: Arc<dyn PlatformAdapter>,
    summarizer: Arc<Summarizer>,
    embedder: Arc<Embedder>,
    gateway: VectorGateway,
    controls: std::sync::Mutex<HashMap<Uuid, JobControl>>,
    workers: usize,
}

impl Orchestrator {
    /// Assemble an orchestrator.  The worker pool is capped by the
    /// adapter's `concurrent_max`.
    pub fn new(
        store: Arc<dyn JobStore>,
        adapter: Arc<dyn PlatformAdapter>,
        summarizer: Arc<Summarizer>,
        embedder: Arc<Embedder>,
        gateway: VectorGateway,
    ) -> Self {
        let workers = DEFAULT_WORKERS.min(adapter.rate_limits().concurrent_max.max(1));
        Self {
            store,
            adapter,
            summarizer,
            embedder,
            gateway,
            controls: std::sync::Mutex::new(HashMap::new()),
            workers,
        }
    }

    /// The job store (daemon polling).
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Create a job.  For incremental scope without an explicit `since`,
    /// the window starts at the tenant's last completed job minus the
    /// overlap.
    pub async fn create_job(
        &self,
        ctx: &TenantContext,
        scope: IngestScope,
        since: Option<DateTime<Utc>>,
    ) -> Result<IngestJob, ServiceError> {
        let since_epoch = match (scope, since) {
            (_, Some(explicit)) => explicit.timestamp(),
            (IngestScope::Full, None) => 0,
            (IngestScope::Incremental, None) => {
                let jobs = self.store.list(&ctx.tenant_id).await?;
                jobs.iter()
                    .filter(|j| j.status == JobStatus::Completed && j.platform == ctx.platform)
                    .map(|j| j.updated_at.timestamp() - INCREMENTAL_OVERLAP_SECS)
                    .max()
                    .unwrap_or(0)
            }
        };

        let mut job = IngestJob::new(ctx.tenant_id.clone(), ctx.platform.clone(), scope);
        job.cursor = Some(
            CursorState {
                since_epoch,
                ..Default::default()
            }
            .encode(),
        );
        self.store.put(&job).await?;
        info!(job_id = %job.job_id, tenant = ctx.tenant_id.as_str(), ?scope, "ingest job created");
        Ok(job)
    }

    /// Apply a control action.  `Resume` only validates; the caller then
    /// spawns [`Orchestrator::run`] again.
    pub async fn control(
        &self,
        job_id: Uuid,
        action: ControlAction,
    ) -> Result<JobStatus, ServiceError> {
        let mut job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| not_found(job_id))?;

        match action {
            ControlAction::Pause => {
                if job.status != JobStatus::Running {
                    return Err(conflict(job.status, "pause"));
                }
                if let Some(control) = self.control_handle(job_id) {
                    control.pause.store(true, Ordering::SeqCst);
                }
                Ok(job.status)
            }
            ControlAction::Resume => {
                if job.status != JobStatus::Paused {
                    return Err(conflict(job.status, "resume"));
                }
                Ok(job.status)
            }
            ControlAction::Cancel => {
                if job.status.is_terminal() {
                    return Err(conflict(job.status, "cancel"));
                }
                if let Some(control) = self.control_handle(job_id) {
                    control.cancel.cancel();
                    Ok(job.status)
                } else {
                    // No live runner; finalise directly.
                    transition(&mut job, JobStatus::Cancelled)?;
                    self.store.put(&job).await?;
                    Ok(JobStatus::Cancelled)
                }
            }
        }
    }

    /// Reclaim `running` jobs whose heartbeat went stale (crashed owner).
    /// Returns the reclaimed job ids.
    pub async fn recover_stale(&self) -> Result<Vec<Uuid>, ServiceError> {
        let now = Utc::now();
        let stale_after = HEARTBEAT_INTERVAL.as_secs() as i64 * STALE_MULTIPLIER;
        let mut reclaimed = Vec::new();
        for mut job in self.store.list_all().await? {
            if job.heartbeat_stale(now, stale_after) {
                warn!(job_id = %job.job_id, "reclaiming stale running job");
                transition(&mut job, JobStatus::Created)?;
                job.heartbeat_at = None;
                self.store.put(&job).await?;
                reclaimed.push(job.job_id);
            }
        }
        Ok(reclaimed)
    }

    /// Run a job to a terminal or paused state.
    ///
    /// Accepts jobs in `created` or `paused`; anything else is a conflict.
    pub async fn run(
        &self,
        job_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<JobStatus, ServiceError> {
        let mut job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| not_found(job_id))?;
        if !matches!(job.status, JobStatus::Created | JobStatus::Paused) {
            return Err(conflict(job.status, "run"));
        }
        transition(&mut job, JobStatus::Running)?;
        job.heartbeat_at = Some(Utc::now());
        self.store.put(&job).await?;

        let control = JobControl {
            cancel: cancel.clone(),
            pause: Arc::new(AtomicBool::new(false)),
        };
        self.controls
            .lock()
            .expect("controls lock poisoned")
            .insert(job_id, control.clone());

        let outcome = self.drive(&mut job, &control).await;

        self.controls
            .lock()
            .expect("controls lock poisoned")
            .remove(&job_id);

        let final_status = match outcome {
            Ok(status) => status,
            Err(err) => {
                push_error(&mut job, &err);
                transition(&mut job, JobStatus::Failed)?;
                self.store.put(&job).await?;
                return Err(err);
            }
        };
        Ok(final_status)
    }

    fn control_handle(&self, job_id: Uuid) -> Option<JobControl> {
        self.controls
            .lock()
            .expect("controls lock poisoned")
            .get(&job_id)
            .cloned()
    }

    // -- the page loop ------------------------------------------------------

    async fn drive(
        &self,
        job: &mut IngestJob,
        control: &JobControl,
    ) -> Result<JobStatus, ServiceError> {
        let ctx = TenantContext::new(job.tenant_id.clone(), job.platform.clone());
        let mut cursor = CursorState::decode(job.cursor.as_deref());
        let since = Utc
            .timestamp_opt(cursor.since_epoch, 0)
            .single()
            .unwrap_or(DateTime::UNIX_EPOCH);
        let large_scale = job
            .progress
            .items_total
            .is_some_and(|t| t as usize > tl_summarize::LARGE_SCALE_THRESHOLD);
        let mut last_heartbeat = std::time::Instant::now();

        loop {
            if control.cancel.is_cancelled() {
                push_error(
                    job,
                    &ServiceError::new(ErrorCode::Cancelled, "job cancelled by caller"),
                );
                transition(job, JobStatus::Cancelled)?;
                self.store.put(job).await?;
                return Ok(JobStatus::Cancelled);
            }
            if control.pause.load(Ordering::SeqCst) {
                transition(job, JobStatus::Paused)?;
                self.store.put(job).await?;
                info!(job_id = %job.job_id, "job paused");
                return Ok(JobStatus::Paused);
            }

            let page = self
                .list_with_retries(cursor.phase, since, cursor.page.as_deref(), job)
                .await?;

            let mut items: Vec<ObjectDescriptor> = page
                .items
                .into_iter()
                // KB listings cannot filter server-side; apply the window
                // here so both phases honour the cursor the same way.
                .filter(|d| d.updated_at >= since.timestamp())
                .filter(|d| !cursor.already_processed(d))
                .collect();
            items.sort_by(|a, b| {
                a.updated_at
                    .cmp(&b.updated_at)
                    .then_with(|| a.original_id.cmp(&b.original_id))
            });

            let page_watermark = items.last().map(|d| (d.updated_at, d.original_id.clone()));

            // Fan out with a bounded pool; each object's pipeline is serial.
            let results: Vec<(ObjectDescriptor, Result<ObjectOutcome, ServiceError>)> =
                futures::stream::iter(items.into_iter().map(|descriptor| {
                    let ctx = ctx.clone();
                    let cancel = control.cancel.clone();
                    async move {
                        let result = self
                            .process_with_retries(&ctx, &descriptor, large_scale, &cancel)
                            .await;
                        (descriptor, result)
                    }
                }))
                .buffer_unordered(self.workers)
                .collect()
                .await;

            for (descriptor, result) in results {
                match result {
                    Ok(ObjectOutcome::Ingested(warning)) => {
                        job.progress.items_done += 1;
                        if let Some(dto) = warning {
                            push_dto(job, dto);
                        }
                    }
                    Ok(ObjectOutcome::Unchanged) => {
                        job.progress.items_done += 1;
                    }
                    Ok(ObjectOutcome::Rejected(dto)) => {
                        job.progress.items_failed += 1;
                        push_dto(job, dto);
                    }
                    Err(err) if err.code == ErrorCode::AuthFailure => {
                        // Credentials are gone; no point continuing.
                        return Err(err.with_context("original_id", &descriptor.original_id));
                    }
                    Err(err) => {
                        warn!(
                            original_id = %descriptor.original_id,
                            code = err.code.as_str(),
                            "object failed after retries"
                        );
                        job.progress.items_failed += 1;
                        push_error(job, &err);
                    }
                }
            }

            // Watermark moves only after the whole page settled, so a
            // crash re-processes at most one page (idempotent upserts make
            // that harmless).
            if let Some((at, id)) = page_watermark {
                cursor.watermark_updated_at = Some(at);
                cursor.watermark_original_id = Some(id);
            }
            cursor.page = page.next_cursor.clone();
            job.cursor = Some(cursor.encode());
            job.updated_at = Utc::now();
            if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
                job.heartbeat_at = Some(Utc::now());
                last_heartbeat = std::time::Instant::now();
            }
            self.store.put(job).await?;

            if page.next_cursor.is_none() {
                if cursor.phase == IngestPhase::Tickets {
                    // Tickets drained; start over on the KB listing.
                    cursor.phase = IngestPhase::Kb;
                    cursor.page = None;
                    cursor.watermark_updated_at = None;
                    cursor.watermark_original_id = None;
                    job.cursor = Some(cursor.encode());
                    self.store.put(job).await?;
                    continue;
                }
                transition(job, JobStatus::Completed)?;
                job.updated_at = Utc::now();
                self.store.put(job).await?;
                info!(
                    job_id = %job.job_id,
                    done = job.progress.items_done,
                    failed = job.progress.items_failed,
                    "job completed"
                );
                return Ok(JobStatus::Completed);
            }
        }
    }

    /// List one page of the current phase, retrying retryable failures.
    /// Recoverable errors (429s, transient 5xx) are recorded in the job's
    /// error log so an operator can see the platform pushing back.
    async fn list_with_retries(
        &self,
        phase: IngestPhase,
        since: DateTime<Utc>,
        page: Option<&str>,
        job: &mut IngestJob,
    ) -> Result<tl_platform::DescriptorPage, ServiceError> {
        let mut attempt: u32 = 0;
        loop {
            let result = match phase {
                IngestPhase::Tickets => self.adapter.list_updated(since, page).await,
                IngestPhase::Kb => self.adapter.list_kb(page).await,
            };
            match result {
                Ok(page) => return Ok(page),
                Err(err) if err.is_retryable() && attempt < OBJECT_RETRIES => {
                    warn!(attempt, code = err.code.as_str(), "listing retry");
                    push_error(job, &err);
                    tokio::time::sleep(backoff_delay(attempt, 500, 30_000)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    // -- per-object pipeline -------------------------------------------------

    async fn process_with_retries(
        &self,
        ctx: &TenantContext,
        descriptor: &ObjectDescriptor,
        large_scale: bool,
        cancel: &CancellationToken,
    ) -> Result<ObjectOutcome, ServiceError> {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(ServiceError::new(
                    ErrorCode::Cancelled,
                    "object processing interrupted",
                ));
            }
            match self.process_object(ctx, descriptor, large_scale, cancel).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.code == ErrorCode::ValidationFailure => {
                    return Ok(ObjectOutcome::Rejected((&err).into()));
                }
                Err(err) if err.is_retryable() && attempt < OBJECT_RETRIES => {
                    warn!(
                        original_id = %descriptor.original_id,
                        attempt,
                        code = err.code.as_str(),
                        "retrying object"
                    );
                    tokio::time::sleep(backoff_delay(attempt, 500, 30_000)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn process_object(
        &self,
        ctx: &TenantContext,
        descriptor: &ObjectDescriptor,
        large_scale: bool,
        cancel: &CancellationToken,
    ) -> Result<ObjectOutcome, ServiceError> {
        let object: IntegratedObject = match descriptor.object_type {
            ObjectType::Ticket => {
                let bundle = self.adapter.fetch_ticket(&descriptor.original_id).await?;
                build_ticket(ctx, &bundle)?
            }
            ObjectType::KbArticle => {
                let article = self.adapter.fetch_kb(&descriptor.original_id).await?;
                build_article(ctx, &article)?
            }
        };

        // Unchanged content → the stored point already covers it.
        let unchanged_filter = Filter::for_tenant(ctx)
            .must(Condition::matches("object_type", object.object_type.as_str()))
            .must(Condition::matches("original_id", object.original_id.as_str()))
            .must(Condition::matches("content_hash", object.content_hash.as_str()));
        if self.gateway.count(ctx, &unchanged_filter).await? > 0 {
            return Ok(ObjectOutcome::Unchanged);
        }

        let summary = self
            .summarizer
            .summarize_with_mode(&object, SummaryType::Batch, large_scale, cancel)
            .await?;

        let outcome = self
            .embedder
            .embed(std::slice::from_ref(&summary.text))
            .await?;
        // A failed batch degrades to a zero vector: the point still lands
        // (zero vectors score as far outliers) and the warning reaches the
        // job error log.
        let degraded = (!outcome.failed_positions.is_empty()).then(|| {
            (&ServiceError::new(
                ErrorCode::TransientNetwork,
                "embedding degraded to a zero vector",
            )
            .with_context("original_id", &object.original_id))
                .into()
        });
        let dense = outcome
            .vectors
            .into_iter()
            .next()
            .unwrap_or_default();

        let sparse_text = format!("{} {}", object.subject, summary.text);
        let sparse = sparse_vector(&sparse_text, object.language);

        let payload = tl_core::PointPayload {
            tenant_id: object.tenant_id.clone(),
            platform: object.platform.clone(),
            object_type: object.object_type,
            original_id: object.original_id.clone(),
            content_type: object.object_type,
            subject: object.subject.clone(),
            status: object.status,
            priority: object.priority.value(),
            tags: object.tags.clone(),
            category: object.category.clone(),
            created_at: object.created_at,
            updated_at: object.updated_at,
            requester_id: object.requester_id.clone(),
            assignee_id: object.assignee_id.clone(),
            summary_sections: found_sections(&summary.text),
            summary_text: summary.text.clone(),
            content_hash: object.content_hash.clone(),
            language: object.language,
        };
        let point = VectorPoint {
            id: object.point_id(),
            dense,
            sparse: (!sparse.is_empty()).then_some(sparse),
            payload,
        };
        self.gateway.upsert(ctx, &[point]).await?;
        Ok(ObjectOutcome::Ingested(degraded))
    }
}

fn transition(job: &mut IngestJob, next: JobStatus) -> Result<(), ServiceError> {
    if !job.status.can_transition_to(next) {
        return Err(ServiceError::new(
            ErrorCode::Internal,
            "invalid job status transition",
        )
        .with_context("from", format!("{:?}", job.status))
        .with_context("to", format!("{next:?}")));
    }
    job.status = next;
    job.updated_at = Utc::now();
    Ok(())
}

fn push_error(job: &mut IngestJob, err: &ServiceError) {
    push_dto(job, err.into());
}

fn push_dto(job: &mut IngestJob, dto: ServiceErrorDto) {
    job.error_log.push(dto);
    if job.error_log.len() > ERROR_LOG_CAP {
        let excess = job.error_log.len() - ERROR_LOG_CAP;
        job.error_log.drain(..excess);
    }
}

fn not_found(job_id: Uuid) -> ServiceError {
    ServiceError::new(ErrorCode::PermanentClientError, "no such job")
        .with_context("job_id", job_id.to_string())
}

fn conflict(status: JobStatus, action: &str) -> ServiceError {
    ServiceError::new(
        ErrorCode::PermanentClientError,
        format!("job status does not allow {action}"),
    )
    .with_context("status", format!("{status:?}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tl_core::TenantId;
    use tl_llm::mock::{HashEmbedder, ScriptedGenerator};
    use tl_platform::MockAdapter;
    use tl_platform::mock::ticket_fixture;
    use tl_summarize::TemplateStore;
    use tl_vector::MemoryStore;

    fn good_summary(tag: &str) -> String {
        format!(
            "## Problem\nCustomer reported {tag} and the account at wedosoft.com was affected \
             on 2025-06-01 with order 8841 attached for reference.\n\
             ## Root Cause\nA worker treated a gateway timeout as a failure and retried the \
             charge, which duplicated it.\n\
             ## Resolution\nThe duplicate was refunded and idempotency keys now guard every \
             charge request in the billing worker.\n\
             ## Insights\nReconcile gateway timeouts against transaction ids before retrying."
        )
    }

    struct Rig {
        orchestrator: Orchestrator,
        generator: Arc<ScriptedGenerator>,
        vectors: Arc<MemoryStore>,
        adapter: Arc<MockAdapter>,
    }

    fn rig(adapter: MockAdapter, summaries: usize) -> Rig {
        let generator = Arc::new(ScriptedGenerator::new());
        for i in 0..summaries {
            generator.push_text(good_summary(&format!("issue-{i}")));
        }
        let vectors = Arc::new(MemoryStore::new());
        let adapter = Arc::new(adapter);
        let orchestrator = Orchestrator::new(
            Arc::new(MemoryJobStore::new()),
            adapter.clone(),
            Arc::new(Summarizer::new(generator.clone(), TemplateStore::builtin())),
            Arc::new(Embedder::new(Arc::new(HashEmbedder::new(16)), "test-embed")),
            VectorGateway::new(vectors.clone()),
        );
        Rig {
            orchestrator,
            generator,
            vectors,
            adapter,
        }
    }

    fn ctx() -> TenantContext {
        TenantContext::new(TenantId::new("acme").unwrap(), "freshdesk")
    }

    #[tokio::test]
    async fn full_run_ingests_tickets_and_kb() {
        let adapter = MockAdapter::new()
            .with_ticket(ticket_fixture("1", "Billing issue", "Charged twice", 100))
            .with_ticket(ticket_fixture("2", "Login issue", "Cannot log in", 200))
            .with_article(tl_platform::RawArticle {
                original_id: "kb-1".into(),
                title: "Refund how-to".into(),
                body: "<p>Open the billing page.</p>".into(),
                category: Some("billing".into()),
                tags: vec![],
                created_at: 10,
                updated_at: 20,
            });
        let r = rig(adapter, 3);

        let job = r
            .orchestrator
            .create_job(&ctx(), IngestScope::Full, None)
            .await
            .unwrap();
        let status = r
            .orchestrator
            .run(job.job_id, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(status, JobStatus::Completed);
        let job = r.orchestrator.store().get(job.job_id).await.unwrap().unwrap();
        assert_eq!(job.progress.items_done, 3);
        assert_eq!(job.progress.items_failed, 0);
        assert_eq!(r.vectors.len().await, 3);

        let kb_id = tl_core::point_id(
            &TenantId::new("acme").unwrap(),
            "freshdesk",
            ObjectType::KbArticle,
            "kb-1",
        );
        let point = r.vectors.get(kb_id).await.expect("kb point");
        assert_eq!(point.payload.object_type, ObjectType::KbArticle);
    }

    #[tokio::test]
    async fn unchanged_objects_are_skipped_on_reingest() {
        let adapter = MockAdapter::new().with_ticket(ticket_fixture(
            "1",
            "Billing issue",
            "Charged twice",
            100,
        ));
        let r = rig(adapter, 2);

        let first = r
            .orchestrator
            .create_job(&ctx(), IngestScope::Full, None)
            .await
            .unwrap();
        r.orchestrator
            .run(first.job_id, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(r.generator.calls().len(), 1);
        assert_eq!(r.vectors.len().await, 1);

        // Same content again: no new summary, no new point.
        let second = r
            .orchestrator
            .create_job(&ctx(), IngestScope::Full, None)
            .await
            .unwrap();
        let status = r
            .orchestrator
            .run(second.job_id, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Completed);
        assert_eq!(r.generator.calls().len(), 1);
        assert_eq!(r.vectors.len().await, 1);

        let job = r
            .orchestrator
            .store()
            .get(second.job_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.progress.items_done, 1);
    }

    #[tokio::test]
    async fn validation_failures_are_recorded_and_skipped() {
        let adapter = MockAdapter::new()
            .with_ticket(ticket_fixture("empty", "", "", 100))
            .with_ticket(ticket_fixture("ok", "Subject", "Body", 200));
        let r = rig(adapter, 1);

        let job = r
            .orchestrator
            .create_job(&ctx(), IngestScope::Full, None)
            .await
            .unwrap();
        let status = r
            .orchestrator
            .run(job.job_id, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(status, JobStatus::Completed);
        let job = r.orchestrator.store().get(job.job_id).await.unwrap().unwrap();
        assert_eq!(job.progress.items_done, 1);
        assert_eq!(job.progress.items_failed, 1);
        assert!(job
            .error_log
            .iter()
            .any(|e| e.code == ErrorCode::ValidationFailure));
        assert_eq!(r.vectors.len().await, 1);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_and_logged_as_recoverable() {
        let adapter = MockAdapter::new().with_ticket(ticket_fixture("1", "s", "b", 100));
        let r = rig(adapter, 1);
        // Two throttled listing attempts, then success.
        r.adapter
            .inject_errors([ErrorCode::RateLimited, ErrorCode::RateLimited]);

        let job = r
            .orchestrator
            .create_job(&ctx(), IngestScope::Full, None)
            .await
            .unwrap();
        let status = r
            .orchestrator
            .run(job.job_id, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(status, JobStatus::Completed);
        let job = r.orchestrator.store().get(job.job_id).await.unwrap().unwrap();
        assert_eq!(job.progress.items_done, 1);
        assert_eq!(job.progress.items_failed, 0);
        // The throttles are in the log even though the job recovered.
        assert_eq!(
            job.error_log
                .iter()
                .filter(|e| e.code == ErrorCode::RateLimited)
                .count(),
            2
        );
        assert_eq!(r.adapter.injected_errors_fired(), 2);
    }

    #[tokio::test]
    async fn auth_failure_fails_the_job_immediately() {
        let adapter = MockAdapter::new().with_ticket(ticket_fixture("1", "s", "b", 100));
        let r = rig(adapter, 1);
        r.adapter.inject_errors([ErrorCode::AuthFailure]);

        let job = r
            .orchestrator
            .create_job(&ctx(), IngestScope::Full, None)
            .await
            .unwrap();
        let err = r
            .orchestrator
            .run(job.job_id, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::AuthFailure);

        let job = r.orchestrator.store().get(job.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_log.iter().any(|e| e.code == ErrorCode::AuthFailure));
    }

    #[tokio::test]
    async fn cancel_before_start_terminates_cleanly() {
        let adapter = MockAdapter::new().with_ticket(ticket_fixture("1", "s", "b", 100));
        let r = rig(adapter, 1);

        let job = r
            .orchestrator
            .create_job(&ctx(), IngestScope::Full, None)
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let status = r.orchestrator.run(job.job_id, cancel).await.unwrap();
        assert_eq!(status, JobStatus::Cancelled);
        assert_eq!(r.vectors.len().await, 0);
    }

    #[tokio::test]
    async fn cancel_without_live_runner_finalises_job() {
        let adapter = MockAdapter::new();
        let r = rig(adapter, 0);
        let job = r
            .orchestrator
            .create_job(&ctx(), IngestScope::Full, None)
            .await
            .unwrap();
        let status = r
            .orchestrator
            .control(job.job_id, ControlAction::Cancel)
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn resume_rejects_non_paused_jobs() {
        let adapter = MockAdapter::new();
        let r = rig(adapter, 0);
        let job = r
            .orchestrator
            .create_job(&ctx(), IngestScope::Full, None)
            .await
            .unwrap();
        let err = r
            .orchestrator
            .control(job.job_id, ControlAction::Resume)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PermanentClientError);
    }

    #[tokio::test]
    async fn stale_running_jobs_are_reclaimed() {
        let adapter = MockAdapter::new();
        let r = rig(adapter, 0);
        let store = r.orchestrator.store().clone();

        let mut job = IngestJob::new(
            TenantId::new("acme").unwrap(),
            "freshdesk",
            IngestScope::Full,
        );
        job.status = JobStatus::Running;
        job.cursor = Some(r#"{"since_epoch":123}"#.into());
        job.heartbeat_at = Some(Utc::now() - chrono::Duration::seconds(120));
        store.put(&job).await.unwrap();

        let reclaimed = r.orchestrator.recover_stale().await.unwrap();
        assert_eq!(reclaimed, vec![job.job_id]);

        let job = store.get(job.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Created);
        // Cursor survives the reclaim.
        assert!(job.cursor.as_deref().unwrap().contains("123"));
    }

    #[tokio::test]
    async fn fresh_running_jobs_are_left_alone() {
        let adapter = MockAdapter::new();
        let r = rig(adapter, 0);
        let store = r.orchestrator.store().clone();

        let mut job = IngestJob::new(
            TenantId::new("acme").unwrap(),
            "freshdesk",
            IngestScope::Full,
        );
        job.status = JobStatus::Running;
        job.heartbeat_at = Some(Utc::now());
        store.put(&job).await.unwrap();

        assert!(r.orchestrator.recover_stale().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn incremental_since_derived_from_last_completed_job() {
        let adapter = MockAdapter::new()
            .with_ticket(ticket_fixture("old", "old", "body", 1_000))
            .with_ticket(ticket_fixture("new", "new", "body", 2_000_000));
        let r = rig(adapter, 2);
        let store = r.orchestrator.store().clone();

        // A completed job that finished at epoch 1_500_000.
        let mut done = IngestJob::new(
            TenantId::new("acme").unwrap(),
            "freshdesk",
            IngestScope::Full,
        );
        done.status = JobStatus::Completed;
        done.updated_at = Utc.timestamp_opt(1_500_000, 0).unwrap();
        store.put(&done).await.unwrap();

        let job = r
            .orchestrator
            .create_job(&ctx(), IngestScope::Incremental, None)
            .await
            .unwrap();
        r.orchestrator
            .run(job.job_id, CancellationToken::new())
            .await
            .unwrap();

        // Only the "new" ticket falls inside the incremental window.
        let job = r.orchestrator.store().get(job.job_id).await.unwrap().unwrap();
        assert_eq!(job.progress.items_done, 1);
        assert_eq!(r.vectors.len().await, 1);
    }

    #[test]
    fn cursor_watermark_comparisons() {
        let cursor = CursorState {
            since_epoch: 0,
            phase: IngestPhase::Tickets,
            page: None,
            watermark_updated_at: Some(100),
            watermark_original_id: Some("b".into()),
        };
        let before = ObjectDescriptor {
            original_id: "a".into(),
            object_type: ObjectType::Ticket,
            updated_at: 100,
        };
        let same = ObjectDescriptor {
            original_id: "b".into(),
            object_type: ObjectType::Ticket,
            updated_at: 100,
        };
        let after = ObjectDescriptor {
            original_id: "c".into(),
            object_type: ObjectType::Ticket,
            updated_at: 100,
        };
        assert!(cursor.already_processed(&before));
        assert!(cursor.already_processed(&same));
        assert!(!cursor.already_processed(&after));
    }
}
