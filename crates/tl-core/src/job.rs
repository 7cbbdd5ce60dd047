// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ingest job records and the job status machine.
//!
//! Jobs are restart-safe: progress and cursor are persisted by the job
//! store, and a `running` job whose heartbeat has gone stale can be
//! reclaimed at process start.

use crate::TenantId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tl_error::ServiceErrorDto;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status machine
// ---------------------------------------------------------------------------

/// Lifecycle state of an ingest job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created but not yet picked up.
    Created,
    /// Actively being driven by an orchestrator.
    Running,
    /// Suspended by a control request; cursor retained.
    Paused,
    /// Terminated by a control request.
    Cancelled,
    /// All pages processed.
    Completed,
    /// Gave up (auth failure or unrecoverable error).
    Failed,
}

impl JobStatus {
    /// Returns `true` if this status represents a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns the set of statuses that are valid successors of `self`.
    pub fn valid_transitions(&self) -> &'static [JobStatus] {
        match self {
            Self::Created => &[Self::Running, Self::Cancelled, Self::Failed],
            Self::Running => &[
                Self::Paused,
                Self::Completed,
                Self::Cancelled,
                Self::Failed,
                // Stale-heartbeat reclaim at process start.
                Self::Created,
            ],
            Self::Paused => &[Self::Running, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Cancelled => &[],
        }
    }

    /// Returns `true` if transitioning from `self` to `next` is valid.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// What slice of the platform a job covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestScope {
    /// Everything, from the beginning of time.
    Full,
    /// Only objects updated since the cursor.
    Incremental,
}

// ---------------------------------------------------------------------------
// Job record
// ---------------------------------------------------------------------------

/// Counters the orchestrator advances as it processes objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Total item count when the platform reports one up front.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_total: Option<u64>,
    /// Successfully processed items.
    pub items_done: u64,
    /// Items that exhausted their retry budget.
    pub items_failed: u64,
}

/// A persisted ingest job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestJob {
    /// Unique job identifier.
    pub job_id: Uuid,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Source platform.
    pub platform: String,
    /// Full or incremental.
    pub scope: IngestScope,
    /// Platform pagination token or `updated_since` watermark.
    ///
    /// Shape is adapter-specific; the orchestrator treats it as opaque.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Progress counters.
    pub progress: JobProgress,
    /// Errors recorded while the job ran (recoverable and terminal).
    #[serde(default)]
    pub error_log: Vec<ServiceErrorDto>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last store write.
    pub updated_at: DateTime<Utc>,
    /// Last liveness write from the owning orchestrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_at: Option<DateTime<Utc>>,
}

impl IngestJob {
    /// Create a fresh job in [`JobStatus::Created`].
    pub fn new(tenant_id: TenantId, platform: impl Into<String>, scope: IngestScope) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4(),
            tenant_id,
            platform: platform.into(),
            scope,
            cursor: None,
            status: JobStatus::Created,
            progress: JobProgress::default(),
            error_log: Vec::new(),
            created_at: now,
            updated_at: now,
            heartbeat_at: None,
        }
    }

    /// True when the heartbeat is older than `stale_after` seconds (or has
    /// never been written) while the job claims to be running.
    pub fn heartbeat_stale(&self, now: DateTime<Utc>, stale_after_secs: i64) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        match self.heartbeat_at {
            None => true,
            Some(hb) => (now - hb).num_seconds() > stale_after_secs,
        }
    }
}
