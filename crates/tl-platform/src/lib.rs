// SPDX-License-Identifier: MIT OR Apache-2.0
//! Help-desk platform adapters.
//!
//! [`PlatformAdapter`] abstracts the external help-desk API behind a closed
//! variant set: list objects updated since a cursor, fetch a ticket with
//! its conversations and attachment metadata, fetch KB articles, and
//! report rate limits.  Rate-limit handling is the adapter's job — callers
//! never see a raw 429.

#![deny(unsafe_code)]

/// Freshdesk REST implementation.
pub mod freshdesk;
/// Scripted in-process adapter for tests and offline runs.
pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tl_core::{ObjectType, Priority, TicketStatus};
use tl_error::{ErrorCode, ServiceError};

pub use freshdesk::FreshdeskAdapter;
pub use mock::MockAdapter;

// ---------------------------------------------------------------------------
// Raw platform records
// ---------------------------------------------------------------------------

/// Lightweight descriptor returned by paged listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDescriptor {
    /// Platform identifier.
    pub original_id: String,
    /// Record kind.
    pub object_type: ObjectType,
    /// Last platform update, epoch seconds.
    pub updated_at: i64,
}

/// A raw ticket as fetched from the platform, before normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTicket {
    /// Platform identifier.
    pub original_id: String,
    /// Subject line.
    pub subject: String,
    /// Initial description (HTML or text, platform-dependent).
    pub description: String,
    /// Canonicalised status.
    pub status: TicketStatus,
    /// Canonicalised priority.
    pub priority: Priority,
    /// Creation time, epoch seconds.
    pub created_at: i64,
    /// Last update, epoch seconds.
    pub updated_at: i64,
    /// Platform tags.
    pub tags: Vec<String>,
    /// Category facet, when the platform exposes one.
    pub category: Option<String>,
    /// Assigned agent id.
    pub assignee_id: Option<String>,
    /// Requester id.
    pub requester_id: Option<String>,
}

/// One conversation entry on a ticket.
#[derive(Debug, Clone, PartialEq)]
pub struct RawConversation {
    /// Message body (HTML or text).
    pub body: String,
    /// Author id, when known.
    pub author_id: Option<String>,
    /// Creation time, epoch seconds.
    pub created_at: i64,
    /// True for customer-facing replies, false for private notes.
    pub public: bool,
}

/// Attachment metadata reported by the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAttachment {
    /// File name.
    pub name: String,
    /// MIME type.
    pub mime: String,
    /// Size in bytes.
    pub size: u64,
    /// Download URL on the platform.
    pub external_url: String,
}

/// A raw KB article.
#[derive(Debug, Clone, PartialEq)]
pub struct RawArticle {
    /// Platform identifier.
    pub original_id: String,
    /// Title.
    pub title: String,
    /// Body (HTML).
    pub body: String,
    /// Category facet.
    pub category: Option<String>,
    /// Platform tags.
    pub tags: Vec<String>,
    /// Creation time, epoch seconds.
    pub created_at: i64,
    /// Last update, epoch seconds.
    pub updated_at: i64,
}

/// A fetched ticket bundle: the ticket plus its thread and attachments.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketBundle {
    /// The ticket record.
    pub ticket: RawTicket,
    /// Conversation entries, platform order.
    pub conversations: Vec<RawConversation>,
    /// Attachment metadata across the thread.
    pub attachments: Vec<RawAttachment>,
}

/// Adapter-reported rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    /// Sustained requests per minute.
    pub requests_per_minute: u32,
    /// Short burst allowance.
    pub burst: u32,
    /// Maximum concurrent in-flight requests.
    pub concurrent_max: usize,
}

/// A page of descriptors plus the cursor for the next page, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorPage {
    /// Descriptors in this page.
    pub items: Vec<ObjectDescriptor>,
    /// Opaque cursor for the next page; `None` when exhausted.
    pub next_cursor: Option<String>,
}

// ---------------------------------------------------------------------------
// Adapter trait & factory
// ---------------------------------------------------------------------------

/// Abstract help-desk platform API.
///
/// All errors carry a typed [`ErrorCode`]: `RateLimited` (only after the
/// adapter's own backoff budget is spent), `TransientNetwork`,
/// `PermanentClientError`, `PermanentServerError`, or `AuthFailure`.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Tickets updated since `since`, one page at a time.
    async fn list_updated(
        &self,
        since: DateTime<Utc>,
        page_cursor: Option<&str>,
    ) -> Result<DescriptorPage, ServiceError>;

    /// KB articles, one page at a time.  Platforms that cannot filter
    /// articles server-side return everything; callers filter by
    /// `updated_at`.
    async fn list_kb(&self, page_cursor: Option<&str>) -> Result<DescriptorPage, ServiceError>;

    /// Fetch one ticket with conversations and attachment metadata.
    async fn fetch_ticket(&self, id: &str) -> Result<TicketBundle, ServiceError>;

    /// Fetch one KB article.
    async fn fetch_kb(&self, id: &str) -> Result<RawArticle, ServiceError>;

    /// The adapter's rate limits, used to size orchestrator concurrency.
    fn rate_limits(&self) -> RateLimits;

    /// Platform tag (e.g. `"freshdesk"`).
    fn platform(&self) -> &str;
}

/// Credentials for a platform adapter.
#[derive(Debug, Clone)]
pub struct AdapterCredentials {
    /// Platform API base URL (e.g. `https://acme.freshdesk.com`).
    pub base_url: String,
    /// API key.
    pub api_key: String,
}

/// Build an adapter for `platform`.
///
/// The platform set is closed; new platforms are added by extending this
/// factory, not by runtime plugin loading.
pub fn create_adapter(
    platform: &str,
    credentials: AdapterCredentials,
) -> Result<Box<dyn PlatformAdapter>, ServiceError> {
    match platform {
        "freshdesk" => Ok(Box::new(FreshdeskAdapter::new(credentials)?)),
        other => Err(ServiceError::new(
            ErrorCode::PermanentClientError,
            format!("unsupported platform '{other}'"),
        )),
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Jittered exponential backoff delay for `attempt` (0-based).
///
/// `base_ms * 2^attempt`, capped at `cap_ms`, with up to 25% random jitter
/// added so synchronized retries spread out.
pub fn backoff_delay(attempt: u32, base_ms: u64, cap_ms: u64) -> std::time::Duration {
    use rand::Rng as _;
    let exp = base_ms.saturating_mul(1u64 << attempt.min(16)).min(cap_ms);
    let jitter = rand::thread_rng().gen_range(0..=exp / 4);
    std::time::Duration::from_millis((exp + jitter).min(cap_ms))
}
