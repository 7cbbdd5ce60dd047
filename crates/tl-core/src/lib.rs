// SPDX-License-Identifier: MIT OR Apache-2.0
//! tl-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable contract for ticketlens.
//!
//! Everything that crosses a crate boundary lives here: tenant identity,
//! integrated objects, summaries, vector payloads, ingest jobs, and
//! analyzed queries.  If you only take one dependency, take this one.

/// Ingest job records and the job status machine.
pub mod job;
/// Analyzed queries: intents, conditions, and search strategies.
pub mod query;
/// Tenant identity, validation, and request-header resolution.
pub mod tenant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub use tenant::{TenantContext, TenantId};

/// Name of the single shared vector collection.
pub const COLLECTION_NAME: &str = "documents";

// ---------------------------------------------------------------------------
// Object taxonomy
// ---------------------------------------------------------------------------

/// What kind of platform record an integrated object was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    /// A support ticket with its conversation thread.
    Ticket,
    /// A knowledge-base article.
    KbArticle,
}

impl ObjectType {
    /// Stable payload string (`"ticket"` / `"kb_article"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ticket => "ticket",
            Self::KbArticle => "kb_article",
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed ticket status set every platform status is canonicalised into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Newly opened, nobody replied yet.
    Open,
    /// Waiting on the requester or a third party.
    Pending,
    /// Agent marked the issue resolved.
    Resolved,
    /// Closed for good.
    Closed,
}

impl TicketStatus {
    /// Stable payload string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }
}

/// Ticket priority clamped into the platform-neutral 1..=4 range.
///
/// 1 = low, 2 = medium, 3 = high, 4 = urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(u8);

impl Priority {
    /// Lowest priority.
    pub const LOW: Priority = Priority(1);
    /// Highest priority.
    pub const URGENT: Priority = Priority(4);

    /// Build a priority, clamping out-of-range platform values into 1..=4.
    pub fn new(raw: i64) -> Self {
        Self(raw.clamp(1, 4) as u8)
    }

    /// The numeric value, guaranteed to be in 1..=4.
    pub fn value(&self) -> u8 {
        self.0
    }
}

/// Content language detected from Unicode block ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    /// Korean.
    Ko,
    /// Japanese.
    Ja,
    /// Chinese.
    Zh,
    /// English.
    En,
    /// None of the above dominated.
    Other,
}

impl Language {
    /// ISO-639-1-ish tag used in payloads and template lookup.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ko => "ko",
            Self::Ja => "ja",
            Self::Zh => "zh",
            Self::En => "en",
            Self::Other => "other",
        }
    }
}

// ---------------------------------------------------------------------------
// Integrated objects
// ---------------------------------------------------------------------------

/// Attachment metadata carried on an integrated object.
///
/// Binary content stays on the platform; only descriptors and any extracted
/// text travel through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// File name as reported by the platform.
    pub name: String,
    /// MIME type.
    pub mime: String,
    /// Size in bytes.
    pub size: u64,
    /// Where the binary lives on the platform.
    pub external_url: String,
    /// Text extracted from the attachment, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
}

/// The atomic unit of ingest: one ticket (with merged conversation) or one
/// KB article, normalised and content-addressed.
///
/// `(tenant_id, platform, object_type, original_id)` is the primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegratedObject {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Source platform tag (e.g. `"freshdesk"`).
    pub platform: String,
    /// Record kind.
    pub object_type: ObjectType,
    /// The platform's stable identifier.
    pub original_id: String,
    /// Subject / title.
    pub subject: String,
    /// Conversation merged chronologically, HTML stripped.
    pub body_text: String,
    /// Attachment descriptors.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Canonical status.
    pub status: TicketStatus,
    /// Canonical priority.
    pub priority: Priority,
    /// Creation time, epoch seconds.
    pub created_at: i64,
    /// Last platform update, epoch seconds.
    pub updated_at: i64,
    /// Platform tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Platform category (e.g. `"billing"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Assigned agent, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    /// Requester, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_id: Option<String>,
    /// Detected content language.
    pub language: Language,
    /// SHA-256 hex over the visible content (timestamps excluded).
    pub content_hash: String,
}

impl IntegratedObject {
    /// The deterministic vector point id for this object.
    pub fn point_id(&self) -> Uuid {
        point_id(
            &self.tenant_id,
            &self.platform,
            self.object_type,
            &self.original_id,
        )
    }
}

/// SHA-256 hex over the canonical serialisation of an object's visible
/// content: subject, then sorted message bodies, then sorted attachment
/// names.  Timestamps are deliberately excluded so that a platform `touch`
/// does not produce a new hash.
pub fn content_hash<S: AsRef<str>>(subject: &str, messages: &[S], attachment_names: &[S]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subject.as_bytes());
    hasher.update([0u8]);

    let mut sorted: Vec<&str> = messages.iter().map(|m| m.as_ref()).collect();
    sorted.sort_unstable();
    for msg in sorted {
        hasher.update(msg.as_bytes());
        hasher.update([0u8]);
    }

    let mut names: Vec<&str> = attachment_names.iter().map(|n| n.as_ref()).collect();
    names.sort_unstable();
    for name in names {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
    }

    hex_string(&hasher.finalize())
}

/// Deterministic vector point id for `(tenant, platform, object_type,
/// original_id)`: the first 16 bytes of the SHA-256 digest, as a UUID.
pub fn point_id(
    tenant_id: &TenantId,
    platform: &str,
    object_type: ObjectType,
    original_id: &str,
) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(platform.as_bytes());
    hasher.update([0u8]);
    hasher.update(object_type.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(original_id.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write as _;
        let _ = write!(out, "{b:02x}");
    }
    out
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

/// Which pipeline produced a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryType {
    /// Generated on demand for an open ticket.
    Realtime,
    /// Generated during scheduled ingest.
    Batch,
}

/// The four section headings every summary must carry, in order.
pub const SECTION_HEADINGS: [&str; 4] = ["Problem", "Root Cause", "Resolution", "Insights"];

/// A structured four-section summary bound to an integrated object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Source platform.
    pub platform: String,
    /// The summarised object.
    pub original_id: String,
    /// Realtime or batch.
    pub summary_type: SummaryType,
    /// Markdown with the four `## <heading>` sections in order.
    pub text: String,
    /// Model that generated the text.
    pub model: String,
    /// Prompt token estimate.
    pub input_tokens: u64,
    /// Completion token estimate.
    pub output_tokens: u64,
    /// Wall-clock generation time in milliseconds.
    pub duration_ms: u64,
    /// Language the content was detected as.
    pub language: Language,
    /// Validator score in `[0, 1]`.
    pub quality_score: f64,
    /// Set when the summary failed validation twice but was kept.
    #[serde(default)]
    pub quality_flag_low: bool,
}

// ---------------------------------------------------------------------------
// Vector payloads
// ---------------------------------------------------------------------------

/// Structured payload stored alongside each vector point.
///
/// `tenant_id` + `platform` are the isolation keys; the rest are the
/// filterable facets from the integrated object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointPayload {
    /// Owning tenant — every search filter must match on this.
    pub tenant_id: TenantId,
    /// Source platform — every search filter must match on this.
    pub platform: String,
    /// Record kind.
    pub object_type: ObjectType,
    /// Platform identifier of the source object.
    pub original_id: String,
    /// Alias of `object_type` kept for payload-index compatibility.
    pub content_type: ObjectType,
    /// Subject line.
    pub subject: String,
    /// Canonical status.
    pub status: TicketStatus,
    /// Canonical priority (1..=4).
    pub priority: u8,
    /// Platform tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Category facet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Creation time, epoch seconds.
    pub created_at: i64,
    /// Last update, epoch seconds.
    pub updated_at: i64,
    /// Requester, for person-scoped queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_id: Option<String>,
    /// Assignee, for person-scoped queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    /// The four section headings present in the stored summary.
    #[serde(default)]
    pub summary_sections: Vec<String>,
    /// Full summary text (what the dense vector embeds).
    pub summary_text: String,
    /// Content hash of the source object at embed time.
    pub content_hash: String,
    /// Detected content language.
    pub language: Language,
}

impl PointPayload {
    /// Payload fields that must carry a payload index in the collection.
    pub const INDEXED_FIELDS: [&'static str; 8] = [
        "tenant_id",
        "platform",
        "object_type",
        "status",
        "priority",
        "created_at",
        "tags",
        "category",
    ];
}

/// A point ready for upsert: id, dense vector, optional sparse vector, and
/// the structured payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPoint {
    /// Deterministic id derived from the payload identity.
    pub id: Uuid,
    /// Dense embedding.
    pub dense: Vec<f32>,
    /// Optional sparse term-weight map (term hash → weight).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparse: Option<Vec<(u32, f32)>>,
    /// Structured payload.
    pub payload: PointPayload,
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Epoch seconds for a chrono timestamp.
pub fn epoch_seconds(ts: DateTime<Utc>) -> i64 {
    ts.timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tenant(id: &str) -> TenantId {
        TenantId::new(id).unwrap()
    }

    // -- content hashing --------------------------------------------------

    #[test]
    fn content_hash_is_deterministic() {
        let a = content_hash("subj", &["m1", "m2"], &["a.png"]);
        let b = content_hash("subj", &["m1", "m2"], &["a.png"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn content_hash_ignores_message_order() {
        let a = content_hash("subj", &["m1", "m2"], &[]);
        let b = content_hash("subj", &["m2", "m1"], &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn content_hash_changes_with_subject() {
        let a = content_hash("one", &["m"], &[]);
        let b = content_hash("two", &["m"], &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn content_hash_changes_with_attachment_names() {
        let a = content_hash("s", &["m"], &["a.png"]);
        let b = content_hash("s", &["m"], &["b.png"]);
        assert_ne!(a, b);
    }

    #[test]
    fn content_hash_field_separator_prevents_concatenation_collisions() {
        // ("ab", "c") must not hash like ("a", "bc").
        let a = content_hash("ab", &["c"], &[]);
        let b = content_hash("a", &["bc"], &[]);
        assert_ne!(a, b);
    }

    proptest! {
        #[test]
        fn content_hash_always_64_hex_chars(subject in ".*", msg in ".*") {
            let h = content_hash(&subject, &[msg.as_str()], &[]);
            prop_assert_eq!(h.len(), 64);
            prop_assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    // -- point ids --------------------------------------------------------

    #[test]
    fn point_id_is_deterministic() {
        let a = point_id(&tenant("acme"), "freshdesk", ObjectType::Ticket, "42");
        let b = point_id(&tenant("acme"), "freshdesk", ObjectType::Ticket, "42");
        assert_eq!(a, b);
    }

    #[test]
    fn point_id_distinguishes_tenants() {
        let a = point_id(&tenant("acme"), "freshdesk", ObjectType::Ticket, "42");
        let b = point_id(&tenant("globex"), "freshdesk", ObjectType::Ticket, "42");
        assert_ne!(a, b);
    }

    #[test]
    fn point_id_distinguishes_object_types() {
        let a = point_id(&tenant("acme"), "freshdesk", ObjectType::Ticket, "42");
        let b = point_id(&tenant("acme"), "freshdesk", ObjectType::KbArticle, "42");
        assert_ne!(a, b);
    }

    // -- enums ------------------------------------------------------------

    #[test]
    fn priority_clamps_out_of_range_values() {
        assert_eq!(Priority::new(0).value(), 1);
        assert_eq!(Priority::new(-3).value(), 1);
        assert_eq!(Priority::new(9).value(), 4);
        assert_eq!(Priority::new(3).value(), 3);
    }

    #[test]
    fn object_type_serde_uses_snake_case() {
        assert_eq!(
            serde_json::to_string(&ObjectType::KbArticle).unwrap(),
            r#""kb_article""#
        );
    }

    #[test]
    fn language_tags() {
        assert_eq!(Language::Ko.as_str(), "ko");
        assert_eq!(Language::Other.as_str(), "other");
    }

    #[test]
    fn indexed_fields_cover_isolation_keys() {
        assert!(PointPayload::INDEXED_FIELDS.contains(&"tenant_id"));
        assert!(PointPayload::INDEXED_FIELDS.contains(&"platform"));
    }

    #[test]
    fn integrated_object_point_id_matches_free_function() {
        let obj = IntegratedObject {
            tenant_id: tenant("acme"),
            platform: "freshdesk".into(),
            object_type: ObjectType::Ticket,
            original_id: "7".into(),
            subject: "s".into(),
            body_text: "b".into(),
            attachments: vec![],
            status: TicketStatus::Open,
            priority: Priority::new(2),
            created_at: 0,
            updated_at: 0,
            tags: vec![],
            category: None,
            assignee_id: None,
            requester_id: None,
            language: Language::En,
            content_hash: String::new(),
        };
        assert_eq!(
            obj.point_id(),
            point_id(&tenant("acme"), "freshdesk", ObjectType::Ticket, "7")
        );
    }
}
