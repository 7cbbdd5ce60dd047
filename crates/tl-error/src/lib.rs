// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable error codes for ticketlens.
//!
//! Every service error carries an [`ErrorCode`] (a machine-readable, stable
//! string tag), a human-readable message, an optional cause chain, and
//! arbitrary key-value context.  Use the builder returned by
//! [`ServiceError::new`] to construct errors fluently.  The daemon maps
//! codes onto the HTTP error envelope; the ingest orchestrator and the LLM
//! router consult [`ErrorCode::is_retryable`] for their retry budgets.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Tenant resolution and isolation errors.
    Tenant,
    /// Help-desk platform adapter errors.
    Platform,
    /// LLM routing and generation errors.
    Llm,
    /// Vector store gateway errors.
    Vector,
    /// Ingest job lifecycle errors.
    Ingest,
    /// Query analysis and search errors.
    Query,
    /// Configuration errors.
    Config,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Tenant => "tenant",
            Self::Platform => "platform",
            Self::Llm => "llm",
            Self::Vector => "vector",
            Self::Ingest => "ingest",
            Self::Query => "query",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.  The daemon's error
/// envelope exposes these strings verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Tenant --
    /// Tenant id failed validation or is reserved.
    InvalidTenant,
    /// A vector store call reached the gateway without a tenant filter.
    MissingTenantFilter,
    /// A search result's payload tenant did not match the caller.
    TenantLeak,

    // -- Platform / network --
    /// Upstream returned 429; retry after backoff.
    RateLimited,
    /// Timeout or 5xx that is worth retrying.
    TransientNetwork,
    /// 4xx other than 429 — the request itself is wrong.
    PermanentClientError,
    /// 5xx that survived the retry budget.
    PermanentServerError,
    /// Upstream rejected our credentials (401/403).
    AuthFailure,
    /// A per-call deadline expired.
    UpstreamTimeout,

    // -- LLM --
    /// Every provider in the fallback chain failed.
    LlmUnavailable,
    /// A generated summary failed validation twice.
    QualityBelowThreshold,

    // -- Ingest / query --
    /// An integrated object was rejected during normalisation.
    ValidationFailure,
    /// The query had no conditions and no searchable text.
    InvalidQuery,
    /// The caller cancelled the operation.
    Cancelled,

    // -- Config --
    /// Configuration file or value is invalid.
    ConfigInvalid,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidTenant | Self::MissingTenantFilter | Self::TenantLeak => {
                ErrorCategory::Tenant
            }

            Self::RateLimited
            | Self::TransientNetwork
            | Self::PermanentClientError
            | Self::PermanentServerError
            | Self::AuthFailure
            | Self::UpstreamTimeout => ErrorCategory::Platform,

            Self::LlmUnavailable | Self::QualityBelowThreshold => ErrorCategory::Llm,

            Self::ValidationFailure | Self::Cancelled => ErrorCategory::Ingest,

            Self::InvalidQuery => ErrorCategory::Query,

            Self::ConfigInvalid => ErrorCategory::Config,

            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"RATE_LIMITED"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidTenant => "INVALID_TENANT",
            Self::MissingTenantFilter => "MISSING_TENANT_FILTER",
            Self::TenantLeak => "TENANT_LEAK",
            Self::RateLimited => "RATE_LIMITED",
            Self::TransientNetwork => "TRANSIENT_NETWORK",
            Self::PermanentClientError => "PERMANENT_CLIENT_ERROR",
            Self::PermanentServerError => "PERMANENT_SERVER_ERROR",
            Self::AuthFailure => "AUTH_FAILURE",
            Self::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            Self::LlmUnavailable => "LLM_UNAVAILABLE",
            Self::QualityBelowThreshold => "QUALITY_BELOW_THRESHOLD",
            Self::ValidationFailure => "VALIDATION_FAILURE",
            Self::InvalidQuery => "INVALID_QUERY",
            Self::Cancelled => "CANCELLED",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether a caller may retry the failed operation with backoff.
    ///
    /// Drives the adapter and LLM router retry loops and the per-object
    /// retry budget in the ingest orchestrator.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::TransientNetwork | Self::UpstreamTimeout
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ServiceError
// ---------------------------------------------------------------------------

/// Unified ticketlens error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use tl_error::{ErrorCode, ServiceError};
///
/// let err = ServiceError::new(ErrorCode::RateLimited, "429 from freshdesk")
///     .with_context("retry_after_secs", 2)
///     .with_context("tenant", "acme");
/// ```
pub struct ServiceError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.  Must not embed tenant data.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl ServiceError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Shorthand for `self.code.is_retryable()`.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl fmt::Debug for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("ServiceError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serialisable snapshot of a [`ServiceError`] (without the opaque source).
///
/// Ingest jobs persist these in their error logs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&ServiceError> for ServiceErrorDto {
    fn from(err: &ServiceError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<ServiceErrorDto> for ServiceError {
    fn from(dto: ServiceErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}

/// Convenience alias used across crate boundaries.
pub type Result<T> = std::result::Result<T, ServiceError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
