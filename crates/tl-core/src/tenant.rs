// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tenant identity, validation, and request-header resolution.
//!
//! A tenant id is a short lowercase slug.  Resolution walks, in order: the
//! explicit `X-Tenant-Id` header, the `tid` claim of a bearer token, and
//! the host subdomain (`<tenant>.<platform>.com`).  A configured default
//! domain applies when no header carries tenant information.  No component
//! reads an ambient tenant — the resolved [`TenantContext`] is threaded
//! through every downstream call.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tl_error::{ErrorCode, ServiceError};

static TENANT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9-]{2,}$").expect("tenant pattern is valid"));

/// Tenant ids that look like placeholders and are never accepted.
pub const RESERVED_TENANT_IDS: [&str; 6] = ["demo", "test", "example", "sample", "admin", "www"];

/// Header consulted first during resolution.
pub const TENANT_HEADER: &str = "x-tenant-id";

// ---------------------------------------------------------------------------
// TenantId
// ---------------------------------------------------------------------------

/// A validated tenant identifier.
///
/// Construction is the only validation point; once you hold a `TenantId`
/// it is known to match `^[a-z0-9-]{2,}$` and not to be reserved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Validate and wrap a raw tenant id.  Input is lowercased first.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, ServiceError> {
        let id = raw.as_ref().trim().to_ascii_lowercase();
        if !TENANT_PATTERN.is_match(&id) {
            return Err(ServiceError::new(
                ErrorCode::InvalidTenant,
                "tenant id must match ^[a-z0-9-]{2,}$",
            ));
        }
        if RESERVED_TENANT_IDS.contains(&id.as_str()) {
            return Err(
                ServiceError::new(ErrorCode::InvalidTenant, "tenant id is reserved")
                    .with_context("reserved", true),
            );
        }
        Ok(Self(id))
    }

    /// The validated id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TenantId::new(&value).map_err(|e| e.to_string())
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// TenantContext
// ---------------------------------------------------------------------------

/// Immutable per-request tenant context.
///
/// Every persisted datum and every query carries both fields; no operation
/// is valid without them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantContext {
    /// Validated tenant id.
    pub tenant_id: TenantId,
    /// Platform tag (e.g. `"freshdesk"`).
    pub platform: String,
}

impl TenantContext {
    /// Build a context from already-validated parts.
    pub fn new(tenant_id: TenantId, platform: impl Into<String>) -> Self {
        Self {
            tenant_id,
            platform: platform.into(),
        }
    }
}

/// Resolve a [`TenantContext`] from request headers.
///
/// `headers` is a case-insensitive view of the incoming request headers as
/// `(name, value)` pairs (names are compared lowercased).  `default_domain`
/// is the `TENANT_DOMAIN` configuration value, consulted last.
///
/// Extraction order:
/// 1. `X-Tenant-Id` header (platform from `X-Platform`, default `freshdesk`);
/// 2. `tid` claim of a `Authorization: Bearer` token;
/// 3. subdomain of the `Host` header when it has the
///    `<tenant>.<platform>.com` shape;
/// 4. subdomain of `default_domain`.
pub fn resolve_tenant<'a, I>(
    headers: I,
    default_domain: Option<&str>,
) -> Result<TenantContext, ServiceError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut explicit: Option<String> = None;
    let mut platform: Option<String> = None;
    let mut bearer: Option<String> = None;
    let mut host: Option<String> = None;

    for (name, value) in headers {
        match name.to_ascii_lowercase().as_str() {
            TENANT_HEADER => explicit = Some(value.trim().to_string()),
            "x-platform" => platform = Some(value.trim().to_ascii_lowercase()),
            "authorization" => {
                if let Some(token) = value.trim().strip_prefix("Bearer ") {
                    bearer = Some(token.trim().to_string());
                }
            }
            "host" => host = Some(value.trim().to_string()),
            _ => {}
        }
    }

    if let Some(id) = explicit {
        let tenant = TenantId::new(&id)?;
        return Ok(TenantContext::new(
            tenant,
            platform.unwrap_or_else(|| "freshdesk".into()),
        ));
    }

    if let Some(token) = bearer
        && let Some(tid) = bearer_tid_claim(&token)
    {
        let tenant = TenantId::new(&tid)?;
        return Ok(TenantContext::new(
            tenant,
            platform.unwrap_or_else(|| "freshdesk".into()),
        ));
    }

    for domain in host.as_deref().into_iter().chain(default_domain) {
        if let Some((tenant, plat)) = split_tenant_domain(domain) {
            let tenant = TenantId::new(tenant)?;
            return Ok(TenantContext::new(tenant, plat));
        }
    }

    Err(ServiceError::new(
        ErrorCode::InvalidTenant,
        "no tenant header, bearer claim, or tenant-shaped host domain",
    ))
}

/// Extract `(tenant, platform)` from a `<tenant>.<platform>.com` domain.
///
/// Returns `None` when the domain does not have exactly that shape.
pub fn split_tenant_domain(domain: &str) -> Option<(&str, &str)> {
    let domain = domain.trim().trim_end_matches('.');
    // Strip an optional port.
    let domain = domain.split(':').next()?;
    let mut parts = domain.split('.');
    let tenant = parts.next()?;
    let platform = parts.next()?;
    let tld = parts.next()?;
    if parts.next().is_some() || tld != "com" || tenant.is_empty() || platform.is_empty() {
        return None;
    }
    Some((tenant, platform))
}

/// Best-effort extraction of the `tid` claim from an unverified JWT.
///
/// Signature verification belongs to the edge proxy; the claim is only
/// used to *select* a tenant, and the id still passes full validation.
fn bearer_tid_claim(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let raw = URL_SAFE_NO_PAD.decode(payload.as_bytes()).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&raw).ok()?;
    claims
        .get("tid")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}
