// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and merging for ticketlens.
//!
//! The service is configured environment-first: LLM use-case routes are
//! re-read from the environment on every router call so edits apply to
//! subsequent calls without a restart.  Daemon-local settings (bind
//! address, template directory, job store directory) come from an optional
//! TOML file with environment overrides on top.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// LLM use-case routing
// ---------------------------------------------------------------------------

/// Routing key for LLM calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UseCase {
    /// Interactive summary for an open ticket.
    Realtime,
    /// Scheduled batch summarization.
    Batch,
    /// The canonical summary use-case (batch prompt set).
    Summary,
    /// Query condition extraction.
    QueryAnalysis,
    /// Hypothetical-document expansion.
    Hyde,
}

impl UseCase {
    /// All use-cases, for iteration.
    pub const ALL: [UseCase; 5] = [
        UseCase::Realtime,
        UseCase::Batch,
        UseCase::Summary,
        UseCase::QueryAnalysis,
        UseCase::Hyde,
    ];

    /// Environment variable prefix (`REALTIME_LLM_PROVIDER` etc.).
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Self::Realtime => "REALTIME",
            Self::Batch => "BATCH",
            Self::Summary => "SUMMARY",
            Self::QueryAnalysis => "QUERY_ANALYSIS",
            Self::Hyde => "HYDE",
        }
    }

    /// Stable lowercase tag used in cache keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Realtime => "realtime",
            Self::Batch => "batch",
            Self::Summary => "summary",
            Self::QueryAnalysis => "query_analysis",
            Self::Hyde => "hyde",
        }
    }

    /// Per-call timeout default for this use-case.
    pub fn default_timeout(&self) -> Duration {
        match self {
            Self::Realtime => Duration::from_secs(15),
            Self::Batch | Self::Summary => Duration::from_secs(60),
            Self::QueryAnalysis => Duration::from_secs(5),
            Self::Hyde => Duration::from_secs(10),
        }
    }

    /// Response cache TTL default for this use-case.  `None` bypasses the
    /// cache entirely.
    pub fn default_cache_ttl(&self) -> Option<Duration> {
        match self {
            Self::Realtime => None,
            Self::Batch | Self::Summary => Some(Duration::from_secs(24 * 3600)),
            Self::QueryAnalysis => Some(Duration::from_secs(30 * 60)),
            Self::Hyde => Some(Duration::from_secs(30 * 60)),
        }
    }
}

impl std::fmt::Display for UseCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One provider/model hop in a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteHop {
    /// Provider name (`"openai"`, `"anthropic"`, `"gemini"`).
    pub provider: String,
    /// Model identifier at that provider.
    pub model: String,
}

/// Resolved route for one use-case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UseCaseRoute {
    /// Primary provider.
    pub provider: String,
    /// Primary model.
    pub model: String,
    /// Completion token cap.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
    /// Per-call timeout.
    pub timeout_secs: u64,
    /// Fallback hops tried after the primary is exhausted (≤ 3).
    pub fallback: Vec<RouteHop>,
}

/// Maximum fallback hops honoured per call.
pub const MAX_FALLBACK_HOPS: usize = 3;

/// Resolve the route for `use_case` from the process environment.
///
/// Reads the environment on every call so that edits apply to subsequent
/// calls immediately (a call already in flight keeps the route it started
/// with).
pub fn resolve_use_case(use_case: UseCase) -> UseCaseRoute {
    resolve_use_case_from(use_case, |key| std::env::var(key).ok())
}

/// [`resolve_use_case`] with an explicit key lookup, for tests and embedding.
pub fn resolve_use_case_from(
    use_case: UseCase,
    lookup: impl Fn(&str) -> Option<String>,
) -> UseCaseRoute {
    let prefix = use_case.env_prefix();
    let get = |suffix: &str| lookup(&format!("{prefix}_LLM_{suffix}"));

    let provider = get("PROVIDER").unwrap_or_else(|| "openai".into());
    let model = get("MODEL").unwrap_or_else(|| default_model(use_case).into());
    let max_tokens = get("MAX_TOKENS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(default_max_tokens(use_case));
    let temperature = get("TEMPERATURE")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.2);

    let global_cap = lookup("LLM_GLOBAL_TIMEOUT").and_then(|v| v.parse::<u64>().ok());
    let mut timeout_secs = get("TIMEOUT_SECS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(use_case.default_timeout().as_secs());
    if let Some(cap) = global_cap {
        timeout_secs = timeout_secs.min(cap);
    }

    // FALLBACK is a comma list of provider:model pairs.
    let fallback = get("FALLBACK")
        .map(|raw| parse_fallback(&raw))
        .unwrap_or_default();

    UseCaseRoute {
        provider,
        model,
        max_tokens,
        temperature,
        timeout_secs,
        fallback,
    }
}

fn default_model(use_case: UseCase) -> &'static str {
    match use_case {
        UseCase::Realtime => "gpt-4o",
        UseCase::Batch | UseCase::Summary => "gpt-4o-mini",
        UseCase::QueryAnalysis | UseCase::Hyde => "gpt-4o-mini",
    }
}

fn default_max_tokens(use_case: UseCase) -> u32 {
    match use_case {
        UseCase::Realtime | UseCase::Batch | UseCase::Summary => 1024,
        UseCase::QueryAnalysis => 512,
        UseCase::Hyde => 256,
    }
}

fn parse_fallback(raw: &str) -> Vec<RouteHop> {
    raw.split(',')
        .filter_map(|pair| {
            let (provider, model) = pair.trim().split_once(':')?;
            if provider.is_empty() || model.is_empty() {
                return None;
            }
            Some(RouteHop {
                provider: provider.trim().to_string(),
                model: model.trim().to_string(),
            })
        })
        .take(MAX_FALLBACK_HOPS)
        .collect()
}

// ---------------------------------------------------------------------------
// Search tuning
// ---------------------------------------------------------------------------

/// Tuning knobs for hybrid retrieval and fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchTuning {
    /// Dense weight in reciprocal-rank fusion.
    pub dense_weight: f64,
    /// Sparse weight in reciprocal-rank fusion.
    pub sparse_weight: f64,
    /// Recency bonus weight.
    pub recency_weight: f64,
    /// Results scoring below this are dropped.
    pub quality_threshold: f64,
    /// Keep the top-1 hit (flagged) instead of returning an empty set.
    pub prevent_empty: bool,
    /// Kill switch for the conditional analysis + search path.
    pub conditional_search_enabled: bool,
}

impl Default for SearchTuning {
    fn default() -> Self {
        Self {
            dense_weight: 0.7,
            sparse_weight: 0.3,
            recency_weight: 0.15,
            quality_threshold: 0.05,
            prevent_empty: true,
            conditional_search_enabled: true,
        }
    }
}

impl SearchTuning {
    /// Read tuning from the process environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// [`SearchTuning::from_env`] with an explicit key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let f = |key: &str, dft: f64| {
            lookup(key)
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(dft)
        };
        let b = |key: &str, dft: bool| {
            lookup(key)
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(dft)
        };
        Self {
            dense_weight: f("FUSION_DENSE_WEIGHT", defaults.dense_weight),
            sparse_weight: f("FUSION_SPARSE_WEIGHT", defaults.sparse_weight),
            recency_weight: f("FUSION_RECENCY_WEIGHT", defaults.recency_weight),
            quality_threshold: f("HYBRID_SEARCH_QUALITY_THRESHOLD", defaults.quality_threshold),
            prevent_empty: b("PREVENT_EMPTY_RESULTS", defaults.prevent_empty),
            conditional_search_enabled: b(
                "ENABLE_CONDITIONAL_SEARCH",
                defaults.conditional_search_enabled,
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Service-wide settings
// ---------------------------------------------------------------------------

/// Process-scoped service configuration read once at startup.
///
/// Unlike the use-case routes, these do not hot-reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Vector store base URL.
    pub qdrant_url: String,
    /// Vector store API key, if the deployment requires one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qdrant_api_key: Option<String>,
    /// Embedding model identifier.
    pub embedding_model: String,
    /// Prefer the multilingual embedding variant.
    pub use_multilingual_embedding: bool,
    /// Default tenant domain when requests carry no tenant information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_domain: Option<String>,
    /// Outbound HTTP connection pool size.
    pub connection_pool_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            qdrant_url: "http://localhost:6333".into(),
            qdrant_api_key: None,
            embedding_model: "text-embedding-3-small".into(),
            use_multilingual_embedding: false,
            tenant_domain: None,
            connection_pool_size: 64,
        }
    }
}

impl ServiceConfig {
    /// Read service settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// [`ServiceConfig::from_env`] with an explicit key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let multilingual = lookup("USE_MULTILINGUAL_EMBEDDING")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(defaults.use_multilingual_embedding);

        let embedding_model = lookup("EMBEDDING_MODEL").unwrap_or_else(|| {
            if multilingual {
                "multilingual-e5-large".into()
            } else {
                defaults.embedding_model.clone()
            }
        });

        Self {
            qdrant_url: lookup("QDRANT_URL").unwrap_or(defaults.qdrant_url),
            qdrant_api_key: lookup("QDRANT_API_KEY"),
            embedding_model,
            use_multilingual_embedding: multilingual,
            tenant_domain: lookup("TENANT_DOMAIN"),
            connection_pool_size: lookup("CONNECTION_POOL_SIZE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.connection_pool_size),
        }
    }
}

// ---------------------------------------------------------------------------
// Daemon file config
// ---------------------------------------------------------------------------

/// Daemon-local settings loaded from an optional TOML file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Bind address for the HTTP listener.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Directory holding the YAML prompt templates.
    #[serde(default = "default_template_dir")]
    pub template_dir: String,
    /// Directory for the file-backed job store.
    #[serde(default = "default_job_dir")]
    pub job_dir: String,
    /// Allowed CORS origins; empty means same-origin only.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_bind() -> String {
    "127.0.0.1:8080".into()
}

fn default_template_dir() -> String {
    "templates".into()
}

fn default_job_dir() -> String {
    ".ticketlens/jobs".into()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            template_dir: default_template_dir(),
            job_dir: default_job_dir(),
            cors_origins: Vec::new(),
        }
    }
}

/// Load a [`DaemonConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`DaemonConfig::default()`].
pub fn load_daemon_config(path: Option<&Path>) -> Result<DaemonConfig, ConfigError> {
    match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_daemon_toml(&content)
        }
        None => Ok(DaemonConfig::default()),
    }
}

/// Parse a TOML string into a [`DaemonConfig`].
pub fn parse_daemon_toml(content: &str) -> Result<DaemonConfig, ConfigError> {
    toml::from_str::<DaemonConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

/// Validate tuning values that have hard ranges.
///
/// Returns human-readable reasons for every violation found.
pub fn validate_tuning(tuning: &SearchTuning) -> Result<(), ConfigError> {
    let mut reasons = Vec::new();

    for (name, v) in [
        ("FUSION_DENSE_WEIGHT", tuning.dense_weight),
        ("FUSION_SPARSE_WEIGHT", tuning.sparse_weight),
        ("FUSION_RECENCY_WEIGHT", tuning.recency_weight),
    ] {
        if !(0.0..=1.0).contains(&v) {
            reasons.push(format!("{name} must be within [0, 1], got {v}"));
        }
    }
    if tuning.dense_weight + tuning.sparse_weight <= 0.0 {
        reasons.push("fusion weights must not both be zero".into());
    }
    if !(0.0..=1.0).contains(&tuning.quality_threshold) {
        reasons.push(format!(
            "HYBRID_SEARCH_QUALITY_THRESHOLD must be within [0, 1], got {}",
            tuning.quality_threshold
        ));
    }

    if reasons.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError { reasons })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        move |key| map.get(key).map(|v| v.to_string())
    }

    // -- use-case routes --------------------------------------------------

    #[test]
    fn route_defaults_without_env() {
        let route = resolve_use_case_from(UseCase::Summary, |_| None);
        assert_eq!(route.provider, "openai");
        assert_eq!(route.model, "gpt-4o-mini");
        assert_eq!(route.timeout_secs, 60);
        assert!(route.fallback.is_empty());
    }

    #[test]
    fn route_reads_provider_and_model() {
        let lookup = env(&[
            ("SUMMARY_LLM_PROVIDER", "anthropic"),
            ("SUMMARY_LLM_MODEL", "claude-3-5-haiku"),
        ]);
        let route = resolve_use_case_from(UseCase::Summary, lookup);
        assert_eq!(route.provider, "anthropic");
        assert_eq!(route.model, "claude-3-5-haiku");
    }

    #[test]
    fn route_parses_fallback_chain() {
        let lookup = env(&[(
            "REALTIME_LLM_FALLBACK",
            "anthropic:claude-3-5-haiku, gemini:gemini-1.5-flash",
        )]);
        let route = resolve_use_case_from(UseCase::Realtime, lookup);
        assert_eq!(route.fallback.len(), 2);
        assert_eq!(route.fallback[0].provider, "anthropic");
        assert_eq!(route.fallback[1].model, "gemini-1.5-flash");
    }

    #[test]
    fn fallback_chain_is_bounded() {
        let lookup = env(&[("HYDE_LLM_FALLBACK", "a:1,b:2,c:3,d:4,e:5")]);
        let route = resolve_use_case_from(UseCase::Hyde, lookup);
        assert_eq!(route.fallback.len(), MAX_FALLBACK_HOPS);
    }

    #[test]
    fn malformed_fallback_entries_are_skipped() {
        let lookup = env(&[("BATCH_LLM_FALLBACK", "nomodel,, anthropic:claude")]);
        let route = resolve_use_case_from(UseCase::Batch, lookup);
        assert_eq!(route.fallback.len(), 1);
        assert_eq!(route.fallback[0].provider, "anthropic");
    }

    #[test]
    fn global_timeout_caps_per_use_case_timeout() {
        let lookup = env(&[("LLM_GLOBAL_TIMEOUT", "10")]);
        let route = resolve_use_case_from(UseCase::Summary, lookup);
        assert_eq!(route.timeout_secs, 10);
    }

    #[test]
    fn per_use_case_timeout_below_cap_is_kept() {
        let lookup = env(&[("LLM_GLOBAL_TIMEOUT", "120")]);
        let route = resolve_use_case_from(UseCase::QueryAnalysis, lookup);
        assert_eq!(route.timeout_secs, 5);
    }

    #[test]
    fn cache_ttls_per_use_case() {
        assert!(UseCase::Realtime.default_cache_ttl().is_none());
        assert_eq!(
            UseCase::Summary.default_cache_ttl(),
            Some(Duration::from_secs(86_400))
        );
        assert_eq!(
            UseCase::QueryAnalysis.default_cache_ttl(),
            Some(Duration::from_secs(1_800))
        );
    }

    // -- search tuning ----------------------------------------------------

    #[test]
    fn tuning_defaults() {
        let t = SearchTuning::default();
        assert_eq!(t.dense_weight, 0.7);
        assert_eq!(t.sparse_weight, 0.3);
        assert_eq!(t.quality_threshold, 0.05);
        assert!(t.prevent_empty);
        assert!(t.conditional_search_enabled);
    }

    #[test]
    fn tuning_reads_overrides() {
        let lookup = env(&[
            ("FUSION_DENSE_WEIGHT", "0.6"),
            ("FUSION_SPARSE_WEIGHT", "0.4"),
            ("HYBRID_SEARCH_QUALITY_THRESHOLD", "0.45"),
            ("PREVENT_EMPTY_RESULTS", "false"),
            ("ENABLE_CONDITIONAL_SEARCH", "0"),
        ]);
        let t = SearchTuning::from_lookup(lookup);
        assert_eq!(t.dense_weight, 0.6);
        assert_eq!(t.sparse_weight, 0.4);
        assert_eq!(t.quality_threshold, 0.45);
        assert!(!t.prevent_empty);
        assert!(!t.conditional_search_enabled);
    }

    #[test]
    fn tuning_ignores_unparsable_values() {
        let lookup = env(&[("FUSION_DENSE_WEIGHT", "lots")]);
        let t = SearchTuning::from_lookup(lookup);
        assert_eq!(t.dense_weight, 0.7);
    }

    #[test]
    fn validate_tuning_accepts_defaults() {
        validate_tuning(&SearchTuning::default()).unwrap();
    }

    #[test]
    fn validate_tuning_rejects_out_of_range_weight() {
        let t = SearchTuning {
            dense_weight: 1.5,
            ..Default::default()
        };
        let err = validate_tuning(&t).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn validate_tuning_rejects_zero_weights() {
        let t = SearchTuning {
            dense_weight: 0.0,
            sparse_weight: 0.0,
            ..Default::default()
        };
        assert!(validate_tuning(&t).is_err());
    }

    // -- service config ---------------------------------------------------

    #[test]
    fn service_config_defaults() {
        let c = ServiceConfig::from_lookup(|_| None);
        assert_eq!(c.qdrant_url, "http://localhost:6333");
        assert_eq!(c.embedding_model, "text-embedding-3-small");
        assert_eq!(c.connection_pool_size, 64);
    }

    #[test]
    fn multilingual_flag_switches_default_embedding_model() {
        let lookup = env(&[("USE_MULTILINGUAL_EMBEDDING", "true")]);
        let c = ServiceConfig::from_lookup(lookup);
        assert!(c.use_multilingual_embedding);
        assert_eq!(c.embedding_model, "multilingual-e5-large");
    }

    #[test]
    fn explicit_embedding_model_wins_over_multilingual_default() {
        let lookup = env(&[
            ("USE_MULTILINGUAL_EMBEDDING", "yes"),
            ("EMBEDDING_MODEL", "bge-m3"),
        ]);
        let c = ServiceConfig::from_lookup(lookup);
        assert_eq!(c.embedding_model, "bge-m3");
    }

    // -- daemon file config -----------------------------------------------

    #[test]
    fn daemon_config_defaults() {
        let c = load_daemon_config(None).unwrap();
        assert_eq!(c.bind, "127.0.0.1:8080");
        assert_eq!(c.template_dir, "templates");
    }

    #[test]
    fn daemon_config_parses_toml() {
        let c = parse_daemon_toml(
            r#"
            bind = "0.0.0.0:9000"
            template_dir = "/etc/ticketlens/templates"
            cors_origins = ["https://app.example.com"]
        "#,
        )
        .unwrap();
        assert_eq!(c.bind, "0.0.0.0:9000");
        assert_eq!(c.cors_origins.len(), 1);
        // Unspecified fields keep their defaults.
        assert_eq!(c.job_dir, ".ticketlens/jobs");
    }

    #[test]
    fn daemon_config_rejects_bad_toml() {
        let err = parse_daemon_toml("this is [not toml =").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn daemon_config_missing_file() {
        let err = load_daemon_config(Some(Path::new("/nonexistent/tl.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn daemon_config_from_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ticketlens.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "bind = \"127.0.0.1:7777\"").unwrap();
        let c = load_daemon_config(Some(&path)).unwrap();
        assert_eq!(c.bind, "127.0.0.1:7777");
    }
}
