//! Configuration types.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::ConfigError;
use crate::notifier::OperationKind;

/// Top-level configuration for an [`AgentDesk`](crate::desk::AgentDesk).
#[derive(Debug, Clone)]
pub struct DeskConfig {
    /// Base URL of the agent/document service, without trailing slash.
    pub api_base_url: String,
    /// Per-request timeout applied by the HTTP gateway.
    pub request_timeout: Duration,
    pub cache: CacheConfig,
    pub notifier: NotifierConfig,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            request_timeout: Duration::from_secs(30),
            cache: CacheConfig::default(),
            notifier: NotifierConfig::default(),
        }
    }
}

impl DeskConfig {
    /// Build configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    ///
    /// Unset variables keep their defaults; set but unparsable ones fail.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("AGENT_DESK_API_URL") {
            let url = url.trim().trim_end_matches('/').to_string();
            if url.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "AGENT_DESK_API_URL".into(),
                    message: "must not be empty".into(),
                });
            }
            config.api_base_url = url;
        }

        if let Some(secs) = parse_u64(&lookup, "AGENT_DESK_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }

        if let Some(ms) = parse_u64(&lookup, "AGENT_DESK_SLOW_THRESHOLD_MS")? {
            config.notifier.slow_threshold = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_u64(&lookup, "AGENT_DESK_UPLOAD_SLOW_THRESHOLD_MS")? {
            config
                .notifier
                .per_kind
                .insert(OperationKind::UploadDocument, Duration::from_millis(ms));
        }

        if let Some(secs) = parse_u64(&lookup, "AGENT_DESK_RETAIN_RESOLVED_SECS")? {
            config.notifier.retain_resolved = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn parse_u64<F>(lookup: &F, key: &str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?} is not a non-negative integer ({e})"),
            }),
    }
}

/// Cache staleness and refresh policy.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Freshness window for agent lists and single agents.
    pub agents_stale_after: Duration,
    /// Freshness window for document lists (mutated more often per session).
    pub documents_stale_after: Duration,
    /// Retries after a failed refresh (retryable errors only).
    pub refresh_retries: u32,
    /// Delay before the first retry; doubled for each further attempt.
    pub retry_backoff: Duration,
    /// Capacity of the cache event broadcast channel.
    pub event_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            agents_stale_after: Duration::from_secs(300), // 5 minutes
            documents_stale_after: Duration::from_secs(120), // 2 minutes
            refresh_retries: 3,
            retry_backoff: Duration::from_millis(500),
            event_capacity: 256,
        }
    }
}

/// Slow-operation escalation settings.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Time after which an unresolved operation shows its slow message.
    pub slow_threshold: Duration,
    /// Per-kind threshold overrides.
    pub per_kind: HashMap<OperationKind, Duration>,
    /// Capacity of the notification broadcast channel.
    pub event_capacity: usize,
    /// How long a resolved operation stays queryable before it is dropped.
    pub retain_resolved: Duration,
    /// Upper bound on resolved operations kept; the oldest go first.
    pub max_resolved: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            slow_threshold: Duration::from_millis(3000),
            per_kind: HashMap::new(),
            event_capacity: 256,
            retain_resolved: Duration::from_secs(60),
            max_resolved: 128,
        }
    }
}

impl NotifierConfig {
    /// Threshold that applies to operations of `kind`.
    pub fn threshold_for(&self, kind: OperationKind) -> Duration {
        self.per_kind
            .get(&kind)
            .copied()
            .unwrap_or(self.slow_threshold)
    }
}
