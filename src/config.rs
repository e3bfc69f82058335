// Configuration module for codenav
// Reads from environment variables with sensible defaults

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

/// Global configuration instance
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of commits visited by a visibility traversal (CODENAV_MAX_TRAVERSAL_LIMIT)
    pub max_traversal_limit: usize,

    /// Candidate dumps pulled per bloom-filtered batch (CODENAV_REMOTE_DUMP_LIMIT)
    pub remote_dump_limit: usize,

    /// Page size for references when the caller gives none (CODENAV_DEFAULT_REFERENCES_LIMIT)
    pub default_references_limit: usize,

    /// Upper bound on any caller-supplied page size (CODENAV_MAX_RESPONSE_LIMIT)
    pub max_response_limit: usize,

    /// Database connection pool size (CODENAV_POOL_SIZE)
    pub pool_size: u32,

    /// Database connection pool minimum idle connections (CODENAV_POOL_MIN_IDLE)
    pub pool_min_idle: u32,

    /// Base URL of the bundle manager (CODENAV_BUNDLE_MANAGER_URL)
    pub bundle_manager_url: String,

    /// HTTP timeout for bundle manager requests (CODENAV_BUNDLE_TIMEOUT_SECS)
    pub bundle_timeout_secs: u64,

    /// Deadline applied to RPC requests that don't carry their own (CODENAV_REQUEST_TIMEOUT_SECS)
    pub request_timeout_secs: u64,

    /// Freshness window of the indexed repository list (CODENAV_REPO_CACHE_TTL_SECS)
    pub repo_cache_ttl_secs: u64,

    /// RPC methods slower than this are logged (CODENAV_SLOW_QUERY_MS)
    pub slow_query_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_traversal_limit: 100,
            remote_dump_limit: 20,
            default_references_limit: 100,
            max_response_limit: 500,
            pool_size: 10,
            pool_min_idle: 2,
            bundle_manager_url: "http://localhost:3187".to_string(),
            bundle_timeout_secs: 30,
            request_timeout_secs: 30,
            repo_cache_ttl_secs: 60,
            slow_query_ms: 100,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let mut config = Config::default();

        override_from_env("CODENAV_MAX_TRAVERSAL_LIMIT", &mut config.max_traversal_limit);
        override_from_env("CODENAV_REMOTE_DUMP_LIMIT", &mut config.remote_dump_limit);
        override_from_env(
            "CODENAV_DEFAULT_REFERENCES_LIMIT",
            &mut config.default_references_limit,
        );
        override_from_env("CODENAV_MAX_RESPONSE_LIMIT", &mut config.max_response_limit);
        override_from_env("CODENAV_POOL_SIZE", &mut config.pool_size);
        override_from_env("CODENAV_POOL_MIN_IDLE", &mut config.pool_min_idle);
        override_from_env("CODENAV_BUNDLE_MANAGER_URL", &mut config.bundle_manager_url);
        override_from_env("CODENAV_BUNDLE_TIMEOUT_SECS", &mut config.bundle_timeout_secs);
        override_from_env("CODENAV_REQUEST_TIMEOUT_SECS", &mut config.request_timeout_secs);
        override_from_env("CODENAV_REPO_CACHE_TTL_SECS", &mut config.repo_cache_ttl_secs);
        override_from_env("CODENAV_SLOW_QUERY_MS", &mut config.slow_query_ms);

        // Zero-sized batches would never advance the reference pager.
        config.remote_dump_limit = config.remote_dump_limit.max(1);
        config.max_traversal_limit = config.max_traversal_limit.max(1);

        config
    }

    /// Get the global configuration instance
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(Config::from_env)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn repo_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.repo_cache_ttl_secs)
    }
}

fn override_from_env<T>(key: &str, slot: &mut T)
where
    T: FromStr + Display,
{
    let Ok(val) = env::var(key) else {
        return;
    };
    match parse_value(&val) {
        Some(parsed) => *slot = parsed,
        None => tracing::warn!(
            "invalid {} value: {}, using default: {}",
            key,
            val,
            slot
        ),
    }
}

fn parse_value<T: FromStr>(raw: &str) -> Option<T> {
    raw.trim().parse().ok()
}
