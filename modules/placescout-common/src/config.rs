use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Headless rendering service (browserless-style HTTP API)
    pub browser_url: String,
    pub browser_token: Option<String>,

    // Worker pools
    /// Total worker count. Defaults to half the available CPUs, minimum 1.
    pub concurrency: usize,

    // Output
    pub data_dir: std::path::PathBuf,

    // Deduplication
    /// When set, dedup keys are persisted to this SQLite database across runs.
    pub dedup_db_path: Option<String>,

    // Preflight tuning
    pub preflight_enabled: bool,
    pub preflight_dns_timeout_ms: u64,
    pub preflight_tcp_timeout_ms: u64,
    pub preflight_head_timeout_ms: u64,
    pub preflight_enable_head: bool,

    // Exit monitor
    /// Cancel a seed's subtree after this many seconds with no completed job.
    pub inactivity_timeout_secs: u64,
    /// Per-seed deadline in seconds; clamped to a 180s floor at runtime.
    pub max_time_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            browser_url: env::var("BROWSER_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            browser_token: env::var("BROWSER_TOKEN").ok(),
            concurrency: env::var("CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_concurrency),
            data_dir: std::path::PathBuf::from(
                env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            ),
            dedup_db_path: env::var("DEDUP_DB_PATH").ok(),
            preflight_enabled: env_bool("PREFLIGHT_ENABLED", true),
            preflight_dns_timeout_ms: env_u64("PREFLIGHT_DNS_TIMEOUT_MS", 300),
            preflight_tcp_timeout_ms: env_u64("PREFLIGHT_TCP_TIMEOUT_MS", 500),
            preflight_head_timeout_ms: env_u64("PREFLIGHT_HEAD_TIMEOUT_MS", 800),
            preflight_enable_head: env_bool("PREFLIGHT_ENABLE_HEAD", false),
            inactivity_timeout_secs: env_u64("INACTIVITY_TIMEOUT_SECS", 180),
            max_time_secs: env_u64("MAX_TIME_SECS", 0),
        }
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| (n.get() / 2).max(1))
        .unwrap_or(1)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}
