use std::time::Duration;

/// Process-wide tunables, loaded once at startup from the environment
/// (grounded on FluxFeed's `config.rs`, generalized from a single web-app
/// config into the ingestion core's pool/scheduler/dispatcher knobs).
#[derive(Debug, Clone)]
pub struct Config {
    pub max_clients_per_pool: usize,
    pub default_max_feed_fetch_concurrency: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub scripts_dir: String,
    pub freshrss_sync_workers: usize,
    pub freshrss_max_attempts: u32,
    pub max_concurrent_rss_checks: usize,
    pub max_concurrent_path_checks: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_clients_per_pool: 50,
            default_max_feed_fetch_concurrency: 4,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            scripts_dir: "/srv/scripts".to_string(),
            freshrss_sync_workers: 2,
            freshrss_max_attempts: 5,
            max_concurrent_rss_checks: 8,
            max_concurrent_path_checks: 5,
        }
    }
}

impl Config {
    /// Loads `.env` (if present) and overlays environment variables onto
    /// the defaults. Missing or unparsable values silently keep the
    /// default, the way FluxFeed's config loader treats optional knobs.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();

        if let Ok(v) = std::env::var("INGEST_MAX_CLIENTS_PER_POOL") {
            if let Ok(v) = v.parse() {
                config.max_clients_per_pool = v;
            }
        }
        if let Ok(v) = std::env::var("INGEST_DEFAULT_MAX_CONCURRENCY") {
            if let Ok(v) = v.parse() {
                config.default_max_feed_fetch_concurrency = v;
            }
        }
        if let Ok(v) = std::env::var("INGEST_SCRIPTS_DIR") {
            config.scripts_dir = v;
        }
        if let Ok(v) = std::env::var("INGEST_FRESHRSS_SYNC_WORKERS") {
            if let Ok(v) = v.parse() {
                config.freshrss_sync_workers = v;
            }
        }

        config
    }
}
