use std::env;
use std::time::Duration;

use crate::STORAGE_KEY;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000/";

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Origin the strategy endpoints and the `/strategy/{id}` page live under.
    pub base_url: String,
    pub storage_key: String,
    /// Cadence of the background sweep that re-reads the persisted record.
    pub reconcile_interval: Duration,
    /// Fallback job-status polling cadence once the live channel fails.
    pub poll_interval: Duration,
    /// Cadence of the artifact status check while a strategy awaits action.
    pub status_check_interval: Duration,
    /// A `generating` record older than this is dropped.
    pub stale_after: Duration,
    pub max_failures: u32,
    /// Delay before the error view appears, so the hide transition can finish.
    pub error_render_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            storage_key: STORAGE_KEY.to_string(),
            reconcile_interval: Duration::from_secs(5),
            poll_interval: Duration::from_secs(3),
            status_check_interval: Duration::from_secs(10),
            stale_after: Duration::from_secs(5 * 60),
            max_failures: 3,
            error_render_delay: Duration::from_millis(300),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl NotifierConfig {
    /// Defaults overridden by `STRATEGY_API_URL` when it is set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = env::var("STRATEGY_API_URL") {
            if !url.trim().is_empty() {
                config.base_url = url;
            }
        }
        config
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn stale_after_ms(&self) -> i64 {
        i64::try_from(self.stale_after.as_millis()).unwrap_or(i64::MAX)
    }
}
