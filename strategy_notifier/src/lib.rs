pub mod api;
pub mod budget;
pub mod config;
pub mod error;
pub mod notifier;
pub mod store;
pub mod utils;
pub mod view;

use serde::{Deserialize, Serialize};

pub use api::{HttpStrategyApi, JobStatus, LiveEvent, LiveStream, ProgressUpdate, StrategyApi};
pub use budget::RetryBudget;
pub use config::NotifierConfig;
pub use error::{NotifierError, Result};
pub use notifier::{Notifier, NotifierHandle, NotifierState, ProgressSource};
pub use store::{FileStorage, MemoryStorage, SharedStore, Storage, StorageEvent, TabStore};
pub use view::{Footer, Notification, Renderer, Tone};

/// Key the generation record lives under in the shared store.
pub const STORAGE_KEY: &str = "strategy_generation";

/// Artifact statuses after which nothing is left to track.
pub const TERMINAL_STATUSES: [&str; 2] = ["approved", "denied - archived"];

pub fn is_terminal_status(status: &str) -> bool {
    TERMINAL_STATUSES.contains(&status)
}

/// The single persisted entity. Every write replaces the whole value.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum GenerationRecord {
    #[serde(rename_all = "camelCase")]
    Generating {
        company_id: String,
        start_time: i64,
        #[serde(default)]
        progress: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_step: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Completed {
        strategy_id: String,
        #[serde(default)]
        completed_at: i64,
    },
    Error {
        error: String,
        #[serde(default)]
        timestamp: i64,
    },
}

impl GenerationRecord {
    pub fn generating(company_id: impl Into<String>, now: i64) -> Self {
        GenerationRecord::Generating {
            company_id: company_id.into(),
            start_time: now,
            progress: 0,
            current_step: Some("Initializing...".to_string()),
        }
    }

    pub fn completed(strategy_id: impl Into<String>, now: i64) -> Self {
        GenerationRecord::Completed {
            strategy_id: strategy_id.into(),
            completed_at: now,
        }
    }

    pub fn failed(message: impl Into<String>, now: i64) -> Self {
        GenerationRecord::Error {
            error: message.into(),
            timestamp: now,
        }
    }

    /// Only a record still `generating` can go stale; age is measured from `startTime`.
    pub fn is_stale(&self, now: i64, max_age_ms: i64) -> bool {
        match self {
            GenerationRecord::Generating { start_time, .. } => now - start_time > max_age_ms,
            _ => false,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            GenerationRecord::Generating { .. } => "generating",
            GenerationRecord::Completed { .. } => "completed",
            GenerationRecord::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
