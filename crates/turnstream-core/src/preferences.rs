use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::app::domain::request::DEFAULT_HISTORY_WINDOW;
use crate::app::domain::types::{AppId, EventId};
use crate::app::runtime::driver::DEFAULT_CHECKPOINT_INTERVAL;
use crate::app::runtime::local_engine::DEFAULT_MAX_BUFFERED_EVENTS;
use crate::app::runtime::orchestrator::{RetryPolicy, TurnConfig};
use crate::utils::paths::AppPaths;

pub const STORE_PATH_ENV: &str = "TURNSTREAM_STORE_PATH";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Preferences {
    #[serde(default)]
    pub streaming: StreamingPreferences,

    #[serde(default)]
    pub store: StorePreferences,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamingPreferences {
    /// Batches between incremental checkpoints.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,
    /// Persisted messages sent as history with each turn.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_max_buffered_events")]
    pub max_buffered_events: usize,
    #[serde(default = "default_execute_attempts")]
    pub execute_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StorePreferences {
    pub path: Option<PathBuf>,
}

fn default_checkpoint_interval() -> usize {
    DEFAULT_CHECKPOINT_INTERVAL
}

fn default_history_window() -> usize {
    DEFAULT_HISTORY_WINDOW
}

fn default_max_buffered_events() -> usize {
    DEFAULT_MAX_BUFFERED_EVENTS
}

fn default_execute_attempts() -> u32 {
    1
}

fn default_retry_backoff_ms() -> u64 {
    250
}

impl Default for StreamingPreferences {
    fn default() -> Self {
        Self {
            checkpoint_interval: default_checkpoint_interval(),
            history_window: default_history_window(),
            max_buffered_events: default_max_buffered_events(),
            execute_attempts: default_execute_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl StreamingPreferences {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.execute_attempts.max(1),
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn turn_config(&self, app_id: AppId, event_id: EventId) -> TurnConfig {
        TurnConfig {
            app_id,
            event_id,
            history_window: self.history_window,
            checkpoint_interval: self.checkpoint_interval,
            retry: self.retry_policy(),
        }
    }
}

impl Preferences {
    /// Get the path to the preferences file
    pub fn config_path() -> Result<PathBuf, crate::error::Error> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            crate::error::Error::Configuration("Could not determine config directory".to_string())
        })?;
        Ok(config_dir.join("turnstream").join("preferences.toml"))
    }

    /// Load preferences from disk, or return defaults if not found
    pub fn load() -> Result<Self, crate::error::Error> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(Self::parse_or_default(&contents, &path))
        } else {
            Ok(Self::default())
        }
    }

    fn parse_or_default(contents: &str, path: &std::path::Path) -> Self {
        match toml::from_str(contents) {
            Ok(prefs) => prefs,
            Err(e) => {
                tracing::warn!(
                    "Failed to parse preferences file at {:?}: {}. Using defaults.",
                    path,
                    e
                );
                Self::default()
            }
        }
    }

    /// Save preferences to disk
    pub fn save(&self) -> Result<(), crate::error::Error> {
        let path = Self::config_path()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self).map_err(|e| {
            crate::error::Error::Configuration(format!("Failed to serialize preferences: {e}"))
        })?;

        std::fs::write(&path, contents)?;

        Ok(())
    }

    /// Session database location: `TURNSTREAM_STORE_PATH`, then `[store] path`,
    /// then `sessions.db` in the user data directory.
    pub fn store_path(&self) -> Result<PathBuf, crate::error::Error> {
        if let Ok(path) = std::env::var(STORE_PATH_ENV)
            && !path.is_empty()
        {
            return Ok(PathBuf::from(path));
        }
        if let Some(path) = &self.store.path {
            return Ok(path.clone());
        }
        AppPaths::user_data_dir()
            .map(|dir| dir.join("sessions.db"))
            .ok_or_else(|| {
                crate::error::Error::Configuration(
                    "Could not determine data directory".to_string(),
                )
            })
    }
}
