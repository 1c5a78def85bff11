use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration from flowedit.toml
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorConfig {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub editor: SessionConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Retry policy for persistence calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Total attempts per call, first try included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl SyncConfig {
    /// Delay before retry number `attempt` (1 = first retry):
    /// `base * 2^(attempt-1)`, capped at `max_backoff_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(32);
        let ms = self
            .base_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_undo_limit")]
    pub undo_limit: usize,
    /// Prefix for locally allocated step ids (`step-1`, `step-2`, ...)
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            undo_limit: default_undo_limit(),
            id_prefix: default_id_prefix(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing` env-filter directive, overridden by FLOWEDIT_LOG
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: default_log_filter(),
        }
    }
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_undo_limit() -> usize {
    200
}

fn default_id_prefix() -> String {
    "step".to_string()
}

fn default_log_filter() -> String {
    "warn".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let sync = SyncConfig::default();
        assert_eq!(sync.backoff(1), Duration::from_millis(200));
        assert_eq!(sync.backoff(2), Duration::from_millis(400));
        assert_eq!(sync.backoff(3), Duration::from_millis(800));
        assert_eq!(sync.backoff(10), Duration::from_millis(5_000));
        assert_eq!(sync.backoff(200), Duration::from_millis(5_000));
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config: EditorConfig = toml::from_str("").unwrap();
        assert_eq!(config, EditorConfig::default());
        assert_eq!(config.sync.max_attempts, 4);
        assert_eq!(config.editor.id_prefix, "step");
        assert_eq!(config.log.filter, "warn");
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let config: EditorConfig = toml::from_str("[sync]\nmax_attempts = 2\n").unwrap();
        assert_eq!(config.sync.max_attempts, 2);
        assert_eq!(config.sync.base_backoff_ms, 200);
        assert_eq!(config.editor.undo_limit, 200);
    }
}
