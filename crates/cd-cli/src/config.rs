//! Layered configuration (SPEC_FULL.md §4.J): built-in defaults, overlaid by an
//! optional TOML file, overlaid by environment variables — the same three-tier
//! precedence as the teacher's `cli::load_config` (defaults → file), extended with
//! an env layer on top of it.

use cd_core::entry::EntryKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchedulerConfig {
    #[serde(default = "d_max_interval_ms")]
    pub max_interval_ms: i64,
    #[serde(default = "d_lock_timeout_ms")]
    pub lock_timeout_ms: i64,
    #[serde(default)]
    pub backend: BackendConfig,
    /// Entry JSON objects, same wire form as `save`'s payload (SPEC_FULL.md §6).
    #[serde(default)]
    pub default_entries: Vec<EntryKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    Sql { url: String },
    Kv { url: String },
    /// No external backend configured; useful for `list`/`get` against an
    /// all-default-entries deployment, or for smoke-testing the CLI itself.
    Mem,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Mem
    }
}

fn d_max_interval_ms() -> i64 {
    10_000
}

fn d_lock_timeout_ms() -> i64 {
    60_000
}

impl SchedulerConfig {
    /// `SCHEDULER_CONFIG` (or `cadenced.toml` by default) is read if present;
    /// missing file falls back to built-in defaults, mirroring the teacher's
    /// `load_config` behavior for a missing `config.toml`.
    pub fn load() -> anyhow::Result<(Self, String)> {
        let config_path =
            std::env::var("SCHEDULER_CONFIG").unwrap_or_else(|_| "cadenced.toml".into());

        let mut config: SchedulerConfig = if std::path::Path::new(&config_path).exists() {
            let raw = std::fs::read_to_string(&config_path)
                .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
            toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
        } else {
            SchedulerConfig::default()
        };

        config.apply_env_overrides();
        Ok((config, config_path))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SCHEDULER_MAX_INTERVAL_MS") {
            if let Ok(parsed) = v.parse() {
                self.max_interval_ms = parsed;
            }
        }
        if let Ok(v) = std::env::var("SCHEDULER_LOCK_TIMEOUT_MS") {
            if let Ok(parsed) = v.parse() {
                self.lock_timeout_ms = parsed;
            }
        }
        if let Ok(url) = std::env::var("SCHEDULER_SQL_URL") {
            self.backend = BackendConfig::Sql { url };
        } else if let Ok(url) = std::env::var("SCHEDULER_KV_URL") {
            self.backend = BackendConfig::Kv { url };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_empty_toml() {
        let config: SchedulerConfig = toml::from_str("").unwrap();
        assert_eq!(config.max_interval_ms, 10_000);
        assert_eq!(config.lock_timeout_ms, 60_000);
        assert!(matches!(config.backend, BackendConfig::Mem));
    }

    #[test]
    fn partial_toml_fills_remaining_defaults() {
        let toml_src = "max_interval_ms = 5000\n";
        let config: SchedulerConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(config.max_interval_ms, 5000);
        assert_eq!(config.lock_timeout_ms, 60_000);
    }
}
