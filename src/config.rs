use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub refresh: RefreshSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Seconds between automatic retention sweeps while serving.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// CORS allowed origin (empty = derive from bind_addr)
    #[serde(default)]
    pub cors_origin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    /// Path of the activity log snapshot (empty = default under data dir).
    #[serde(default)]
    pub data_path: Option<String>,
    /// Prefix used for store-assigned entry ids.
    #[serde(default = "default_source_prefix")]
    pub source_prefix: String,
    /// Window within which identical-looking entries are one entry.
    #[serde(default = "default_dedup_window")]
    pub dedup_window_mins: i64,
    /// Entries older than this are purged by the retention sweep.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Freshness re-evaluation cadence.
    #[serde(default = "default_freshness_interval")]
    pub freshness_interval_secs: u64,
    /// Full data reload cadence.
    #[serde(default = "default_reload_interval")]
    pub reload_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    /// Base URL of the deployed dashboard data documents.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-attempt fetch deadline.
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,
    /// Retries after the first failed attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Linear backoff base delay in milliseconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}
fn default_sweep_interval() -> u64 {
    3600
}
fn default_source_prefix() -> String {
    "act".to_string()
}
fn default_dedup_window() -> i64 {
    5
}
fn default_retention_days() -> i64 {
    7
}
fn default_true() -> bool {
    true
}
fn default_freshness_interval() -> u64 {
    30
}
fn default_reload_interval() -> u64 {
    60
}
fn default_base_url() -> String {
    "http://127.0.0.1:3000".to_string()
}
fn default_attempt_timeout() -> u64 {
    10
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            store: StoreSection::default(),
            refresh: RefreshSection::default(),
            client: ClientSection::default(),
            logging: LoggingSection::default(),
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            sweep_interval_secs: default_sweep_interval(),
            cors_origin: String::new(),
        }
    }
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            data_path: None,
            source_prefix: default_source_prefix(),
            dedup_window_mins: default_dedup_window(),
            retention_days: default_retention_days(),
        }
    }
}

impl Default for RefreshSection {
    fn default() -> Self {
        Self {
            enabled: true,
            freshness_interval_secs: default_freshness_interval(),
            reload_interval_secs: default_reload_interval(),
        }
    }
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            attempt_timeout_secs: default_attempt_timeout(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl TrackerConfig {
    /// Load config from a TOML file, or return defaults if the file doesn't exist.
    pub fn load(path: &PathBuf) -> Result<Self, crate::error::TrackerError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: TrackerConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a TOML file.
    pub fn save(&self, path: &PathBuf) -> Result<(), crate::error::TrackerError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::TrackerError::ConfigError(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nox-tracker")
            .join("tracker.toml")
    }

    /// Resolved path of the activity log snapshot file.
    pub fn data_path(&self) -> PathBuf {
        match &self.store.data_path {
            Some(p) => PathBuf::from(p),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("nox-tracker")
                .join("activity-log.json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TrackerConfig::default();
        assert_eq!(config.server.bind_addr, "127.0.0.1:3000");
        assert_eq!(config.store.dedup_window_mins, 5);
        assert_eq!(config.store.retention_days, 7);
        assert_eq!(config.refresh.freshness_interval_secs, 30);
        assert_eq!(config.refresh.reload_interval_secs, 60);
        assert_eq!(config.client.attempt_timeout_secs, 10);
        assert_eq!(config.client.max_retries, 3);
        assert!(config.refresh.enabled);
    }

    #[test]
    fn test_config_serialize_roundtrip() {
        let config = TrackerConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: TrackerConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.server.bind_addr, config.server.bind_addr);
        assert_eq!(parsed.store.dedup_window_mins, config.store.dedup_window_mins);
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let path = PathBuf::from("/nonexistent/path/tracker.toml");
        let config = TrackerConfig::load(&path).unwrap();
        assert_eq!(config.store.retention_days, 7);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let parsed: TrackerConfig = toml::from_str("[store]\nretention_days = 14\n").unwrap();
        assert_eq!(parsed.store.retention_days, 14);
        assert_eq!(parsed.store.dedup_window_mins, 5);
        assert_eq!(parsed.server.bind_addr, "127.0.0.1:3000");
    }
}
