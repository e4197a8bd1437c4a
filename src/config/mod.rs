//! Configuration management for the PII filter service
//!
//! Loaded from a TOML file, then overridden by `PIIFILTER_<SECTION>__<KEY>`
//! environment variables, then validated as a whole.

use crate::error::{PiiFilterError, Result};
use crate::storage::StoreOptions;
use crate::transport::Backoff;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Prefix of recognised environment overrides
pub const ENV_PREFIX: &str = "PIIFILTER_";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub broker: BrokerConfig,
    pub store: StoreConfig,
    pub queues: QueuesConfig,
    pub retry: RetryConfig,
    pub publish: PublishConfig,
    pub ocr: OcrConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Message broker connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// `redis://host:port/db` of the Redis instance holding the queues
    pub url: String,
    /// Sleep between polls of an empty queue
    pub poll_interval: String,
    /// Upper bound on a single broker round-trip
    pub timeout: String,
    /// How long a consumer's in-flight deliveries stay its own without a
    /// receive or settle; must exceed the longest handling of one message
    pub lease: String,
    /// How often deliveries of expired consumers are returned to the queue
    pub recovery_interval: String,
}

/// Partial fact store connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    /// Expiry for stored facts of jobs that never complete
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    pub timeout: String,
}

/// Queue names
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueuesConfig {
    /// Region sets and term sets arrive here
    pub inbound: String,
    /// Filtered results are published here
    pub outbound: String,
    /// Images waiting for text detection
    pub ocr: String,
}

/// Reconnect and redelivery pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub backoff_base: String,
    pub backoff_max: String,
    pub redelivery_delay: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub timeout: String,
}

/// Tesseract invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub binary: String,
    pub lang: String,
    /// Tesseract page segmentation mode (0-13)
    pub psm: u8,
    pub timeout: String,
}

impl StoreConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl.as_deref().and_then(parse_duration)
    }

    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(5))
    }

    pub fn options(&self) -> StoreOptions {
        StoreOptions {
            ttl: self.ttl(),
            timeout: self.timeout(),
        }
    }
}

impl BrokerConfig {
    pub fn poll_interval(&self) -> Duration {
        parse_duration(&self.poll_interval).unwrap_or(Duration::from_millis(250))
    }

    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(5))
    }

    pub fn lease(&self) -> Duration {
        parse_duration(&self.lease).unwrap_or(Duration::from_secs(300))
    }

    pub fn recovery_interval(&self) -> Duration {
        parse_duration(&self.recovery_interval).unwrap_or(Duration::from_secs(30))
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            parse_duration(&self.backoff_base).unwrap_or(Duration::from_millis(500)),
            parse_duration(&self.backoff_max).unwrap_or(Duration::from_secs(30)),
        )
    }

    pub fn redelivery_delay(&self) -> Duration {
        parse_duration(&self.redelivery_delay).unwrap_or(Duration::from_secs(1))
    }
}

impl PublishConfig {
    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(5))
    }
}

impl OcrConfig {
    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(60))
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PiiFilterError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| PiiFilterError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        // Apply environment variable overrides
        config.apply_env_overrides()?;

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Defaults plus environment overrides, for runs without a config file
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env_overrides()?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| PiiFilterError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: PIIFILTER_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(std::env::vars())
    }

    /// Apply `PIIFILTER_*` pairs from any source; other keys are ignored
    pub fn apply_overrides<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix(ENV_PREFIX) {
                self.set_value_from_env(config_key, &value)?;
            }
        }
        Ok(())
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "BROKER__URL" => self.broker.url = value.to_string(),
            "STORE__HOST" => self.store.host = value.to_string(),
            "STORE__PORT" => {
                self.store.port = value.parse().map_err(|_| PiiFilterError::InvalidConfigValue {
                    path: path.to_string(),
                    message: format!("Cannot parse '{}' as a port", value),
                })?;
            }
            "STORE__DB" => {
                self.store.db = value.parse().map_err(|_| PiiFilterError::InvalidConfigValue {
                    path: path.to_string(),
                    message: format!("Cannot parse '{}' as a database index", value),
                })?;
            }
            "STORE__TTL" => {
                let value = value.trim();
                self.store.ttl = if value.is_empty() || value.eq_ignore_ascii_case("none") {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "QUEUES__INBOUND" => self.queues.inbound = value.to_string(),
            "QUEUES__OUTBOUND" => self.queues.outbound = value.to_string(),
            "QUEUES__OCR" => self.queues.ocr = value.to_string(),
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| PiiFilterError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("piifilter").join("config.toml"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig::default(),
            broker: BrokerConfig::default(),
            store: StoreConfig::default(),
            queues: QueuesConfig::default(),
            retry: RetryConfig::default(),
            publish: PublishConfig::default(),
            ocr: OcrConfig::default(),
        }
    }
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            schema_version: "1.0.0".to_string(),
            created_at: current_timestamp(),
            last_modified: current_timestamp(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            poll_interval: "250ms".to_string(),
            timeout: "5s".to_string(),
            lease: "5m".to_string(),
            recovery_interval: "30s".to_string(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            ttl: None,
            timeout: "5s".to_string(),
        }
    }
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            inbound: "filter_pii_queue".to_string(),
            outbound: "filtered_queue".to_string(),
            ocr: "ocr_queue".to_string(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_base: "500ms".to_string(),
            backoff_max: "30s".to_string(),
            redelivery_delay: "1s".to_string(),
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            timeout: "5s".to_string(),
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_string(),
            lang: "eng".to_string(),
            psm: 3,
            timeout: "60s".to_string(),
        }
    }
}

/// Parse a duration string ("250ms", "5s", "2m", "1h"); bare numbers are seconds
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();

    // Check "ms" before "s" because "ms" ends with "s"
    let (number, unit_ms) = if let Some(ms) = value.strip_suffix("ms") {
        (ms, 1)
    } else if let Some(secs) = value.strip_suffix('s') {
        (secs, 1_000)
    } else if let Some(mins) = value.strip_suffix('m') {
        (mins, 60_000)
    } else if let Some(hours) = value.strip_suffix('h') {
        (hours, 3_600_000)
    } else {
        (value, 1_000)
    };

    let number: u64 = number.trim().parse().ok()?;
    number.checked_mul(unit_ms).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration(" 2m "), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("7"), Some(Duration::from_secs(7)));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("-1s"), None);
    }

    #[test]
    fn test_default_queue_names() {
        let config = Config::default();
        assert_eq!(config.queues.inbound, "filter_pii_queue");
        assert_eq!(config.queues.outbound, "filtered_queue");
        assert_eq!(config.queues.ocr, "ocr_queue");
        assert_eq!(config.store.url(), "redis://localhost:6379/0");
        assert_eq!(config.store.ttl(), None);
        ConfigValidator::validate(&config).unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(vars(&[
                ("PIIFILTER_BROKER__URL", "redis://rabbit:6379/1"),
                ("PIIFILTER_STORE__HOST", "redis"),
                ("PIIFILTER_STORE__PORT", "6380"),
                ("PIIFILTER_STORE__TTL", "1h"),
                ("PIIFILTER_QUEUES__OUTBOUND", "redacted"),
                ("PIIFILTER_UNKNOWN__KEY", "ignored"),
                ("HOME", "/root"),
            ]))
            .unwrap();

        assert_eq!(config.broker.url, "redis://rabbit:6379/1");
        assert_eq!(config.store.url(), "redis://redis:6380/0");
        assert_eq!(config.store.ttl(), Some(Duration::from_secs(3600)));
        assert_eq!(config.queues.outbound, "redacted");
        assert_eq!(config.queues.inbound, "filter_pii_queue");
    }

    #[test]
    fn test_env_ttl_can_be_cleared() {
        let mut config = Config::default();
        config.store.ttl = Some("10m".to_string());
        config
            .apply_overrides(vars(&[("PIIFILTER_STORE__TTL", "none")]))
            .unwrap();
        assert_eq!(config.store.ttl, None);
    }

    #[test]
    fn test_bad_port_override() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(vars(&[("PIIFILTER_STORE__PORT", "redis")]))
            .unwrap_err();
        assert!(matches!(err, PiiFilterError::InvalidConfigValue { .. }));
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.store.ttl = Some("30m".to_string());
        config.queues.inbound = "facts".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.queues.inbound, "facts");
        assert_eq!(loaded.store.ttl(), Some(Duration::from_secs(1800)));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[store]\nhost = \"redis\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.store.host, "redis");
        assert_eq!(config.store.port, 6379);
        assert_eq!(config.queues.outbound, "filtered_queue");
    }

    #[test]
    fn test_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = Config::load(&temp_dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, PiiFilterError::ConfigNotFound { .. }));
    }
}
