//! Runtime configuration, persisted as TOML.
//!
//! Every field has a serde default, so an empty file (or no file) yields a
//! working configuration. Sections: `[server]`, `[mail]`, `[detection]`,
//! `[cache]`, `[storage]`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::detect::DetectionConfig;
use crate::error::ConfigError;
use crate::mail::{FetchOptions, TransportTimeouts};
use crate::paths::RadarPaths;

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Environment variable overriding the daemon bind address.
pub const ENV_BIND: &str = "INVOICE_RADAR_BIND";
/// Environment variable overriding the daemon port.
pub const ENV_PORT: &str = "INVOICE_RADAR_PORT";

// ── sections ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Return internal error text to HTTP clients. Development only.
    #[serde(default)]
    pub expose_errors: bool,
}

fn default_bind() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            expose_errors: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_auth_timeout_secs")]
    pub auth_timeout_secs: u64,
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
    /// Upper bound on a whole blocking operation, enforced by the daemon.
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: usize,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_auth_timeout_secs() -> u64 {
    15
}
fn default_io_timeout_secs() -> u64 {
    30
}
fn default_operation_timeout_secs() -> u64 {
    120
}
fn default_max_attachment_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_limit() -> usize {
    20
}
fn default_max_limit() -> usize {
    200
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            auth_timeout_secs: default_auth_timeout_secs(),
            io_timeout_secs: default_io_timeout_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
            max_attachment_bytes: default_max_attachment_bytes(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

impl MailConfig {
    pub fn timeouts(&self) -> TransportTimeouts {
        TransportTimeouts {
            connect: Duration::from_secs(self.connect_timeout_secs),
            auth: Duration::from_secs(self.auth_timeout_secs),
            io: Duration::from_secs(self.io_timeout_secs),
        }
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            default_limit: self.default_limit,
            max_limit: self.max_limit,
            max_attachment_bytes: self.max_attachment_bytes,
        }
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

/// Per-operation cache lifetimes, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_connection_ttl_secs")]
    pub connection_ttl_secs: u64,
    #[serde(default = "default_failed_connection_ttl_secs")]
    pub failed_connection_ttl_secs: u64,
    #[serde(default = "default_fetch_ttl_secs")]
    pub fetch_ttl_secs: u64,
    #[serde(default = "default_detection_ttl_secs")]
    pub detection_ttl_secs: u64,
    #[serde(default = "default_keywords_ttl_secs")]
    pub keywords_ttl_secs: u64,
    /// 0 disables the background sweeper.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_connection_ttl_secs() -> u64 {
    300
}
fn default_failed_connection_ttl_secs() -> u64 {
    30
}
fn default_fetch_ttl_secs() -> u64 {
    300
}
fn default_detection_ttl_secs() -> u64 {
    300
}
fn default_keywords_ttl_secs() -> u64 {
    3600
}
fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            connection_ttl_secs: default_connection_ttl_secs(),
            failed_connection_ttl_secs: default_failed_connection_ttl_secs(),
            fetch_ttl_secs: default_fetch_ttl_secs(),
            detection_ttl_secs: default_detection_ttl_secs(),
            keywords_ttl_secs: default_keywords_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CacheConfig {
    pub fn connection_ttl(&self) -> Duration {
        Duration::from_secs(self.connection_ttl_secs)
    }
    pub fn failed_connection_ttl(&self) -> Duration {
        Duration::from_secs(self.failed_connection_ttl_secs)
    }
    pub fn fetch_ttl(&self) -> Duration {
        Duration::from_secs(self.fetch_ttl_secs)
    }
    pub fn detection_ttl(&self) -> Duration {
        Duration::from_secs(self.detection_ttl_secs)
    }
    pub fn keywords_ttl(&self) -> Duration {
        Duration::from_secs(self.keywords_ttl_secs)
    }
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_enabled")]
    pub enabled: bool,
    /// Defaults to `$XDG_DATA_HOME/invoice-radar`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Keep decoded attachment bytes in saved messages.
    #[serde(default)]
    pub persist_attachment_content: bool,
}

fn default_storage_enabled() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: default_storage_enabled(),
            data_dir: None,
            persist_attachment_content: false,
        }
    }
}

// ── RadarConfig ─────────────────────────────────────────────────────────

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RadarConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl RadarConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&content, path)
    }

    /// Load `path` if it exists, otherwise defaults.
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn parse(content: &str, path: &Path) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = self.to_toml(path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Render as TOML.
    pub fn to_toml(&self, path: &Path) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.server.port == 0 {
            return Err(invalid("server.port", "must be non-zero"));
        }
        if self.mail.default_limit == 0 || self.mail.max_limit == 0 {
            return Err(invalid("mail.default_limit", "limits must be at least 1"));
        }
        if self.mail.operation_timeout_secs == 0 {
            return Err(invalid("mail.operation_timeout_secs", "must be non-zero"));
        }
        self.detection
            .validate()
            .map_err(|e| invalid("detection", &e.to_string()))
    }

    /// Apply `INVOICE_RADAR_BIND` / `INVOICE_RADAR_PORT`.
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        self.apply_overrides(
            std::env::var(ENV_BIND).ok(),
            std::env::var(ENV_PORT).ok(),
        )
    }

    fn apply_overrides(&mut self, bind: Option<String>, port: Option<String>) -> ConfigResult<()> {
        if let Some(bind) = bind.filter(|b| !b.trim().is_empty()) {
            self.server.bind = bind.trim().to_string();
        }
        if let Some(port) = port {
            self.server.port = match port.trim().parse::<u16>() {
                Ok(p) if p != 0 => p,
                _ => return Err(invalid(ENV_PORT, &format!("\"{port}\" is not a valid port"))),
            };
        }
        Ok(())
    }

    /// The data directory, explicit or XDG-derived.
    pub fn data_dir(&self, paths: Option<&RadarPaths>) -> Option<PathBuf> {
        self.storage
            .data_dir
            .clone()
            .or_else(|| paths.map(|p| p.data_dir.clone()))
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        message: message.to_string(),
    }
}
