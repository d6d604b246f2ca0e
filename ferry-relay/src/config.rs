//! Configuration loading for ferry-relay.
//!
//! Configuration is loaded from a TOML file (default: `ferry.toml`).
//! Every section and every field is optional.

use ferry_core::SaveMinutes;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for ferry-relay.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Public-facing settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// SSH front-end configuration.
    #[serde(default)]
    pub ssh: SshConfig,
    /// HTTP endpoints configuration.
    #[serde(default)]
    pub http: HttpConfig,
    /// Upload handling configuration.
    #[serde(default)]
    pub upload: UploadConfig,
    /// Rate limiting configuration.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Maintenance task configuration.
    #[serde(default)]
    pub cleanup: CleanupConfig,
    /// SSH key fingerprints linked to verified subdomains.
    #[serde(default)]
    pub accounts: Vec<AccountEntry>,
}

/// Public-facing settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Base URL links are built from (default: http://localhost:8080).
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

/// SSH front-end configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    /// Bind address for the SSH listener (default: 0.0.0.0:2222).
    #[serde(default = "default_ssh_bind")]
    pub bind_address: String,
    /// OpenSSH private host key. A throwaway Ed25519 key is generated when unset.
    pub host_key_path: Option<PathBuf>,
    /// Drop SSH connections idle for this many seconds (default: 3900).
    /// Must exceed the longest tunnel lifetime.
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Bind address for HTTP server (default: 0.0.0.0:8080).
    #[serde(default = "default_http_bind")]
    pub bind_address: String,
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// How direct downloads are packaged (default: zip).
    #[serde(default)]
    pub packaging: Packaging,
}

/// Download packaging format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Packaging {
    /// A zip archive holding one entry.
    #[default]
    Zip,
    /// The uploaded bytes as-is.
    Raw,
}

/// How the upload grace window is measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutMode {
    /// The window restarts with every received chunk.
    #[default]
    Idle,
    /// The whole upload must finish within the window.
    Total,
}

/// Upload handling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Grace window in seconds for receiving upload data (default: 3).
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    /// Whether the grace window covers each chunk or the whole upload.
    #[serde(default)]
    pub timeout_mode: TimeoutMode,
    /// Maximum upload size in bytes (default: 512MB).
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    /// Tunnel lifetime when the sender gives no `t=` (default: 15).
    #[serde(default = "default_ttl_minutes")]
    pub default_ttl_minutes: u32,
    /// Characters per generated link (default: 7).
    #[serde(default = "default_link_length")]
    pub link_length: usize,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum uploads started per source IP per minute (default: 30).
    #[serde(default = "default_uploads_per_minute")]
    pub uploads_per_minute: u32,
    /// Cap on simultaneously active tunnels (default: unlimited).
    pub max_active_tunnels: Option<usize>,
}

/// Maintenance task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Maintenance interval in seconds (default: 300).
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    /// Enable maintenance task (default: true).
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,
}

/// A verified sender: SSH key fingerprint to subdomain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccountEntry {
    /// SHA-256 fingerprint, base64, without the `SHA256:` prefix.
    pub fingerprint: String,
    /// Verified subdomain shown as the sender.
    pub subdomain: String,
}

// Default value functions
fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_ssh_bind() -> String {
    "0.0.0.0:2222".to_string()
}

fn default_inactivity_timeout() -> u64 {
    3900 // 65 minutes
}

fn default_http_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_grace_secs() -> u64 {
    3
}

fn default_max_bytes() -> usize {
    512 * 1024 * 1024 // 512MB
}

fn default_ttl_minutes() -> u32 {
    SaveMinutes::DEFAULT.get()
}

fn default_link_length() -> usize {
    ferry_core::DEFAULT_LINK_LENGTH
}

fn default_uploads_per_minute() -> u32 {
    30
}

fn default_cleanup_interval() -> u64 {
    300 // 5 minutes
}

fn default_cleanup_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            bind_address: default_ssh_bind(),
            host_key_path: None,
            inactivity_timeout_secs: default_inactivity_timeout(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_http_bind(),
            metrics_enabled: default_metrics_enabled(),
            packaging: Packaging::default(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            grace_secs: default_grace_secs(),
            timeout_mode: TimeoutMode::default(),
            max_bytes: default_max_bytes(),
            default_ttl_minutes: default_ttl_minutes(),
            link_length: default_link_length(),
        }
    }
}

impl UploadConfig {
    /// The grace window as a duration.
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    /// The default tunnel lifetime.
    ///
    /// Falls back to 15 minutes for out-of-range values; [`Config::validate`]
    /// rejects those at startup.
    pub fn default_ttl(&self) -> SaveMinutes {
        SaveMinutes::new(self.default_ttl_minutes).unwrap_or_default()
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            uploads_per_minute: default_uploads_per_minute(),
            max_active_tunnels: None,
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            enabled: default_cleanup_enabled(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            ssh: SshConfig::default(),
            http: HttpConfig::default(),
            upload: UploadConfig::default(),
            limits: LimitsConfig::default(),
            cleanup: CleanupConfig::default(),
            accounts: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot check on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if SaveMinutes::new(self.upload.default_ttl_minutes).is_none() {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "upload.default_ttl_minutes must be between {} and {}",
                    SaveMinutes::MIN,
                    SaveMinutes::MAX
                ),
            });
        }
        if self.upload.grace_secs == 0 {
            return Err(ConfigError::Invalid {
                reason: "upload.grace_secs must be > 0".to_string(),
            });
        }
        if self.limits.uploads_per_minute == 0 {
            return Err(ConfigError::Invalid {
                reason: "limits.uploads_per_minute must be > 0".to_string(),
            });
        }
        if self.cleanup.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                reason: "cleanup.interval_secs must be > 0".to_string(),
            });
        }
        let longest_ttl = u64::from(SaveMinutes::MAX) * 60;
        if self.ssh.inactivity_timeout_secs <= longest_ttl {
            return Err(ConfigError::Invalid {
                reason: format!("ssh.inactivity_timeout_secs must be > {longest_ttl}"),
            });
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}
