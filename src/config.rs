use crate::error::ProxyError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:443";
pub const DEFAULT_CERTIFICATE: &str = "cert/simple_network_relay.crt";
pub const DEFAULT_PRIVATE_KEY: &str = "cert/simple_network_relay.key";
pub const DEFAULT_AUTH_SECRET: &str = "secret";
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RESOLVE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutputType {
    Stdout,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogTarget {
    #[serde(rename = "type")]
    pub output_type: LogOutputType,
    pub path: Option<PathBuf>,
    /// Overrides the global level for this target.
    pub level: Option<LogLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: Option<LogLevel>,
    pub format: Option<LogFormat>,
    pub targets: Option<Vec<LogTarget>>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Some(LogLevel::Info),
            format: Some(LogFormat::Text),
            targets: Some(vec![LogTarget {
                output_type: LogOutputType::Stdout,
                path: None,
                level: None,
            }]),
        }
    }
}

/// Relay configuration. Everything except the listen address is optional
/// in the file and falls back to the defaults above.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_certificate")]
    pub certificate: String,
    #[serde(default = "default_private_key")]
    pub private_key: String,
    /// NSS key log output for traffic decryption; disabled when unset.
    #[serde(default)]
    pub key_log_file: Option<String>,
    #[serde(default = "default_auth_secret")]
    pub auth_secret: String,
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    #[serde(default)]
    pub resolve_timeout_secs: Option<u64>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

fn default_certificate() -> String {
    DEFAULT_CERTIFICATE.to_string()
}

fn default_private_key() -> String {
    DEFAULT_PRIVATE_KEY.to_string()
}

fn default_auth_secret() -> String {
    DEFAULT_AUTH_SECRET.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 443)),
            certificate: default_certificate(),
            private_key: default_private_key(),
            key_log_file: None,
            auth_secret: default_auth_secret(),
            idle_timeout_secs: Some(DEFAULT_IDLE_TIMEOUT_SECS),
            resolve_timeout_secs: Some(DEFAULT_RESOLVE_TIMEOUT_SECS),
            connect_timeout_secs: Some(DEFAULT_CONNECT_TIMEOUT_SECS),
            logging: None,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, ProxyError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProxyError::Config(format!("Failed to read {}: {}", path, e)))?;
        serde_json::from_str(&content)
            .map_err(|e| ProxyError::Config(format!("Failed to parse {}: {}", path, e)))
    }

    pub fn to_file(&self, path: &str) -> Result<(), ProxyError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ProxyError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS))
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs.unwrap_or(DEFAULT_RESOLVE_TIMEOUT_SECS))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS))
    }

    pub fn validate(&self) -> Result<(), ProxyError> {
        // An empty secret would admit requests that carry no auth header at all.
        if self.auth_secret.is_empty() {
            return Err(ProxyError::Config("auth_secret must not be empty".to_string()));
        }
        if self.certificate.is_empty() || self.private_key.is_empty() {
            return Err(ProxyError::Config(
                "certificate and private_key paths are required".to_string(),
            ));
        }

        let timeouts = [
            ("idle_timeout_secs", self.idle_timeout_secs),
            ("resolve_timeout_secs", self.resolve_timeout_secs),
            ("connect_timeout_secs", self.connect_timeout_secs),
        ];
        for (name, value) in timeouts {
            if value == Some(0) {
                return Err(ProxyError::Config(format!("{} must be greater than 0", name)));
            }
        }

        if let Some(targets) = self.logging.as_ref().and_then(|l| l.targets.as_ref()) {
            for target in targets {
                if matches!(target.output_type, LogOutputType::File) && target.path.is_none() {
                    return Err(ProxyError::Config(
                        "File log target requires a path".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }
}
