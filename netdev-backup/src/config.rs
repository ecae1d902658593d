//! Configuration management.
//!
//! Layered YAML files merged with the `config` crate, then environment
//! variables prefixed with `NETDEV_BACKUP` (`__` separates nesting levels).

use config::{Environment, File, FileFormat};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::error;

use crate::device::{DeviceTarget, TransferMode, DEFAULT_DEVICE_TIMEOUT, DEFAULT_HTTP_TIMEOUT};
use crate::utils::TargetError;

/// Base file when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Optional overrides merged on top of the base file, in order
pub const OVERRIDE_CONFIG_FILES: [&str; 2] = ["/etc/netdev-backup/config.yaml", ".local/config.yaml"];

pub const ENV_PREFIX: &str = "NETDEV_BACKUP";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// `s3://bucket/prefix`, `file:///dir` or a plain directory
    pub destination: String,

    #[serde(default)]
    pub s3: S3Settings,

    #[serde(default)]
    pub log: LogConfig,

    /// Timeout for a single HTTP request to a device
    #[serde(default = "default_http_timeout", deserialize_with = "duration")]
    pub http_timeout: Duration,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Settings {
    /// Custom endpoint (MinIO, Ceph, ...); AWS when absent
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub access_key: Option<String>,

    #[serde(default)]
    pub secret_key: Option<String>,

    #[serde(default = "default_region")]
    pub region: String,

    /// Path-style addressing; AWS uses virtual-hosted style
    #[serde(default)]
    pub path_style: bool,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            endpoint: None,
            access_key: None,
            secret_key: None,
            region: default_region(),
            path_style: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Address, optionally with `http://` or `https://`
    pub host: String,

    pub username: String,

    pub password: String,

    /// Backup encryption password; empty disables encryption
    #[serde(default)]
    pub encryption_key: String,

    /// Deadline for the whole device pipeline
    #[serde(default = "default_device_timeout", deserialize_with = "duration")]
    pub timeout: Duration,

    #[serde(default)]
    pub transfer: TransferMode,

    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// Attached to every uploaded object
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_http_timeout() -> Duration {
    DEFAULT_HTTP_TIMEOUT
}

fn default_device_timeout() -> Duration {
    DEFAULT_DEVICE_TIMEOUT
}

fn default_ssh_port() -> u16 {
    22
}

impl Config {
    /// Load and merge every configuration source.
    ///
    /// An explicit `path` must exist; the default base file may be missing.
    pub fn load(path: Option<&Path>, log_level: Option<&str>) -> anyhow::Result<Self> {
        let base = match path {
            Some(path) => File::from(path).required(true),
            None => File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false),
        };

        let mut builder = config::Config::builder().add_source(base);
        for extra in OVERRIDE_CONFIG_FILES {
            builder = builder.add_source(File::new(extra, FileFormat::Yaml).required(false));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .set_override_option("log.level", log_level)?
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Parse a single YAML document, without files or environment.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Valid device targets; invalid entries are logged and skipped.
    pub fn targets(&self) -> Vec<DeviceTarget> {
        self.devices
            .iter()
            .filter_map(|device| match device.to_target() {
                Ok(target) => Some(target),
                Err(e) => {
                    error!(host = %device.host, "skipping device: {}", e);
                    None
                }
            })
            .collect()
    }
}

impl DeviceConfig {
    pub fn to_target(&self) -> Result<DeviceTarget, TargetError> {
        let timeout = if self.timeout.is_zero() {
            DEFAULT_DEVICE_TIMEOUT
        } else {
            self.timeout
        };

        Ok(DeviceTarget::new(&self.host, &self.username, &self.password)?
            .with_encryption_key(&self.encryption_key)
            .with_timeout(timeout)
            .with_metadata(self.metadata.clone())
            .with_transfer(self.transfer, self.ssh_port))
    }
}

/// Accepts whole seconds (`30`) or a number with a unit (`500ms`, `30s`, `5m`, `1h`).
fn duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration: {:?}", text))?;

    match unit.trim() {
        "" | "s" => Ok(Duration::from_secs(value)),
        "ms" => Ok(Duration::from_millis(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        other => Err(format!("invalid duration unit {:?} in {:?}", other, text)),
    }
}
