//! Connection descriptor for one device.

use reqwest::Url;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::utils::TargetError;

/// How backup files are pulled off the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// One SCP stream over SSH
    #[default]
    Scp,
    /// Repeated HTTP reads of fixed-size chunks
    Chunked,
}

/// Immutable per-device settings, owned by exactly one pipeline task.
#[derive(Clone)]
pub struct DeviceTarget {
    pub base_url: Url,
    pub username: String,
    pub password: String,
    pub encryption_key: String,
    pub timeout: Duration,
    pub metadata: HashMap<String, String>,
    pub transfer: TransferMode,
    pub ssh_port: u16,
}

impl DeviceTarget {
    /// Build a target from a host that may or may not carry a scheme.
    ///
    /// Plain hosts (`10.0.0.1`, `router:8080`) are reached over `http://`.
    pub fn new(
        host: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, TargetError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(TargetError::EmptyHost);
        }

        let raw = if host.contains("://") {
            host.to_string()
        } else {
            format!("http://{}", host)
        };
        let mut base_url = Url::parse(&raw).map_err(|e| TargetError::InvalidHost {
            host: host.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(TargetError::UnsupportedScheme {
                host: host.to_string(),
                scheme: base_url.scheme().to_string(),
            });
        }
        if base_url.host_str().is_none() {
            return Err(TargetError::InvalidHost {
                host: host.to_string(),
                reason: "missing host name".to_string(),
            });
        }
        base_url.set_path("/");
        base_url.set_query(None);
        // Credentials travel as basic auth, never in the URL
        let _ = base_url.set_username("");
        let _ = base_url.set_password(None);

        Ok(Self {
            base_url,
            username: username.into(),
            password: password.into(),
            encryption_key: String::new(),
            timeout: super::DEFAULT_DEVICE_TIMEOUT,
            metadata: HashMap::new(),
            transfer: TransferMode::default(),
            ssh_port: 22,
        })
    }

    pub fn with_encryption_key(mut self, key: impl Into<String>) -> Self {
        self.encryption_key = key.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_transfer(mut self, transfer: TransferMode, ssh_port: u16) -> Self {
        self.transfer = transfer;
        self.ssh_port = ssh_port;
        self
    }

    /// Host (and port, if non-default) used in logs.
    pub fn host(&self) -> String {
        let host = self.base_url.host_str().unwrap_or_default();
        match self.base_url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Bare host name for the SSH connection.
    pub fn ssh_host(&self) -> &str {
        self.base_url.host_str().unwrap_or_default()
    }
}

impl fmt::Debug for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceTarget")
            .field("base_url", &self.base_url.as_str())
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("encrypted", &!self.encryption_key.is_empty())
            .field("timeout", &self.timeout)
            .field("metadata", &self.metadata)
            .field("transfer", &self.transfer)
            .field("ssh_port", &self.ssh_port)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_host_defaults_to_http() {
        let target = DeviceTarget::new("192.168.88.1", "admin", "pw").unwrap();
        assert_eq!(target.base_url.as_str(), "http://192.168.88.1/");
        assert_eq!(target.host(), "192.168.88.1");
        assert_eq!(target.ssh_host(), "192.168.88.1");
        assert_eq!(target.transfer, TransferMode::Scp);
        assert_eq!(target.ssh_port, 22);
    }

    #[test]
    fn test_explicit_scheme_and_port() {
        let target = DeviceTarget::new("https://router.lan:8443/ignored?x=1", "admin", "pw").unwrap();
        assert_eq!(target.base_url.as_str(), "https://router.lan:8443/");
        assert_eq!(target.host(), "router.lan:8443");
        assert_eq!(target.ssh_host(), "router.lan");
    }

    #[test]
    fn test_invalid_hosts_rejected() {
        assert_eq!(
            DeviceTarget::new("", "a", "b").unwrap_err(),
            TargetError::EmptyHost
        );
        assert_eq!(
            DeviceTarget::new("   ", "a", "b").unwrap_err(),
            TargetError::EmptyHost
        );
        assert!(matches!(
            DeviceTarget::new("ftp://router", "a", "b").unwrap_err(),
            TargetError::UnsupportedScheme { scheme, .. } if scheme == "ftp"
        ));
        assert!(matches!(
            DeviceTarget::new("http://", "a", "b").unwrap_err(),
            TargetError::InvalidHost { .. }
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let target = DeviceTarget::new("router", "admin", "hunter2")
            .unwrap()
            .with_encryption_key("topsecret");
        let printed = format!("{:?}", target);
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("topsecret"));
    }
}
