//! Error kinds shared by every pipeline stage.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    /// Connection failure or non-200 response from the device
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Expected file or metadata is missing on the device
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Destination error: {0}")]
    Destination(#[from] StoreError),

    #[error("Cancelled: {0}")]
    Cancelled(CancelReason),
}

/// Failures of an artifact store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cannot create destination {path}: {source}")]
    CreateDestination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transfer of {name} failed: {message}")]
    Transfer { name: String, message: String },

    #[error("unsupported destination: {0}")]
    UnsupportedScheme(String),
}

/// A configured device that cannot be turned into a target.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("empty host")]
    EmptyHost,

    #[error("invalid host {host}: {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("invalid host {host}: unsupported scheme {scheme}")]
    UnsupportedScheme { host: String, scheme: String },
}

/// Why a device pipeline stopped before reaching a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    TimedOut(Duration),
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::TimedOut(after) => write!(f, "timed out after {:?}", after),
            CancelReason::Shutdown => write!(f, "shutdown requested"),
        }
    }
}

impl BackupError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BackupError::Cancelled(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BackupError::Cancelled(CancelReason::TimedOut(_)))
    }
}

impl From<reqwest::Error> for BackupError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackupError::Decode(e.to_string())
        } else {
            BackupError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(e: serde_json::Error) -> Self {
        BackupError::Decode(e.to_string())
    }
}

impl From<ssh2::Error> for BackupError {
    fn from(e: ssh2::Error) -> Self {
        BackupError::Transport(format!("ssh: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_reason_display() {
        let timed_out = BackupError::Cancelled(CancelReason::TimedOut(Duration::from_secs(5)));
        assert_eq!(timed_out.to_string(), "Cancelled: timed out after 5s");
        assert!(timed_out.is_timeout());

        let shutdown = BackupError::Cancelled(CancelReason::Shutdown);
        assert!(shutdown.is_cancelled());
        assert!(!shutdown.is_timeout());
    }

    #[test]
    fn test_store_error_kinds_are_distinct() {
        let create = StoreError::CreateDestination {
            path: PathBuf::from("/nope"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        let scheme = StoreError::UnsupportedScheme("ftp://host".into());

        assert!(create.to_string().starts_with("cannot create destination /nope"));
        assert_eq!(scheme.to_string(), "unsupported destination: ftp://host");
        assert!(matches!(BackupError::from(scheme), BackupError::Destination(_)));
    }

    #[test]
    fn test_target_error_display() {
        let err = TargetError::UnsupportedScheme {
            host: "ftp://router".into(),
            scheme: "ftp".into(),
        };
        assert_eq!(err.to_string(), "invalid host ftp://router: unsupported scheme ftp");
        assert_eq!(TargetError::EmptyHost.to_string(), "empty host");
    }
}
