//! Artifact destinations.
//!
//! Two interchangeable backends share the [`ArtifactStore`] contract: an
//! object store that skips writes whose checksum already matches, and a local
//! directory that always writes.

pub mod local;
pub mod s3;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::artifact::Artifact;
use crate::config::S3Settings;
use crate::utils::StoreError;

pub use local::LocalStore;
pub use s3::S3Store;

/// Metadata key holding the header-less checksum of a stored export
pub const CHECKSUM_METADATA_KEY: &str = "sha256-excluding-header";

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// What `put` did with an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Written,
    /// Destination already held identical bytes
    Unchanged,
}

/// Shared handle; backends must tolerate concurrent use from every device task.
pub type SharedStore = Arc<dyn ArtifactStore>;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `artifact`, attaching `metadata` where the backend supports it.
    async fn put(
        &self,
        artifact: &Artifact,
        metadata: &HashMap<String, String>,
    ) -> StoreResult<StoreOutcome>;

    /// Header-less checksum recorded for a previously stored artifact.
    async fn existing_checksum(&self, name: &str) -> StoreResult<Option<String>>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

/// Where artifacts go, parsed from the configured destination string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    S3 { bucket: String, prefix: String },
    Local(PathBuf),
}

impl Destination {
    /// Accepts `s3://bucket/prefix`, `file:///dir` or a bare path.
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(StoreError::UnsupportedScheme("no destination configured".into()));
        }

        match raw.split_once("://") {
            Some(("s3", rest)) => {
                let rest = rest.trim_start_matches('/');
                let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
                let prefix = prefix.trim_matches('/');
                if bucket.is_empty() || prefix.is_empty() {
                    return Err(StoreError::UnsupportedScheme(format!(
                        "invalid S3 path: {}, must be in format s3://bucket/prefix",
                        raw
                    )));
                }
                Ok(Destination::S3 {
                    bucket: bucket.to_string(),
                    prefix: prefix.to_string(),
                })
            }
            Some(("file", path)) if !path.is_empty() => Ok(Destination::Local(PathBuf::from(path))),
            Some(_) => Err(StoreError::UnsupportedScheme(raw.to_string())),
            None => Ok(Destination::Local(PathBuf::from(raw))),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::S3 { bucket, prefix } => write!(f, "s3://{}/{}", bucket, prefix),
            Destination::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Open the backend matching `destination`.
pub async fn open(destination: &Destination, s3: &S3Settings) -> StoreResult<SharedStore> {
    let store: SharedStore = match destination {
        Destination::S3 { bucket, prefix } => {
            Arc::new(S3Store::connect(s3, bucket.clone(), prefix.clone()).await?)
        }
        Destination::Local(dir) => Arc::new(LocalStore::new(dir.clone())),
    };
    Ok(store)
}
