//! Local directory backend.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{error, info};

use super::{ArtifactStore, StoreOutcome, StoreResult};
use crate::artifact::Artifact;
use crate::utils::StoreError;

/// Writes artifacts to `<dir>/<name>`, overwriting unconditionally.
///
/// There is no cheap metadata lookup here, so no checksum is ever reported
/// and every run with a changed export rewrites both files.
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ArtifactStore for LocalStore {
    async fn put(
        &self,
        artifact: &Artifact,
        _metadata: &HashMap<String, String>,
    ) -> StoreResult<StoreOutcome> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            error!(dir = %self.dir.display(), "failed to create directory: {}", e);
            StoreError::CreateDestination {
                path: self.dir.clone(),
                source: e,
            }
        })?;

        let dest = self.dir.join(artifact.name());
        tokio::fs::write(&dest, artifact.contents())
            .await
            .map_err(|e| StoreError::Transfer {
                name: artifact.name().to_string(),
                message: format!("failed to write {}: {}", dest.display(), e),
            })?;

        info!(path = %dest.display(), bytes = artifact.len(), "artifact saved");
        Ok(StoreOutcome::Written)
    }

    async fn existing_checksum(&self, _name: &str) -> StoreResult<Option<String>> {
        Ok(None)
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}
