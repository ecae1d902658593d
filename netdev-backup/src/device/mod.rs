//! Remote device client.
//!
//! Talks to the device REST API for identity discovery, configuration export
//! and backup creation, and pulls the resulting files with a [`FileTransfer`].
//! Every HTTP call sends `Content-Type: application/json` and treats any
//! status other than 200 as a failure.

pub mod requests;
pub mod target;
pub mod transfer;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, Response, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::artifact::{Artifact, StageResult};
use crate::utils::BackupError;
use requests::{BackupRequest, ExportRequest, IdentityResponse};

pub use target::{DeviceTarget, TransferMode};
pub use transfer::{ChunkedTransfer, FileTransfer, ScpTransfer};

pub const IDENTITY_PATH: &str = "rest/system/identity";
pub const EXPORT_PATH: &str = "rest/export";
pub const BACKUP_PATH: &str = "rest/system/backup/save";
pub const FILE_INFO_PATH: &str = "rest/file";
pub const FILE_READ_PATH: &str = "rest/file/read";

const JSON_CONTENT_TYPE: &str = "application/json";

/// Default per-device deadline when the configuration gives none
pub const DEFAULT_DEVICE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a single HTTP request
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Artifact name of the configuration export for `identity`.
pub fn export_file_name(identity: &str) -> String {
    format!("{}.config.rsc", identity)
}

/// Artifact name of the full backup for `identity`.
pub fn backup_file_name(identity: &str) -> String {
    format!("{}.backup", identity)
}

/// Reject identities that cannot be used as a bare file name.
///
/// The identity becomes a local path component, an object key suffix and an
/// SCP remote path, so separators and parent references are refused.
pub fn validate_identity(name: &str) -> StageResult<()> {
    if name.is_empty() {
        return Err(BackupError::Decode("device reported an empty identity".into()));
    }
    if name.contains(['/', '\\']) || name.contains("..") || name.chars().any(char::is_control) {
        return Err(BackupError::Decode(format!(
            "device reported an unusable identity: {:?}",
            name
        )));
    }
    Ok(())
}

/// Authenticated HTTP access to one device's REST API.
#[derive(Clone)]
pub struct DeviceApi {
    http: reqwest::Client,
    target: DeviceTarget,
}

impl DeviceApi {
    pub fn new(target: DeviceTarget, http_timeout: Duration) -> StageResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| BackupError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http, target })
    }

    pub fn target(&self) -> &DeviceTarget {
        &self.target
    }

    pub async fn get(&self, path: &str, query: &[(&str, &str)]) -> StageResult<Response> {
        self.send(Method::GET, path, query, None).await
    }

    pub async fn post<B: Serialize>(&self, path: &str, body: &B) -> StageResult<Response> {
        let body = serde_json::to_vec(body)
            .map_err(|e| BackupError::Decode(format!("failed to encode request body: {}", e)))?;
        self.send(Method::POST, path, &[], Some(body)).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Vec<u8>>,
    ) -> StageResult<Response> {
        let url = self
            .target
            .base_url
            .join(path)
            .map_err(|e| BackupError::Transport(format!("invalid request path {}: {}", path, e)))?;

        let mut request = self
            .http
            .request(method.clone(), url)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .basic_auth(&self.target.username, Some(&self.target.password));
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BackupError::Transport(format!("{} {} failed: {}", method, path, e)))?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!(host = %self.target.host(), %status, "{} {} rejected", method, path);
            return Err(BackupError::Transport(format!(
                "{} {} returned status: {}",
                method, path, status
            )));
        }

        Ok(response)
    }
}

/// Issues the device-side operations of one backup run.
///
/// Calls must not overlap for the same device; the orchestrator awaits each
/// one before starting the next.
pub struct DeviceClient {
    api: DeviceApi,
    transfer: Box<dyn FileTransfer>,
}

impl DeviceClient {
    /// Build a client using the download method configured on the target.
    pub fn new(target: DeviceTarget, http_timeout: Duration) -> StageResult<Self> {
        let api = DeviceApi::new(target, http_timeout)?;
        let transfer: Box<dyn FileTransfer> = match api.target().transfer {
            TransferMode::Scp => Box::new(ScpTransfer::new(api.target())),
            TransferMode::Chunked => Box::new(ChunkedTransfer::new(api.clone())),
        };
        Ok(Self { api, transfer })
    }

    pub fn target(&self) -> &DeviceTarget {
        self.api.target()
    }

    /// Ask the device for its name.
    pub async fn fetch_identity(&self) -> StageResult<String> {
        debug!("requesting device identity");
        let body = self.api.get(IDENTITY_PATH, &[]).await?.bytes().await?;
        let identity: IdentityResponse = serde_json::from_slice(&body).map_err(|e| {
            BackupError::Decode(format!("failed to decode identity response: {}", e))
        })?;

        let name = identity.name.trim();
        validate_identity(name)?;
        debug!(identity = %name, "discovered device identity");
        Ok(name.to_string())
    }

    /// Have the device write its running configuration to a file.
    ///
    /// Returns the name of the file; its contents are fetched with
    /// [`DeviceClient::download`].
    pub async fn trigger_export(&self, identity: &str) -> StageResult<String> {
        let file = export_file_name(identity);
        debug!(identity, file = %file, "requesting configuration export");
        self.api.post(EXPORT_PATH, &ExportRequest { file: &file }).await?;
        Ok(file)
    }

    /// Have the device write a full backup image.
    ///
    /// An empty `encryption_key` turns encryption off explicitly.
    pub async fn trigger_backup(&self, identity: &str, encryption_key: &str) -> StageResult<String> {
        if encryption_key.is_empty() {
            warn!(identity, "encryption disabled (no encryption key)");
        }
        debug!(identity, "requesting backup");
        self.api
            .post(BACKUP_PATH, &BackupRequest::new(identity, encryption_key))
            .await?;
        Ok(backup_file_name(identity))
    }

    /// Fetch a file from the device.
    ///
    /// `deadline` is forwarded to transports that cannot be cancelled by
    /// dropping their future.
    pub async fn download(&self, file_name: &str, deadline: Instant) -> StageResult<Artifact> {
        let contents = self.transfer.fetch(file_name, deadline).await?;
        debug!(file = %file_name, bytes = contents.len(), "downloaded");
        Ok(Artifact::new(file_name, contents))
    }
}
