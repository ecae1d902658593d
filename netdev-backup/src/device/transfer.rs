//! Pulling files off a device.
//!
//! Two variants exist: a single SCP stream over SSH, and a sequence of
//! fixed-size HTTP reads for devices where SSH is not reachable.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::requests::{FileInfo, FileReadRequest};
use super::{DeviceApi, DeviceTarget, FILE_INFO_PATH, FILE_READ_PATH};
use crate::artifact::StageResult;
use crate::utils::BackupError;

/// Chunk size used by the HTTP read endpoint (10 KiB)
pub const CHUNK_SIZE: u64 = 10 * 1024;

/// Largest file accepted from a device (256 MiB); anything bigger is a bogus
/// size report rather than a configuration or backup image.
pub const MAX_FILE_SIZE: u64 = 256 * 1024 * 1024;

/// Floor for the SSH session timeout so a nearly expired deadline still
/// gets a usable session.
const MIN_SSH_TIMEOUT: Duration = Duration::from_millis(500);

#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Return the full contents of `file_name`.
    async fn fetch(&self, file_name: &str, deadline: Instant) -> StageResult<Bytes>;
}

/// Password-authenticated SCP download.
///
/// The device host key is never verified: devices present ephemeral or
/// self-signed keys.
pub struct ScpTransfer {
    host: String,
    port: u16,
    username: String,
    password: String,
}

impl ScpTransfer {
    pub fn new(target: &DeviceTarget) -> Self {
        Self {
            host: target.ssh_host().to_string(),
            port: target.ssh_port,
            username: target.username.clone(),
            password: target.password.clone(),
        }
    }
}

#[async_trait]
impl FileTransfer for ScpTransfer {
    async fn fetch(&self, file_name: &str, deadline: Instant) -> StageResult<Bytes> {
        let host = self.host.clone();
        let port = self.port;
        let username = self.username.clone();
        let password = self.password.clone();
        let file_name = file_name.to_string();
        // Best effort: the blocking session cannot be interrupted from here,
        // so bound each of its operations by what is left of the deadline.
        let timeout = deadline
            .saturating_duration_since(Instant::now())
            .max(MIN_SSH_TIMEOUT);

        let contents = tokio::task::spawn_blocking(move || {
            scp_download(&host, port, &username, &password, &file_name, timeout)
        })
        .await
        .map_err(|e| BackupError::Transport(format!("scp task failed: {}", e)))??;

        Ok(Bytes::from(contents))
    }
}

fn scp_download(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
    file_name: &str,
    timeout: Duration,
) -> StageResult<Vec<u8>> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| BackupError::Transport(format!("failed to resolve {}:{}: {}", host, port, e)))?
        .next()
        .ok_or_else(|| BackupError::Transport(format!("no address for {}:{}", host, port)))?;

    let tcp = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|e| BackupError::Transport(format!("failed to SSH to {}: {}", addr, e)))?;

    let mut sess = ssh2::Session::new()?;
    sess.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
    sess.set_tcp_stream(tcp);
    sess.handshake()?;

    sess.userauth_password(username, password)
        .map_err(|e| BackupError::Transport(format!("SSH authentication failed: {}", e)))?;
    if !sess.authenticated() {
        return Err(BackupError::Transport("SSH authentication failed".into()));
    }

    let (mut channel, stat) = sess.scp_recv(Path::new(file_name))?;
    let expected = check_file_size(file_name, stat.size())?;
    let mut contents = Vec::with_capacity(expected as usize);
    channel
        .read_to_end(&mut contents)
        .map_err(|e| BackupError::Transport(format!("failed to SCP {}: {}", file_name, e)))?;

    channel.send_eof()?;
    channel.wait_eof()?;
    channel.close()?;
    channel.wait_close()?;

    if contents.len() as u64 != expected {
        return Err(BackupError::Transport(format!(
            "short SCP read of {}: {} of {} bytes",
            file_name,
            contents.len(),
            expected
        )));
    }

    debug!(file = %file_name, bytes = contents.len(), "SCP download complete");
    Ok(contents)
}

/// HTTP download in fixed-size chunks.
///
/// Chunks are requested one after another with increasing offsets and each
/// is written at its offset in a buffer sized up front, so the assembled file
/// never depends on arrival order.
pub struct ChunkedTransfer {
    api: DeviceApi,
    chunk_size: u64,
}

impl ChunkedTransfer {
    pub fn new(api: DeviceApi) -> Self {
        Self::with_chunk_size(api, CHUNK_SIZE)
    }

    pub fn with_chunk_size(api: DeviceApi, chunk_size: u64) -> Self {
        Self {
            api,
            chunk_size: chunk_size.max(1),
        }
    }

    async fn file_size(&self, file_name: &str) -> StageResult<u64> {
        let body = self
            .api
            .get(FILE_INFO_PATH, &[("name", file_name)])
            .await?
            .bytes()
            .await?;
        let entries: Vec<FileInfo> = serde_json::from_slice(&body)
            .map_err(|e| BackupError::Decode(format!("failed to decode file info: {}", e)))?;

        let size = entries
            .first()
            .map(|entry| entry.size)
            .ok_or_else(|| BackupError::NotFound(format!("file {} not found on device", file_name)))?;
        check_file_size(file_name, size)
    }
}

#[async_trait]
impl FileTransfer for ChunkedTransfer {
    async fn fetch(&self, file_name: &str, _deadline: Instant) -> StageResult<Bytes> {
        let size = self.file_size(file_name).await?;
        let mut contents = vec![0u8; size as usize];

        for offset in chunk_offsets(size, self.chunk_size) {
            let expected = self.chunk_size.min(size - offset) as usize;
            let request = FileReadRequest {
                file: file_name,
                chunk_size: self.chunk_size,
                offset,
            };
            let chunk = self.api.post(FILE_READ_PATH, &request).await?.bytes().await?;
            if chunk.len() != expected {
                return Err(BackupError::Decode(format!(
                    "chunk of {} at offset {} has {} bytes, expected {}",
                    file_name,
                    offset,
                    chunk.len(),
                    expected
                )));
            }

            let start = offset as usize;
            contents[start..start + expected].copy_from_slice(&chunk);
        }

        debug!(file = %file_name, bytes = size, "chunked download complete");
        Ok(Bytes::from(contents))
    }
}

/// Reject sizes no device file can have before allocating for them.
fn check_file_size(file_name: &str, size: u64) -> StageResult<u64> {
    if size > MAX_FILE_SIZE {
        return Err(BackupError::Decode(format!(
            "device reported {} bytes for {}, limit is {}",
            size, file_name, MAX_FILE_SIZE
        )));
    }
    Ok(size)
}

/// Offsets `0, C, 2C, ...` covering `size` bytes.
pub fn chunk_offsets(size: u64, chunk_size: u64) -> impl Iterator<Item = u64> {
    (0..size).step_by(chunk_size.max(1) as usize)
}
