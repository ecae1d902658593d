//! Transferable file model and content checksums.
//!
//! An [`Artifact`] is produced once per stage output and never mutated
//! afterwards. Both checksums are computed at construction time so every
//! later stage (change detection, store dedup, metadata) reads the same value.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::utils::BackupError;

/// Outcome of a single pipeline stage invocation.
pub type StageResult<T = Artifact> = std::result::Result<T, BackupError>;

/// A named file fetched from a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    name: String,
    contents: Bytes,
    checksum: String,
    checksum_excluding_header: Option<String>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, contents: impl Into<Bytes>) -> Self {
        let contents = contents.into();
        Self {
            name: name.into(),
            checksum: checksum_of(&contents),
            checksum_excluding_header: checksum_excluding_header(&contents),
            contents,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contents(&self) -> &Bytes {
        &self.contents
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Base64 SHA-256 of the full contents.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Base64 SHA-256 of everything after the first line terminator.
    ///
    /// `None` when the contents hold no line terminator at all.
    pub fn checksum_excluding_header(&self) -> Option<&str> {
        self.checksum_excluding_header.as_deref()
    }
}

/// Base64-encoded SHA-256 digest of `contents`.
pub fn checksum_of(contents: &[u8]) -> String {
    BASE64.encode(Sha256::digest(contents))
}

/// Digest of `contents` with the first line (terminator included) removed.
///
/// Devices stamp the export's first line with its generation time, which
/// would otherwise make every export look changed.
pub fn checksum_excluding_header(contents: &[u8]) -> Option<String> {
    let first_newline = contents.iter().position(|&b| b == b'\n')?;
    Some(checksum_of(&contents[first_newline + 1..]))
}
