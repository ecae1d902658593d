//! Typed request and response bodies for the device REST API.

use serde::{Deserialize, Deserializer, Serialize};

/// `GET rest/system/identity`
#[derive(Debug, Deserialize)]
pub struct IdentityResponse {
    pub name: String,
}

/// `POST rest/export`
#[derive(Debug, Serialize)]
pub struct ExportRequest<'a> {
    pub file: &'a str,
}

/// `POST rest/system/backup/save`
#[derive(Debug, Serialize)]
pub struct BackupRequest<'a> {
    pub name: &'a str,
    #[serde(rename = "dont-encrypt")]
    pub dont_encrypt: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<&'a str>,
}

impl<'a> BackupRequest<'a> {
    /// An empty key means "no encryption", never "encrypt with empty password".
    pub fn new(name: &'a str, encryption_key: &'a str) -> Self {
        if encryption_key.is_empty() {
            Self {
                name,
                dont_encrypt: true,
                password: None,
            }
        } else {
            Self {
                name,
                dont_encrypt: false,
                password: Some(encryption_key),
            }
        }
    }
}

/// One entry of `GET rest/file?name=...`
#[derive(Debug, Deserialize)]
pub struct FileInfo {
    #[serde(deserialize_with = "lenient_u64")]
    pub size: u64,
}

/// `POST rest/file/read`
#[derive(Debug, Serialize)]
pub struct FileReadRequest<'a> {
    pub file: &'a str,
    #[serde(rename = "chunk-size")]
    pub chunk_size: u64,
    pub offset: u64,
}

/// Devices report sizes either as numbers or as decimal strings.
fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(u64),
        Text(String),
    }

    match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(n) => Ok(n),
        NumberOrText::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid size: {:?}", s))),
    }
}
