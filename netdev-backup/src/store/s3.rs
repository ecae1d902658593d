//! S3-compatible object storage backend.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::operation::head_object::HeadObjectOutput;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{ChecksumAlgorithm, ChecksumMode};
use aws_sdk_s3::Client;
use std::collections::HashMap;
use tracing::{debug, info};

use super::{ArtifactStore, StoreOutcome, StoreResult, CHECKSUM_METADATA_KEY};
use crate::artifact::Artifact;
use crate::config::S3Settings;
use crate::utils::StoreError;

/// Object store writer keyed by `<prefix>/<artifact name>`.
///
/// The SDK client is internally reference counted and safe to share between
/// device tasks without extra locking.
pub struct S3Store {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Store {
    pub async fn connect(settings: &S3Settings, bucket: String, prefix: String) -> StoreResult<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()));

        if let (Some(access_key), Some(secret_key)) = (&settings.access_key, &settings.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "netdev-backup-static",
            ));
        }

        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        // MinIO and most self-hosted stores need path-style addressing
        builder = builder.force_path_style(settings.path_style);

        Ok(Self::with_client(Client::from_conf(builder.build()), bucket, prefix))
    }

    pub fn with_client(client: Client, bucket: String, prefix: String) -> Self {
        Self {
            client,
            bucket,
            prefix,
        }
    }

    pub fn object_key(&self, name: &str) -> String {
        object_key(&self.prefix, name)
    }

    /// `HEAD` the object with checksum retrieval enabled; `None` if absent.
    async fn head(&self, key: &str) -> StoreResult<Option<HeadObjectOutput>> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .checksum_mode(ChecksumMode::Enabled)
            .send()
            .await;

        match result {
            Ok(head) => Ok(Some(head)),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(None),
            Err(e) => Err(StoreError::Transfer {
                name: key.to_string(),
                message: format!("head object failed: {}", DisplayErrorContext(&e)),
            }),
        }
    }
}

#[async_trait]
impl ArtifactStore for S3Store {
    async fn put(
        &self,
        artifact: &Artifact,
        metadata: &HashMap<String, String>,
    ) -> StoreResult<StoreOutcome> {
        let key = self.object_key(artifact.name());

        match self.head(&key).await {
            Ok(Some(head)) if head.checksum_sha256() == Some(artifact.checksum()) => {
                info!(bucket = %self.bucket, key = %key, "object already up-to-date (checksum match)");
                return Ok(StoreOutcome::Unchanged);
            }
            Ok(_) => {}
            Err(e) => debug!(bucket = %self.bucket, key = %key, "cannot compare with stored object: {}, proceeding", e),
        }

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(artifact.contents().clone()))
            .checksum_algorithm(ChecksumAlgorithm::Sha256)
            .checksum_sha256(artifact.checksum())
            .set_metadata(Some(upload_metadata(artifact, metadata)))
            .send()
            .await
            .map_err(|e| StoreError::Transfer {
                name: artifact.name().to_string(),
                message: format!("s3 bucket {} upload failure: {}", self.bucket, DisplayErrorContext(&e)),
            })?;

        info!(bucket = %self.bucket, key = %key, bytes = artifact.len(), "artifact uploaded");
        Ok(StoreOutcome::Written)
    }

    async fn existing_checksum(&self, name: &str) -> StoreResult<Option<String>> {
        let key = self.object_key(name);
        let checksum = self.head(&key).await?.and_then(|head| {
            head.metadata()
                .and_then(|m| m.get(CHECKSUM_METADATA_KEY))
                .cloned()
        });
        Ok(checksum)
    }

    fn describe(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.prefix)
    }
}

/// Join `prefix` and `name` into an object key.
pub fn object_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Caller metadata plus the header-less checksum, when there is one.
pub fn upload_metadata(
    artifact: &Artifact,
    metadata: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut merged = metadata.clone();
    if let Some(sum) = artifact.checksum_excluding_header() {
        merged.insert(CHECKSUM_METADATA_KEY.to_string(), sum.to_string());
    }
    merged
}
