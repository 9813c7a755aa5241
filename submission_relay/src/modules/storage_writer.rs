use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use reqwest::{header::CONTENT_TYPE, Client, StatusCode};

use crate::modules::{credentials::ServiceAccountKey, error::StorageError, storage_key::StorageKey};

/// Durable object storage for artifacts.
///
/// `put` is a full-object create-or-overwrite. A successful return is
/// trusted as is, nothing is read back.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    // Bucket or container the store writes into, for logging
    fn bucket(&self) -> &str;

    async fn put(&self, key: &StorageKey, data: Bytes) -> Result<(), StorageError>;
}

// Google Cloud Storage through the JSON API media upload
#[derive(Clone)]
pub struct GcsStore {
    client: Client,
    bucket: String,
    // Base64 service-account key, decoded per write
    encoded_key: String,
    upload_base: String,
}

impl GcsStore {
    pub fn new(client: Client, bucket: String, encoded_key: String, upload_base: String) -> Self {
        Self {
            client,
            bucket,
            encoded_key,
            upload_base: upload_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ArtifactStore for GcsStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, key: &StorageKey, data: Bytes) -> Result<(), StorageError> {
        // Credentials are acquired for this write only and dropped with it
        let token = {
            let credentials = ServiceAccountKey::decode(&self.encoded_key)?;
            credentials.access_token(&self.client).await?
        };

        let url = format!("{}/upload/storage/v1/b/{}/o", self.upload_base, self.bucket);
        debug!("Uploading {} bytes to {}/{}", data.len(), self.bucket, key);

        let response = self
            .client
            .post(url)
            .query(&[("uploadType", "media"), ("name", key.as_str())])
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/zip")
            .body(data)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(StorageError::Denied {
                status: status.as_u16(),
                message,
            }),
            _ => Err(StorageError::Rejected {
                status: status.as_u16(),
                message,
            }),
        }
    }
}
