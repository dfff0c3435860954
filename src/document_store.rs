use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::errors::DataAccessError;
use crate::models::StoredDocument;

/// Remote object storage for uploaded source documents
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn put(
        &self,
        object_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredDocument, DataAccessError>;
}

/// Builds `{username}/{YYYYmmdd_HHMMSS}_{uuid8}.{ext}` so repeated uploads of the
/// same file never overwrite each other.
pub fn unique_object_name(username: &str, extension: &str) -> String {
    let owner: String = username
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}/{}_{}.{}",
        owner,
        Utc::now().format("%Y%m%d_%H%M%S"),
        &suffix[..8],
        extension
    )
}

/// Storage bucket reached over the Supabase-style object REST API
#[derive(Debug, Clone)]
pub struct HttpDocumentStore {
    client: Client,
    base_url: String,
    access_key: String,
    bucket: String,
}

impl HttpDocumentStore {
    pub fn new(config: &StorageConfig) -> Result<Self, DataAccessError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DataAccessError::Storage(format!("storage HTTP client could not be built: {}", e)))?;

        let base_url = if config.url.ends_with('/') {
            config.url.clone()
        } else {
            format!("{}/", config.url)
        };

        Ok(Self {
            client,
            base_url,
            access_key: config.access_key.clone(),
            bucket: config.bucket.clone(),
        })
    }

    pub fn public_url(&self, object_name: &str) -> String {
        format!(
            "{}storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, object_name
        )
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn put(
        &self,
        object_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredDocument, DataAccessError> {
        let url = format!("{}storage/v1/object/{}/{}", self.base_url, self.bucket, object_name);
        let size = bytes.len();

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.access_key))
            .header("apikey", &self.access_key)
            .header("Content-Type", content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DataAccessError::Storage(format!("upload of '{}' timed out", object_name))
                } else {
                    DataAccessError::Storage(format!("upload of '{}' failed: {}", object_name, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DataAccessError::Storage(format!(
                "bucket '{}' rejected '{}' with HTTP {}: {}",
                self.bucket,
                object_name,
                status.as_u16(),
                body
            )));
        }

        info!(object_name = %object_name, size_bytes = size, bucket = %self.bucket, "Stored document");
        Ok(StoredDocument {
            file_name: object_name.to_string(),
            url: self.public_url(object_name),
        })
    }
}
