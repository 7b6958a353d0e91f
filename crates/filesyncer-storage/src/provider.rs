//! GcsObjectStore - IObjectStore implementation for Google Cloud Storage
//!
//! Wraps the [`GcsClient`] to fulfil the [`IObjectStore`] port contract.
//!
//! ## Design Notes
//!
//! - Existence is a metadata `GET`; a 404 there means "absent", not an error.
//! - Every upload carries content type `application/octet-stream` and the
//!   provenance metadata map, whatever the file extension.
//! - Bucket entries whose names are not valid flat object names (for example
//!   keys with `/` written by other tools) are skipped when listing.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use filesyncer_core::config::StorageConfig;
use filesyncer_core::domain::{ObjectMetadata, ObjectName, OCTET_STREAM};
use filesyncer_core::ports::IObjectStore;

use crate::client::GcsClient;
use crate::credentials::{Credentials, TokenProvider};

/// [`IObjectStore`] backed by the GCS JSON API
pub struct GcsObjectStore {
    client: GcsClient,
}

impl GcsObjectStore {
    pub fn new(client: GcsClient) -> Self {
        Self { client }
    }

    /// Builds the store from the storage section of the configuration
    ///
    /// Loads the credentials file when one is configured; without one,
    /// requests are sent anonymously.
    ///
    /// # Errors
    /// Returns an error if the credentials file cannot be read or parsed
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let credentials = match &config.credentials_path {
            Some(path) => Credentials::from_file(path)
                .with_context(|| format!("Failed to load credentials from {}", path.display()))?,
            None => {
                warn!("No storage credentials configured, using anonymous access");
                Credentials::Anonymous
            }
        };

        info!(
            bucket = %config.bucket_name,
            endpoint = %config.endpoint,
            credentials = credentials.kind(),
            "Configured GCS object store"
        );

        let tokens = Arc::new(TokenProvider::new(credentials));
        Ok(Self::new(GcsClient::with_base_url(
            config.bucket_name.clone(),
            tokens,
            config.endpoint.clone(),
        )))
    }

    pub fn client(&self) -> &GcsClient {
        &self.client
    }
}

#[async_trait::async_trait]
impl IObjectStore for GcsObjectStore {
    async fn object_exists(&self, name: &ObjectName) -> Result<bool> {
        let resource = self
            .client
            .get_metadata(name.as_str())
            .await
            .with_context(|| format!("Failed to check existence of {name}"))?;
        Ok(resource.is_some())
    }

    async fn put_object(
        &self,
        name: &ObjectName,
        source: &Path,
        metadata: &ObjectMetadata,
    ) -> Result<u64> {
        let (_, size) = self
            .client
            .upload_multipart(name.as_str(), source, OCTET_STREAM, &metadata.to_map())
            .await
            .with_context(|| format!("Failed to upload {} as {name}", source.display()))?;
        Ok(size)
    }

    async fn get_object(&self, name: &ObjectName, destination: &Path) -> Result<u64> {
        self.client
            .download(name.as_str(), destination)
            .await
            .with_context(|| format!("Failed to download {name} to {}", destination.display()))
    }

    async fn delete_object(&self, name: &ObjectName) -> Result<()> {
        self.client
            .delete(name.as_str())
            .await
            .with_context(|| format!("Failed to delete {name}"))
    }

    async fn list_objects(&self) -> Result<Vec<ObjectName>> {
        let names = self
            .client
            .list()
            .await
            .with_context(|| format!("Failed to list bucket {}", self.client.bucket()))?;

        Ok(names
            .into_iter()
            .filter_map(|raw| match ObjectName::new(raw.as_str()) {
                Ok(name) => Some(name),
                Err(e) => {
                    warn!(object = %raw, error = %e, "Skipping bucket entry with non-flat name");
                    None
                }
            })
            .collect())
    }
}
