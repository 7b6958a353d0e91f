//! Google Cloud Storage JSON API client
//!
//! Provides a typed HTTP client for one bucket. Handles the bearer token,
//! URL construction with percent-encoded object names, multipart upload
//! bodies, and status-code mapping onto [`StorageError`].
//!
//! Object content is streamed: uploads read the source file chunk by chunk
//! into the request body, and downloads write response chunks straight to
//! the destination file. A `401` drops the cached access token so the next
//! request exchanges credentials again.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use filesyncer_storage::client::GcsClient;
//! use filesyncer_storage::credentials::{Credentials, TokenProvider};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let tokens = Arc::new(TokenProvider::new(Credentials::Anonymous));
//! let client = GcsClient::new("my-bucket", tokens);
//! for name in client.list().await? {
//!     println!("{name}");
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{future, stream, StreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use url::Url;

use crate::credentials::TokenProvider;
use crate::StorageError;

/// Public GCS endpoint
pub const GCS_BASE_URL: &str = "https://storage.googleapis.com";

// ============================================================================
// API response types
// ============================================================================

/// Object resource as returned by the JSON API
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectResource {
    /// Object name
    pub name: String,
    /// Size in bytes; the API encodes it as a decimal string
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    /// Custom metadata
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl ObjectResource {
    /// Parsed object size, `0` when missing or malformed
    pub fn size_bytes(&self) -> u64 {
        self.size
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }
}

/// One page of `objects.list`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<ObjectResource>,
    next_page_token: Option<String>,
}

// ============================================================================
// GcsClient
// ============================================================================

/// HTTP client for a single GCS bucket
pub struct GcsClient {
    client: Client,
    base_url: String,
    bucket: String,
    tokens: Arc<TokenProvider>,
}

impl GcsClient {
    /// Creates a client for `bucket` on the public endpoint
    ///
    /// # Arguments
    /// * `bucket` - Bucket name
    /// * `tokens` - Source of bearer tokens
    pub fn new(bucket: impl Into<String>, tokens: Arc<TokenProvider>) -> Self {
        Self::with_base_url(bucket, tokens, GCS_BASE_URL)
    }

    /// Creates a client with a custom base URL (emulators, tests)
    pub fn with_base_url(
        bucket: impl Into<String>,
        tokens: Arc<TokenProvider>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            bucket: bucket.into(),
            tokens,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Builds `{base}/{prefix...}/b/{bucket}/o[/{object}]`
    fn url(&self, prefix: &[&str], object: Option<&str>) -> Result<Url, StorageError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| StorageError::InvalidEndpoint(format!("{}: {e}", self.base_url)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StorageError::InvalidEndpoint(self.base_url.clone()))?;
            segments.pop_if_empty();
            segments.extend(prefix);
            segments.extend(["b", self.bucket.as_str(), "o"]);
            if let Some(name) = object {
                segments.push(name);
            }
        }
        Ok(url)
    }

    fn object_url(&self, name: &str) -> Result<Url, StorageError> {
        self.url(&["storage", "v1"], Some(name))
    }

    /// Creates a request with the `Authorization` header when a token is available
    async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, StorageError> {
        let builder = self.client.request(method, url);
        Ok(match self.tokens.access_token().await? {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    /// Passes successful responses through and maps the rest to errors
    ///
    /// An `Unauthorized` answer invalidates the cached token.
    async fn check(&self, response: Response) -> Result<Response, StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let error = StorageError::from_status(status, body);
        if matches!(error, StorageError::Unauthorized(_)) {
            warn!(bucket = %self.bucket, "Storage rejected access token, dropping cached token");
            self.tokens.invalidate().await;
        }
        Err(error)
    }

    /// Fetches object metadata, `None` when the object does not exist
    ///
    /// Makes `GET /storage/v1/b/{bucket}/o/{name}`.
    pub async fn get_metadata(&self, name: &str) -> Result<Option<ObjectResource>, StorageError> {
        let url = self.object_url(name)?;
        debug!(object = name, "Fetching object metadata");

        let response = self.request(Method::GET, url).await?.send().await?;
        match self.check(response).await {
            Ok(response) => {
                let resource = response
                    .json()
                    .await
                    .map_err(|e| StorageError::InvalidResponse(format!("object resource: {e}")))?;
                Ok(Some(resource))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Uploads the file at `source` as `name` with a single multipart request
    ///
    /// Makes `POST /upload/storage/v1/b/{bucket}/o?uploadType=multipart`
    /// with a `multipart/related` body: the JSON resource first, the
    /// content second. The content is streamed from disk; the request
    /// carries the file size as of opening it.
    ///
    /// # Arguments
    /// * `name` - Object name
    /// * `source` - File whose content becomes the object
    /// * `content_type` - Content type stored with the object
    /// * `metadata` - Custom metadata map
    ///
    /// # Returns
    /// The created object resource and the number of content bytes sent
    pub async fn upload_multipart(
        &self,
        name: &str,
        source: &Path,
        content_type: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(ObjectResource, u64), StorageError> {
        let mut url = self.url(&["upload", "storage", "v1"], None)?;
        url.query_pairs_mut().append_pair("uploadType", "multipart");

        let file = tokio::fs::File::open(source).await?;
        let size = file.metadata().await?.len();

        let resource = serde_json::json!({
            "name": name,
            "contentType": content_type,
            "metadata": metadata,
        });
        let boundary = format!("filesyncer-{}", uuid::Uuid::new_v4().simple());
        let (head, tail) = multipart_related_frame(&boundary, &resource.to_string(), content_type);
        let content_length = head.len() as u64 + size + tail.len() as u64;

        // A file that grows while uploading is cut at the size read above
        let body = stream::once(future::ready(Ok::<_, io::Error>(Bytes::from(head))))
            .chain(ReaderStream::new(file.take(size)))
            .chain(stream::once(future::ready(Ok(Bytes::from(tail)))));

        debug!(object = name, size, "Uploading object");

        let response = self
            .request(Method::POST, url)
            .await?
            .header(CONTENT_TYPE, format!("multipart/related; boundary={boundary}"))
            .header(CONTENT_LENGTH, content_length)
            .body(Body::wrap_stream(body))
            .send()
            .await?;

        let resource = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| StorageError::InvalidResponse(format!("upload response: {e}")))?;
        Ok((resource, size))
    }

    /// Downloads the object's content into `destination`
    ///
    /// Makes `GET /storage/v1/b/{bucket}/o/{name}?alt=media`. The file is
    /// created (or truncated) only once the API has answered with success,
    /// then written chunk by chunk.
    ///
    /// # Returns
    /// The number of bytes written
    pub async fn download(&self, name: &str, destination: &Path) -> Result<u64, StorageError> {
        let mut url = self.object_url(name)?;
        url.query_pairs_mut().append_pair("alt", "media");

        let response = self.request(Method::GET, url).await?.send().await?;
        let mut chunks = self.check(response).await?.bytes_stream();

        let mut file = tokio::fs::File::create(destination).await?;
        let mut written = 0u64;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(object = name, size = written, "Downloaded object");
        Ok(written)
    }

    /// Deletes the object
    ///
    /// Makes `DELETE /storage/v1/b/{bucket}/o/{name}`. A missing object is
    /// reported as [`StorageError::NotFound`].
    pub async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let url = self.object_url(name)?;
        let response = self.request(Method::DELETE, url).await?.send().await?;
        self.check(response).await?;
        debug!(object = name, "Deleted object");
        Ok(())
    }

    /// Lists every object name in the bucket, following `nextPageToken`
    pub async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.url(&["storage", "v1"], None)?;
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }

            let response = self.request(Method::GET, url).await?.send().await?;
            let page: ListResponse = self
                .check(response)
                .await?
                .json()
                .await
                .map_err(|e| StorageError::InvalidResponse(format!("list response: {e}")))?;

            names.extend(page.items.into_iter().map(|item| item.name));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(bucket = %self.bucket, count = names.len(), "Listed objects");
        Ok(names)
    }
}

/// Builds the parts of a two-part `multipart/related` body that surround
/// the content: everything before it, and the closing delimiter after it
fn multipart_related_frame(
    boundary: &str,
    resource_json: &str,
    content_type: &str,
) -> (String, String) {
    let head = format!(
        "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{resource_json}\r\n\
         --{boundary}\r\nContent-Type: {content_type}\r\n\r\n"
    );
    let tail = format!("\r\n--{boundary}--\r\n");
    (head, tail)
}
