//! Storage credentials and access tokens
//!
//! The credentials file is the JSON document Google tooling writes, keyed
//! by its `type` field:
//!
//! - `service_account` - an RS256-signed JWT assertion is exchanged for an
//!   access token at `token_uri`
//! - `authorized_user` - a refresh token is exchanged at the OAuth token
//!   endpoint
//! - `access_token` - a fixed bearer token, for emulators and tests
//!
//! ## Design Notes
//!
//! - [`TokenProvider`] caches the exchanged token behind a `tokio::sync::Mutex`
//!   so concurrent requests never trigger more than one exchange.
//! - Tokens are refreshed [`REFRESH_MARGIN_SECS`] seconds before they expire.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::StorageError;

/// Default OAuth token endpoint
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// OAuth scope requested for bucket access
pub const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";

/// Seconds before expiry at which a cached token is considered stale
pub const REFRESH_MARGIN_SECS: i64 = 60;

/// Lifetime requested for service account assertions
const ASSERTION_LIFETIME_SECS: i64 = 3600;

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

// ============================================================================
// Credentials
// ============================================================================

/// Service account key material
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

/// End-user OAuth client and refresh token
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthorizedUser {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// How requests to the storage API are authorized
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUser),
    AccessToken { token: String },
    /// No `Authorization` header at all (public buckets, emulators)
    #[serde(skip)]
    Anonymous,
}

impl Credentials {
    /// Parses a credentials JSON document
    ///
    /// # Errors
    /// Returns [`StorageError::Credentials`] for malformed JSON or an
    /// unsupported `type`
    pub fn from_json(text: &str) -> Result<Self, StorageError> {
        serde_json::from_str(text)
            .map_err(|e| StorageError::Credentials(format!("invalid credentials file: {e}")))
    }

    /// Reads and parses a credentials file
    ///
    /// # Arguments
    /// * `path` - Path to the JSON credentials file
    pub fn from_file(path: &Path) -> Result<Self, StorageError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            StorageError::Credentials(format!("cannot read {}: {e}", path.display()))
        })?;
        let credentials = Self::from_json(&text)?;
        debug!(path = %path.display(), kind = credentials.kind(), "Loaded storage credentials");
        Ok(credentials)
    }

    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Credentials::ServiceAccount(_) => "service_account",
            Credentials::AuthorizedUser(_) => "authorized_user",
            Credentials::AccessToken { .. } => "access_token",
            Credentials::Anonymous => "anonymous",
        }
    }
}

// ============================================================================
// Token exchange
// ============================================================================

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

/// An access token together with its expiry
#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// Signs the JWT assertion used in the service account grant
fn sign_assertion(key: &ServiceAccountKey, now: DateTime<Utc>) -> Result<String, StorageError> {
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: STORAGE_SCOPE,
        aud: &key.token_uri,
        iat: now.timestamp(),
        exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
    };
    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| StorageError::Credentials(format!("invalid private key: {e}")))?;
    encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .map_err(|e| StorageError::Credentials(format!("failed to sign assertion: {e}")))
}

/// Hands out bearer tokens for storage requests, exchanging and caching
/// them as needed
pub struct TokenProvider {
    client: Client,
    credentials: Credentials,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            client: Client::new(),
            credentials,
            cached: Mutex::new(None),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Returns the bearer token to send, or `None` for anonymous access
    ///
    /// # Errors
    /// Returns an error if the token exchange fails
    pub async fn access_token(&self) -> Result<Option<String>, StorageError> {
        match &self.credentials {
            Credentials::Anonymous => Ok(None),
            Credentials::AccessToken { token } => Ok(Some(token.clone())),
            Credentials::ServiceAccount(_) | Credentials::AuthorizedUser(_) => {
                let mut cached = self.cached.lock().await;
                if let Some(token) = cached.as_ref() {
                    if token.is_fresh(Utc::now()) {
                        return Ok(Some(token.value.clone()));
                    }
                }

                let fresh = self.exchange().await?;
                let value = fresh.value.clone();
                *cached = Some(fresh);
                Ok(Some(value))
            }
        }
    }

    /// Drops the cached token so the next call exchanges again
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn exchange(&self) -> Result<CachedToken, StorageError> {
        let now = Utc::now();
        let (token_uri, form): (&str, Vec<(&str, String)>) = match &self.credentials {
            Credentials::ServiceAccount(key) => (
                key.token_uri.as_str(),
                vec![
                    ("grant_type", JWT_BEARER_GRANT.to_string()),
                    ("assertion", sign_assertion(key, now)?),
                ],
            ),
            Credentials::AuthorizedUser(user) => (
                user.token_uri.as_str(),
                vec![
                    ("grant_type", "refresh_token".to_string()),
                    ("client_id", user.client_id.clone()),
                    ("client_secret", user.client_secret.clone()),
                    ("refresh_token", user.refresh_token.clone()),
                ],
            ),
            Credentials::AccessToken { .. } | Credentials::Anonymous => {
                return Err(StorageError::Credentials(format!(
                    "{} credentials have nothing to exchange",
                    self.credentials.kind()
                )))
            }
        };

        debug!(token_uri, kind = self.credentials.kind(), "Exchanging credentials for access token");

        let response = self.client.post(token_uri).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Unauthorized(format!(
                "token exchange failed with {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| StorageError::InvalidResponse(format!("token response: {e}")))?;

        info!(
            kind = self.credentials.kind(),
            expires_in = token.expires_in,
            "Obtained storage access token"
        );

        Ok(CachedToken {
            value: token.access_token,
            expires_at: now + Duration::seconds(token.expires_in),
        })
    }
}
