//! Configuration module for filesyncer.
//!
//! Provides typed configuration structs that map to the YAML configuration
//! file, with loading, environment overrides, validation, defaults, and a
//! builder for programmatic use.
//!
//! The loaded [`Config`] is an ordinary value handed to each component when
//! it is constructed. Nothing reads configuration from process-wide state
//! after startup.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable naming the storage credentials file.
pub const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Environment variable overriding `storage.bucket_name`.
pub const BUCKET_NAME_ENV: &str = "SYNCER_BUCKET_NAME";

/// Environment variable overriding `sync.work_dir`.
pub const WORK_DIR_ENV: &str = "SYNCER_WORK_DIR";

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for filesyncer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub sync: SyncConfig,
    pub notify: NotifyConfig,
    pub hub: HubConfig,
    pub logging: LoggingConfig,
}

/// Which object-store implementation backs the storage adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Google Cloud Storage JSON API.
    #[default]
    Gcs,
    /// In-process store; nothing leaves the machine.
    Memory,
}

/// Remote object-store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Bucket that mirrors the work directory.
    pub bucket_name: String,
    /// Path to the JSON credentials file. Falls back to `GOOGLE_APPLICATION_CREDENTIALS`.
    pub credentials_path: Option<PathBuf>,
    /// Base URL of the storage API (override for emulators).
    pub endpoint: String,
    /// Value written to the `uploaded-by` metadata key.
    pub uploaded_by: String,
    pub timeouts: StorageTimeoutsConfig,
}

/// Per-operation deadlines, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageTimeoutsConfig {
    pub exists_secs: u64,
    pub upload_secs: u64,
    pub delete_secs: u64,
    pub list_secs: u64,
    pub download_secs: u64,
}

/// Local watch and pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Directory that is watched and that downloads land in.
    pub work_dir: PathBuf,
    /// Milliseconds between poll cycles.
    pub poll_interval_ms: u64,
    /// Per-path quiet window before an event is handled. `0` disables debouncing.
    pub debounce_ms: u64,
    /// Upload local files missing from the bucket before watching.
    pub reconcile_on_startup: bool,
    /// During reconciliation, also delete bucket objects with no local file.
    pub reconcile_delete_remote: bool,
}

/// Broadcast hub client settings (publisher and consumer).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Base URL of the broadcast hub.
    pub hub_url: String,
    pub username: String,
    pub password: String,
    /// Stream name requested when subscribing.
    pub stream: String,
    /// Deadline for a single publish request.
    pub publish_timeout_secs: u64,
    /// Extra publish attempts after the first failure.
    pub publish_retries: u32,
    /// Reconnect the subscription after transport errors instead of failing.
    pub reconnect: bool,
    /// Upper bound of the reconnect backoff.
    pub reconnect_max_backoff_secs: u64,
}

/// Embedded broadcast hub settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Run the hub inside this process.
    pub enabled: bool,
    /// Address the hub listens on.
    pub listen_addr: String,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path`, or return [`Config::default`] when the file does
    /// not exist.
    ///
    /// A file that exists but cannot be read or parsed is an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(serde_yaml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/filesyncer/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("filesyncer")
            .join("config.yaml")
    }

    /// Applies overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides using `lookup` to read variables.
    ///
    /// Bucket and work directory overrides always win. The credentials
    /// variable is only used when the file does not name a credentials path.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bucket) = lookup(BUCKET_NAME_ENV).filter(|v| !v.is_empty()) {
            self.storage.bucket_name = bucket;
        }
        if let Some(dir) = lookup(WORK_DIR_ENV).filter(|v| !v.is_empty()) {
            self.sync.work_dir = PathBuf::from(dir);
        }
        if self.storage.credentials_path.is_none() {
            if let Some(path) = lookup(CREDENTIALS_ENV).filter(|v| !v.is_empty()) {
                self.storage.credentials_path = Some(PathBuf::from(path));
            }
        }
    }
}

impl StorageTimeoutsConfig {
    pub fn exists(&self) -> Duration {
        Duration::from_secs(self.exists_secs)
    }

    pub fn upload(&self) -> Duration {
        Duration::from_secs(self.upload_secs)
    }

    pub fn delete(&self) -> Duration {
        Duration::from_secs(self.delete_secs)
    }

    pub fn list(&self) -> Duration {
        Duration::from_secs(self.list_secs)
    }

    pub fn download(&self) -> Duration {
        Duration::from_secs(self.download_secs)
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The debounce window, or `None` when debouncing is disabled.
    pub fn debounce(&self) -> Option<Duration> {
        (self.debounce_ms > 0).then(|| Duration::from_millis(self.debounce_ms))
    }
}

impl NotifyConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }

    pub fn reconnect_max_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_backoff_secs)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Gcs,
            bucket_name: String::new(),
            credentials_path: None,
            endpoint: "https://storage.googleapis.com".to_string(),
            uploaded_by: "filesyncer".to_string(),
            timeouts: StorageTimeoutsConfig::default(),
        }
    }
}

impl Default for StorageTimeoutsConfig {
    fn default() -> Self {
        Self {
            exists_secs: 10,
            upload_secs: 50,
            delete_secs: 30,
            list_secs: 30,
            download_secs: 50,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./test-folder"),
            poll_interval_ms: 100,
            debounce_ms: 0,
            reconcile_on_startup: false,
            reconcile_delete_remote: false,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            hub_url: "http://localhost:8085".to_string(),
            username: "admin".to_string(),
            password: "admin123".to_string(),
            stream: "message".to_string(),
            publish_timeout_secs: 5,
            publish_retries: 2,
            reconnect: true,
            reconnect_max_backoff_secs: 30,
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:8085".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.poll_interval_ms"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

fn positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError {
            field: field.into(),
            message: "must be greater than 0".into(),
        });
    }
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- storage ---
        if self.storage.backend == StorageBackend::Gcs {
            if self.storage.bucket_name.trim().is_empty() {
                errors.push(ValidationError {
                    field: "storage.bucket_name".into(),
                    message: "must not be empty for the gcs backend".into(),
                });
            }
            if url::Url::parse(&self.storage.endpoint).is_err() {
                errors.push(ValidationError {
                    field: "storage.endpoint".into(),
                    message: format!("not a valid URL: {}", self.storage.endpoint),
                });
            }
        }
        if self.storage.uploaded_by.trim().is_empty() {
            errors.push(ValidationError {
                field: "storage.uploaded_by".into(),
                message: "must not be empty".into(),
            });
        }
        let t = &self.storage.timeouts;
        positive(&mut errors, "storage.timeouts.exists_secs", t.exists_secs);
        positive(&mut errors, "storage.timeouts.upload_secs", t.upload_secs);
        positive(&mut errors, "storage.timeouts.delete_secs", t.delete_secs);
        positive(&mut errors, "storage.timeouts.list_secs", t.list_secs);
        positive(&mut errors, "storage.timeouts.download_secs", t.download_secs);

        // --- sync ---
        if self.sync.work_dir.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "sync.work_dir".into(),
                message: "must not be empty".into(),
            });
        }
        positive(&mut errors, "sync.poll_interval_ms", self.sync.poll_interval_ms);

        // --- notify ---
        match url::Url::parse(&self.notify.hub_url) {
            Ok(u) if u.scheme() == "http" || u.scheme() == "https" => {}
            _ => errors.push(ValidationError {
                field: "notify.hub_url".into(),
                message: format!("not a valid http(s) URL: {}", self.notify.hub_url),
            }),
        }
        if self.notify.username.is_empty() {
            errors.push(ValidationError {
                field: "notify.username".into(),
                message: "must not be empty".into(),
            });
        }
        if self.notify.stream.trim().is_empty() {
            errors.push(ValidationError {
                field: "notify.stream".into(),
                message: "must not be empty".into(),
            });
        }
        positive(
            &mut errors,
            "notify.publish_timeout_secs",
            self.notify.publish_timeout_secs,
        );
        positive(
            &mut errors,
            "notify.reconnect_max_backoff_secs",
            self.notify.reconnect_max_backoff_secs,
        );

        // --- hub ---
        if self.hub.enabled && self.hub.listen_addr.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError {
                field: "hub.listen_addr".into(),
                message: format!("not a socket address: {}", self.hub.listen_addr),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust
/// use filesyncer_core::config::{ConfigBuilder, StorageBackend};
///
/// let config = ConfigBuilder::new()
///     .storage_backend(StorageBackend::Memory)
///     .sync_work_dir("/tmp/mirror")
///     .logging_level("debug")
///     .build();
/// assert!(config.validate().is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn storage_backend(mut self, backend: StorageBackend) -> Self {
        self.config.storage.backend = backend;
        self
    }

    pub fn storage_bucket_name(mut self, bucket: impl Into<String>) -> Self {
        self.config.storage.bucket_name = bucket.into();
        self
    }

    pub fn storage_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.storage.endpoint = endpoint.into();
        self
    }

    pub fn sync_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.sync.work_dir = dir.into();
        self
    }

    pub fn sync_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.sync.poll_interval_ms = ms;
        self
    }

    pub fn sync_debounce_ms(mut self, ms: u64) -> Self {
        self.config.sync.debounce_ms = ms;
        self
    }

    pub fn notify_hub_url(mut self, url: impl Into<String>) -> Self {
        self.config.notify.hub_url = url.into();
        self
    }

    pub fn hub_enabled(mut self, enabled: bool) -> Self {
        self.config.hub.enabled = enabled;
        self
    }

    pub fn hub_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.hub.listen_addr = addr.into();
        self
    }

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }

    /// Builds and validates, returning every validation error on failure.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let errors = self.config.validate();
        if errors.is_empty() {
            Ok(self.config)
        } else {
            Err(errors)
        }
    }
}
