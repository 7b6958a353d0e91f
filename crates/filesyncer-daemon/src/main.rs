//! filesyncer daemon - keeps a local directory and a bucket in step
//!
//! The process runs until SIGINT or SIGTERM and supervises:
//! - the watch pipeline (poll watcher, optional debounce stage, change
//!   handler) that uploads and deletes objects and announces creations
//! - the notification consumer that downloads objects announced by other
//!   nodes
//! - optionally, the embedded broadcast hub
//!
//! # Architecture
//!
//! Configuration is loaded once (YAML file plus environment overrides) and
//! validated before anything starts. All tasks share the supervisor's
//! `CancellationToken`; the first task failure or a termination signal
//! cancels it, and the process exits after every task has unwound.

mod supervisor;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use filesyncer_core::config::{Config, LoggingConfig, StorageBackend, StorageConfig};
use filesyncer_core::ports::{INotificationPublisher, IObjectStore};
use filesyncer_notify::consumer::NotificationConsumer;
use filesyncer_notify::hub::{BroadcastHub, HubCredentials};
use filesyncer_notify::publisher::HttpNotificationPublisher;
use filesyncer_storage::provider::GcsObjectStore;
use filesyncer_sync::debounce::debounce;
use filesyncer_sync::handler::ChangeHandler;
use filesyncer_sync::memory::MemoryObjectStore;
use filesyncer_sync::reconcile::{reconcile, ReconcileOptions};
use filesyncer_sync::storage::{StorageSync, StorageTimeouts};
use filesyncer_sync::watcher::PollWatcher;

use crate::supervisor::{Supervisor, SupervisorOutcome};

#[derive(Debug, Parser)]
#[command(
    name = "filesyncerd",
    version,
    about = "Sync a local directory with an object storage bucket"
)]
struct Cli {
    /// Use alternate config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

// ============================================================================
// Startup
// ============================================================================

/// Loads the configuration file and applies environment overrides
///
/// An explicit `--config` path must exist. The default path falls back to
/// built-in defaults only when the file is missing; a file that is present
/// but unreadable or malformed aborts startup.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            let path = Config::default_path();
            Config::load_or_default(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
        }
    };
    config.apply_env();
    Ok(config)
}

/// Initializes tracing; `RUST_LOG` wins over `logging.level`
fn init_tracing(logging: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Builds the object store selected by `storage.backend`
fn build_store(config: &StorageConfig) -> Result<Arc<dyn IObjectStore>> {
    match config.backend {
        StorageBackend::Gcs => {
            let store = GcsObjectStore::from_config(config)
                .context("Failed to initialize GCS object store")?;
            info!(bucket = %config.bucket_name, endpoint = %config.endpoint, "Using GCS backend");
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory backend; objects are lost on exit");
            Ok(Arc::new(MemoryObjectStore::new()))
        }
    }
}

// ============================================================================
// Run
// ============================================================================

async fn run(config: Config) -> Result<()> {
    let work_dir = config.sync.work_dir.clone();

    let store = build_store(&config.storage)?;
    let storage = Arc::new(StorageSync::new(
        store,
        StorageTimeouts::from(&config.storage.timeouts),
        config.storage.uploaded_by.clone(),
    ));
    let mut supervisor = Supervisor::new();

    let publisher: Arc<dyn INotificationPublisher> = Arc::new(
        HttpNotificationPublisher::from_config(&config.notify)
            .context("Failed to create notification publisher")?
            .with_shutdown(supervisor.token()),
    );
    let consumer = NotificationConsumer::from_config(&config.notify, storage.clone(), &work_dir)
        .context("Failed to create notification consumer")?;

    // A missing or unreadable watch root aborts startup
    let watcher = PollWatcher::new(&work_dir, config.sync.poll_interval())
        .await
        .with_context(|| format!("Failed to watch {}", work_dir.display()))?;

    if config.sync.reconcile_on_startup {
        let options = ReconcileOptions {
            delete_remote_orphans: config.sync.reconcile_delete_remote,
        };
        if let Err(e) = reconcile(&storage, &work_dir, options).await {
            warn!(error = %format!("{e:#}"), "Startup reconciliation failed");
        }
    }

    supervisor.install_signal_handler();

    if config.hub.enabled {
        let credentials =
            HubCredentials::new(config.notify.username.clone(), config.notify.password.clone());
        let hub = BroadcastHub::bind(&config.hub, credentials).await?;
        let token = supervisor.token();
        supervisor.spawn("hub", async move { hub.run(token).await });
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let token = supervisor.token();
    supervisor.spawn("watcher", async move {
        watcher.run(tx, token).await.map_err(anyhow::Error::from)
    });

    let events = match config.sync.debounce() {
        Some(delay) => {
            info!(debounce_ms = config.sync.debounce_ms, "Debouncing change events");
            let (stage, settled) = debounce(rx, delay);
            let token = supervisor.token();
            supervisor.spawn("debounce", stage.run(token));
            settled
        }
        None => rx,
    };
    let handler = ChangeHandler::new(storage, publisher);
    let token = supervisor.token();
    supervisor.spawn("handler", async move { handler.run(events, token).await });

    let token = supervisor.token();
    supervisor.spawn("consumer", async move { consumer.run(token).await });

    match supervisor.wait().await {
        SupervisorOutcome::Graceful => Ok(()),
        SupervisorOutcome::Failed { task, error } => {
            Err(error.context(format!("Task '{task}' failed")))
        }
    }
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    init_tracing(&config.logging);
    info!("filesyncer daemon starting (filesyncerd)");

    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            error!(%problem, "Invalid configuration");
        }
        anyhow::bail!("Invalid configuration: {} problem(s)", problems.len());
    }

    let result = run(config).await;

    match &result {
        Ok(()) => info!("filesyncer daemon shut down gracefully"),
        Err(e) => error!(error = %format!("{e:#}"), "filesyncer daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
