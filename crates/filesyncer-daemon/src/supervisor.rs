//! Structured task supervision
//!
//! Every long-lived task of the daemon runs under one [`Supervisor`]: it
//! shares a root [`CancellationToken`], and the supervisor waits for all of
//! them before the process exits.
//!
//! ## Design Notes
//!
//! - The first task error (or panic) cancels the token so the remaining
//!   tasks unwind, and is reported as [`SupervisorOutcome::Failed`].
//! - A requested shutdown (signal or [`Supervisor::shutdown`]) is graceful;
//!   errors raised while unwinding after it are only logged.

use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How the supervised tasks ended
#[derive(Debug)]
pub enum SupervisorOutcome {
    /// Shutdown was requested, or every task finished cleanly
    Graceful,
    /// A task failed before any shutdown was requested
    Failed { task: String, error: anyhow::Error },
}

impl SupervisorOutcome {
    pub fn is_graceful(&self) -> bool {
        matches!(self, SupervisorOutcome::Graceful)
    }
}

/// Owns the shared cancellation token and the named task set
pub struct Supervisor {
    token: CancellationToken,
    tasks: JoinSet<(String, Result<()>)>,
    shutdown_requested: Arc<AtomicBool>,
    signal_task: Option<JoinHandle<()>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: JoinSet::new(),
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            signal_task: None,
        }
    }

    /// A clone of the root token, for handing to a task
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Number of tasks not yet collected by [`Supervisor::wait`]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Registers a named task
    ///
    /// A panic inside `future` is reported as a failure of `name`.
    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        debug!(task = %name, "Spawning supervised task");
        let handle = tokio::spawn(future);
        self.tasks.spawn(async move {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(anyhow!(
                    "task panicked: {}",
                    panic_message(&*e.into_panic())
                )),
                Err(e) => Err(anyhow!("task aborted: {e}")),
            };
            (name, result)
        });
    }

    /// Turns SIGINT or SIGTERM into a requested shutdown
    pub fn install_signal_handler(&mut self) {
        let token = self.token.clone();
        let requested = Arc::clone(&self.shutdown_requested);
        self.signal_task = Some(tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                signal = wait_for_signal() => info!(signal, "Shutdown signal received"),
            }
            requested.store(true, Ordering::SeqCst);
            token.cancel();
        }));
    }

    /// Requests a graceful shutdown of every task
    pub fn shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.token.cancel();
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Waits for every task to finish
    pub async fn wait(mut self) -> SupervisorOutcome {
        let mut failure: Option<(String, anyhow::Error)> = None;

        while let Some(joined) = self.tasks.join_next().await {
            let (name, result) = match joined {
                Ok(finished) => finished,
                Err(e) => ("supervisor".to_string(), Err(anyhow!("wrapper task failed: {e}"))),
            };

            match result {
                Ok(()) => debug!(task = %name, "Task finished"),
                Err(error) if failure.is_none() && !self.is_shutdown_requested() => {
                    error!(task = %name, error = %format!("{error:#}"), "Task failed, shutting down");
                    self.token.cancel();
                    failure = Some((name, error));
                }
                Err(error) => {
                    warn!(task = %name, error = %format!("{error:#}"), "Task failed during shutdown");
                }
            }
        }

        if let Some(signal_task) = self.signal_task.take() {
            signal_task.abort();
        }

        match failure {
            Some((task, error)) => SupervisorOutcome::Failed { task, error },
            None => SupervisorOutcome::Graceful,
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Resolves with the name of the first termination signal received
///
/// A handler that cannot be installed is logged and never fires.
async fn wait_for_signal() -> &'static str {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "SIGINT",
            Err(e) => {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                "SIGTERM"
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    tokio::select! {
        signal = ctrl_c => signal,
        signal = terminate => signal,
    }
}
