//! Debounced change queue
//!
//! The [`DebouncedChangeQueue`] collects rapid-fire events and coalesces them
//! so that the handler only sees the final state of a path after it has been
//! quiet for a configurable window. [`debounce`] wires the queue between two
//! channels as a [`DebounceStage`] the caller runs as its own task.
//!
//! ## Merge rule
//!
//! The latest event for a path replaces the pending one, except that a
//! `Write` following a pending `Create` keeps the `Create`: the upload reads
//! the file at handling time anyway, and the creation notification must not
//! be lost.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use filesyncer_core::domain::{FileChangeEvent, FileOperation};

/// Lower bound for the settle check interval
const MIN_TICK: Duration = Duration::from_millis(10);

struct Pending {
    event: FileChangeEvent,
    last_seen: Instant,
    /// Arrival order of the first event for this path
    seq: u64,
}

/// Queue that coalesces rapid filesystem changes per path
pub struct DebouncedChangeQueue {
    pending: HashMap<PathBuf, Pending>,
    debounce_delay: Duration,
    next_seq: u64,
}

impl DebouncedChangeQueue {
    /// Creates a queue with the given quiet window
    pub fn new(debounce_delay: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            debounce_delay,
            next_seq: 0,
        }
    }

    /// Inserts or merges an event and restarts the path's quiet window
    pub fn push(&mut self, event: FileChangeEvent) {
        let now = Instant::now();
        let path = event.path.clone();
        debug!(path = %path.display(), operation = %event.operation, "Enqueuing change event");

        match self.pending.get_mut(&path) {
            Some(pending) => {
                let keep_create = pending.event.operation == FileOperation::Create
                    && event.operation == FileOperation::Write;
                if !keep_create {
                    pending.event = event;
                }
                pending.last_seen = now;
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.pending.insert(
                    path,
                    Pending {
                        event,
                        last_seen: now,
                        seq,
                    },
                );
            }
        }
    }

    /// Removes and returns every event that has been quiet for the delay,
    /// in first-seen order
    pub fn poll(&mut self) -> Vec<FileChangeEvent> {
        let now = Instant::now();
        let delay = self.debounce_delay;
        self.take_where(|p| now.duration_since(p.last_seen) >= delay)
    }

    /// Removes and returns every pending event regardless of age
    pub fn drain(&mut self) -> Vec<FileChangeEvent> {
        self.take_where(|_| true)
    }

    fn take_where(&mut self, settled: impl Fn(&Pending) -> bool) -> Vec<FileChangeEvent> {
        let paths: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, p)| settled(p))
            .map(|(path, _)| path.clone())
            .collect();

        let mut ready: Vec<Pending> = paths
            .iter()
            .filter_map(|path| self.pending.remove(path))
            .collect();
        ready.sort_by_key(|p| p.seq);

        if !ready.is_empty() {
            debug!(count = ready.len(), "Settled change events");
        }
        ready.into_iter().map(|p| p.event).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Pipeline stage feeding settled events from a [`DebouncedChangeQueue`]
/// to the next consumer
///
/// Built by [`debounce`]; nothing happens until [`DebounceStage::run`] is
/// driven, so the caller decides which task owns it.
pub struct DebounceStage {
    events: mpsc::UnboundedReceiver<FileChangeEvent>,
    settled: mpsc::UnboundedSender<FileChangeEvent>,
    delay: Duration,
}

/// Inserts a debounce stage after `events`
///
/// Returns the stage and the receiver its settled events arrive on.
pub fn debounce(
    events: mpsc::UnboundedReceiver<FileChangeEvent>,
    delay: Duration,
) -> (DebounceStage, mpsc::UnboundedReceiver<FileChangeEvent>) {
    let (settled, rx) = mpsc::unbounded_channel();
    let stage = DebounceStage {
        events,
        settled,
        delay,
    };
    (stage, rx)
}

impl DebounceStage {
    /// Forwards settled events until the input closes or `shutdown` is
    /// cancelled
    ///
    /// When the input closes, pending events are flushed before the output
    /// closes. On cancellation pending events are dropped. A dropped output
    /// receiver also ends the stage.
    pub async fn run(mut self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut queue = DebouncedChangeQueue::new(self.delay);
        let mut ticker = tokio::time::interval((self.delay / 2).max(MIN_TICK));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!(dropped = queue.pending_count(), "Debounce stage cancelled");
                    return Ok(());
                }
                received = self.events.recv() => match received {
                    Some(event) => queue.push(event),
                    None => {
                        self.forward(queue.drain());
                        debug!("Debounce input closed");
                        return Ok(());
                    }
                },
                _ = ticker.tick() => {
                    if !self.forward(queue.poll()) {
                        debug!("Settled event receiver dropped, stopping debounce stage");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Sends `events` downstream; false once the receiver is gone
    fn forward(&self, events: Vec<FileChangeEvent>) -> bool {
        events
            .into_iter()
            .all(|event| self.settled.send(event).is_ok())
    }
}
