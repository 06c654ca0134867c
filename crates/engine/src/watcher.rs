//! Debounced filesystem watching.
//!
//! Raw events from the [`notify`] backend arrive in bursts: a single save in
//! an editor can produce several create/modify notifications within
//! milliseconds. The watcher arms a per-path timer on every raw event and
//! delivers exactly one enriched [`ChangeEvent`] when the path has been quiet
//! for the debounce window, reflecting the state after the last raw event.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::types::{ChangeEvent, ChangeKind};
use relay_walk::{CancellationToken, Scanner};

/// Default quiet period before a path's pending event is delivered.
pub const DEFAULT_DEBOUNCE_DELAY: Duration = Duration::from_millis(100);

/// Bound on the delivered-event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Bound on the error channel.
const ERROR_CHANNEL_CAPACITY: usize = 100;

/// Bound on the raw-event channel between the notify backend and the loop.
const RAW_CHANNEL_CAPACITY: usize = 1024;

type RawEvent = notify::Result<notify::Event>;
type PendingTimers = Arc<Mutex<HashMap<PathBuf, JoinHandle<()>>>>;

/// Filesystem watcher with per-path debouncing.
///
/// Events and errors are delivered on bounded channels; when a channel is
/// full the item is dropped silently, relying on the next change to the same
/// path for eventual consistency.
pub struct FileWatcher {
    debounce_delay: Duration,
    scanner: Arc<Scanner>,
    backend: Mutex<Option<RecommendedWatcher>>,
    watched: Mutex<HashSet<PathBuf>>,
    running: Mutex<bool>,
    raw_rx: Mutex<Option<mpsc::Receiver<RawEvent>>>,
    events_tx: mpsc::Sender<ChangeEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ChangeEvent>>>,
    errors_tx: mpsc::Sender<notify::Error>,
    errors_rx: Mutex<Option<mpsc::Receiver<notify::Error>>>,
    pending: PendingTimers,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("debounce_delay", &self.debounce_delay)
            .field("running", &self.running)
            .finish_non_exhaustive()
    }
}

impl FileWatcher {
    /// Creates a watcher. `debounce_delay` of zero selects the default.
    /// The scanner enriches debounced events with fresh metadata.
    pub fn new(debounce_delay: Duration, scanner: Arc<Scanner>) -> Result<Self, WatchError> {
        let debounce_delay = if debounce_delay.is_zero() {
            DEFAULT_DEBOUNCE_DELAY
        } else {
            debounce_delay
        };

        let (raw_tx, raw_rx) = mpsc::channel(RAW_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);

        let backend = notify::recommended_watcher(move |raw: RawEvent| {
            // Full buffer drops the raw event; the debouncer guarantees a
            // later change on the same path still gets through.
            let _ = raw_tx.try_send(raw);
        })?;

        Ok(Self {
            debounce_delay,
            scanner,
            backend: Mutex::new(Some(backend)),
            watched: Mutex::new(HashSet::new()),
            running: Mutex::new(false),
            raw_rx: Mutex::new(Some(raw_rx)),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            errors_tx,
            errors_rx: Mutex::new(Some(errors_rx)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            loop_handle: Mutex::new(None),
        })
    }

    /// Starts the event loop. A second call fails with
    /// [`WatchError::AlreadyRunning`].
    pub fn start(&self, cancel: &CancellationToken) -> Result<(), WatchError> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if *running {
            return Err(WatchError::AlreadyRunning);
        }

        let raw_rx = self
            .raw_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(WatchError::AlreadyRunning)?;

        *running = true;
        drop(running);

        let handle = tokio::spawn(event_loop(
            cancel.clone(),
            raw_rx,
            self.debounce_delay,
            Arc::clone(&self.scanner),
            self.events_tx.clone(),
            self.errors_tx.clone(),
            Arc::clone(&self.pending),
        ));
        *self.loop_handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        Ok(())
    }

    /// Stops the event loop and cancels pending timers. A second call fails
    /// with [`WatchError::NotRunning`].
    pub fn stop(&self) -> Result<(), WatchError> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if !*running {
            return Err(WatchError::NotRunning);
        }
        *running = false;
        drop(running);

        // Dropping the backend stops event production.
        *self.backend.lock().unwrap_or_else(|e| e.into_inner()) = None;

        if let Some(handle) = self
            .loop_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        for (_, timer) in pending.drain() {
            timer.abort();
        }

        Ok(())
    }

    /// Registers a root (recursively) for watching. Adding a path twice is a
    /// no-op.
    pub fn add(&self, path: &Path) -> Result<(), WatchError> {
        let mut watched = self.watched.lock().unwrap_or_else(|e| e.into_inner());
        if watched.contains(path) {
            return Ok(());
        }

        let mut backend = self.backend.lock().unwrap_or_else(|e| e.into_inner());
        let backend = backend.as_mut().ok_or(WatchError::NotRunning)?;
        backend.watch(path, RecursiveMode::Recursive)?;
        watched.insert(path.to_path_buf());
        Ok(())
    }

    /// Deregisters a previously added root. Removing an unknown path is a
    /// no-op.
    pub fn remove(&self, path: &Path) -> Result<(), WatchError> {
        let mut watched = self.watched.lock().unwrap_or_else(|e| e.into_inner());
        if !watched.remove(path) {
            return Ok(());
        }

        let mut backend = self.backend.lock().unwrap_or_else(|e| e.into_inner());
        let backend = backend.as_mut().ok_or(WatchError::NotRunning)?;
        backend.unwatch(path)?;
        Ok(())
    }

    /// Takes the receive side of the event stream. Single consumer; later
    /// calls return `None`.
    pub fn take_events(&self) -> Option<mpsc::Receiver<ChangeEvent>> {
        self.events_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Takes the receive side of the error stream. Single consumer; later
    /// calls return `None`.
    pub fn take_errors(&self) -> Option<mpsc::Receiver<notify::Error>> {
        self.errors_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

#[allow(clippy::too_many_arguments)]
async fn event_loop(
    cancel: CancellationToken,
    mut raw_rx: mpsc::Receiver<RawEvent>,
    debounce_delay: Duration,
    scanner: Arc<Scanner>,
    events_tx: mpsc::Sender<ChangeEvent>,
    errors_tx: mpsc::Sender<notify::Error>,
    pending: PendingTimers,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            raw = raw_rx.recv() => {
                let Some(raw) = raw else { break };
                match raw {
                    Ok(event) => handle_raw_event(
                        event,
                        debounce_delay,
                        &scanner,
                        &events_tx,
                        &pending,
                    ),
                    Err(error) => {
                        tracing::warn!(%error, "watch backend error");
                        let _ = errors_tx.try_send(error);
                    }
                }
            }
        }
    }
}

fn handle_raw_event(
    event: notify::Event,
    debounce_delay: Duration,
    scanner: &Arc<Scanner>,
    events_tx: &mpsc::Sender<ChangeEvent>,
    pending: &PendingTimers,
) {
    let kind = map_event_kind(&event.kind);

    // Rename events from backends that report both ends carry the old path
    // first and the new path second.
    let (old_path, paths) = match (kind, event.paths.as_slice()) {
        (ChangeKind::Rename, [old, new]) => (Some(old.clone()), vec![new.clone()]),
        _ => (None, event.paths),
    };

    for path in paths {
        debounce(
            path,
            kind,
            old_path.clone(),
            debounce_delay,
            scanner,
            events_tx,
            pending,
        );
    }
}

/// Arms (or re-arms) the per-path timer. A new raw event on the same path
/// before expiry replaces the pending delivery, so a burst collapses into a
/// single event describing the final state.
fn debounce(
    path: PathBuf,
    kind: ChangeKind,
    old_path: Option<PathBuf>,
    delay: Duration,
    scanner: &Arc<Scanner>,
    events_tx: &mpsc::Sender<ChangeEvent>,
    pending: &PendingTimers,
) {
    let scanner = Arc::clone(scanner);
    let events_tx = events_tx.clone();
    let pending_map = Arc::clone(pending);
    let timer_key = path.clone();

    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;

        {
            let mut map = pending_map.lock().unwrap_or_else(|e| e.into_inner());
            map.remove(&timer_key);
        }

        let record = match kind {
            ChangeKind::Delete => None,
            _ => scanner.stat_record(&timer_key).await.ok(),
        };

        let event = ChangeEvent {
            kind,
            path: timer_key,
            old_path,
            record,
            timestamp: SystemTime::now(),
        };

        // A full channel drops the event; eventual consistency comes from
        // the next change on the same path.
        let _ = events_tx.try_send(event);
    });

    let mut map = pending.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(previous) = map.insert(path, handle) {
        previous.abort();
    }
}

fn map_event_kind(kind: &EventKind) -> ChangeKind {
    match kind {
        EventKind::Create(_) => ChangeKind::Create,
        EventKind::Remove(_) => ChangeKind::Delete,
        EventKind::Modify(ModifyKind::Name(_)) => ChangeKind::Rename,
        EventKind::Modify(_) => ChangeKind::Modify,
        // Anything unrecognized is treated as a modification.
        _ => ChangeKind::Modify,
    }
}

/// Errors produced by the watcher's lifecycle operations.
#[derive(Debug, Error)]
pub enum WatchError {
    /// `start` was called while the watcher was already running, or the
    /// watcher was already consumed by an earlier run.
    #[error("watcher is already running")]
    AlreadyRunning,
    /// `stop`, `add`, or `remove` was called on a watcher that is not
    /// usable.
    #[error("watcher is not running")]
    NotRunning,
    /// The underlying notification backend failed.
    #[error("watch backend error: {0}")]
    Backend(#[from] notify::Error),
}
