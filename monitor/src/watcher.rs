//! File watcher for detecting completed writes under the outbox directory.
//!
//! This module watches a directory tree recursively and emits an event each
//! time a file whose name matches the configured [`NameFilter`] is written.
//!
//! # Architecture
//!
//! The watcher uses the [`notify`] crate. The notify callback is kept
//! lightweight: it classifies the raw event and forwards the result through an
//! [`EventSink`] with `try_send`, so the platform watcher thread never blocks.
//!
//! A full channel must not lose the signal. The sink drops the event but
//! marks the channel overflowed, and the paired [`EventStream`] reports a
//! [`WatchEvent::Fault`] once the buffered events are consumed. The owner
//! re-registers the watch and picks up the dropped files with
//! [`scan_existing`].
//!
//! A single logical save usually produces several notifications (one per
//! `write` call plus a close-after-write where the platform reports it). The
//! watcher forwards all of them; batching downstream absorbs the duplicates.
//!
//! Failures of the watch mechanism itself are reported in-band as
//! [`WatchEvent::Fault`] so the owner can tear the watch down and register a
//! new one.
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use filedrop_monitor::filter::NameFilter;
//! use filedrop_monitor::watcher::{event_channel, FileWatcher, WatchEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let filter = NameFilter::new("*.xml")?;
//!     let (sink, mut events) = event_channel(100);
//!     let _watcher = FileWatcher::new(PathBuf::from("/data/outbox"), filter, sink)?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             WatchEvent::Written(path) => println!("written: {}", path.display()),
//!             WatchEvent::Fault(message) => eprintln!("watch failed: {message}"),
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use notify::{
    event::{AccessKind, AccessMode, ModifyKind},
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, trace, warn};
use walkdir::WalkDir;

use crate::filter::NameFilter;

/// Events emitted by the file watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A file matching the filter was written.
    Written(PathBuf),

    /// The watch mechanism failed and should be re-initialised.
    Fault(String),
}

/// Errors that can occur during file watching operations.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Failed to initialize the file system watcher.
    #[error("failed to create watcher: {0}")]
    WatcherInit(#[from] notify::Error),

    /// The watch directory does not exist or is inaccessible.
    #[error("watch directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),
}

/// Result type for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Creates a bounded watch event channel.
#[must_use]
pub fn event_channel(capacity: usize) -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::channel(capacity);
    let overflowed = Arc::new(AtomicBool::new(false));
    (
        EventSink {
            tx,
            overflowed: Arc::clone(&overflowed),
        },
        EventStream { rx, overflowed },
    )
}

/// Sending half of a watch event channel. Never blocks.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<WatchEvent>,
    overflowed: Arc<AtomicBool>,
}

impl EventSink {
    /// Queues `event` without waiting.
    ///
    /// If the channel is full the event is dropped and the channel is marked
    /// overflowed. Returns `false` once the receiving side is gone.
    pub fn emit(&self, event: WatchEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                if !self.overflowed.swap(true, Ordering::AcqRel) {
                    warn!(event = ?event, "Watch event channel full, watch will be re-initialised");
                }
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Watch event receiver gone, dropping event");
                false
            }
        }
    }
}

/// Receiving half of a watch event channel.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<WatchEvent>,
    overflowed: Arc<AtomicBool>,
}

impl EventStream {
    /// Returns the next event, or `None` once every sink is dropped.
    ///
    /// After an overflow the buffered events are returned first, followed by
    /// a single [`WatchEvent::Fault`].
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        if self.overflowed.load(Ordering::Acquire) {
            return match self.rx.try_recv() {
                Ok(event) => Some(event),
                Err(_) => {
                    self.overflowed.store(false, Ordering::Release);
                    Some(WatchEvent::Fault(
                        "watch event channel overflowed, events were dropped".to_string(),
                    ))
                }
            };
        }
        self.rx.recv().await
    }
}

/// Recursive watch over a directory tree.
///
/// Dropping the watcher ends the subscription; no further events are sent.
#[derive(Debug)]
pub struct FileWatcher {
    /// Kept alive to maintain the watch subscription.
    #[allow(dead_code)]
    watcher: RecommendedWatcher,

    watch_dir: PathBuf,

    filter: NameFilter,
}

impl FileWatcher {
    /// Starts watching `watch_dir` recursively for writes to files whose name
    /// matches `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The watch directory does not exist
    /// - The underlying platform watcher cannot be created or registered
    pub fn new(
        watch_dir: PathBuf,
        filter: NameFilter,
        events: EventSink,
    ) -> Result<Self> {
        if !watch_dir.is_dir() {
            return Err(WatcherError::DirectoryNotFound(watch_dir));
        }

        let callback_root = watch_dir.clone();
        let callback_filter = filter.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| {
                if let Some(event) = classify(res, &callback_root, &callback_filter) {
                    events.emit(event);
                }
            },
            Config::default(),
        )?;

        watcher.watch(&watch_dir, RecursiveMode::Recursive)?;

        info!(
            watch_dir = %watch_dir.display(),
            filter = filter.pattern(),
            "Started recursive file watch"
        );

        Ok(Self {
            watcher,
            watch_dir,
            filter,
        })
    }

    /// Returns the directory being watched.
    #[must_use]
    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    /// Returns the active name filter.
    #[must_use]
    pub fn filter(&self) -> &NameFilter {
        &self.filter
    }
}

/// Maps a raw notify result onto a [`WatchEvent`], or `None` if it is not
/// relevant.
///
/// Only the first matching path of an event is reported; notify attaches
/// several paths only to rename events, which are not write completions.
fn classify(
    res: std::result::Result<Event, notify::Error>,
    root: &Path,
    filter: &NameFilter,
) -> Option<WatchEvent> {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "File watcher error");
            return Some(WatchEvent::Fault(e.to_string()));
        }
    };

    trace!(kind = ?event.kind, paths = ?event.paths, "Received notify event");

    if event.need_rescan() {
        return Some(WatchEvent::Fault(
            "watcher dropped events and requires a rescan".to_string(),
        ));
    }

    match event.kind {
        EventKind::Remove(_) if event.paths.iter().any(|p| p == root) => Some(WatchEvent::Fault(
            format!("watch directory removed: {}", root.display()),
        )),
        EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Any)
        | EventKind::Access(AccessKind::Close(AccessMode::Write)) => event
            .paths
            .into_iter()
            .find(|path| filter.matches(path))
            .map(WatchEvent::Written),
        _ => None,
    }
}

/// Lists the files under `root` whose name matches `filter`, sorted by path.
///
/// Used after (re)registering a watch to pick up files written while no
/// watch was listening. Unreadable entries are logged and skipped.
#[must_use]
pub fn scan_existing(root: &Path, filter: &NameFilter) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry during rescan");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| filter.matches(path))
        .collect()
}
