//! Supervision of the file watch.
//!
//! [`MonitorSupervisor::run`] owns the watch lifecycle on its own task. Each
//! round it asks the scheduler for a fresh connection, registers a new watch,
//! queues the matching files already in the tree, and forwards written files
//! to the scheduler until the watch reports a fault. It then waits for the
//! delay chosen by [`RestartTracker`] and starts over. A fault never ends the
//! process.
//!
//! The rescan after registration covers files written while no watch was
//! listening and events dropped on channel overflow.
//!
//! The watch mechanism sits behind [`EventSource`] so the loop can be driven
//! by something other than the platform watcher.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::filter::NameFilter;
use crate::scheduler::SchedulerHandle;
use crate::watcher::{self, event_channel, EventSink, EventStream, FileWatcher, WatchEvent};

/// Capacity of the channel between a watch and the supervisor.
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Something that can register a watch and report events on a channel.
pub trait EventSource: Send + Sync + 'static {
    /// Keeps the watch alive; dropping it ends the watch.
    type Guard: Send + 'static;

    /// Registers a recursive watch on `root`.
    ///
    /// # Errors
    ///
    /// Returns a [`watcher::WatcherError`] if the watch cannot be registered.
    fn register(
        &self,
        root: &Path,
        filter: &NameFilter,
        events: EventSink,
    ) -> watcher::Result<Self::Guard>;
}

/// [`EventSource`] backed by the platform file watcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifySource;

impl EventSource for NotifySource {
    type Guard = FileWatcher;

    fn register(
        &self,
        root: &Path,
        filter: &NameFilter,
        events: EventSink,
    ) -> watcher::Result<FileWatcher> {
        FileWatcher::new(root.to_path_buf(), filter.clone(), events)
    }
}

/// Timing rules for re-registering a failed watch.
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    /// Delay before the first restart after a healthy period.
    pub initial_delay: Duration,
    /// Upper bound for the delay.
    pub max_delay: Duration,
    /// A watch that lived this long resets the backoff.
    pub stable_after: Duration,
    /// Restarts allowed inside `window` before the delay jumps to `max_delay`.
    pub max_restarts: usize,
    pub window: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            stable_after: Duration::from_secs(60),
            max_restarts: 10,
            window: Duration::from_secs(60),
        }
    }
}

/// Tracks recent restarts and computes the next delay.
#[derive(Debug)]
pub struct RestartTracker {
    policy: RecoveryPolicy,
    current: Duration,
    recent: VecDeque<Instant>,
}

impl RestartTracker {
    #[must_use]
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self {
            current: policy.initial_delay,
            policy,
            recent: VecDeque::new(),
        }
    }

    /// Records a restart at `now` after a watch that stayed up for
    /// `healthy_for`, and returns how long to wait before re-registering.
    pub fn next_delay(&mut self, now: Instant, healthy_for: Duration) -> Duration {
        if healthy_for >= self.policy.stable_after {
            self.current = self.policy.initial_delay;
        }

        self.recent.push_back(now);
        while let Some(oldest) = self.recent.front() {
            if now.duration_since(*oldest) > self.policy.window {
                self.recent.pop_front();
            } else {
                break;
            }
        }

        let delay = if self.recent.len() > self.policy.max_restarts {
            warn!(
                restarts = self.recent.len(),
                window_secs = self.policy.window.as_secs(),
                "Watch restart rate exceeded, backing off"
            );
            self.policy.max_delay
        } else {
            self.current
        };

        self.current = (self.current * 2).min(self.policy.max_delay);
        delay
    }
}

/// Why a watch round ended.
enum RoundEnd {
    Fault(String),
    StreamClosed,
    SchedulerGone,
}

/// Owns the watch and re-creates it after faults.
pub struct MonitorSupervisor<S: EventSource> {
    watch_dir: PathBuf,
    filter: NameFilter,
    source: S,
    scheduler: SchedulerHandle,
    policy: RecoveryPolicy,
}

impl<S: EventSource> MonitorSupervisor<S> {
    #[must_use]
    pub fn new(
        watch_dir: PathBuf,
        filter: NameFilter,
        source: S,
        scheduler: SchedulerHandle,
        policy: RecoveryPolicy,
    ) -> Self {
        Self {
            watch_dir,
            filter,
            source,
            scheduler,
            policy,
        }
    }

    /// Runs until the scheduler stops.
    pub async fn run(self) {
        let mut tracker = RestartTracker::new(self.policy.clone());
        let mut generation: u64 = 0;

        loop {
            generation += 1;
            info!(
                generation,
                watch_dir = %self.watch_dir.display(),
                filter = self.filter.pattern(),
                "Initialising file monitor"
            );

            if self.scheduler.reconnect().is_err() {
                break;
            }

            let started = Instant::now();
            let (sink, mut events) = event_channel(EVENT_CHANNEL_CAPACITY);

            match self.source.register(&self.watch_dir, &self.filter, sink) {
                Ok(guard) => {
                    info!(generation, "File monitor ready");
                    let end = match self.queue_existing().await {
                        Ok(()) => self.forward(&mut events).await,
                        Err(end) => end,
                    };
                    drop(guard);

                    match end {
                        RoundEnd::Fault(message) => {
                            error!(generation, error = %message, "File monitor fault");
                        }
                        RoundEnd::StreamClosed => {
                            warn!(generation, "File monitor event stream closed");
                        }
                        RoundEnd::SchedulerGone => break,
                    }
                }
                Err(e) => {
                    error!(generation, error = %e, "Failed to register file monitor");
                }
            }

            let delay = tracker.next_delay(Instant::now(), started.elapsed());
            warn!(
                delay_ms = delay.as_millis(),
                "Re-initialising file monitor"
            );
            sleep(delay).await;
        }

        debug!("Scheduler stopped, supervisor exiting");
    }

    /// Queues files that are already present under the watch root.
    async fn queue_existing(&self) -> Result<(), RoundEnd> {
        let root = self.watch_dir.clone();
        let filter = self.filter.clone();
        let existing = match tokio::task::spawn_blocking(move || {
            watcher::scan_existing(&root, &filter)
        })
        .await
        {
            Ok(existing) => existing,
            Err(e) => {
                error!(error = %e, "Rescan task failed");
                return Ok(());
            }
        };

        if !existing.is_empty() {
            info!(files = existing.len(), "Queueing files found in watch directory");
        }
        for path in existing {
            if self.scheduler.enqueue(path).is_err() {
                return Err(RoundEnd::SchedulerGone);
            }
        }
        Ok(())
    }

    async fn forward(&self, events: &mut EventStream) -> RoundEnd {
        while let Some(event) = events.recv().await {
            match event {
                WatchEvent::Written(path) => {
                    if self.scheduler.enqueue(path).is_err() {
                        return RoundEnd::SchedulerGone;
                    }
                }
                WatchEvent::Fault(message) => return RoundEnd::Fault(message),
            }
        }
        RoundEnd::StreamClosed
    }
}
