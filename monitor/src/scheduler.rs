//! Debounce scheduler: coalesces write events into batches and drains them.
//!
//! # Architecture
//!
//! The scheduler is a single Tokio task that exclusively owns the pending
//! [`BatchQueue`], the quiescence deadline and the transfer session. Other
//! components talk to it through a cloneable [`SchedulerHandle`] backed by a
//! channel, so none of that state is shared between threads.
//!
//! The task is a small state machine:
//!
//! ```text
//!   Idle ──enqueue──▶ Armed ──deadline──▶ Draining ──▶ Idle   (queue empty)
//!                     ▲   │                        └─▶ Armed  (items left)
//!                     └───┘ enqueue restarts the deadline
//! ```
//!
//! - `Armed` exists iff the queue is non-empty, so a deadline is always
//!   created fresh after a drain that emptied the queue.
//! - Each enqueue moves the deadline to `now + quiescence`; a steady stream of
//!   events postpones the flush indefinitely.
//! - Commands that arrive while a drain runs wait in the channel and land in
//!   the next batch. The command channel is unbounded, so senders never stall
//!   behind a drain.
//! - When a drain requeues failures, the next deadline adds an exponential
//!   retry delay (1s doubling to 60s, ±25% jitter).
//!
//! The drain itself runs on the blocking pool since both the session and the
//! filesystem calls are synchronous.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::pipeline::{DrainReport, Pipeline};
use crate::queue::BatchQueue;
use crate::transfer::Connector;

/// Initial retry delay after a drain that left failures behind.
const INITIAL_RETRY_DELAY_SECS: u64 = 1;

/// Maximum retry delay.
const MAX_RETRY_DELAY_SECS: u64 = 60;

/// Jitter factor (±25%).
const JITTER_FACTOR: f64 = 0.25;

/// Timing settings for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Quiet period after the last event before a batch is flushed.
    pub quiescence: Duration,

    /// First retry delay after a failed drain.
    pub initial_retry_delay: Duration,

    /// Cap for the retry delay.
    pub max_retry_delay: Duration,
}

impl SchedulerConfig {
    /// Creates a configuration with the default retry delays.
    #[must_use]
    pub fn new(quiescence: Duration) -> Self {
        Self {
            quiescence,
            initial_retry_delay: Duration::from_secs(INITIAL_RETRY_DELAY_SECS),
            max_retry_delay: Duration::from_secs(MAX_RETRY_DELAY_SECS),
        }
    }
}

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Queue empty, no deadline.
    Idle,
    /// Queue non-empty, flush due at `deadline`.
    Armed { deadline: Instant },
    /// A batch is being transferred.
    Draining,
}

/// Point-in-time view of the scheduler, for diagnostics and shutdown.
#[derive(Debug, Clone)]
pub struct SchedulerSnapshot {
    pub state: SchedulerState,
    pub pending: Vec<PathBuf>,
    pub connected: bool,
}

/// Published after every flush.
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// When the deadline fired.
    pub flushed_at: Instant,
    /// The batch as taken from the queue, in order.
    pub batch: Vec<PathBuf>,
    pub outcome: DrainReport,
}

/// Error returned when the scheduler task has stopped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("scheduler has stopped")]
pub struct SchedulerClosed;

#[derive(Debug)]
enum Command {
    Enqueue(PathBuf),
    Reconnect,
    Snapshot(oneshot::Sender<SchedulerSnapshot>),
}

/// Cloneable entry point to a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SchedulerHandle {
    /// Queues a written file for the next batch. Never waits, even while a
    /// drain is running.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerClosed`] if the scheduler task has terminated.
    pub fn enqueue(&self, path: PathBuf) -> Result<(), SchedulerClosed> {
        self.tx
            .send(Command::Enqueue(path))
            .map_err(|_| SchedulerClosed)
    }

    /// Drops the current session and establishes a new one.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerClosed`] if the scheduler task has terminated.
    pub fn reconnect(&self) -> Result<(), SchedulerClosed> {
        self.tx
            .send(Command::Reconnect)
            .map_err(|_| SchedulerClosed)
    }

    /// Returns the scheduler's current state and pending paths. Waits for an
    /// in-flight drain to finish.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerClosed`] if the scheduler task has terminated.
    pub async fn snapshot(&self) -> Result<SchedulerSnapshot, SchedulerClosed> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot(reply_tx))
            .map_err(|_| SchedulerClosed)?;
        reply_rx.await.map_err(|_| SchedulerClosed)
    }
}

/// Owner of the pending queue, the deadline and the session.
pub struct Scheduler<C: Connector> {
    config: SchedulerConfig,
    connector: Arc<C>,
    pipeline: Arc<Pipeline>,
    queue: BatchQueue,
    state: SchedulerState,
    session: Option<C::Session>,
    retry_delay: Duration,
    reports: Option<mpsc::UnboundedSender<BatchReport>>,
}

impl<C: Connector> Scheduler<C> {
    #[must_use]
    pub fn new(config: SchedulerConfig, connector: C, pipeline: Pipeline) -> Self {
        Self {
            retry_delay: config.initial_retry_delay,
            config,
            connector: Arc::new(connector),
            pipeline: Arc::new(pipeline),
            queue: BatchQueue::new(),
            state: SchedulerState::Idle,
            session: None,
            reports: None,
        }
    }

    /// Publishes a [`BatchReport`] on `reports` after every flush.
    #[must_use]
    pub fn with_reports(mut self, reports: mpsc::UnboundedSender<BatchReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    /// Starts the scheduler task.
    ///
    /// The task stops once every [`SchedulerHandle`] has been dropped;
    /// anything still queued at that point is abandoned.
    #[must_use]
    pub fn spawn(self) -> (SchedulerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(rx));
        (SchedulerHandle { tx }, task)
    }

    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        debug!(
            quiescence_ms = self.config.quiescence.as_millis(),
            "Starting scheduler"
        );

        loop {
            let deadline = match self.state {
                SchedulerState::Armed { deadline } => Some(deadline),
                SchedulerState::Idle | SchedulerState::Draining => None,
            };

            tokio::select! {
                command = rx.recv() => {
                    match command {
                        Some(Command::Enqueue(path)) => self.enqueue(path),
                        Some(Command::Reconnect) => self.reconnect().await,
                        Some(Command::Snapshot(reply)) => {
                            let _ = reply.send(self.snapshot());
                        }
                        None => break,
                    }
                }

                _ = async {
                    match deadline {
                        Some(deadline) => sleep_until(deadline).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    self.flush().await;
                }
            }
        }

        if !self.queue.is_empty() {
            warn!(
                abandoned = self.queue.len(),
                "Scheduler stopping with files still queued"
            );
        }
        debug!("Scheduler terminated");
    }

    /// Appends `path` and (re)starts the quiescence countdown.
    fn enqueue(&mut self, path: PathBuf) {
        debug!(path = %path.display(), "Queued file");
        self.queue.push(path);
        let deadline = Instant::now() + self.config.quiescence;
        self.state = SchedulerState::Armed { deadline };
    }

    async fn reconnect(&mut self) {
        if self.session.take().is_some() {
            debug!("Dropped previous session");
        }
        self.session = Self::connect(Arc::clone(&self.connector)).await;
    }

    /// Connects on the blocking pool. Takes the connector rather than `&self`
    /// so the scheduler is not borrowed across the await.
    async fn connect(connector: Arc<C>) -> Option<C::Session> {
        match tokio::task::spawn_blocking(move || connector.connect()).await {
            Ok(Ok(session)) => Some(session),
            Ok(Err(e)) => {
                error!(error = %e, "Failed to connect to remote endpoint");
                None
            }
            Err(e) => {
                error!(error = %e, "Connect task failed");
                None
            }
        }
    }

    fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            state: self.state,
            pending: self.queue.paths().map(PathBuf::from).collect(),
            connected: self.session.is_some(),
        }
    }

    /// Drains the current batch and re-arms or idles depending on leftovers.
    async fn flush(&mut self) {
        let flushed_at = Instant::now();
        self.state = SchedulerState::Draining;

        let batch = self.queue.take();
        let batch_paths: Vec<PathBuf> = batch.iter().map(|item| item.path.clone()).collect();
        info!(files = batch.len(), "Quiet period elapsed, processing batch");

        if self.session.is_none() {
            self.session = Self::connect(Arc::clone(&self.connector)).await;
        }

        let outcome = match self.session.take() {
            Some(mut session) => {
                let pipeline = Arc::clone(&self.pipeline);
                let drained = tokio::task::spawn_blocking(move || {
                    let report = pipeline.drain(&mut session, batch);
                    (session, report)
                })
                .await;

                match drained {
                    Ok((session, report)) => {
                        if !report.session_lost {
                            self.session = Some(session);
                        }
                        report
                    }
                    Err(e) => {
                        error!(error = %e, "Drain task failed, batch lost");
                        DrainReport::default()
                    }
                }
            }
            None => {
                warn!(files = batch.len(), "No session available, requeueing batch");
                DrainReport::unattempted(batch)
            }
        };

        info!(
            transferred = outcome.transferred.len(),
            skipped = outcome.skipped.len(),
            requeued = outcome.requeued.len(),
            dead_lettered = outcome.dead_lettered.len(),
            "Batch processed"
        );

        let had_failures = !outcome.requeued.is_empty();
        self.queue.requeue(outcome.requeued.clone());

        if self.queue.is_empty() {
            self.reset_retry_delay();
            self.state = SchedulerState::Idle;
        } else if had_failures {
            let delay = self.config.quiescence + add_jitter(self.retry_delay);
            debug!(delay_ms = delay.as_millis(), "Scheduling retry");
            self.increase_retry_delay();
            self.state = SchedulerState::Armed {
                deadline: Instant::now() + delay,
            };
        } else {
            self.reset_retry_delay();
            self.state = SchedulerState::Armed {
                deadline: Instant::now() + self.config.quiescence,
            };
        }

        if let Some(reports) = &self.reports {
            let _ = reports.send(BatchReport {
                flushed_at,
                batch: batch_paths,
                outcome,
            });
        }
    }

    /// Doubles the retry delay up to the maximum.
    fn increase_retry_delay(&mut self) {
        self.retry_delay = (self.retry_delay * 2).min(self.config.max_retry_delay);
    }

    /// Resets the retry delay to the initial value.
    fn reset_retry_delay(&mut self) {
        self.retry_delay = self.config.initial_retry_delay;
    }
}

/// Adds ±25% jitter to a duration.
fn add_jitter(duration: Duration) -> Duration {
    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * JITTER_FACTOR;
    if jitter_range <= 0.0 {
        return duration;
    }
    let jitter = rng.random_range(-jitter_range..=jitter_range);
    Duration::from_secs_f64((duration.as_secs_f64() + jitter).max(0.0))
}
