//! Filedrop Monitor - debounced directory-to-SFTP transfer.
//!
//! This crate watches a directory tree for written files, waits for a quiet
//! period, then uploads each collected file to an SFTP server and moves it
//! into a local archive directory.
//!
//! # Overview
//!
//! ```text
//! watcher ──▶ supervisor ──▶ scheduler (queue + deadline) ──▶ pipeline ──▶ transfer
//! ```
//!
//! The [`supervisor`] owns the watch and re-creates it after faults. The
//! [`scheduler`] collects paths until no event has arrived for the
//! quiescence duration, then hands the batch to the [`pipeline`], which
//! uploads and archives files one by one over a [`transfer`] session.
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types for monitor operations
//! - [`filter`]: File name glob matching
//! - [`watcher`]: File system watcher for written files
//! - [`supervisor`]: Watch lifecycle and fault recovery
//! - [`queue`]: Pending file set
//! - [`scheduler`]: Debounced batching and drain scheduling
//! - [`pipeline`]: Upload and archive sequence with the failure policy
//! - [`transfer`]: SFTP client
//! - [`check`]: Preflight check for configuration and connectivity

pub mod check;
pub mod config;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod queue;
pub mod scheduler;
pub mod supervisor;
pub mod transfer;
pub mod watcher;

pub use config::Config;
pub use error::{MonitorError, Result};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerHandle};
pub use supervisor::{MonitorSupervisor, NotifySource, RecoveryPolicy};
