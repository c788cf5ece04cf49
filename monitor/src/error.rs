//! Error types for the Filedrop Monitor.
//!
//! Each module defines its own error enum; [`MonitorError`] collects them for
//! callers that drive several modules at once, such as the preflight check.

use thiserror::Error;

use crate::config::ConfigError;
use crate::filter::FilterError;
use crate::pipeline::PipelineError;
use crate::transfer::TransferError;
use crate::watcher::WatcherError;

/// Errors that can occur during monitor operations.
///
/// # Examples
///
/// ```ignore
/// use filedrop_monitor::error::MonitorError;
///
/// fn load() -> Result<(), MonitorError> {
///     let config = Config::from_env()?;
///     let filter = NameFilter::new(&config.filter)?;
///     Ok(())
/// }
/// ```
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The name filter could not be compiled.
    #[error("filter error: {0}")]
    Filter(#[from] FilterError),

    /// File watching error.
    #[error("file watch error: {0}")]
    Watch(#[from] WatcherError),

    /// Remote transfer error.
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Per-file pipeline error.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// A specialized `Result` type for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;
