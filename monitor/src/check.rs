//! Preflight check behind `filedrop check`.
//!
//! Validates everything `run` needs before it starts watching: the filter
//! compiles, the watch directory exists, the archive directory exists (it is
//! created if missing), and the remote endpoint accepts a login.

use std::fs;
use std::path::PathBuf;

use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::filter::NameFilter;
use crate::transfer::Connector;
use crate::watcher::WatcherError;

/// What the preflight check verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightReport {
    pub filter: String,
    pub watch_dir: PathBuf,
    pub keep_dir: PathBuf,
    pub remote: String,
}

/// Runs the preflight check, connecting once through `connector`.
///
/// Blocking; call from the blocking pool in async code.
///
/// # Errors
///
/// Returns the first failing check as a [`crate::error::MonitorError`].
pub fn preflight<C: Connector>(config: &Config, connector: &C) -> Result<PreflightReport> {
    let filter = NameFilter::new(&config.filter)?;

    if !config.watch_dir.is_dir() {
        return Err(WatcherError::DirectoryNotFound(config.watch_dir.clone()).into());
    }

    if !config.keep_dir.is_dir() {
        info!(keep_dir = %config.keep_dir.display(), "Creating archive directory");
        fs::create_dir_all(&config.keep_dir)?;
    }

    let session = connector.connect()?;
    drop(session);

    Ok(PreflightReport {
        filter: filter.pattern().to_string(),
        watch_dir: config.watch_dir.clone(),
        keep_dir: config.keep_dir.clone(),
        remote: config.sftp.address(),
    })
}
