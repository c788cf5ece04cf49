//! Shared fakes for the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use filedrop_monitor::filter::NameFilter;
use filedrop_monitor::pipeline::{Pipeline, PipelineConfig};
use filedrop_monitor::supervisor::EventSource;
use filedrop_monitor::transfer::{Connector, TransferError, TransferSession};
use filedrop_monitor::watcher::{self, EventSink};
use tempfile::TempDir;

pub const WORKING_PATH: &str = "/inbound";

/// In-memory stand-in for the SFTP server.
#[derive(Default)]
pub struct FakeRemote {
    /// Remote paths in upload order.
    pub uploads: Mutex<Vec<String>>,
    /// Remote paths that always fail with a permission error.
    pub rejected: Mutex<HashSet<String>>,
    /// Remote paths whose next upload breaks the session.
    pub drop_session_on: Mutex<HashSet<String>>,
    /// Blocks the next upload for this long.
    pub stall_next_upload: Mutex<Option<Duration>>,
    /// Number of upcoming connects to refuse.
    pub refuse_connects: AtomicUsize,
    /// Successful and failed connect attempts.
    pub connects: AtomicUsize,
}

impl FakeRemote {
    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn reject(&self, remote_path: &str) {
        self.rejected.lock().unwrap().insert(remote_path.to_string());
    }

    pub fn drop_session_on(&self, remote_path: &str) {
        self.drop_session_on
            .lock()
            .unwrap()
            .insert(remote_path.to_string());
    }

    pub fn stall_next_upload(&self, duration: Duration) {
        *self.stall_next_upload.lock().unwrap() = Some(duration);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

pub struct FakeConnector {
    pub remote: Arc<FakeRemote>,
}

impl Connector for FakeConnector {
    type Session = FakeSession;

    fn connect(&self) -> Result<FakeSession, TransferError> {
        self.remote.connects.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .remote
            .refuse_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransferError::Connect {
                addr: "fake:22".to_string(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
            });
        }
        Ok(FakeSession {
            remote: Arc::clone(&self.remote),
        })
    }
}

pub struct FakeSession {
    remote: Arc<FakeRemote>,
}

impl TransferSession for FakeSession {
    fn upload(&mut self, reader: &mut dyn Read, remote_path: &str) -> Result<u64, TransferError> {
        let stall = self.remote.stall_next_upload.lock().unwrap().take();
        if let Some(duration) = stall {
            std::thread::sleep(duration);
        }
        if self.remote.drop_session_on.lock().unwrap().remove(remote_path) {
            return Err(TransferError::Transport("connection reset by peer".to_string()));
        }
        if self.remote.rejected.lock().unwrap().contains(remote_path) {
            return Err(TransferError::Remote {
                path: remote_path.to_string(),
                message: "permission denied".to_string(),
            });
        }
        let mut body = Vec::new();
        let bytes = reader
            .read_to_end(&mut body)
            .map_err(TransferError::LocalRead)?;
        self.remote
            .uploads
            .lock()
            .unwrap()
            .push(remote_path.to_string());
        Ok(bytes as u64)
    }
}

/// Temporary outbox and archive directories.
pub struct Dirs {
    _root: TempDir,
    pub outbox: PathBuf,
    pub keep: PathBuf,
}

impl Dirs {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("Failed to create temp dir");
        let outbox = root.path().join("outbox");
        let keep = root.path().join("keep");
        fs::create_dir_all(&outbox).unwrap();
        fs::create_dir_all(&keep).unwrap();
        Self {
            _root: root,
            outbox,
            keep,
        }
    }

    pub fn write(&self, name: &str) -> PathBuf {
        let path = self.outbox.join(name);
        fs::write(&path, format!("contents of {name}")).unwrap();
        path
    }

    pub fn pipeline(&self, retry_limit: u8) -> Pipeline {
        Pipeline::new(PipelineConfig {
            keep_dir: self.keep.clone(),
            remote_working_path: WORKING_PATH.to_string(),
            retry_limit,
        })
    }

    pub fn archived(&self, name: &str) -> bool {
        self.keep.join(name).exists()
    }
}

pub fn remote(name: &str) -> String {
    format!("{WORKING_PATH}/{name}")
}

/// Event source whose registrations are driven by the test.
#[derive(Clone, Default)]
pub struct ManualSource {
    registrations: Arc<Mutex<Vec<Registration>>>,
}

#[derive(Clone)]
pub struct Registration {
    pub root: PathBuf,
    pub filter: String,
    pub events: EventSink,
}

impl ManualSource {
    pub fn count(&self) -> usize {
        self.registrations.lock().unwrap().len()
    }

    pub fn latest(&self) -> Registration {
        self.registrations
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no registration yet")
    }

    pub fn all(&self) -> Vec<Registration> {
        self.registrations.lock().unwrap().clone()
    }
}

impl EventSource for ManualSource {
    type Guard = ();

    fn register(
        &self,
        root: &Path,
        filter: &NameFilter,
        events: EventSink,
    ) -> watcher::Result<()> {
        self.registrations.lock().unwrap().push(Registration {
            root: root.to_path_buf(),
            filter: filter.pattern().to_string(),
            events,
        });
        Ok(())
    }
}
