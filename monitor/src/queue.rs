//! Pending file set.
//!
//! An ordered list of paths waiting for the next flush. It is append-only
//! between flushes and is emptied as a whole by [`BatchQueue::take`]; there is
//! no way to remove a single entry. A path written several times before a
//! flush is queued several times.

use std::path::{Path, PathBuf};

/// A queued file and the number of failed transfer attempts so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub path: PathBuf,
    pub attempts: u8,
}

impl PendingFile {
    /// A freshly observed file with no failed attempts.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path, attempts: 0 }
    }
}

/// Ordered queue of files awaiting transfer.
#[derive(Debug, Default)]
pub struct BatchQueue {
    items: Vec<PendingFile>,
}

impl BatchQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a newly observed path.
    pub fn push(&mut self, path: PathBuf) {
        self.items.push(PendingFile::new(path));
    }

    /// Puts items from a previous batch back in front of anything queued
    /// since, keeping their relative order.
    pub fn requeue(&mut self, items: Vec<PendingFile>) {
        if items.is_empty() {
            return;
        }
        let newer = std::mem::replace(&mut self.items, items);
        self.items.extend(newer);
    }

    /// Removes and returns every queued item in arrival order.
    pub fn take(&mut self) -> Vec<PendingFile> {
        std::mem::take(&mut self.items)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Queued paths in processing order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.items.iter().map(|item| item.path.as_path())
    }
}
