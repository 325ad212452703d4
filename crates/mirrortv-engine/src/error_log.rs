//! Bounded log of failures, optionally persisted as JSON.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use mirrortv_ipc::{ErrorLogSnapshot, ErrorRecord};

use crate::{EngineResult, MAX_ERROR_RECORDS};

struct Inner {
    records: VecDeque<ErrorRecord>,
    last_updated: Option<DateTime<Utc>>,
}

/// Shared error log. Appends never fail the caller; persistence problems
/// are reported through tracing only.
pub struct ErrorLog {
    inner: Mutex<Inner>,
    path: Option<PathBuf>,
    capacity: usize,
}

impl ErrorLog {
    /// A log that lives only in memory.
    pub fn in_memory() -> Self {
        Self::with_parts(None, ErrorLogSnapshot::default())
    }

    /// A log persisted at `path`. Existing records are loaded; an unreadable
    /// or corrupt file starts the log empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let snapshot = match load(&path) {
            Ok(Some(snapshot)) => {
                info!(path = %path.display(), records = snapshot.errors.len(), "Loaded error log");
                snapshot
            }
            Ok(None) => ErrorLogSnapshot::default(),
            Err(e) => {
                warn!(path = %path.display(), "Ignoring unreadable error log: {}", e);
                ErrorLogSnapshot::default()
            }
        };

        Self::with_parts(Some(path), snapshot)
    }

    fn with_parts(path: Option<PathBuf>, snapshot: ErrorLogSnapshot) -> Self {
        let mut records: VecDeque<_> = snapshot.errors.into();
        while records.len() > MAX_ERROR_RECORDS {
            records.pop_front();
        }

        Self {
            inner: Mutex::new(Inner {
                records,
                last_updated: snapshot.last_updated,
            }),
            path,
            capacity: MAX_ERROR_RECORDS,
        }
    }

    /// Append a record, dropping the oldest past capacity.
    pub fn append(&self, record: ErrorRecord) {
        error!(
            kind = ?record.kind,
            client_id = record.client_id.as_ref().map(|c| c.as_str()).unwrap_or("-"),
            "{}",
            first_line(&record.details)
        );

        let snapshot = {
            let mut inner = self.inner.lock();
            inner.records.push_back(record);
            while inner.records.len() > self.capacity {
                inner.records.pop_front();
            }
            inner.last_updated = Some(Utc::now());
            self.path.as_ref().map(|_| snapshot_of(&inner))
        };

        if let Some(snapshot) = snapshot {
            self.persist(&snapshot);
        }
    }

    /// Records, oldest first.
    pub fn read_all(&self) -> Vec<ErrorRecord> {
        self.inner.lock().records.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> ErrorLogSnapshot {
        snapshot_of(&self.inner.lock())
    }

    /// Remove every record.
    pub fn clear(&self) {
        let snapshot = {
            let mut inner = self.inner.lock();
            inner.records.clear();
            inner.last_updated = Some(Utc::now());
            self.path.as_ref().map(|_| snapshot_of(&inner))
        };

        info!("Error log cleared");
        if let Some(snapshot) = snapshot {
            self.persist(&snapshot);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, snapshot: &ErrorLogSnapshot) {
        let Some(path) = self.path.as_deref() else {
            return;
        };

        match store(path, snapshot) {
            Ok(()) => debug!(path = %path.display(), "Error log saved"),
            Err(e) => warn!(path = %path.display(), "Failed to save error log: {}", e),
        }
    }
}

fn snapshot_of(inner: &Inner) -> ErrorLogSnapshot {
    ErrorLogSnapshot {
        errors: inner.records.iter().cloned().collect(),
        last_updated: inner.last_updated,
    }
}

fn first_line(details: &str) -> &str {
    details.lines().next().unwrap_or_default()
}

fn load(path: &Path) -> EngineResult<Option<ErrorLogSnapshot>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Write through a sibling temp file so a crash never leaves half a log.
fn store(path: &Path, snapshot: &ErrorLogSnapshot) -> EngineResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
