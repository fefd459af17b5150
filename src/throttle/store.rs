//! Durable throttle record storage.
//!
//! Records are keyed by UID and outlive the process. The connection treats
//! the store as opaque `load`/`save`/`remove`/`purge` operations; a failing
//! store is logged and otherwise ignored so throttling keeps working from
//! memory.

// ============================================================================
// Imports
// ============================================================================

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identifiers::Uid;

// ============================================================================
// Constants
// ============================================================================

/// File name prefix for per-UID record files.
const RECORD_FILE_PREFIX: &str = "throttle-";

/// File name suffix for per-UID record files.
const RECORD_FILE_SUFFIX: &str = ".json";

// ============================================================================
// ThrottleRecord
// ============================================================================

/// Persisted throttling state of one UID.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ThrottleRecord {
    /// Credit balance; negative values are unmatched-request debt.
    pub credit: f64,

    /// Consecutive requests not followed by a matching launch.
    pub miss_streak: u32,

    /// Time of the most recent registered request.
    pub last_request_ms: Option<u64>,

    /// Ban expiry, if banned.
    pub banned_until_ms: Option<u64>,

    /// URL of the most recent request awaiting confirmation.
    pub pending_url: Option<String>,
}

// ============================================================================
// ThrottleStore
// ============================================================================

/// Durable key-value area for throttle records.
pub trait ThrottleStore: Send + Sync {
    /// Loads the record for `uid`, if any.
    fn load(&self, uid: Uid) -> Result<Option<ThrottleRecord>>;

    /// Stores the record for `uid`.
    fn save(&self, uid: Uid, record: &ThrottleRecord) -> Result<()>;

    /// Deletes the record for `uid`.
    fn remove(&self, uid: Uid) -> Result<()>;

    /// Deletes every record.
    fn purge(&self) -> Result<()>;
}

// ============================================================================
// MemoryThrottleStore
// ============================================================================

/// Store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryThrottleStore {
    records: Mutex<FxHashMap<Uid, ThrottleRecord>>,
}

impl MemoryThrottleStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl ThrottleStore for MemoryThrottleStore {
    fn load(&self, uid: Uid) -> Result<Option<ThrottleRecord>> {
        Ok(self.records.lock().get(&uid).cloned())
    }

    fn save(&self, uid: Uid, record: &ThrottleRecord) -> Result<()> {
        self.records.lock().insert(uid, record.clone());
        Ok(())
    }

    fn remove(&self, uid: Uid) -> Result<()> {
        self.records.lock().remove(&uid);
        Ok(())
    }

    fn purge(&self) -> Result<()> {
        self.records.lock().clear();
        Ok(())
    }
}

// ============================================================================
// JsonFileThrottleStore
// ============================================================================

/// Store keeping one JSON file per UID in a directory.
///
/// Writes go to a sibling `.tmp` file first and are renamed into place, so a
/// crash never leaves a half-written record behind.
///
/// Inside a Tokio runtime, [`save`](ThrottleStore::save) only queues the
/// record; a blocking-pool task writes it out, coalescing repeated saves of
/// the same UID. Queued records are visible to `load` right away and are
/// flushed when the last clone of the store is dropped. Outside a runtime,
/// saves write through.
#[derive(Debug, Clone)]
pub struct JsonFileThrottleStore {
    inner: Arc<FileStoreInner>,
}

#[derive(Debug)]
struct FileStoreInner {
    dir: PathBuf,
    /// Held while touching record files; taken before `pending`.
    io: Mutex<()>,
    /// Records saved but not yet written.
    pending: Mutex<FxHashMap<Uid, ThrottleRecord>>,
    flush_scheduled: AtomicBool,
}

impl JsonFileThrottleStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            Error::store(format!("Failed to create {}: {e}", dir.display()))
        })?;
        debug!(path = %dir.display(), "Opened throttle store");
        Ok(Self {
            inner: Arc::new(FileStoreInner {
                dir,
                io: Mutex::new(()),
                pending: Mutex::new(FxHashMap::default()),
                flush_scheduled: AtomicBool::new(false),
            }),
        })
    }

    /// Returns the store directory.
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Number of saved records not yet written to disk.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Writes every queued record now, on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns the first I/O or encoding failure; records after it stay
    /// queued.
    pub fn flush(&self) -> Result<()> {
        self.inner.flush()
    }
}

impl FileStoreInner {
    fn record_path(&self, uid: Uid) -> PathBuf {
        self.dir
            .join(format!("{RECORD_FILE_PREFIX}{uid}{RECORD_FILE_SUFFIX}"))
    }

    /// Caller holds `io`.
    fn write_record(&self, uid: Uid, record: &ThrottleRecord) -> Result<()> {
        let path = self.record_path(uid);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(record)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let _io = self.io.lock();
        self.flush_scheduled.store(false, Ordering::Release);
        let batch: Vec<_> = self.pending.lock().drain().collect();
        let mut batch = batch.into_iter();
        while let Some((uid, record)) = batch.next() {
            if let Err(e) = self.write_record(uid, &record) {
                let mut pending = self.pending.lock();
                for (uid, record) in std::iter::once((uid, record)).chain(batch) {
                    pending.entry(uid).or_insert(record);
                }
                return Err(e);
            }
        }
        Ok(())
    }
}

impl Drop for FileStoreInner {
    fn drop(&mut self) {
        if self.pending.get_mut().is_empty() {
            return;
        }
        if let Err(e) = self.flush() {
            warn!(error = %e, path = %self.dir.display(), "Failed to flush throttle store");
        }
    }
}

impl ThrottleStore for JsonFileThrottleStore {
    fn load(&self, uid: Uid) -> Result<Option<ThrottleRecord>> {
        let _io = self.inner.io.lock();
        if let Some(record) = self.inner.pending.lock().get(&uid) {
            return Ok(Some(record.clone()));
        }
        match fs::read_to_string(self.inner.record_path(uid)) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, uid: Uid, record: &ThrottleRecord) -> Result<()> {
        let Ok(runtime) = Handle::try_current() else {
            let _io = self.inner.io.lock();
            self.inner.pending.lock().remove(&uid);
            return self.inner.write_record(uid, record);
        };

        self.inner.pending.lock().insert(uid, record.clone());
        if !self.inner.flush_scheduled.swap(true, Ordering::AcqRel) {
            let inner = Arc::clone(&self.inner);
            runtime.spawn_blocking(move || {
                if let Err(e) = inner.flush() {
                    warn!(error = %e, path = %inner.dir.display(), "Failed to write throttle records");
                }
            });
        }
        Ok(())
    }

    fn remove(&self, uid: Uid) -> Result<()> {
        let _io = self.inner.io.lock();
        self.inner.pending.lock().remove(&uid);
        match fs::remove_file(self.inner.record_path(uid)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn purge(&self) -> Result<()> {
        let _io = self.inner.io.lock();
        self.inner.pending.lock().clear();
        for entry in fs::read_dir(&self.inner.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(RECORD_FILE_PREFIX) && name.ends_with(RECORD_FILE_SUFFIX) {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
