//! Snapshot stores.
//!
//! A [`SnapshotStore`] holds at most one [`SnapshotRecord`] per
//! (process, epoch). Records are never rewritten; a later epoch supersedes
//! an earlier one for recovery purposes.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, warn};

use cutpoint_core::ProcessId;

use crate::error::StoreError;
use crate::layout::SnapshotRecord;

/// Persistence for snapshot records.
pub trait SnapshotStore: Send + Sync {
    /// Persists a record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] if a record for the same process
    /// and epoch exists, or an I/O or serialization error.
    fn append(&self, record: &SnapshotRecord) -> Result<(), StoreError>;

    /// Epochs with a readable record for `process`, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    fn list(&self, process: &ProcessId) -> Result<Vec<u64>, StoreError>;

    /// Reads the record for `process` at `epoch`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn read(&self, process: &ProcessId, epoch: u64) -> Result<Option<SnapshotRecord>, StoreError>;

    /// Reads the newest record for `process`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed or read.
    fn list_latest(&self, process: &ProcessId) -> Result<Option<SnapshotRecord>, StoreError> {
        match self.list(process)?.last() {
            Some(&epoch) => self.read(process, epoch),
            None => Ok(None),
        }
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    records: RwLock<BTreeMap<(ProcessId, u64), SnapshotRecord>>,
}

impl InMemorySnapshotStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across processes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns `true` if nothing was persisted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Every record, ordered by process then epoch.
    #[must_use]
    pub fn all(&self) -> Vec<SnapshotRecord> {
        self.records.read().values().cloned().collect()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn append(&self, record: &SnapshotRecord) -> Result<(), StoreError> {
        let key = (record.process.clone(), record.epoch);
        let mut records = self.records.write();
        if records.contains_key(&key) {
            return Err(StoreError::Duplicate {
                process: key.0,
                epoch: key.1,
            });
        }
        records.insert(key, record.clone());
        Ok(())
    }

    fn list(&self, process: &ProcessId) -> Result<Vec<u64>, StoreError> {
        Ok(self
            .records
            .read()
            .keys()
            .filter(|(id, _)| id == process)
            .map(|&(_, epoch)| epoch)
            .collect())
    }

    fn read(&self, process: &ProcessId, epoch: u64) -> Result<Option<SnapshotRecord>, StoreError> {
        Ok(self.records.read().get(&(process.clone(), epoch)).cloned())
    }
}

/// One JSON file per record in a flat directory.
///
/// Writes go to a temporary file that is renamed into place, so a reader
/// never observes a partial record. File names carry the process and the
/// write time but not the epoch, so the store keeps an index from
/// (process, epoch) to file. Each file is parsed once, when first seen in
/// the directory; files that fail to parse are logged and skipped.
#[derive(Debug)]
pub struct FileSystemSnapshotStore {
    dir: PathBuf,
    write_lock: parking_lot::Mutex<()>,
    index: RwLock<Index>,
}

#[derive(Debug, Default)]
struct Index {
    /// Every record file name already looked at, readable or not.
    seen: HashSet<String>,
    files: BTreeMap<(ProcessId, u64), PathBuf>,
}

impl FileSystemSnapshotStore {
    /// Store rooted at `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: parking_lot::Mutex::new(()),
            index: RwLock::new(Index::default()),
        }
    }

    /// Directory holding the records.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Indexes record files that appeared since the last refresh.
    fn refresh(&self) -> Result<(), StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut guard = self.index.write();
        let index = &mut *guard;
        let mut fresh = Vec::new();
        for entry in entries {
            let Ok(name) = entry?.file_name().into_string() else {
                continue;
            };
            if is_record_file(&name) && !index.seen.contains(&name) {
                fresh.push(name);
            }
        }
        // names sort by write time within a process
        fresh.sort_unstable();

        for name in fresh {
            let path = self.dir.join(&name);
            match Self::load(&path) {
                Ok(record) => match index.files.entry((record.process, record.epoch)) {
                    Entry::Vacant(slot) => {
                        slot.insert(path);
                    }
                    Entry::Occupied(slot) => {
                        warn!(
                            path = %path.display(),
                            kept = %slot.get().display(),
                            "second record for the same epoch skipped"
                        );
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "malformed snapshot record skipped");
                }
            }
            index.seen.insert(name);
        }
        Ok(())
    }

    fn indexed(&self, process: &ProcessId, epoch: u64) -> Option<PathBuf> {
        self.index.read().files.get(&(process.clone(), epoch)).cloned()
    }

    fn load(path: &Path) -> Result<SnapshotRecord, StoreError> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Malformed {
            location: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

fn is_record_file(name: &str) -> bool {
    name.starts_with("snapshot_")
        && Path::new(name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

impl SnapshotStore for FileSystemSnapshotStore {
    fn append(&self, record: &SnapshotRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        self.refresh()?;
        let duplicate = || StoreError::Duplicate {
            process: record.process.clone(),
            epoch: record.epoch,
        };
        if self.indexed(&record.process, record.epoch).is_some() {
            return Err(duplicate());
        }

        fs::create_dir_all(&self.dir)?;
        let name = record.file_name();
        let path = self.dir.join(&name);
        if path.exists() {
            return Err(duplicate());
        }

        let json = serde_json::to_vec_pretty(record)?;
        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), epoch = record.epoch, "snapshot record written");

        let mut index = self.index.write();
        index.seen.insert(name);
        index
            .files
            .insert((record.process.clone(), record.epoch), path);
        Ok(())
    }

    fn list(&self, process: &ProcessId) -> Result<Vec<u64>, StoreError> {
        self.refresh()?;
        Ok(self
            .index
            .read()
            .files
            .range((process.clone(), 0)..=(process.clone(), u64::MAX))
            .map(|((_, epoch), _)| *epoch)
            .collect())
    }

    fn read(&self, process: &ProcessId, epoch: u64) -> Result<Option<SnapshotRecord>, StoreError> {
        let path = match self.indexed(process, epoch) {
            Some(path) => path,
            None => {
                self.refresh()?;
                match self.indexed(process, epoch) {
                    Some(path) => path,
                    None => return Ok(None),
                }
            }
        };
        match Self::load(&path) {
            Ok(record) => Ok(Some(record)),
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "indexed snapshot record vanished");
                self.index.write().files.remove(&(process.clone(), epoch));
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
