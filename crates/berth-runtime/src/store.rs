//! Durable container state.
//!
//! One JSON file per container, keyed by id. A write serialises the full
//! record to a temporary file, syncs it and renames it over the previous
//! version, so a crash leaves either the old or the new record on disk,
//! never a mix of both.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use berth_common::error::{BerthError, Result};
use berth_common::types::ContainerId;

use crate::container::{ContainerRecord, ListFilter};

const RECORD_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

/// Durable mapping from container id to container record.
///
/// Implementations must make `put` atomic per record and return snapshots
/// from `list`. Persistence failures surface as [`BerthError::StoreIo`].
pub trait StateStore: Send + Sync {
    /// Inserts or replaces a record.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::StoreIo`] if the record cannot be persisted.
    fn put(&self, record: &ContainerRecord) -> Result<()>;

    /// Fetches a record.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::NotFound`] for an unknown id.
    fn get(&self, id: &ContainerId) -> Result<ContainerRecord>;

    /// Returns the records matching `filter`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::StoreIo`] if the store cannot be read.
    fn list(&self, filter: &ListFilter) -> Result<Vec<ContainerRecord>>;

    /// Deletes a record.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::NotFound`] for an unknown id and
    /// [`BerthError::StoreIo`] if the deletion cannot be persisted.
    fn delete(&self, id: &ContainerId) -> Result<()>;
}

fn snapshot(
    records: &BTreeMap<ContainerId, ContainerRecord>,
    filter: &ListFilter,
) -> Vec<ContainerRecord> {
    let mut out: Vec<_> = records
        .values()
        .filter(|r| filter.matches(r))
        .cloned()
        .collect();
    out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    out
}

fn store_io(path: &Path, err: &std::io::Error) -> BerthError {
    BerthError::StoreIo {
        message: format!("{}: {err}", path.display()),
    }
}

/// File-backed store rooted at a directory.
///
/// Records are cached in memory after a successful write; reads never touch
/// the disk.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    records: RwLock<BTreeMap<ContainerId, ContainerRecord>>,
}

impl FileStore {
    /// Opens the store, loading every record found in `dir`.
    ///
    /// Leftover temporary files from an interrupted write are discarded;
    /// the previous version of that record, if any, is kept.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::StoreIo`] if the directory cannot be created or
    /// read, and [`BerthError::Serialization`] for a record that does not parse.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tracing::info!(path = %dir.display(), "opening state store");
        std::fs::create_dir_all(&dir).map_err(|e| store_io(&dir, &e))?;

        let mut records = BTreeMap::new();
        let entries = std::fs::read_dir(&dir).map_err(|e| store_io(&dir, &e))?;
        for entry in entries {
            let path = entry.map_err(|e| store_io(&dir, &e))?.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some(RECORD_EXTENSION) => {
                    let content =
                        std::fs::read_to_string(&path).map_err(|e| store_io(&path, &e))?;
                    let record: ContainerRecord = serde_json::from_str(&content)?;
                    let _ = records.insert(record.id.clone(), record);
                }
                Some(TEMP_EXTENSION) => {
                    tracing::warn!(path = %path.display(), "discarding interrupted write");
                    let _ = std::fs::remove_file(&path);
                }
                _ => {}
            }
        }
        tracing::debug!(count = records.len(), "state store loaded");

        Ok(Self {
            dir,
            records: RwLock::new(records),
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &ContainerId) -> PathBuf {
        self.dir.join(format!("{id}.{RECORD_EXTENSION}"))
    }

    fn write_atomically(&self, record: &ContainerRecord) -> Result<()> {
        let path = self.record_path(&record.id);
        let tmp = self.dir.join(format!("{}.{TEMP_EXTENSION}", record.id));
        let bytes = serde_json::to_vec_pretty(record)?;

        let mut file = std::fs::File::create(&tmp).map_err(|e| store_io(&tmp, &e))?;
        file.write_all(&bytes).map_err(|e| store_io(&tmp, &e))?;
        file.sync_all().map_err(|e| store_io(&tmp, &e))?;
        drop(file);

        std::fs::rename(&tmp, &path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            store_io(&path, &e)
        })?;
        sync_dir(&self.dir);
        Ok(())
    }
}

/// Makes a rename durable. Not every filesystem supports syncing a
/// directory, so failures are only logged.
fn sync_dir(dir: &Path) {
    if let Err(e) = std::fs::File::open(dir).and_then(|d| d.sync_all()) {
        tracing::debug!(path = %dir.display(), error = %e, "directory sync skipped");
    }
}

impl StateStore for FileStore {
    fn put(&self, record: &ContainerRecord) -> Result<()> {
        self.write_atomically(record)?;
        let _ = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id.clone(), record.clone());
        tracing::debug!(id = %record.id, state = %record.state, "record persisted");
        Ok(())
    }

    fn get(&self, id: &ContainerId) -> Result<ContainerRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| BerthError::container_not_found(id.as_str()))
    }

    fn list(&self, filter: &ListFilter) -> Result<Vec<ContainerRecord>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(snapshot(&records, filter))
    }

    fn delete(&self, id: &ContainerId) -> Result<()> {
        if !self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
        {
            return Err(BerthError::container_not_found(id.as_str()));
        }
        let path = self.record_path(id);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(store_io(&path, &e)),
        }
        sync_dir(&self.dir);
        let _ = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        tracing::debug!(id = %id, "record deleted");
        Ok(())
    }
}

/// Volatile store for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<ContainerId, ContainerRecord>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn put(&self, record: &ContainerRecord) -> Result<()> {
        let _ = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn get(&self, id: &ContainerId) -> Result<ContainerRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| BerthError::container_not_found(id.as_str()))
    }

    fn list(&self, filter: &ListFilter) -> Result<Vec<ContainerRecord>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(snapshot(&records, filter))
    }

    fn delete(&self, id: &ContainerId) -> Result<()> {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| BerthError::container_not_found(id.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_common::error::ErrorKind;
    use berth_common::types::{ContainerState, ImageRef};

    fn record(id: &str) -> ContainerRecord {
        ContainerRecord::new(
            ContainerId::new(id),
            ImageRef::parse("alpine:3").unwrap(),
            Some(format!("name-{id}")),
            Vec::new(),
        )
    }

    #[test]
    fn reopen_reconstructs_last_written_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = FileStore::open(dir.path()).expect("open");
            store.put(&record("a")).expect("put a");
            store.put(&record("b")).expect("put b");
            let running = record("a").started(10, None).expect("start");
            store.put(&running).expect("update a");
            store.delete(&ContainerId::new("b")).expect("delete b");
        }

        let store = FileStore::open(dir.path()).expect("reopen");
        let all = store.list(&ListFilter::default()).expect("list");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].state, ContainerState::Running);
        assert_eq!(all[0].pid, Some(10));
    }

    #[test]
    fn interrupted_write_keeps_previous_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = FileStore::open(dir.path()).expect("open");
            store.put(&record("a")).expect("put");
        }
        std::fs::write(dir.path().join("a.tmp"), b"{\"id\": \"a\", \"sta").expect("torn write");

        let store = FileStore::open(dir.path()).expect("reopen");
        let a = store.get(&ContainerId::new("a")).expect("get");
        assert_eq!(a.state, ContainerState::Created);
        assert!(!dir.path().join("a.tmp").exists());
    }

    #[test]
    fn get_and_delete_unknown_ids_are_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::open(dir.path()).expect("open");
        let missing = ContainerId::new("nope");
        assert_eq!(store.get(&missing).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(store.delete(&missing).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn list_is_a_snapshot() {
        let store = MemoryStore::new();
        store.put(&record("a")).expect("put");
        let snapshot = store.list(&ListFilter::default()).expect("list");
        store.put(&record("b")).expect("put");
        store.delete(&ContainerId::new("a")).expect("delete");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id.as_str(), "a");
    }

    #[test]
    fn list_applies_filter() {
        let store = MemoryStore::new();
        store.put(&record("a")).expect("put");
        store
            .put(&record("b").started(1, None).expect("start"))
            .expect("put");
        let running = store
            .list(&ListFilter {
                state: Some(ContainerState::Running),
                name_prefix: None,
            })
            .expect("list");
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id.as_str(), "b");
    }

    #[test]
    fn unwritable_directory_reports_store_io() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::open(dir.path().join("records")).expect("open");
        std::fs::remove_dir_all(store.dir()).expect("pull the rug");
        let err = store.put(&record("a")).expect_err("dir is gone");
        assert_eq!(err.kind(), ErrorKind::StoreIo);
        assert_eq!(store.get(&ContainerId::new("a")).unwrap_err().kind(), ErrorKind::NotFound);
    }
}
