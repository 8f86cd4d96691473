//! File-backed document store.
//!
//! Each key maps to `<root>/<key>.json`. Readers hold a shared advisory lock
//! while reading; a swap holds an exclusive lock across the whole
//! compare-then-rewrite, so concurrent processes (the server and the CLI)
//! serialize on the file itself. Removing a document truncates it to empty,
//! which loads as absent.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::{DocumentStore, Revision, StoreError, SwapOutcome, Versioned, validate_key};

/// Document store writing one JSON file per key.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `root`. Directories are created on write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.root.join(format!("{key}.json")))
    }
}

fn read_all(file: &mut File, key: &str) -> Result<Vec<u8>, StoreError> {
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|e| StoreError::io(key, e))?;
    Ok(bytes)
}

fn swap_locked(
    file: &mut File,
    key: &str,
    expected: Option<&Revision>,
    bytes: &[u8],
) -> Result<SwapOutcome, StoreError> {
    let current = read_all(file, key)?;
    let current_revision = (!current.is_empty()).then(|| Revision::of(&current));
    if current_revision.as_ref() != expected {
        return Ok(SwapOutcome::Conflict);
    }

    let io = |e| StoreError::io(key, e);
    file.set_len(0).map_err(io)?;
    file.seek(SeekFrom::Start(0)).map_err(io)?;
    file.write_all(bytes).map_err(io)?;
    file.sync_data().map_err(io)?;

    Ok(SwapOutcome::Swapped(Revision::of(bytes)))
}

impl DocumentStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        let path = self.path_for(key)?;
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(key, e)),
        };

        file.lock_shared().map_err(|e| StoreError::io(key, e))?;
        let bytes = read_all(&mut file, key);
        let _ = file.unlock();

        let bytes = bytes?;
        Ok((!bytes.is_empty()).then(|| Versioned::new(bytes)))
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&Revision>,
        bytes: &[u8],
    ) -> Result<SwapOutcome, StoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(key, e))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StoreError::io(key, e))?;

        file.lock().map_err(|e| StoreError::io(key, e))?;
        let outcome = swap_locked(&mut file, key, expected, bytes);
        let _ = file.unlock();

        outcome
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        let mut file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(StoreError::io(key, e)),
        };

        // Truncate instead of unlinking: a writer already holding the old
        // handle must see the removal once it gets the lock.
        file.lock().map_err(|e| StoreError::io(key, e))?;
        let removed = clear_locked(&mut file, key);
        let _ = file.unlock();

        removed
    }
}

fn clear_locked(file: &mut File, key: &str) -> Result<bool, StoreError> {
    let io = |e| StoreError::io(key, e);
    let len = file.metadata().map_err(io)?.len();
    if len == 0 {
        return Ok(false);
    }
    file.set_len(0).map_err(io)?;
    file.sync_data().map_err(io)?;
    Ok(true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_document_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.load("inventory/ledger").unwrap().is_none());
        assert!(!store.remove("inventory/ledger").unwrap());
    }

    #[test]
    fn test_swap_creates_nested_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        let outcome = store
            .compare_and_swap("newsletter/jobs/a1", None, b"{\"cursor\":0}")
            .unwrap();
        assert_eq!(outcome, SwapOutcome::Swapped(Revision::of(b"{\"cursor\":0}")));

        let on_disk = std::fs::read(dir.path().join("newsletter/jobs/a1.json")).unwrap();
        assert_eq!(on_disk, b"{\"cursor\":0}");
    }

    #[test]
    fn test_stale_revision_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        store.compare_and_swap("doc", None, b"first").unwrap();
        let first = store.load("doc").unwrap().unwrap();

        // Absent-expected write loses against an existing document.
        assert_eq!(
            store.compare_and_swap("doc", None, b"other").unwrap(),
            SwapOutcome::Conflict
        );

        store
            .compare_and_swap("doc", Some(&first.revision), b"second, longer")
            .unwrap();
        assert_eq!(
            store
                .compare_and_swap("doc", Some(&first.revision), b"third")
                .unwrap(),
            SwapOutcome::Conflict
        );

        let current = store.load("doc").unwrap().unwrap();
        assert_eq!(current.bytes, b"second, longer");
    }

    #[test]
    fn test_shorter_rewrite_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        store.compare_and_swap("doc", None, b"a long document").unwrap();
        let current = store.load("doc").unwrap().unwrap();
        store
            .compare_and_swap("doc", Some(&current.revision), b"short")
            .unwrap();

        assert_eq!(store.load("doc").unwrap().unwrap().bytes, b"short");
    }

    #[test]
    fn test_empty_file_counts_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("doc.json"), b"").unwrap();
        let store = FileStore::new(dir.path());

        assert!(store.load("doc").unwrap().is_none());
        assert!(matches!(
            store.compare_and_swap("doc", None, b"{}").unwrap(),
            SwapOutcome::Swapped(_)
        ));
    }

    #[test]
    fn test_remove_keeps_open_handles_on_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let path = dir.path().join("doc.json");

        store.compare_and_swap("doc", None, b"{\"cursor\":3}").unwrap();
        let mut held = OpenOptions::new().read(true).write(true).open(&path).unwrap();

        assert!(store.remove("doc").unwrap());
        assert!(store.load("doc").unwrap().is_none());
        assert!(!store.remove("doc").unwrap());

        // A write through a handle opened before the removal stays visible.
        held.lock().unwrap();
        let outcome = swap_locked(&mut held, "doc", None, b"{\"cursor\":0}").unwrap();
        held.unlock().unwrap();
        assert!(matches!(outcome, SwapOutcome::Swapped(_)));
        assert_eq!(store.load("doc").unwrap().unwrap().bytes, b"{\"cursor\":0}");
    }

    #[test]
    fn test_invalid_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(matches!(
            store.load("../outside"),
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_concurrent_updates_do_not_lose_writes() {
        use std::sync::Arc;

        #[derive(Default, serde::Serialize, serde::Deserialize)]
        struct Counter {
            value: u32,
        }

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::new(dir.path()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        super::super::update_json_blocking(
                            store.as_ref(),
                            "counter",
                            |c: &mut Counter| {
                                c.value += 1;
                                Ok::<_, StoreError>(())
                            },
                        )
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let doc = store.load("counter").unwrap().unwrap();
        let counter: Counter = serde_json::from_slice(&doc.bytes).unwrap();
        assert_eq!(counter.value, 20);
    }
}
