//! Versioned document store.
//!
//! Every piece of mutable shop state (the inventory ledger, the subscriber
//! list, newsletter send jobs, paid orders) is one JSON document addressed
//! by a slash-separated key such as `newsletter/jobs/summer-drop`.
//!
//! Writers never overwrite blindly: [`DocumentStore::compare_and_swap`]
//! only replaces a document whose current [`Revision`] matches the one the
//! writer read. [`update_json`] wraps the read-modify-write cycle and
//! retries on conflict, so business logic is written as a plain
//! `FnMut(&mut T)` over the decoded document.
//!
//! Two backends:
//! - [`FileStore`] - one file per key, guarded by OS advisory locks
//! - [`MemoryStore`] - in-process map, for tests and ephemeral runs

mod file;
mod memory;

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use file::FileStore;
pub use memory::MemoryStore;

/// How many times [`update_json`] re-reads a document after a conflict.
pub const MAX_UPDATE_ATTEMPTS: usize = 16;

static KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+(/[A-Za-z0-9_-]+)*$").expect("Invalid regex"));

/// Errors raised by a document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key contains characters outside `[A-Za-z0-9_-/]`.
    #[error("Invalid document key: {0:?}")]
    InvalidKey(String),

    /// The backend could not read or write the document.
    #[error("I/O error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// The stored bytes are not a valid document.
    #[error("Corrupt document {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The document could not be encoded.
    #[error("Failed to encode {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Every attempt lost the race against another writer.
    #[error("Too many concurrent updates on {0}")]
    Contention(String),

    /// The blocking task running the operation panicked or was cancelled.
    #[error("Store task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub(crate) fn io(key: &str, source: std::io::Error) -> Self {
        Self::Io {
            key: key.to_string(),
            source,
        }
    }
}

/// Content digest of a stored document, used as the swap token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision(String);

impl Revision {
    /// Revision of `bytes` (hex SHA-256).
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A document together with the revision it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    /// Raw stored bytes, never empty.
    pub bytes: Vec<u8>,
    /// SHA-256 of `bytes`, passed back as `expected` on the next swap.
    pub revision: Revision,
}

impl Versioned {
    /// Wrap `bytes`, computing their revision.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        let revision = Revision::of(&bytes);
        Self { bytes, revision }
    }
}

/// Result of a [`DocumentStore::compare_and_swap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    /// The document now holds the new bytes.
    Swapped(Revision),
    /// Someone else changed the document first; nothing was written.
    Conflict,
}

/// A key-value store of JSON documents with compare-and-swap writes.
///
/// Implementations may block; async callers go through [`read_json`],
/// [`update_json`] and [`remove`], which run them on the blocking pool.
pub trait DocumentStore: Send + Sync + 'static {
    /// Read a document. `None` when absent or empty.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` for invalid keys or backend failures.
    fn load(&self, key: &str) -> Result<Option<Versioned>, StoreError>;

    /// Replace a document if it is still at `expected` (`None`: absent).
    ///
    /// # Errors
    ///
    /// Returns `StoreError` for invalid keys or backend failures.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&Revision>,
        bytes: &[u8],
    ) -> Result<SwapOutcome, StoreError>;

    /// Delete a document. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` for invalid keys or backend failures.
    fn remove(&self, key: &str) -> Result<bool, StoreError>;
}

/// Store handle shared across handlers.
pub type SharedStore = Arc<dyn DocumentStore>;

/// Reject keys that could escape the store root.
pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    if KEY_RE.is_match(key) {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

fn decode<T: DeserializeOwned + Default>(
    key: &str,
    current: Option<&Versioned>,
) -> Result<T, StoreError> {
    current.map_or_else(
        || Ok(T::default()),
        |doc| {
            serde_json::from_slice(&doc.bytes).map_err(|source| StoreError::Corrupt {
                key: key.to_string(),
                source,
            })
        },
    )
}

/// Read-modify-write a document on the calling thread.
///
/// `f` sees the decoded document (or `T::default()` when absent). When `f`
/// fails nothing is written. When the encoded result is byte-identical to
/// what was read, nothing is written either. A conflicting write makes the
/// whole cycle start again from a fresh read, so `f` may run more than once.
///
/// # Errors
///
/// Returns `f`'s error, or a `StoreError` converted into `E`.
pub fn update_json_blocking<T, R, E, F>(store: &dyn DocumentStore, key: &str, mut f: F) -> Result<R, E>
where
    T: Serialize + DeserializeOwned + Default,
    E: From<StoreError>,
    F: FnMut(&mut T) -> Result<R, E>,
{
    for _ in 0..MAX_UPDATE_ATTEMPTS {
        let current = store.load(key)?;
        let mut doc: T = decode(key, current.as_ref())?;

        let output = f(&mut doc)?;

        let bytes = serde_json::to_vec_pretty(&doc).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        if current.as_ref().is_some_and(|c| c.bytes == bytes) {
            return Ok(output);
        }

        match store.compare_and_swap(key, current.as_ref().map(|c| &c.revision), &bytes)? {
            SwapOutcome::Swapped(_) => return Ok(output),
            SwapOutcome::Conflict => {
                tracing::debug!(key = %key, "Document changed during update, retrying");
            }
        }
    }

    Err(StoreError::Contention(key.to_string()).into())
}

/// Read-modify-write a document on the blocking pool.
///
/// See [`update_json_blocking`].
///
/// # Errors
///
/// Returns `f`'s error, or a `StoreError` converted into `E`.
pub async fn update_json<T, R, E, F>(store: SharedStore, key: String, f: F) -> Result<R, E>
where
    T: Serialize + DeserializeOwned + Default,
    R: Send + 'static,
    E: From<StoreError> + Send + 'static,
    F: FnMut(&mut T) -> Result<R, E> + Send + 'static,
{
    tokio::task::spawn_blocking(move || update_json_blocking(store.as_ref(), &key, f))
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

/// Read and decode a document on the blocking pool.
///
/// # Errors
///
/// Returns `StoreError` for backend failures or undecodable documents.
pub async fn read_json<T>(store: SharedStore, key: String) -> Result<Option<T>, StoreError>
where
    T: DeserializeOwned + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        store
            .load(&key)?
            .map(|doc| {
                serde_json::from_slice(&doc.bytes).map_err(|source| StoreError::Corrupt {
                    key: key.clone(),
                    source,
                })
            })
            .transpose()
    })
    .await
    .map_err(|e| StoreError::Task(e.to_string()))?
}

/// Delete a document on the blocking pool.
///
/// # Errors
///
/// Returns `StoreError` for backend failures.
pub async fn remove(store: SharedStore, key: String) -> Result<bool, StoreError> {
    tokio::task::spawn_blocking(move || store.remove(&key))
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}
