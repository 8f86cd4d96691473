//! In-memory document store.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{DocumentStore, Revision, StoreError, SwapOutcome, Versioned, validate_key};

/// Mutex-guarded map of documents. Contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently stored, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = documents.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl DocumentStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        validate_key(key)?;
        let documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(documents
            .get(key)
            .filter(|bytes| !bytes.is_empty())
            .map(|bytes| Versioned::new(bytes.clone())))
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&Revision>,
        bytes: &[u8],
    ) -> Result<SwapOutcome, StoreError> {
        validate_key(key)?;
        let mut documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);

        let current = documents
            .get(key)
            .filter(|b| !b.is_empty())
            .map(|b| Revision::of(b));
        if current.as_ref() != expected {
            return Ok(SwapOutcome::Conflict);
        }

        documents.insert(key.to_string(), bytes.to_vec());
        Ok(SwapOutcome::Swapped(Revision::of(bytes)))
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        validate_key(key)?;
        let mut documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(documents.remove(key).is_some())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_semantics_match_file_store() {
        let store = MemoryStore::new();
        assert!(store.load("doc").unwrap().is_none());

        let SwapOutcome::Swapped(rev) = store.compare_and_swap("doc", None, b"one").unwrap() else {
            panic!("first write should succeed");
        };
        assert_eq!(
            store.compare_and_swap("doc", None, b"two").unwrap(),
            SwapOutcome::Conflict
        );
        assert!(matches!(
            store.compare_and_swap("doc", Some(&rev), b"two").unwrap(),
            SwapOutcome::Swapped(_)
        ));
        assert_eq!(store.keys(), vec!["doc".to_string()]);

        assert!(store.remove("doc").unwrap());
        assert!(!store.remove("doc").unwrap());
    }
}
