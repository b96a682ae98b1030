//! Key-value storage slots
//!
//! The engine uses two stores: a tab-scoped one (cleared when the tab closes)
//! for the session id, and a durable one for the returning visitor marker.

use crate::error::StorageError;
use std::collections::HashMap;
use std::sync::Mutex;

/// A string key-value store such as `sessionStorage` or `localStorage`
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Process-local store. One instance stands in for one tab's storage area.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store poisoned".into()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Store that refuses every access, as storage does in some private modes
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableStore;

impl KeyValueStore for UnavailableStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unavailable("storage access denied".into()))
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("storage access denied".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("sid").unwrap(), None);

        store.set("sid", "abc").unwrap();
        assert_eq!(store.get("sid").unwrap().as_deref(), Some("abc"));

        store.set("sid", "def").unwrap();
        assert_eq!(store.get("sid").unwrap().as_deref(), Some("def"));
    }

    #[test]
    fn test_unavailable_store_errors() {
        let store = UnavailableStore;
        assert!(store.get("sid").is_err());
        assert!(store.set("sid", "abc").is_err());
    }
}
