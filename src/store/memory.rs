//! In-memory document store

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{Batch, Cursor, DocumentStore, ID_FIELD};
use crate::error::{RefscanError, Result};

/// Store backed by `Vec<Value>` per collection
///
/// Counts id projections and point lookups so callers can assert how much
/// target-side work a scan performed. Collections can be marked offline to
/// simulate a lost connection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: IndexMap<String, Vec<Value>>,
    offline: RwLock<HashSet<String>>,
    id_projections: AtomicUsize,
    point_lookups: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(mut self, name: impl Into<String>, documents: Vec<Value>) -> Self {
        self.insert_collection(name, documents);
        self
    }

    pub fn insert_collection(&mut self, name: impl Into<String>, documents: Vec<Value>) {
        self.collections.insert(name.into(), documents);
    }

    /// Make every read of `collection` fail with a connectivity error
    pub fn set_offline(&self, collection: &str) {
        self.offline.write().insert(collection.to_string());
    }

    pub fn id_projections(&self) -> usize {
        self.id_projections.load(Ordering::Relaxed)
    }

    pub fn point_lookups(&self) -> usize {
        self.point_lookups.load(Ordering::Relaxed)
    }

    fn documents(&self, collection: &str) -> Result<&[Value]> {
        if self.offline.read().contains(collection) {
            return Err(RefscanError::connectivity(collection, "collection is offline"));
        }
        Ok(self
            .collections
            .get(collection)
            .map(Vec::as_slice)
            .unwrap_or(&[]))
    }
}

impl DocumentStore for MemoryStore {
    fn collection_names(&self) -> Result<Vec<String>> {
        Ok(self.collections.keys().cloned().collect())
    }

    fn read_batch(&self, collection: &str, cursor: Option<&Cursor>, limit: usize) -> Result<Batch> {
        let documents = self.documents(collection)?;
        let start = cursor.map(|c| c.0 as usize).unwrap_or(0).min(documents.len());
        let end = start.saturating_add(limit).min(documents.len());
        Ok(Batch {
            documents: documents[start..end].to_vec(),
            next: (end < documents.len()).then(|| Cursor(end as u64)),
        })
    }

    fn all_ids(&self, collection: &str) -> Result<HashSet<String>> {
        self.id_projections.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .documents(collection)?
            .iter()
            .filter_map(|d| d.get(ID_FIELD).and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    fn contains_id(&self, collection: &str, id: &str) -> Result<bool> {
        self.point_lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .documents(collection)?
            .iter()
            .any(|d| d.get(ID_FIELD).and_then(Value::as_str) == Some(id)))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookups() {
        let store = MemoryStore::new().with_collection(
            "persons",
            vec![json!({"id": "person:1"}), json!({"name": "no id"})],
        );
        assert!(store.contains_id("persons", "person:1").unwrap());
        assert!(!store.contains_id("persons", "person:2").unwrap());
        assert!(!store.contains_id("cars", "person:1").unwrap());
        assert_eq!(store.all_ids("persons").unwrap().len(), 1);
        assert_eq!(store.id_projections(), 1);
        assert_eq!(store.point_lookups(), 3);
    }

    #[test]
    fn test_offline_collection() {
        let store = MemoryStore::new().with_collection("persons", vec![]);
        store.set_offline("persons");
        let err = store.all_ids("persons").unwrap_err();
        assert!(matches!(err, RefscanError::Connectivity { .. }));
    }
}
