//! Per-run id cache
//!
//! One cell per known collection, created when the run starts. A cell is
//! filled at most once from a full id projection; concurrent callers asking
//! for a cell that is still filling block on the same fill. Filled cells are
//! read without locking.

use once_cell::sync::OnceCell;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Result;
use crate::store::DocumentStore;

pub struct IdCache<'s> {
    store: &'s dyn DocumentStore,
    cells: HashMap<String, OnceCell<HashSet<String>>>,
    fills: AtomicUsize,
}

impl<'s> IdCache<'s> {
    pub fn new(store: &'s dyn DocumentStore, collections: impl IntoIterator<Item = String>) -> Self {
        Self {
            store,
            cells: collections
                .into_iter()
                .map(|name| (name, OnceCell::new()))
                .collect(),
            fills: AtomicUsize::new(0),
        }
    }

    /// Ids of a collection, loading them on first use
    ///
    /// Returns `None` for collections the cache was not created with.
    pub fn ids(&self, collection: &str) -> Result<Option<&HashSet<String>>> {
        let Some(cell) = self.cells.get(collection) else {
            return Ok(None);
        };
        cell.get_or_try_init(|| -> Result<HashSet<String>> {
            let ids = self.store.all_ids(collection)?;
            self.fills.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(collection, ids = ids.len(), "Loaded id cache");
            Ok(ids)
        })
        .map(Some)
    }

    /// Ids of a collection if its cell is already filled; never loads
    pub fn peek(&self, collection: &str) -> Option<&HashSet<String>> {
        self.cells.get(collection).and_then(OnceCell::get)
    }

    pub fn contains(&self, collection: &str, id: &str) -> Result<bool> {
        match self.ids(collection)? {
            Some(ids) => Ok(ids.contains(id)),
            None => self.store.contains_id(collection, id),
        }
    }

    /// First collection among `collections` that holds `id`
    pub fn find_among<'c>(&self, collections: &'c [String], id: &str) -> Result<Option<&'c str>> {
        for collection in collections {
            if self.contains(collection, id)? {
                return Ok(Some(collection.as_str()));
            }
        }
        Ok(None)
    }

    /// Number of cells filled so far
    pub fn fills(&self) -> usize {
        self.fills.load(Ordering::Relaxed)
    }
}
