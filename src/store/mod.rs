//! Document Store
//!
//! The database handle the scanner reads through. Three access paths are
//! needed: paginated document reads, a full id projection, and a point
//! lookup by id. Implementations report transport failures as
//! [`RefscanError::Connectivity`](crate::error::RefscanError::Connectivity).

pub mod directory;
pub mod memory;

use serde_json::Value;
use std::collections::{HashSet, VecDeque};

use crate::error::Result;

pub use directory::DirectoryStore;
pub use memory::MemoryStore;

/// Name of the document field that carries the document identifier
pub const ID_FIELD: &str = "id";

/// Opaque pagination cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor(pub u64);

/// One page of documents
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub documents: Vec<Value>,
    /// `None` once the collection is exhausted
    pub next: Option<Cursor>,
}

/// Read access to a document database
pub trait DocumentStore: Send + Sync {
    /// Collections that exist in the database
    fn collection_names(&self) -> Result<Vec<String>>;

    fn has_collection(&self, collection: &str) -> Result<bool> {
        Ok(self.collection_names()?.iter().any(|c| c == collection))
    }

    /// Read up to `limit` documents starting at `cursor` (`None` = start)
    fn read_batch(&self, collection: &str, cursor: Option<&Cursor>, limit: usize) -> Result<Batch>;

    /// Every `id` value in a collection; empty for a missing collection
    fn all_ids(&self, collection: &str) -> Result<HashSet<String>>;

    /// Whether a document with this `id` exists in a collection
    fn contains_id(&self, collection: &str, id: &str) -> Result<bool>;

    /// Name used in logs
    fn backend_name(&self) -> &'static str;
}

/// Lazy, finite, restartable sequence of the documents in one collection
pub struct DocumentStream<'a> {
    store: &'a dyn DocumentStore,
    collection: String,
    batch_size: usize,
    cursor: Option<Cursor>,
    buffer: VecDeque<Value>,
    exhausted: bool,
    batches_read: usize,
}

impl<'a> DocumentStream<'a> {
    pub fn new(store: &'a dyn DocumentStore, collection: impl Into<String>, batch_size: usize) -> Self {
        Self {
            store,
            collection: collection.into(),
            batch_size: batch_size.max(1),
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
            batches_read: 0,
        }
    }

    /// Rewind to the first document
    pub fn restart(&mut self) {
        self.cursor = None;
        self.buffer.clear();
        self.exhausted = false;
        self.batches_read = 0;
    }

    pub fn batches_read(&self) -> usize {
        self.batches_read
    }

    fn fill(&mut self) -> Result<()> {
        let batch = self
            .store
            .read_batch(&self.collection, self.cursor.as_ref(), self.batch_size)?;
        self.batches_read += 1;
        tracing::trace!(
            collection = %self.collection,
            documents = batch.documents.len(),
            "Read batch"
        );
        self.exhausted = batch.next.is_none();
        self.cursor = batch.next;
        self.buffer.extend(batch.documents);
        Ok(())
    }
}

impl Iterator for DocumentStream<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.buffer.is_empty() {
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fill() {
                // A failed read ends the stream; the caller aborts the run.
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
