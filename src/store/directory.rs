//! Directory-backed document store
//!
//! A database is a directory holding one `<collection>.jsonl` file per
//! collection, one JSON document per line. Cursors are byte offsets, so a
//! batch read never holds more than `limit` documents in memory.

use serde_json::Value;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{Batch, Cursor, DocumentStore, ID_FIELD};
use crate::error::{RefscanError, Result};

const EXTENSION: &str = "jsonl";

#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Open a database directory; fails if it does not exist
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(RefscanError::connectivity(
                "<database>",
                format!("{} is not a directory", root.display()),
            ));
        }
        tracing::debug!(root = %root.display(), "Opened database directory");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, collection: &str) -> PathBuf {
        self.root.join(format!("{}.{}", collection, EXTENSION))
    }

    /// Open a collection file, `None` if the collection does not exist
    fn open_collection(&self, collection: &str) -> Result<Option<BufReader<File>>> {
        let path = self.path_of(collection);
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(&path).map_err(|e| RefscanError::connectivity(collection, e))?;
        Ok(Some(BufReader::new(file)))
    }

    /// Visit every document of a collection until `visit` returns false
    fn for_each_document(&self, collection: &str, mut visit: impl FnMut(Value) -> bool) -> Result<()> {
        let Some(mut reader) = self.open_collection(collection)? else {
            return Ok(());
        };
        let mut offset = 0u64;
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader
                .read_line(&mut line)
                .map_err(|e| RefscanError::connectivity(collection, e))?;
            if read == 0 {
                return Ok(());
            }
            if let Some(document) = parse_line(collection, &line, offset)? {
                if !visit(document) {
                    return Ok(());
                }
            }
            offset += read as u64;
        }
    }
}

fn parse_line(collection: &str, line: &str, offset: u64) -> Result<Option<Value>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed).map(Some).map_err(|e| {
        RefscanError::connectivity(collection, format!("corrupt record at byte {}: {}", offset, e))
    })
}

impl DocumentStore for DirectoryStore {
    fn collection_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| RefscanError::connectivity("<database>", e))?;
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == EXTENSION) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn has_collection(&self, collection: &str) -> Result<bool> {
        Ok(self.path_of(collection).is_file())
    }

    fn read_batch(&self, collection: &str, cursor: Option<&Cursor>, limit: usize) -> Result<Batch> {
        let Some(mut reader) = self.open_collection(collection)? else {
            return Ok(Batch::default());
        };
        let mut offset = cursor.map(|c| c.0).unwrap_or(0);
        reader
            .seek(SeekFrom::Start(offset))
            .map_err(|e| RefscanError::connectivity(collection, e))?;

        let mut documents = Vec::with_capacity(limit.min(1024));
        let mut line = String::new();
        while documents.len() < limit {
            line.clear();
            let read = reader
                .read_line(&mut line)
                .map_err(|e| RefscanError::connectivity(collection, e))?;
            if read == 0 {
                return Ok(Batch { documents, next: None });
            }
            if let Some(document) = parse_line(collection, &line, offset)? {
                documents.push(document);
            }
            offset += read as u64;
        }

        let at_end = reader
            .fill_buf()
            .map_err(|e| RefscanError::connectivity(collection, e))?
            .is_empty();
        Ok(Batch {
            documents,
            next: (!at_end).then_some(Cursor(offset)),
        })
    }

    fn all_ids(&self, collection: &str) -> Result<HashSet<String>> {
        let mut ids = HashSet::new();
        self.for_each_document(collection, |document| {
            if let Some(id) = document.get(ID_FIELD).and_then(Value::as_str) {
                ids.insert(id.to_string());
            }
            true
        })?;
        Ok(ids)
    }

    fn contains_id(&self, collection: &str, id: &str) -> Result<bool> {
        let mut found = false;
        self.for_each_document(collection, |document| {
            found = document.get(ID_FIELD).and_then(Value::as_str) == Some(id);
            !found
        })?;
        Ok(found)
    }

    fn backend_name(&self) -> &'static str {
        "directory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentStream;
    use std::fs;
    use tempfile::tempdir;

    fn write(dir: &Path, collection: &str, lines: &[&str]) {
        fs::write(dir.join(format!("{}.jsonl", collection)), lines.join("\n")).unwrap();
    }

    #[test]
    fn test_open_requires_directory() {
        let dir = tempdir().unwrap();
        assert!(DirectoryStore::open(dir.path().join("missing")).is_err());
        assert!(DirectoryStore::open(dir.path()).is_ok());
    }

    #[test]
    fn test_batches_follow_byte_cursor() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "persons",
            &[
                r#"{"id": "person:1", "type": "x:Person"}"#,
                "",
                r#"{"id": "person:2", "type": "x:Person"}"#,
                r#"{"id": "person:3", "type": "x:Person"}"#,
            ],
        );
        let store = DirectoryStore::open(dir.path()).unwrap();

        let first = store.read_batch("persons", None, 2).unwrap();
        assert_eq!(first.documents.len(), 2);
        let next = first.next.expect("more documents");

        let second = store.read_batch("persons", Some(&next), 2).unwrap();
        assert_eq!(second.documents.len(), 1);
        assert_eq!(second.documents[0]["id"], "person:3");
        assert!(second.next.is_none());

        assert_eq!(DocumentStream::new(&store, "persons", 1).count(), 3);
    }

    #[test]
    fn test_collections_and_lookups() {
        let dir = tempdir().unwrap();
        write(dir.path(), "cars", &[r#"{"id": "car:1"}"#]);
        write(dir.path(), "persons", &[r#"{"id": "person:9"}"#]);
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();

        assert_eq!(store.collection_names().unwrap(), vec!["cars", "persons"]);
        assert!(store.has_collection("cars").unwrap());
        assert!(!store.has_collection("notes").unwrap());
        assert!(store.contains_id("persons", "person:9").unwrap());
        assert!(!store.contains_id("persons", "car:1").unwrap());
        assert!(!store.contains_id("organizations", "person:9").unwrap());
        assert_eq!(store.all_ids("cars").unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_line_is_a_store_failure() {
        let dir = tempdir().unwrap();
        write(dir.path(), "cars", &["{not json"]);
        let store = DirectoryStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.all_ids("cars"),
            Err(RefscanError::Connectivity { .. })
        ));
    }
}
