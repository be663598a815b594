//! Misplaced-Document Locator
//!
//! For a dangling reference, look for the id in every collection the schema
//! did not allow. The first hit in schema declaration order wins; when the id
//! lives in several such collections only that first one is reported.

use rayon::prelude::*;
use rayon::ThreadPool;

use super::cache::IdCache;
use super::records::ViolationRecord;
use crate::error::Result;
use crate::store::DocumentStore;

/// Look for each missing document in the collections its violation did not search
///
/// Already-filled id caches answer without a query; every other collection
/// costs one point lookup.
pub fn locate(
    violation: &ViolationRecord,
    collections: &[String],
    cache: &IdCache<'_>,
    store: &dyn DocumentStore,
) -> Result<Option<String>> {
    for collection in collections {
        if violation.searched_collections.contains(collection) {
            continue;
        }
        let present = match cache.peek(collection) {
            Some(ids) => ids.contains(&violation.referenced_id),
            None => store.contains_id(collection, &violation.referenced_id)?,
        };
        if present {
            return Ok(Some(collection.clone()));
        }
    }
    Ok(None)
}

/// Annotate violations in place on a dedicated pool
pub fn annotate(
    pool: &ThreadPool,
    violations: &mut [ViolationRecord],
    collections: &[String],
    cache: &IdCache<'_>,
    store: &dyn DocumentStore,
) -> Result<usize> {
    pool.install(|| {
        violations
            .par_iter_mut()
            .map(|violation| -> Result<usize> {
                let found = locate(violation, collections, cache, store)?;
                if let Some(collection) = &found {
                    tracing::debug!(
                        id = %violation.referenced_id,
                        collection = %collection,
                        "Located misplaced document"
                    );
                }
                let located = found.is_some();
                violation.found_in_collection = found;
                Ok(usize::from(located))
            })
            .try_reduce(|| 0, |a, b| Ok(a + b))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn violation(id: &str, searched: &[&str]) -> ViolationRecord {
        ViolationRecord {
            source_collection: "cars".into(),
            source_id: Some("car:1".into()),
            field: "owner".into(),
            referenced_id: id.into(),
            searched_collections: searched.iter().map(|s| s.to_string()).collect(),
            found_in_collection: None,
        }
    }

    fn collections() -> Vec<String> {
        ["cars", "persons", "organizations", "archive"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_first_declared_collection_wins() {
        let store = MemoryStore::new()
            .with_collection("organizations", vec![json!({"id": "person:9"})])
            .with_collection("archive", vec![json!({"id": "person:9"})]);
        let cache = IdCache::new(&store, collections());

        let found = locate(&violation("person:9", &["persons"]), &collections(), &cache, &store).unwrap();
        assert_eq!(found.as_deref(), Some("organizations"));
    }

    #[test]
    fn test_searched_collections_are_not_searched_again() {
        let store = MemoryStore::new().with_collection("persons", vec![json!({"id": "person:9"})]);
        let cache = IdCache::new(&store, collections());

        let found = locate(&violation("person:9", &["persons"]), &collections(), &cache, &store).unwrap();
        assert_eq!(found, None);
        assert_eq!(store.point_lookups(), 3);
    }

    #[test]
    fn test_filled_cache_avoids_queries() {
        let store = MemoryStore::new().with_collection("archive", vec![json!({"id": "person:9"})]);
        let cache = IdCache::new(&store, collections());
        cache.ids("archive").unwrap();
        cache.ids("cars").unwrap();
        cache.ids("organizations").unwrap();

        let found = locate(&violation("person:9", &["persons"]), &collections(), &cache, &store).unwrap();
        assert_eq!(found.as_deref(), Some("archive"));
        assert_eq!(store.point_lookups(), 0);
    }

    #[test]
    fn test_annotate_counts_matches() {
        let store = MemoryStore::new().with_collection("archive", vec![json!({"id": "a"})]);
        let cache = IdCache::new(&store, collections());
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let mut violations = vec![violation("a", &["persons"]), violation("b", &["persons"])];

        let located = annotate(&pool, &mut violations, &collections(), &cache, &store).unwrap();
        assert_eq!(located, 1);
        assert_eq!(violations[0].found_in_collection.as_deref(), Some("archive"));
        assert_eq!(violations[1].found_in_collection, None);
    }
}
