//! Integrity Scanner
//!
//! Walks every source collection named by the reference map, pulls reference
//! ids out of each document, and checks them against the id caches of the
//! field's legal target collections.
//!
//! Collections are scanned in parallel on a bounded rayon pool. Each worker
//! owns the records of the collection it is scanning; they are merged and
//! deduplicated once all workers are done, so no record storage is shared.
//! The only shared state is the [`IdCache`] and an abort flag.

pub mod cache;
pub mod locator;
pub mod records;

use chrono::Utc;
use rayon::prelude::*;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{RefscanError, Result};
use crate::references::{FieldReference, ReferenceMap, ReferenceRecord};
use crate::schema::Inlining;
use crate::store::{DocumentStore, DocumentStream, ID_FIELD};

pub use cache::IdCache;
pub use records::{
    CollectionState, CollectionSummary, CollectionTally, ScanFailure, ScanReport, SkipReason,
    ViolationRecord,
};

/// Knobs for one scan run
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Source collections not to scan for referring documents
    pub skip_collections: Vec<String>,
    /// Documents fetched per page
    pub batch_size: usize,
    /// Collections scanned concurrently
    pub workers: usize,
    /// Concurrent misplaced-document lookups
    pub locator_workers: usize,
    pub locate_misplaced_documents: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            skip_collections: Vec::new(),
            batch_size: 1000,
            workers: 4,
            locator_workers: 2,
            locate_misplaced_documents: false,
        }
    }
}

impl ScanOptions {
    /// Locator pool size, never larger than the scan pool
    pub fn locator_threads(&self) -> usize {
        self.locator_workers.clamp(1, self.workers.max(1))
    }
}

/// Records and counters of one source collection
#[derive(Debug, Default)]
struct CollectionScan {
    tally: CollectionTally,
    references: BTreeSet<ReferenceRecord>,
    violations: Vec<ViolationRecord>,
    /// Cleared when the run was aborted before this collection was picked up
    started: bool,
    /// Set when a fatal error stopped this collection
    error: Option<RefscanError>,
    /// Set when another collection's failure stopped this one
    interrupted: bool,
}

impl CollectionScan {
    fn state(&self) -> CollectionState {
        if !self.started {
            CollectionState::Pending
        } else if self.error.is_some() || self.interrupted {
            CollectionState::InProgress
        } else {
            CollectionState::Completed
        }
    }
}

pub struct Scanner<'a> {
    map: &'a ReferenceMap,
    store: &'a dyn DocumentStore,
    options: ScanOptions,
}

impl<'a> Scanner<'a> {
    pub fn new(map: &'a ReferenceMap, store: &'a dyn DocumentStore, options: ScanOptions) -> Self {
        Self { map, store, options }
    }

    /// Run a full scan
    ///
    /// Every run starts with cold caches. On a fatal error the failure carries
    /// everything gathered up to that point.
    pub fn run(&self) -> std::result::Result<ScanReport, ScanFailure> {
        let mut report = ScanReport {
            started_at: Utc::now(),
            finished_at: None,
            collections: Vec::new(),
            references: Vec::new(),
            violations: Vec::new(),
        };

        let mut states = match self.plan() {
            Ok(states) => states,
            Err(error) => return Err(ScanFailure { error, partial: report }),
        };
        let pending: Vec<String> = states
            .iter()
            .filter(|(_, state)| **state == CollectionState::Pending)
            .map(|(name, _)| name.clone())
            .collect();

        tracing::info!(
            backend = self.store.backend_name(),
            collections = pending.len(),
            workers = self.options.workers,
            "Scanning for violations"
        );

        let all_collections = self.map.index().collections();
        let cache = IdCache::new(self.store, all_collections.iter().cloned());
        let aborted = AtomicBool::new(false);

        let pool = match build_pool(self.options.workers, "refscan-scan") {
            Ok(pool) => pool,
            Err(error) => {
                let partial = assemble(report, states, Vec::new());
                return Err(ScanFailure { error, partial });
            }
        };
        let scans: Vec<(String, CollectionScan)> = pool.install(|| {
            pending
                .par_iter()
                .map(|name| (name.clone(), self.scan_collection(name, &cache, &aborted)))
                .collect()
        });

        let mut first_error = None;
        let mut tallies = Vec::with_capacity(scans.len());
        let mut references = BTreeSet::new();
        for (name, scan) in scans {
            states.insert(name.clone(), scan.state());
            if first_error.is_none() {
                first_error = scan.error;
            }
            references.extend(scan.references);
            report.violations.extend(scan.violations);
            tallies.push((name, scan.tally));
        }
        report.references = references.into_iter().collect();

        if first_error.is_none() && self.options.locate_misplaced_documents && !report.violations.is_empty() {
            first_error = self.locate_misplaced(&mut report.violations, &cache).err();
        }

        let report = assemble(report, states, tallies);
        match first_error {
            Some(error) => Err(ScanFailure { error, partial: report }),
            None => {
                let totals = report.totals();
                tracing::info!(
                    documents = totals.documents_scanned,
                    references = totals.references_checked,
                    violations = totals.violations,
                    "Scan complete"
                );
                Ok(report)
            }
        }
    }

    /// Assign every schema collection its starting state
    fn plan(&self) -> Result<BTreeMap<String, CollectionState>> {
        let sources = self.map.source_collections();
        let mut states = BTreeMap::new();
        for collection in self.map.index().collections() {
            let state = if self.options.skip_collections.iter().any(|s| s == collection) {
                tracing::warn!(collection = %collection, "Skipping source collection");
                CollectionState::Skipped(SkipReason::Excluded)
            } else if !sources.contains(collection.as_str()) {
                CollectionState::Skipped(SkipReason::NoReferences)
            } else if !self.store.has_collection(collection)? {
                tracing::warn!(collection = %collection, "Database lacks collection");
                CollectionState::Skipped(SkipReason::Absent)
            } else {
                CollectionState::Pending
            };
            states.insert(collection.clone(), state);
        }
        Ok(states)
    }

    fn scan_collection(&self, collection: &str, cache: &IdCache<'_>, aborted: &AtomicBool) -> CollectionScan {
        let mut scan = CollectionScan::default();
        if aborted.load(Ordering::Relaxed) {
            tracing::debug!(collection, "Run aborted before collection was picked up");
            return scan;
        }

        scan.started = true;
        tracing::debug!(collection, "Scanning collection");
        for document in DocumentStream::new(self.store, collection, self.options.batch_size) {
            if aborted.load(Ordering::Relaxed) {
                scan.interrupted = true;
                break;
            }
            let result = document.and_then(|document| self.check_document(collection, &document, cache, &mut scan));
            if let Err(error) = result {
                tracing::error!(collection, error = %error, "Scan aborted");
                aborted.store(true, Ordering::Relaxed);
                scan.error = Some(error);
                break;
            }
        }

        if !scan.interrupted && scan.error.is_none() {
            tracing::info!(
                collection,
                documents = scan.tally.documents_scanned,
                violations = scan.tally.violations,
                "Collection scanned"
            );
        }
        scan
    }

    fn check_document(
        &self,
        collection: &str,
        document: &Value,
        cache: &IdCache<'_>,
        scan: &mut CollectionScan,
    ) -> Result<()> {
        let index = self.map.index();
        let class = match index.resolve_document(document) {
            Ok(class) => class,
            Err(error) if !error.is_fatal() => {
                scan.tally.unknown_type_documents += 1;
                tracing::debug!(collection, error = %error, "Skipping document");
                return Ok(());
            }
            Err(error) => return Err(error),
        };
        scan.tally.documents_scanned += 1;
        if !index.is_eligible(collection, class) {
            scan.tally.ineligible_documents += 1;
            tracing::debug!(
                collection,
                class = index.class_name(class),
                "Document class is not allowed in this collection"
            );
        }

        let source_id = document.get(ID_FIELD).and_then(Value::as_str);
        for field in self.map.fields_of_class(class) {
            let Some(value) = document.get(&field.field) else {
                continue;
            };
            if value.is_null() {
                continue;
            }

            scan.references.insert(ReferenceRecord {
                source_collection: collection.to_string(),
                field: field.field.clone(),
                target_collections: field.targets.to_vec(),
            });

            let (ids, malformed) = extract_ids(value, field.shape);
            scan.tally.malformed_values += malformed;
            for id in ids {
                scan.tally.references_checked += 1;
                if cache.find_among(&field.targets, id)?.is_none() {
                    scan.tally.violations += 1;
                    scan.violations.push(violation(collection, source_id, field, id));
                }
            }
        }
        Ok(())
    }

    fn locate_misplaced(&self, violations: &mut [ViolationRecord], cache: &IdCache<'_>) -> Result<()> {
        tracing::info!(
            violations = violations.len(),
            workers = self.options.locator_threads(),
            "Searching other collections for missing documents"
        );
        let pool = build_pool(self.options.locator_threads(), "refscan-locate")?;
        let located = locator::annotate(&pool, violations, self.map.index().collections(), cache, self.store)?;
        tracing::info!(located, "Misplaced documents located");
        Ok(())
    }
}

/// Attach per-collection summaries and seal the report
fn assemble(
    mut report: ScanReport,
    states: BTreeMap<String, CollectionState>,
    tallies: Vec<(String, CollectionTally)>,
) -> ScanReport {
    let mut tallies: BTreeMap<String, CollectionTally> = tallies.into_iter().collect();
    report.collections = states
        .into_iter()
        .map(|(name, state)| CollectionSummary {
            tally: tallies.remove(&name).unwrap_or_default(),
            name,
            state,
        })
        .collect();
    report.violations.sort();
    report.finished_at = Some(Utc::now());
    report
}

fn build_pool(threads: usize, name: &'static str) -> Result<rayon::ThreadPool> {
    Ok(rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(move |i| format!("{}-{}", name, i))
        .build()?)
}

fn violation(collection: &str, source_id: Option<&str>, field: &FieldReference, id: &str) -> ViolationRecord {
    tracing::debug!(
        collection,
        field = %field.field,
        id,
        "Failed to find referenced document"
    );
    ViolationRecord {
        source_collection: collection.to_string(),
        source_id: source_id.map(str::to_string),
        field: field.field.clone(),
        referenced_id: id.to_string(),
        searched_collections: field.targets.to_vec(),
        found_in_collection: None,
    }
}

/// Ids held by a field value, plus the number of entries that are not ids
///
/// Strings and lists of strings are accepted for every shape; objects are
/// only id-bearing when the slot is inlined as an id-keyed map.
pub fn extract_ids(value: &Value, shape: Inlining) -> (Vec<&str>, usize) {
    match value {
        Value::String(id) => (vec![id.as_str()], 0),
        Value::Array(items) => {
            let ids: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            let malformed = items.len() - ids.len();
            (ids, malformed)
        }
        Value::Object(map) if shape == Inlining::IdKeyedMap => {
            (map.keys().map(String::as_str).collect(), 0)
        }
        Value::Null => (Vec::new(), 0),
        _ => (Vec::new(), 1),
    }
}
