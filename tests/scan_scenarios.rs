//! End-to-end scan tests
//!
//! Every test loads `fixtures/vehicles.yaml`, where `Car.owner` may only
//! point at `persons` and `Truck.operator` at `persons` or `organizations`.

use std::fs;
use std::path::Path;

use refscan::{
    report, CollectionState, DirectoryStore, DocumentStore, MemoryStore, ReferenceMap,
    ReferenceRecord, RefscanError, ScanOptions, ScanReport, Scanner, SchemaModel, SkipReason,
    ViolationRecord,
};
use serde_json::{json, Value};
use tempfile::tempdir;

fn fixtures_path() -> &'static Path {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").leak()
}

fn reference_map() -> ReferenceMap {
    let schema = SchemaModel::from_file(&fixtures_path().join("vehicles.yaml"), "Database").unwrap();
    let (map, _) = ReferenceMap::build(&schema);
    map
}

fn car(id: &str, owner: &str) -> Value {
    json!({"id": id, "type": "x:Car", "owner": owner})
}

fn scan(map: &ReferenceMap, store: &dyn DocumentStore, options: ScanOptions) -> ScanReport {
    Scanner::new(map, store, options).run().unwrap()
}

fn state_of(report: &ScanReport, collection: &str) -> CollectionState {
    report
        .collections
        .iter()
        .find(|c| c.name == collection)
        .map(|c| c.state)
        .unwrap()
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_dangling_single_reference() {
    let map = reference_map();
    let store = MemoryStore::new()
        .with_collection("cars", vec![car("car:1", "person:9")])
        .with_collection("persons", vec![]);

    let report = scan(&map, &store, ScanOptions::default());
    assert_eq!(
        report.violations,
        vec![ViolationRecord {
            source_collection: "cars".into(),
            source_id: Some("car:1".into()),
            field: "owner".into(),
            referenced_id: "person:9".into(),
            searched_collections: vec!["persons".into()],
            found_in_collection: None,
        }]
    );
    assert_eq!(state_of(&report, "cars"), CollectionState::Completed);
}

#[test]
fn test_valid_reference() {
    let map = reference_map();
    let store = MemoryStore::new()
        .with_collection("cars", vec![car("car:1", "person:9")])
        .with_collection("persons", vec![json!({"id": "person:9", "type": "x:Person"})]);

    let report = scan(&map, &store, ScanOptions::default());
    assert!(report.violations.is_empty());
    assert_eq!(
        report.references,
        vec![ReferenceRecord {
            source_collection: "cars".into(),
            field: "owner".into(),
            target_collections: vec!["persons".into()],
        }]
    );
}

#[test]
fn test_union_range_accepts_either_collection() {
    let map = reference_map();
    let store = MemoryStore::new()
        .with_collection(
            "trucks",
            vec![json!({"id": "truck:1", "type": "x:Truck", "operator": "org:1"})],
        )
        .with_collection("persons", vec![])
        .with_collection("organizations", vec![json!({"id": "org:1", "type": "x:Organization"})]);

    let report = scan(&map, &store, ScanOptions::default());
    assert!(report.violations.is_empty());
    assert_eq!(report.references[0].target_collections, vec!["organizations", "persons"]);
}

#[test]
fn test_locator_finds_misplaced_document() {
    let map = reference_map();
    let store = MemoryStore::new()
        .with_collection("cars", vec![car("car:1", "person:9")])
        .with_collection("persons", vec![])
        .with_collection("organizations", vec![json!({"id": "person:9", "type": "x:Organization"})]);
    let options = ScanOptions {
        locate_misplaced_documents: true,
        ..ScanOptions::default()
    };

    let report = scan(&map, &store, options);
    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].found_in_collection.as_deref(), Some("organizations"));
}

// =============================================================================
// Properties
// =============================================================================

fn mixed_store() -> MemoryStore {
    MemoryStore::new()
        .with_collection(
            "cars",
            vec![
                car("car:1", "person:1"),
                car("car:2", "person:2"),
                car("car:3", "org:1"),
                json!({"id": "car:4", "type": "x:Car", "drivers": ["person:1", "person:3"]}),
                json!({"id": "car:5", "type": "x:Car", "parts": {"wheel:1": {}, "wheel:2": {}}}),
            ],
        )
        .with_collection(
            "trucks",
            vec![
                json!({"id": "truck:1", "type": "x:Truck", "operator": "org:1"}),
                json!({"id": "truck:2", "type": "x:Truck", "operator": "org:2"}),
            ],
        )
        .with_collection("persons", vec![json!({"id": "person:1", "type": "x:Person"})])
        .with_collection(
            "organizations",
            vec![
                json!({"id": "org:1", "type": "x:Organization"}),
                json!({"id": "person:2", "type": "x:Organization"}),
            ],
        )
        .with_collection("parts", vec![json!({"id": "wheel:1", "type": "x:Wheel"})])
}

#[test]
fn test_scans_are_idempotent() {
    let map = reference_map();
    let store = mixed_store();
    let options = ScanOptions {
        locate_misplaced_documents: true,
        workers: 3,
        ..ScanOptions::default()
    };

    let first = scan(&map, &store, options.clone());
    let second = scan(&map, &store, options);
    assert_eq!(first.violations, second.violations);
    assert_eq!(first.references, second.references);
    assert_eq!(first.totals(), second.totals());
}

#[test]
fn test_violations_agree_with_database() {
    let map = reference_map();
    let store = mixed_store();
    let options = ScanOptions {
        locate_misplaced_documents: true,
        ..ScanOptions::default()
    };

    let report = scan(&map, &store, options);
    // person:2, org:1 (as owner), person:3, wheel:2, org:2
    assert_eq!(report.violations.len(), 5);

    for violation in &report.violations {
        for searched in &violation.searched_collections {
            assert!(!store.all_ids(searched).unwrap().contains(&violation.referenced_id));
        }
        if let Some(found) = &violation.found_in_collection {
            assert!(!violation.searched_collections.contains(found));
            assert!(store.all_ids(found).unwrap().contains(&violation.referenced_id));
        }
    }

    let misplaced: Vec<_> = report
        .violations
        .iter()
        .filter_map(|v| v.found_in_collection.as_deref().map(|c| (v.referenced_id.as_str(), c)))
        .collect();
    assert_eq!(misplaced, vec![("person:2", "organizations"), ("org:1", "organizations")]);
}

#[test]
fn test_id_keyed_map_references() {
    let map = reference_map();
    let store = mixed_store();

    let report = scan(&map, &store, ScanOptions::default());
    let parts: Vec<_> = report
        .violations
        .iter()
        .filter(|v| v.field == "parts")
        .collect();
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].referenced_id, "wheel:2");
    assert_eq!(parts[0].searched_collections, vec!["parts"]);
}

#[test]
fn test_each_target_collection_is_loaded_once() {
    let map = reference_map();
    let cars: Vec<Value> = (0..200)
        .map(|i| car(&format!("car:{}", i), &format!("person:{}", i % 7)))
        .collect();
    let store = MemoryStore::new()
        .with_collection("cars", cars)
        .with_collection("persons", vec![json!({"id": "person:0"})]);
    let options = ScanOptions {
        batch_size: 16,
        ..ScanOptions::default()
    };

    let report = scan(&map, &store, options);
    assert_eq!(report.violations.len(), 200 - 29);
    assert_eq!(store.id_projections(), 1);
    assert_eq!(store.point_lookups(), 0);
}

#[test]
fn test_document_anomalies_are_counted() {
    let map = reference_map();
    let store = MemoryStore::new()
        .with_collection(
            "cars",
            vec![
                json!({"id": "car:1", "type": "x:Spaceship", "owner": "person:9"}),
                json!({"id": "car:2", "owner": "person:9"}),
                json!({"id": "person:1", "type": "x:Person"}),
                json!({"id": "car:3", "type": "x:Car", "owner": 42}),
                json!({"id": "car:4", "type": "Car", "owner": null}),
            ],
        )
        .with_collection("persons", vec![]);

    let report = scan(&map, &store, ScanOptions::default());
    let totals = report.totals();
    assert_eq!(totals.unknown_type_documents, 2);
    assert_eq!(totals.documents_scanned, 3);
    assert_eq!(totals.ineligible_documents, 1);
    assert_eq!(totals.malformed_values, 1);
    assert!(report.violations.is_empty());
}

#[test]
fn test_collection_states() {
    let map = reference_map();
    let store = MemoryStore::new()
        .with_collection("cars", vec![car("car:1", "person:9")])
        .with_collection("persons", vec![]);
    let options = ScanOptions {
        skip_collections: vec!["cars".into()],
        ..ScanOptions::default()
    };

    let report = scan(&map, &store, options);
    assert!(report.violations.is_empty());
    assert_eq!(state_of(&report, "cars"), CollectionState::Skipped(SkipReason::Excluded));
    assert_eq!(state_of(&report, "trucks"), CollectionState::Skipped(SkipReason::Absent));
    assert_eq!(state_of(&report, "persons"), CollectionState::Skipped(SkipReason::NoReferences));
    assert_eq!(report.scheduled_count(), 0);
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_lost_connection_aborts_with_partial_report() {
    let map = reference_map();
    let store = MemoryStore::new()
        .with_collection("cars", vec![car("car:1", "person:9")])
        .with_collection(
            "trucks",
            vec![json!({"id": "truck:1", "type": "x:Truck", "operator": "org:9"})],
        )
        .with_collection("persons", vec![])
        .with_collection("organizations", vec![]);
    store.set_offline("persons");
    let options = ScanOptions {
        workers: 1,
        ..ScanOptions::default()
    };

    let failure = Scanner::new(&map, &store, options).run().unwrap_err();
    assert!(matches!(failure.error, RefscanError::Connectivity { ref collection, .. } if collection == "persons"));
    assert!(failure.partial.finished_at.is_some());
    assert_eq!(failure.partial.scheduled_count(), 2);
    assert!(failure.partial.completed_count() < 2);
    assert_eq!(state_of(&failure.partial, "cars"), CollectionState::InProgress);
    // With one worker trucks is never picked up once cars has failed.
    assert_eq!(state_of(&failure.partial, "trucks"), CollectionState::Pending);
    assert_eq!(failure.partial.completed_count(), 0);
    assert!(failure.to_string().contains("scan aborted after"));
}

// =============================================================================
// Reports
// =============================================================================

#[test]
fn test_reference_map_report_needs_no_database() {
    let map = reference_map();
    let out = tempdir().unwrap();
    let path = out.path().join("references.tsv");

    let rows = report::write_reference_map(&path, &map).unwrap();

    let written = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines[0], "source_collection\tfield\ttarget_collections");
    assert_eq!(lines.len(), rows + 1);
    assert!(lines.contains(&"cars\towner\tpersons"));
    assert!(lines.contains(&"trucks\toperator\torganizations|persons"));
    assert!(lines.contains(&"cars\tparts\tparts"));
}

// =============================================================================
// Directory store
// =============================================================================

fn write_collection(dir: &Path, collection: &str, documents: &[Value]) {
    let lines: Vec<String> = documents.iter().map(Value::to_string).collect();
    fs::write(dir.join(format!("{}.jsonl", collection)), lines.join("\n")).unwrap();
}

#[test]
fn test_directory_database_end_to_end() {
    let map = reference_map();
    let db = tempdir().unwrap();
    write_collection(
        db.path(),
        "cars",
        &[car("car:1", "person:1"), car("car:2", "person:9")],
    );
    write_collection(db.path(), "persons", &[json!({"id": "person:1", "type": "x:Person"})]);
    write_collection(db.path(), "organizations", &[json!({"id": "person:9", "type": "x:Organization"})]);

    let store = DirectoryStore::open(db.path()).unwrap();
    let options = ScanOptions {
        batch_size: 1,
        locate_misplaced_documents: true,
        ..ScanOptions::default()
    };
    let outcome = scan(&map, &store, options);

    let out = tempdir().unwrap();
    let references_path = out.path().join("references.tsv");
    let violations_path = out.path().join("violations.tsv");
    report::write_references(&references_path, &map.reference_records()).unwrap();
    report::write_violations(&violations_path, &outcome.violations, true).unwrap();

    let references = fs::read_to_string(&references_path).unwrap();
    assert!(references.contains("cars\towner\tpersons\n"));
    assert!(references.contains("trucks\toperator\torganizations|persons\n"));

    let violations = fs::read_to_string(&violations_path).unwrap();
    let rows: Vec<&str> = violations.lines().collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1], "cars\tcar:2\towner\tperson:9\tpersons\torganizations");
}
