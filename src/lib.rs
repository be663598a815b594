//! refscan
//!
//! Referential integrity scanner for schema-described document databases.
//!
//! The schema says which fields may hold the id of another document and which
//! collections that document may live in. refscan compiles that into a
//! reference map, scans every collection, and reports each referenced id that
//! cannot be found where the schema allows it to be.
//!
//! ## Features
//!
//! - **Reference Map**: source collection → field → legal target collections,
//!   with ranges widened over the class hierarchy and `any_of` unions
//! - **Integrity Scan**: streaming, parallel per collection, with a per-run id
//!   cache so each target collection's ids are loaded at most once
//! - **Misplaced Documents**: optionally finds the collection a dangling
//!   reference's target actually lives in
//! - **Reports**: TSV reference and violation reports, plus DOT/JSON graphs
//!
//! ## Pipeline
//!
//! ```text
//! schema.yaml ──► SchemaModel ──► ReferenceMap ──► Scanner ──► ScanReport
//!                                      │              │
//!                                      ▼              ▼
//!                               ReferenceGraph    IdCache ◄── DocumentStore
//! ```

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod graph;
pub mod references;
pub mod report;
pub mod scan;
pub mod schema;
pub mod store;

pub use config::RefscanConfig;
pub use diagnostics::{DiagnosticCode, DiagnosticItem, Diagnostics, Severity};
pub use error::{RefscanError, Result};
pub use graph::{ReferenceGraph, Subject};
pub use references::{
    ClassCollectionIndex, FieldReference, ReferenceMap, ReferenceMapEntry, ReferenceRecord,
};
pub use scan::{
    CollectionState, CollectionSummary, CollectionTally, IdCache, ScanFailure, ScanOptions,
    ScanReport, Scanner, SkipReason, ViolationRecord,
};
pub use schema::{ClassId, Inlining, Range, SchemaModel};
pub use store::{DirectoryStore, DocumentStore, DocumentStream, MemoryStore};
