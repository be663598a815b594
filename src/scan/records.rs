//! Scan outputs: violation records, per-collection tallies, and the report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RefscanError;
use crate::references::ReferenceRecord;

/// One dangling reference occurrence
///
/// Field order drives the derived ordering used to sort reports.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub source_collection: String,
    /// `None` when the referring document has no `id`
    pub source_id: Option<String>,
    pub field: String,
    pub referenced_id: String,
    pub searched_collections: Vec<String>,
    /// Collection outside `searched_collections` that does hold the id
    pub found_in_collection: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Named in the operator's skip list
    Excluded,
    /// Declared by the schema but missing from the database
    Absent,
    /// No field of any eligible class can hold a reference
    NoReferences,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionState {
    Pending,
    InProgress,
    Completed,
    Skipped(SkipReason),
}

impl fmt::Display for CollectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in progress"),
            Self::Completed => write!(f, "completed"),
            Self::Skipped(SkipReason::Excluded) => write!(f, "skipped (excluded)"),
            Self::Skipped(SkipReason::Absent) => write!(f, "skipped (not in database)"),
            Self::Skipped(SkipReason::NoReferences) => write!(f, "skipped (no references)"),
        }
    }
}

/// Counters for one source collection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionTally {
    pub documents_scanned: usize,
    /// Documents whose type is missing or names no known class
    pub unknown_type_documents: usize,
    /// Documents of a class the schema does not allow in this collection
    pub ineligible_documents: usize,
    /// Reference values that are not ids (numbers, nested objects, ...)
    pub malformed_values: usize,
    pub references_checked: usize,
    pub violations: usize,
}

impl CollectionTally {
    pub fn absorb(&mut self, other: &CollectionTally) {
        self.documents_scanned += other.documents_scanned;
        self.unknown_type_documents += other.unknown_type_documents;
        self.ineligible_documents += other.ineligible_documents;
        self.malformed_values += other.malformed_values;
        self.references_checked += other.references_checked;
        self.violations += other.violations;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSummary {
    pub name: String,
    pub state: CollectionState,
    pub tally: CollectionTally,
}

/// Everything one scan run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Sorted by name
    pub collections: Vec<CollectionSummary>,
    /// Sorted, one per distinct triple
    pub references: Vec<ReferenceRecord>,
    /// Sorted; one per occurrence
    pub violations: Vec<ViolationRecord>,
}

impl ScanReport {
    pub fn completed_count(&self) -> usize {
        self.collections
            .iter()
            .filter(|c| c.state == CollectionState::Completed)
            .count()
    }

    /// Collections that were meant to be scanned
    pub fn scheduled_count(&self) -> usize {
        self.collections
            .iter()
            .filter(|c| !matches!(c.state, CollectionState::Skipped(_)))
            .count()
    }

    pub fn totals(&self) -> CollectionTally {
        let mut totals = CollectionTally::default();
        for collection in &self.collections {
            totals.absorb(&collection.tally);
        }
        totals
    }
}

/// A fatal error together with what was gathered before it
#[derive(Debug)]
pub struct ScanFailure {
    pub error: RefscanError,
    pub partial: ScanReport,
}

impl fmt::Display for ScanFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (scan aborted after {} of {} collections)",
            self.error,
            self.partial.completed_count(),
            self.partial.scheduled_count()
        )
    }
}

impl std::error::Error for ScanFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
