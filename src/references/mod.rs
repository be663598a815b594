//! Reference Map
//!
//! Compiles the schema into the set of fields that may hold references:
//! source collection → source class → field → legal target collections.
//! Ranges are widened to every concrete descendant of the named class(es)
//! and then mapped to the collections that store those descendants.

pub mod resolver;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::diagnostics::{DiagnosticCode, Diagnostics};
use crate::error::RefscanError;
use crate::schema::{ClassId, Inlining, Range, SchemaModel, SlotDef};

pub use resolver::ClassCollectionIndex;

/// One field of a class that may hold references
#[derive(Debug, Clone)]
pub struct FieldReference {
    pub field: String,
    pub shape: Inlining,
    /// Sorted by name; never empty
    pub targets: Arc<[String]>,
}

/// A scannable (collection, class, field) entry
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReferenceMapEntry {
    pub source_collection: String,
    pub source_class: String,
    pub field: String,
    pub shape: Inlining,
    pub target_collections: BTreeSet<String>,
}

/// A field whose class range could not be mapped to any collection
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnresolvedField {
    pub source_collection: String,
    pub source_class: String,
    pub field: String,
    pub reason: String,
}

/// A (source collection, field, targets) triple
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub source_collection: String,
    pub field: String,
    pub target_collections: Vec<String>,
}

/// The compiled reference map
#[derive(Debug, Clone)]
pub struct ReferenceMap {
    index: ClassCollectionIndex,
    /// Reference fields per class, indexed by `ClassId`
    class_fields: Vec<Vec<FieldReference>>,
    entries: Vec<ReferenceMapEntry>,
    unresolved: Vec<UnresolvedField>,
}

impl ReferenceMap {
    /// Compile the reference map, collecting non-fatal problems
    pub fn build(schema: &SchemaModel) -> (Self, Diagnostics) {
        let index = ClassCollectionIndex::build(schema);
        let mut diagnostics = Diagnostics::new();
        let mut class_fields = vec![Vec::new(); schema.class_count()];
        let mut problems: Vec<Vec<(String, String)>> = vec![Vec::new(); schema.class_count()];

        for class in schema.classes() {
            if class.is_abstract {
                continue;
            }
            for slot in schema.induced_slots(class.id).values() {
                match resolve_targets(schema, &index, slot) {
                    Ok(Some(targets)) => class_fields[class.id].push(FieldReference {
                        field: slot.name.clone(),
                        shape: slot.inlining,
                        targets: targets.into_iter().collect::<Vec<_>>().into(),
                    }),
                    Ok(None) => {}
                    Err((code, reason)) => {
                        let error = RefscanError::SchemaResolution {
                            class: class.name.clone(),
                            slot: slot.name.clone(),
                            reason: reason.clone(),
                        };
                        // Only classes that can actually be scanned are worth reporting.
                        if !index.collections_of(class.id).is_empty() {
                            diagnostics.slot_resolution(code, &error);
                        }
                        problems[class.id].push((slot.name.clone(), reason));
                    }
                }
            }
        }

        let mut entries = Vec::new();
        let mut unresolved = Vec::new();
        for collection in schema.collections() {
            let concrete: Vec<ClassId> = collection
                .eligible
                .iter()
                .copied()
                .filter(|&c| !schema.class(c).is_abstract)
                .collect();
            if concrete.is_empty() {
                let names: Vec<String> = collection
                    .eligible
                    .iter()
                    .map(|&c| schema.class(c).name.clone())
                    .collect();
                diagnostics.empty_collection(&collection.name, &names);
                continue;
            }

            for class in concrete {
                let class_name = &schema.class(class).name;
                for field in &class_fields[class] {
                    entries.push(ReferenceMapEntry {
                        source_collection: collection.name.clone(),
                        source_class: class_name.clone(),
                        field: field.field.clone(),
                        shape: field.shape,
                        target_collections: field.targets.iter().cloned().collect(),
                    });
                }
                for (field, reason) in &problems[class] {
                    unresolved.push(UnresolvedField {
                        source_collection: collection.name.clone(),
                        source_class: class_name.clone(),
                        field: field.clone(),
                        reason: reason.clone(),
                    });
                }
            }
        }
        entries.sort();
        unresolved.sort();

        tracing::info!(
            references = entries.len(),
            unresolved = unresolved.len(),
            "Reference map compiled"
        );

        (
            Self {
                index,
                class_fields,
                entries,
                unresolved,
            },
            diagnostics,
        )
    }

    pub fn index(&self) -> &ClassCollectionIndex {
        &self.index
    }

    /// Scannable entries, sorted by collection, class, field
    pub fn entries(&self) -> &[ReferenceMapEntry] {
        &self.entries
    }

    /// Fields excluded from scanning, kept for visualization
    pub fn unresolved(&self) -> &[UnresolvedField] {
        &self.unresolved
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reference fields of a class, regardless of collection
    pub fn fields_of_class(&self, class: ClassId) -> &[FieldReference] {
        &self.class_fields[class]
    }

    /// Collections that hold at least one reference field, sorted
    pub fn source_collections(&self) -> BTreeSet<&str> {
        self.entries.iter().map(|e| e.source_collection.as_str()).collect()
    }

    /// Distinct field names that may hold references in a collection
    pub fn fields_of_collection(&self, collection: &str) -> BTreeSet<&str> {
        self.entries
            .iter()
            .filter(|e| e.source_collection == collection)
            .map(|e| e.field.as_str())
            .collect()
    }

    /// Distinct (collection, field, targets) triples the schema allows
    pub fn reference_records(&self) -> Vec<ReferenceRecord> {
        let records: BTreeSet<ReferenceRecord> = self
            .entries
            .iter()
            .map(|e| ReferenceRecord {
                source_collection: e.source_collection.clone(),
                field: e.field.clone(),
                target_collections: e.target_collections.iter().cloned().collect(),
            })
            .collect();
        records.into_iter().collect()
    }

    /// Reference fields grouped by source class name
    pub fn field_names_by_class(&self) -> BTreeMap<&str, BTreeSet<&str>> {
        let mut grouped: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for entry in &self.entries {
            grouped
                .entry(entry.source_class.as_str())
                .or_default()
                .insert(entry.field.as_str());
        }
        grouped
    }
}

/// `Ok(None)` for primitive slots, `Ok(Some)` for references, `Err` when a
/// class range cannot be mapped to any collection
fn resolve_targets(
    schema: &SchemaModel,
    index: &ClassCollectionIndex,
    slot: &SlotDef,
) -> Result<Option<BTreeSet<String>>, (DiagnosticCode, String)> {
    let named = match &slot.range {
        Range::Primitive(_) => return Ok(None),
        Range::Unknown(name) => {
            return Err((
                DiagnosticCode::UnknownRange,
                format!("range {} is not a class, type or enum", name),
            ))
        }
        Range::Single(_) | Range::Union(_) => slot.range.classes(),
    };

    let targets: BTreeSet<String> = named
        .iter()
        .flat_map(|&class| schema.concrete_descendants(class))
        .flat_map(|class| index.collections_of(class).iter().cloned())
        .collect();

    if targets.is_empty() {
        let names: Vec<&str> = named.iter().map(|&c| schema.class(c).name.as_str()).collect();
        return Err((
            DiagnosticCode::UnbackedRange,
            format!("no collection stores a concrete {}", names.join(" or ")),
        ));
    }
    Ok(Some(targets))
}
