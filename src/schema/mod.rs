//! Schema Model
//!
//! Immutable class/slot graph loaded from a LinkML-shaped schema file.
//! Classes live in an arena indexed by [`ClassId`] with parent indices, and
//! every class carries a precomputed induced slot table. Nothing here is
//! mutated after [`SchemaModel::from_file`] returns.

pub mod loader;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use crate::error::Result;

pub use loader::{load_from_str, SchemaFormat};

/// Index of a class in the schema arena
pub type ClassId = usize;

/// Name of the class whose slots declare the database collections
pub const DEFAULT_DATABASE_CLASS: &str = "Database";

/// How the values of a slot are laid out inside a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Inlining {
    /// A single id
    Scalar,
    /// A list of ids
    List,
    /// An object whose keys are ids
    IdKeyedMap,
}

impl Inlining {
    pub(crate) fn from_flags(multivalued: bool, inlined: bool, inlined_as_list: bool) -> Self {
        match (multivalued, inlined, inlined_as_list) {
            (false, _, _) => Inlining::Scalar,
            (true, true, false) => Inlining::IdKeyedMap,
            (true, _, _) => Inlining::List,
        }
    }
}

/// Range of a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Range {
    /// Exactly one class (and its descendants)
    Single(ClassId),
    /// Explicit `any_of` union of classes
    Union(Vec<ClassId>),
    /// A type or enum; never a reference
    Primitive(String),
    /// Names something the schema does not define
    Unknown(String),
}

impl Range {
    /// Classes named by this range, if any
    pub fn classes(&self) -> &[ClassId] {
        match self {
            Range::Single(id) => std::slice::from_ref(id),
            Range::Union(ids) => ids,
            Range::Primitive(_) | Range::Unknown(_) => &[],
        }
    }
}

/// A slot definition after `slot_usage` refinement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDef {
    pub name: String,
    pub range: Range,
    pub inlining: Inlining,
}

/// A class in the schema arena
#[derive(Debug, Clone)]
pub struct ClassNode {
    pub id: ClassId,
    pub name: String,
    pub uri: String,
    pub parent: Option<ClassId>,
    pub is_abstract: bool,
}

/// A collection declared by the database class
#[derive(Debug, Clone)]
pub struct CollectionDef {
    pub name: String,
    /// Classes named by the collection slot's range
    pub range: Vec<ClassId>,
    /// The range classes and all their descendants, in declaration order
    pub eligible: Vec<ClassId>,
}

/// The loaded schema
#[derive(Debug, Clone)]
pub struct SchemaModel {
    pub name: Option<String>,
    pub version: Option<String>,
    pub(crate) classes: Vec<ClassNode>,
    pub(crate) children: Vec<Vec<ClassId>>,
    pub(crate) induced: Vec<IndexMap<String, SlotDef>>,
    pub(crate) by_name: HashMap<String, ClassId>,
    pub(crate) collections: Vec<CollectionDef>,
}

impl SchemaModel {
    /// Load a schema from a YAML or JSON file
    pub fn from_file(path: &Path, database_class: &str) -> Result<Self> {
        loader::load_from_file(path, database_class)
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// All classes in declaration order
    pub fn classes(&self) -> &[ClassNode] {
        &self.classes
    }

    pub fn class(&self, id: ClassId) -> &ClassNode {
        &self.classes[id]
    }

    pub fn class_by_name(&self, name: &str) -> Option<&ClassNode> {
        self.by_name.get(name).map(|&id| &self.classes[id])
    }

    /// Collections in declaration order
    pub fn collections(&self) -> &[CollectionDef] {
        &self.collections
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections.iter().map(|c| c.name.clone()).collect()
    }

    /// Induced slots of a class: own slots merged over inherited ones
    pub fn induced_slots(&self, id: ClassId) -> &IndexMap<String, SlotDef> {
        &self.induced[id]
    }

    /// Ancestors of a class, nearest first
    pub fn ancestors(&self, id: ClassId) -> Vec<ClassId> {
        let mut result = Vec::new();
        let mut current = self.classes[id].parent;
        while let Some(parent) = current {
            result.push(parent);
            current = self.classes[parent].parent;
        }
        result
    }

    /// The class itself followed by every transitive subclass
    pub fn descendants(&self, id: ClassId) -> Vec<ClassId> {
        let mut result = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            result.push(current);
            queue.extend(self.children[current].iter().copied());
        }
        result
    }

    /// Non-abstract members of [`Self::descendants`]
    pub fn concrete_descendants(&self, id: ClassId) -> Vec<ClassId> {
        self.descendants(id)
            .into_iter()
            .filter(|&c| !self.classes[c].is_abstract)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"
name: vehicles
default_prefix: x
slots:
  id: { range: string }
  owner: { range: Agent }
classes:
  Database:
    attributes:
      vehicle_set: { range: Vehicle, multivalued: true, inlined_as_list: true }
      agent_set: { range: Agent, multivalued: true, inlined_as_list: true }
  NamedThing:
    abstract: true
    slots: [id]
  Agent:
    is_a: NamedThing
    abstract: true
  Person:
    is_a: Agent
  Organization:
    is_a: Agent
  Vehicle:
    is_a: NamedThing
    slots: [owner]
  Car:
    is_a: Vehicle
    slot_usage:
      owner: { range: Person }
    attributes:
      previous_owners: { range: Person, multivalued: true }
"#;

    fn model() -> SchemaModel {
        load_from_str(SCHEMA, SchemaFormat::Yaml, DEFAULT_DATABASE_CLASS).unwrap()
    }

    #[test]
    fn test_induced_slots_are_monotonic() {
        let schema = model();
        for class in schema.classes() {
            let Some(parent) = class.parent else { continue };
            let child_slots = schema.induced_slots(class.id);
            for name in schema.induced_slots(parent).keys() {
                assert!(
                    child_slots.contains_key(name),
                    "{} lost inherited slot {}",
                    class.name,
                    name
                );
            }
        }
    }

    #[test]
    fn test_child_overrides_parent_slot() {
        let schema = model();
        let car = schema.class_by_name("Car").unwrap();
        let person = schema.class_by_name("Person").unwrap().id;
        let agent = schema.class_by_name("Agent").unwrap().id;
        let vehicle = schema.class_by_name("Vehicle").unwrap().id;

        assert_eq!(schema.induced_slots(car.id)["owner"].range, Range::Single(person));
        assert_eq!(schema.induced_slots(vehicle)["owner"].range, Range::Single(agent));
        assert_eq!(schema.induced_slots(car.id)["previous_owners"].inlining, Inlining::List);
    }

    #[test]
    fn test_descendants_and_concrete_filter() {
        let schema = model();
        let agent = schema.class_by_name("Agent").unwrap().id;
        let names: Vec<_> = schema
            .descendants(agent)
            .into_iter()
            .map(|id| schema.class(id).name.as_str())
            .collect();
        assert_eq!(names, vec!["Agent", "Person", "Organization"]);

        let concrete: Vec<_> = schema
            .concrete_descendants(agent)
            .into_iter()
            .map(|id| schema.class(id).name.as_str())
            .collect();
        assert_eq!(concrete, vec!["Person", "Organization"]);
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let schema = model();
        let car = schema.class_by_name("Car").unwrap().id;
        let names: Vec<_> = schema
            .ancestors(car)
            .into_iter()
            .map(|id| schema.class(id).name.clone())
            .collect();
        assert_eq!(names, vec!["Vehicle", "NamedThing"]);
    }

    #[test]
    fn test_inlining_from_flags() {
        assert_eq!(Inlining::from_flags(false, true, true), Inlining::Scalar);
        assert_eq!(Inlining::from_flags(true, false, false), Inlining::List);
        assert_eq!(Inlining::from_flags(true, true, true), Inlining::List);
        assert_eq!(Inlining::from_flags(true, true, false), Inlining::IdKeyedMap);
    }
}
