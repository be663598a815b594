//! Schema Loading
//!
//! Parses a LinkML-shaped YAML/JSON schema file, validates the class tree,
//! computes induced slot tables parents-first, and discovers the collections
//! declared by the database class.

use indexmap::IndexMap;
use serde::de::IgnoredAny;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;

use super::{ClassId, ClassNode, CollectionDef, Inlining, Range, SchemaModel, SlotDef};
use crate::error::{RefscanError, Result};

/// Built-in LinkML types; a range naming one of these is never a reference
const BUILTIN_TYPES: &[&str] = &[
    "string",
    "integer",
    "float",
    "double",
    "decimal",
    "boolean",
    "time",
    "date",
    "datetime",
    "date_or_datetime",
    "uri",
    "uriorcurie",
    "curie",
    "ncname",
    "objectidentifier",
    "nodeidentifier",
    "jsonpointer",
    "jsonpath",
    "sparqlpath",
];

/// On-disk encoding of a schema file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaFormat {
    Yaml,
    Json,
}

impl SchemaFormat {
    /// `.json` files are JSON, everything else is read as YAML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => SchemaFormat::Json,
            _ => SchemaFormat::Yaml,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScalarText {
    Text(String),
    Int(i64),
    Float(f64),
}

impl fmt::Display for ScalarText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarText::Text(s) => write!(f, "{}", s),
            ScalarText::Int(i) => write!(f, "{}", i),
            ScalarText::Float(x) => write!(f, "{}", x),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SchemaFile {
    name: Option<String>,
    version: Option<ScalarText>,
    default_prefix: Option<String>,
    default_range: Option<String>,
    types: Option<IndexMap<String, IgnoredAny>>,
    enums: Option<IndexMap<String, IgnoredAny>>,
    slots: Option<IndexMap<String, Option<SlotSpec>>>,
    classes: Option<IndexMap<String, Option<ClassSpec>>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClassSpec {
    is_a: Option<String>,
    class_uri: Option<String>,
    #[serde(rename = "abstract")]
    is_abstract: bool,
    slots: Vec<String>,
    attributes: IndexMap<String, Option<SlotSpec>>,
    slot_usage: IndexMap<String, Option<SlotSpec>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RangeExpression {
    range: Option<String>,
}

/// Unresolved slot definition; `None` fields are left for refinement
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct SlotSpec {
    range: Option<String>,
    any_of: Vec<RangeExpression>,
    multivalued: Option<bool>,
    inlined: Option<bool>,
    inlined_as_list: Option<bool>,
}

impl SlotSpec {
    /// Apply a `slot_usage` refinement over this definition
    fn refine(&mut self, usage: &SlotSpec) {
        if usage.range.is_some() {
            self.range = usage.range.clone();
            self.any_of.clear();
        }
        if !usage.any_of.is_empty() {
            self.any_of = usage.any_of.clone();
        }
        if usage.multivalued.is_some() {
            self.multivalued = usage.multivalued;
        }
        if usage.inlined.is_some() {
            self.inlined = usage.inlined;
        }
        if usage.inlined_as_list.is_some() {
            self.inlined_as_list = usage.inlined_as_list;
        }
    }

    fn is_multivalued(&self) -> bool {
        self.multivalued.unwrap_or(false)
    }

    fn is_inlined_as_list(&self) -> bool {
        self.inlined_as_list.unwrap_or(false)
    }

    fn inlining(&self) -> Inlining {
        let inlined = self.inlined.unwrap_or(self.is_inlined_as_list());
        Inlining::from_flags(self.is_multivalued(), inlined, self.is_inlined_as_list())
    }
}

/// Load a schema file, picking the parser from its extension
pub fn load_from_file(path: &Path, database_class: &str) -> Result<SchemaModel> {
    let load_error = |message: String| RefscanError::SchemaLoad {
        path: path.display().to_string(),
        message,
    };

    let content = fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
    load_from_str(&content, SchemaFormat::from_path(path), database_class).map_err(|e| match e {
        RefscanError::Yaml(e) => load_error(e.to_string()),
        RefscanError::Json(e) => load_error(e.to_string()),
        other => other,
    })
}

/// Parse and build a schema from text
pub fn load_from_str(content: &str, format: SchemaFormat, database_class: &str) -> Result<SchemaModel> {
    let file: SchemaFile = match format {
        SchemaFormat::Yaml => serde_yaml::from_str(content)?,
        SchemaFormat::Json => serde_json::from_str(content)?,
    };
    build(file, database_class)
}

fn build(file: SchemaFile, database_class: &str) -> Result<SchemaModel> {
    let class_specs: Vec<(String, ClassSpec)> = file
        .classes
        .unwrap_or_default()
        .into_iter()
        .map(|(name, spec)| (name, spec.unwrap_or_default()))
        .collect();
    let global_slots: IndexMap<String, SlotSpec> = file
        .slots
        .unwrap_or_default()
        .into_iter()
        .map(|(name, spec)| (name, spec.unwrap_or_default()))
        .collect();

    let by_name: HashMap<String, ClassId> = class_specs
        .iter()
        .enumerate()
        .map(|(id, (name, _))| (name.clone(), id))
        .collect();

    let mut parents: Vec<Option<ClassId>> = Vec::with_capacity(class_specs.len());
    for (name, spec) in &class_specs {
        let parent = match &spec.is_a {
            Some(parent_name) => Some(*by_name.get(parent_name).ok_or_else(|| {
                RefscanError::SchemaStructure(format!(
                    "class {} has is_a {}, which is not a class in the schema",
                    name, parent_name
                ))
            })?),
            None => None,
        };
        parents.push(parent);
    }

    let depths = class_depths(&class_specs, &parents)?;
    let mut order: Vec<ClassId> = (0..class_specs.len()).collect();
    order.sort_by_key(|&id| (depths[id], id));

    let mut children: Vec<Vec<ClassId>> = vec![Vec::new(); class_specs.len()];
    for (id, parent) in parents.iter().enumerate() {
        if let Some(p) = parent {
            children[*p].push(id);
        }
    }

    // Induced slots are merged as raw definitions first so that slot_usage can
    // refine inherited definitions before ranges are resolved.
    let mut raw_induced: Vec<IndexMap<String, SlotSpec>> = vec![IndexMap::new(); class_specs.len()];
    for &id in &order {
        let (class_name, spec) = &class_specs[id];
        let mut slots = parents[id]
            .map(|p| raw_induced[p].clone())
            .unwrap_or_default();

        for slot_name in &spec.slots {
            let base = global_slots.get(slot_name).ok_or_else(|| {
                RefscanError::SchemaStructure(format!(
                    "class {} uses slot {}, which is not defined in the schema",
                    class_name, slot_name
                ))
            })?;
            slots.entry(slot_name.clone()).or_insert_with(|| base.clone());
        }

        for (slot_name, attribute) in &spec.attributes {
            slots.insert(slot_name.clone(), attribute.clone().unwrap_or_default());
        }

        for (slot_name, usage) in &spec.slot_usage {
            let mut refined = slots
                .get(slot_name)
                .or_else(|| global_slots.get(slot_name))
                .cloned()
                .unwrap_or_default();
            if let Some(usage) = usage {
                refined.refine(usage);
            }
            slots.insert(slot_name.clone(), refined);
        }

        raw_induced[id] = slots;
    }

    let primitives: HashSet<String> = BUILTIN_TYPES
        .iter()
        .map(|t| t.to_string())
        .chain(file.types.unwrap_or_default().into_keys())
        .chain(file.enums.unwrap_or_default().into_keys())
        .collect();
    let default_range = file.default_range.unwrap_or_else(|| "string".to_string());
    let resolver = RangeResolver {
        by_name: &by_name,
        primitives: &primitives,
        default_range: &default_range,
    };

    let induced: Vec<IndexMap<String, SlotDef>> = raw_induced
        .iter()
        .map(|slots| {
            slots
                .iter()
                .map(|(name, spec)| (name.clone(), resolver.slot_def(name, spec)))
                .collect()
        })
        .collect();

    let classes: Vec<ClassNode> = class_specs
        .iter()
        .enumerate()
        .map(|(id, (name, spec))| ClassNode {
            id,
            name: name.clone(),
            uri: spec.class_uri.clone().unwrap_or_else(|| match &file.default_prefix {
                Some(prefix) => format!("{}:{}", prefix, name),
                None => name.clone(),
            }),
            parent: parents[id],
            is_abstract: spec.is_abstract,
        })
        .collect();

    let mut model = SchemaModel {
        name: file.name,
        version: file.version.map(|v| v.to_string()),
        classes,
        children,
        induced,
        by_name,
        collections: Vec::new(),
    };

    let database_id = *model.by_name.get(database_class).ok_or_else(|| {
        RefscanError::SchemaStructure(format!(
            "schema has no database class named {}",
            database_class
        ))
    })?;
    model.collections = discover_collections(&model, database_id, &raw_induced[database_id]);

    tracing::debug!(
        classes = model.classes.len(),
        collections = model.collections.len(),
        "Schema loaded"
    );

    Ok(model)
}

/// Depth of each class in the `is_a` tree; rejects cycles
fn class_depths(class_specs: &[(String, ClassSpec)], parents: &[Option<ClassId>]) -> Result<Vec<usize>> {
    let mut depths = Vec::with_capacity(parents.len());
    for (id, (name, _)) in class_specs.iter().enumerate() {
        let mut depth = 0;
        let mut current = parents[id];
        while let Some(parent) = current {
            depth += 1;
            if depth > parents.len() {
                return Err(RefscanError::SchemaStructure(format!(
                    "class {} is part of an is_a cycle",
                    name
                )));
            }
            current = parents[parent];
        }
        depths.push(depth);
    }
    Ok(depths)
}

/// Collection slots are the database class's multivalued, list-inlined slots
fn discover_collections(
    model: &SchemaModel,
    database_id: ClassId,
    database_slots: &IndexMap<String, SlotSpec>,
) -> Vec<CollectionDef> {
    let mut collections = Vec::new();
    for (name, spec) in database_slots {
        if !(spec.is_multivalued() && spec.is_inlined_as_list()) {
            continue;
        }

        let range: Vec<ClassId> = model.induced[database_id]
            .get(name)
            .map(|slot| slot.range.classes().to_vec())
            .unwrap_or_default();
        if range.is_empty() {
            tracing::warn!(collection = %name, "Collection slot has no class range; ignoring it");
            continue;
        }

        let mut eligible: Vec<ClassId> = range.iter().flat_map(|&c| model.descendants(c)).collect();
        eligible.sort_unstable();
        eligible.dedup();

        collections.push(CollectionDef {
            name: name.clone(),
            range,
            eligible,
        });
    }
    collections
}

struct RangeResolver<'a> {
    by_name: &'a HashMap<String, ClassId>,
    primitives: &'a HashSet<String>,
    default_range: &'a str,
}

impl RangeResolver<'_> {
    fn slot_def(&self, name: &str, spec: &SlotSpec) -> SlotDef {
        SlotDef {
            name: name.to_string(),
            range: self.range(spec),
            inlining: spec.inlining(),
        }
    }

    fn range(&self, spec: &SlotSpec) -> Range {
        if spec.any_of.is_empty() {
            let name = spec.range.as_deref().unwrap_or(self.default_range);
            return self.named(name);
        }

        // Only the class members of an any_of constrain the reference targets.
        let mut classes = Vec::new();
        let mut unknown = None;
        for expression in &spec.any_of {
            let name = expression.range.as_deref().unwrap_or(self.default_range);
            match self.named(name) {
                Range::Single(id) => {
                    if !classes.contains(&id) {
                        classes.push(id);
                    }
                }
                Range::Unknown(name) => {
                    unknown.get_or_insert(name);
                }
                _ => {}
            }
        }

        match (classes.is_empty(), unknown) {
            (false, _) => Range::Union(classes),
            (true, Some(name)) => Range::Unknown(name),
            (true, None) => Range::Primitive("any_of".to_string()),
        }
    }

    fn named(&self, name: &str) -> Range {
        if let Some(&id) = self.by_name.get(name) {
            Range::Single(id)
        } else if self.primitives.contains(name) {
            Range::Primitive(name.to_string())
        } else {
            Range::Unknown(name.to_string())
        }
    }
}
