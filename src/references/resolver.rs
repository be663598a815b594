//! Class/Collection Resolver
//!
//! One lookup table from type strings to classes and from classes to the
//! collections that store them. Built once from the schema and never mutated.

use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

use crate::error::{RefscanError, Result};
use crate::schema::{ClassId, SchemaModel};

/// Name of the document field that carries the class URI
pub const TYPE_FIELD: &str = "type";

/// Bidirectional class URI / class name / collection index
#[derive(Debug, Clone)]
pub struct ClassCollectionIndex {
    by_uri: HashMap<String, ClassId>,
    by_name: HashMap<String, ClassId>,
    names: Vec<String>,
    uris: Vec<String>,
    abstract_flags: Vec<bool>,
    collections_of: Vec<BTreeSet<String>>,
    classes_of: HashMap<String, Vec<ClassId>>,
    collection_order: Vec<String>,
}

impl ClassCollectionIndex {
    pub fn build(schema: &SchemaModel) -> Self {
        let classes = schema.classes();
        let mut by_uri = HashMap::with_capacity(classes.len());
        let mut by_name = HashMap::with_capacity(classes.len());
        for class in classes {
            // First declaration wins when two classes share a URI.
            by_uri.entry(class.uri.clone()).or_insert(class.id);
            by_name.insert(class.name.clone(), class.id);
        }

        let mut collections_of = vec![BTreeSet::new(); classes.len()];
        let mut classes_of = HashMap::new();
        for collection in schema.collections() {
            for &class in &collection.eligible {
                collections_of[class].insert(collection.name.clone());
            }
            classes_of.insert(collection.name.clone(), collection.eligible.clone());
        }

        Self {
            by_uri,
            by_name,
            names: classes.iter().map(|c| c.name.clone()).collect(),
            uris: classes.iter().map(|c| c.uri.clone()).collect(),
            abstract_flags: classes.iter().map(|c| c.is_abstract).collect(),
            collections_of,
            classes_of,
            collection_order: schema.collection_names(),
        }
    }

    /// Map a declared type string to a class
    ///
    /// Class URIs are matched first; a bare class name is accepted as a
    /// fallback for documents written without a prefix.
    pub fn resolve(&self, type_value: &str) -> Result<ClassId> {
        self.by_uri
            .get(type_value)
            .or_else(|| self.by_name.get(type_value))
            .copied()
            .ok_or_else(|| RefscanError::UnknownType(type_value.to_string()))
    }

    /// Resolve the class of a document from its `type` field
    pub fn resolve_document(&self, document: &Value) -> Result<ClassId> {
        match document.get(TYPE_FIELD) {
            Some(Value::String(type_value)) => self.resolve(type_value),
            Some(other) => Err(RefscanError::UnknownType(format!("non-string type {}", other))),
            None => Err(RefscanError::UnknownType("<missing>".to_string())),
        }
    }

    pub fn class_name(&self, class: ClassId) -> &str {
        &self.names[class]
    }

    pub fn class_uri(&self, class: ClassId) -> &str {
        &self.uris[class]
    }

    pub fn is_abstract(&self, class: ClassId) -> bool {
        self.abstract_flags[class]
    }

    /// Collections that may store instances of this class
    pub fn collections_of(&self, class: ClassId) -> &BTreeSet<String> {
        &self.collections_of[class]
    }

    /// Classes whose instances may be stored in a collection
    pub fn classes_of(&self, collection: &str) -> &[ClassId] {
        self.classes_of.get(collection).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_eligible(&self, collection: &str, class: ClassId) -> bool {
        self.collections_of[class].contains(collection)
    }

    /// All collections in schema declaration order
    pub fn collections(&self) -> &[String] {
        &self.collection_order
    }

    /// Closest collection name to a misspelled one (fuzzy)
    pub fn suggest_collection(&self, query: &str) -> Option<&str> {
        use fuzzy_matcher::skim::SkimMatcherV2;
        use fuzzy_matcher::FuzzyMatcher;

        let matcher = SkimMatcherV2::default();
        self.collection_order
            .iter()
            .filter_map(|name| matcher.fuzzy_match(name, query).map(|score| (score, name)))
            .max_by_key(|(score, _)| *score)
            .map(|(_, name)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{load_from_str, SchemaFormat};
    use serde_json::json;

    fn index() -> (SchemaModel, ClassCollectionIndex) {
        let schema = r#"
default_prefix: x
classes:
  Database:
    attributes:
      material_entity_set: { range: MaterialEntity, multivalued: true, inlined_as_list: true }
      biosample_set: { range: Biosample, multivalued: true, inlined_as_list: true }
  MaterialEntity: {}
  Biosample: { is_a: MaterialEntity, class_uri: "nmdc:Biosample" }
"#;
        let model = load_from_str(schema, SchemaFormat::Yaml, "Database").unwrap();
        let index = ClassCollectionIndex::build(&model);
        (model, index)
    }

    #[test]
    fn test_resolve_by_uri_and_name() {
        let (model, index) = index();
        let biosample = model.class_by_name("Biosample").unwrap().id;
        assert_eq!(index.resolve("nmdc:Biosample").unwrap(), biosample);
        assert_eq!(index.resolve("Biosample").unwrap(), biosample);
        assert_eq!(index.class_uri(biosample), "nmdc:Biosample");
        assert!(matches!(index.resolve("x:Nope"), Err(RefscanError::UnknownType(_))));
    }

    #[test]
    fn test_resolve_document_type_field() {
        let (model, index) = index();
        let material = model.class_by_name("MaterialEntity").unwrap().id;
        assert_eq!(index.resolve_document(&json!({"type": "x:MaterialEntity"})).unwrap(), material);
        assert!(index.resolve_document(&json!({"id": "a"})).is_err());
        assert!(index.resolve_document(&json!({"type": 5})).is_err());
    }

    #[test]
    fn test_class_in_multiple_collections() {
        let (model, index) = index();
        let biosample = model.class_by_name("Biosample").unwrap().id;
        let collections: Vec<_> = index.collections_of(biosample).iter().cloned().collect();
        assert_eq!(collections, vec!["biosample_set", "material_entity_set"]);
        assert!(index.is_eligible("material_entity_set", biosample));
        assert_eq!(index.classes_of("material_entity_set").len(), 2);
        assert_eq!(index.collections(), &["material_entity_set", "biosample_set"]);
    }

    #[test]
    fn test_suggest_collection() {
        let (_, index) = index();
        assert_eq!(index.suggest_collection("biosample"), Some("biosample_set"));
        assert_eq!(index.suggest_collection("zzzz"), None);
    }
}
