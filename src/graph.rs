//! Reference graph export
//!
//! Nodes are collections or classes; each edge stands for every field through
//! which one node may refer to another and is labelled with those field names.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::references::{ReferenceMap, UnresolvedField};
use crate::schema::SchemaModel;

/// What a node of the graph stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Subject {
    #[default]
    Collection,
    Class,
}

impl FromStr for Subject {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "collection" => Ok(Subject::Collection),
            "class" => Ok(Subject::Class),
            other => Err(format!("unknown subject '{}', expected collection or class", other)),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Collection => write!(f, "collection"),
            Subject::Class => write!(f, "class"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "abstract")]
    pub is_abstract: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    /// Field names, sorted
    pub fields: Vec<String>,
}

#[derive(Debug, Serialize)]
struct GraphDocument<'a> {
    subject: String,
    nodes: Vec<&'a GraphNode>,
    edges: Vec<GraphEdge>,
    unresolved: &'a [UnresolvedField],
}

/// Placeholder target for fields whose range maps to no collection
const UNRESOLVED_NODE: &str = "<unresolved>";

pub struct ReferenceGraph {
    subject: Subject,
    graph: DiGraph<GraphNode, BTreeSet<String>>,
    unresolved: Vec<UnresolvedField>,
}

impl ReferenceGraph {
    pub fn build(schema: &SchemaModel, map: &ReferenceMap, subject: Subject) -> Self {
        // (source, target) -> fields
        let mut links: BTreeMap<(String, String), BTreeSet<String>> = BTreeMap::new();
        let mut abstract_classes = BTreeSet::new();

        for entry in map.entries() {
            match subject {
                Subject::Collection => {
                    for target in &entry.target_collections {
                        links
                            .entry((entry.source_collection.clone(), target.clone()))
                            .or_default()
                            .insert(entry.field.clone());
                    }
                }
                Subject::Class => {
                    let Some(class) = schema.class_by_name(&entry.source_class) else {
                        continue;
                    };
                    let Some(slot) = schema.induced_slots(class.id).get(&entry.field) else {
                        continue;
                    };
                    let index = map.index();
                    if index.is_abstract(class.id) {
                        abstract_classes.insert(class.name.clone());
                    }
                    // The declared range class plus every concrete subclass a
                    // collection can actually hold.
                    for &range_class in slot.range.classes() {
                        let stored = schema
                            .concrete_descendants(range_class)
                            .into_iter()
                            .filter(|&c| c != range_class && !index.collections_of(c).is_empty());
                        for target in std::iter::once(range_class).chain(stored) {
                            if index.is_abstract(target) {
                                abstract_classes.insert(index.class_name(target).to_string());
                            }
                            links
                                .entry((entry.source_class.clone(), index.class_name(target).to_string()))
                                .or_default()
                                .insert(entry.field.clone());
                        }
                    }
                }
            }
        }

        let mut graph = DiGraph::new();
        let mut indices: BTreeMap<String, NodeIndex> = BTreeMap::new();
        let mut node = |graph: &mut DiGraph<GraphNode, BTreeSet<String>>, name: &str| -> NodeIndex {
            *indices.entry(name.to_string()).or_insert_with(|| {
                graph.add_node(GraphNode {
                    id: name.to_string(),
                    is_abstract: abstract_classes.contains(name),
                })
            })
        };

        for ((source, target), fields) in links {
            let source = node(&mut graph, &source);
            let target = node(&mut graph, &target);
            graph.add_edge(source, target, fields);
        }

        tracing::debug!(
            subject = %subject,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Reference graph built"
        );
        Self {
            subject,
            graph,
            unresolved: map.unresolved().to_vec(),
        }
    }

    pub fn subject(&self) -> Subject {
        self.subject
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Fields left out of the graph because their range maps to no collection
    pub fn unresolved(&self) -> &[UnresolvedField] {
        &self.unresolved
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.graph.node_weights()
    }

    pub fn edges(&self) -> Vec<GraphEdge> {
        self.graph
            .edge_references()
            .map(|edge| GraphEdge {
                source: self.graph[edge.source()].id.clone(),
                target: self.graph[edge.target()].id.clone(),
                fields: edge.weight().iter().cloned().collect(),
            })
            .collect()
    }

    /// Export to GraphViz DOT format
    pub fn to_dot(&self) -> String {
        let mut output = String::new();

        output.push_str("digraph ReferenceGraph {\n");
        output.push_str("  rankdir=LR;\n");
        output.push_str("  bgcolor=\"#1e1e1e\";\n");
        output.push_str("  node [shape=box, style=\"filled,rounded\", fontname=\"Helvetica\", fontsize=10, fontcolor=\"white\", color=\"#404040\"];\n");
        output.push_str("  edge [fontname=\"Helvetica\", fontsize=8, fontcolor=\"#808080\"];\n");
        output.push('\n');

        for node in self.graph.node_weights() {
            let (color, style) = if node.is_abstract {
                ("#607D8B", "filled,rounded,dashed")
            } else {
                ("#00BCD4", "filled,rounded")
            };
            output.push_str(&format!(
                "  \"{}\" [label=\"{}\", fillcolor=\"{}\", style=\"{}\"];\n",
                node.id, node.id, color, style
            ));
        }

        output.push('\n');

        for edge in self.edges() {
            output.push_str(&format!(
                "  \"{}\" -> \"{}\" [label=\"{}\"];\n",
                edge.source,
                edge.target,
                edge.fields.join(", ")
            ));
        }

        if !self.unresolved.is_empty() {
            output.push('\n');
            output.push_str(&format!(
                "  \"{}\" [label=\"{}\", fillcolor=\"#F44336\"];\n",
                UNRESOLVED_NODE, UNRESOLVED_NODE
            ));
            let mut seen = BTreeSet::new();
            for field in &self.unresolved {
                let source = match self.subject {
                    Subject::Collection => &field.source_collection,
                    Subject::Class => &field.source_class,
                };
                if seen.insert((source, &field.field)) {
                    output.push_str(&format!(
                        "  \"{}\" -> \"{}\" [label=\"{}\", style=dashed];\n",
                        source, UNRESOLVED_NODE, field.field
                    ));
                }
            }
        }

        output.push_str("}\n");
        output
    }

    /// Export as `{subject, nodes, edges}` JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        let document = GraphDocument {
            subject: self.subject.to_string(),
            nodes: self.nodes().collect(),
            edges: self.edges(),
            unresolved: &self.unresolved,
        };
        serde_json::to_string_pretty(&document)
    }
}
