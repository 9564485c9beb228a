//! Desired-state documents.
//!
//! A document is the synthesized form of a graph: every node with its inputs
//! in expression encoding, its declared edges and the named exports. It is the
//! hand-off format for an apply engine and can be loaded back and revalidated.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::GraphError;
use crate::graph::{Graph, Node};

/// Current document format version.
pub const DOCUMENT_VERSION: u32 = 1;

/// Serialized desired state of a stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub version: u32,
    pub stack: String,
    /// Resources in creation order.
    pub resources: Vec<Node>,
    #[serde(default)]
    pub exports: BTreeMap<String, Json>,
}

impl Document {
    /// Document for a validated graph, resources listed in creation order.
    #[must_use]
    pub fn from_graph(graph: &Graph) -> Self {
        let resources = graph
            .order()
            .creation()
            .iter()
            .filter_map(|id| graph.node(id).cloned())
            .collect();
        Self {
            version: DOCUMENT_VERSION,
            stack: graph.stack().to_string(),
            resources,
            exports: graph.exports().clone(),
        }
    }

    /// Revalidate the document into a graph.
    ///
    /// # Errors
    /// Returns the first [`GraphError`]: duplicates, dangling or undeclared
    /// references, unknown outputs or cycles.
    pub fn into_graph(self) -> Result<Graph, GraphError> {
        Graph::from_parts(self.stack, self.resources, self.exports)
    }

    /// Pretty JSON encoding.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize document")
    }

    /// Load a JSON document from disk.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read document {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse document {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, Kind, Options};
    use crate::value::Value;
    use serde_json::json;

    #[derive(Serialize)]
    struct Thing {
        parent: Value,
    }

    impl Kind for Thing {
        const TYPE: &'static str = "test:Thing";
        const OUTPUTS: &'static [&'static str] = &["id"];
    }

    fn chain() -> Graph {
        let mut b = GraphBuilder::new("doc");
        let a = b
            .declare("a", &Thing { parent: Value::Null }, Options::new())
            .unwrap();
        let bb = b
            .declare("b", &Thing { parent: a.id() }, Options::new())
            .unwrap();
        b.declare("c", &Thing { parent: bb.id() }, Options::new())
            .unwrap();
        b.export("last", bb.id()).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn test_document_round_trip_revalidates() {
        let doc = chain().to_document();
        let json = doc.to_json_pretty().unwrap();
        let loaded: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, doc);
        let graph = loaded.into_graph().unwrap();
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_document_lists_creation_order() {
        let doc = chain().to_document();
        let names: Vec<&str> = doc.resources.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_cycle_in_loaded_document() {
        let mut doc = chain().to_document();
        // Make "a" consume an output of "c".
        doc.resources[0].inputs = json!({"parent": {"$ref": "c.id"}});
        let c = doc.resources[2].id.clone();
        doc.resources[0].depends_on.insert(c);
        assert!(matches!(doc.into_graph(), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_undeclared_dependency_in_loaded_document() {
        let mut doc = chain().to_document();
        doc.resources[2].depends_on.clear();
        assert!(matches!(
            doc.into_graph(),
            Err(GraphError::UndeclaredDependency { .. })
        ));
    }

    #[test]
    fn test_dangling_reference_in_loaded_document() {
        let mut doc = chain().to_document();
        doc.resources.remove(0);
        assert!(matches!(
            doc.into_graph(),
            Err(GraphError::DanglingReference { .. })
        ));
    }
}
