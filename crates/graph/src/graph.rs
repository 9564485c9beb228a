//! Resource declarations, typed handles and the validated graph.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::debug;

use crate::document::Document;
use crate::error::GraphError;
use crate::order::CreateOrder;
use crate::value::{self, OutputRef, Value};

/// Maximum length of a resource name.
const MAX_NAME_LEN: usize = 128;

/// Stable logical name of a resource within a graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId(String);

impl ResourceId {
    /// Validate and wrap a resource name.
    ///
    /// # Errors
    /// Returns [`GraphError::InvalidName`] for empty, overlong or non
    /// `[A-Za-z0-9_-]` names.
    pub fn new(name: impl Into<String>) -> Result<Self, GraphError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= MAX_NAME_LEN
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(name))
        } else {
            Err(GraphError::InvalidName(name))
        }
    }

    /// Name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ResourceId {
    type Error = GraphError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether the engine manages a node or only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Created, updated and deleted by the engine.
    #[default]
    Managed,
    /// Looked up on every apply; never modified.
    Data,
}

/// A resource type: its token, outputs and lifecycle traits.
///
/// Implementors are argument structs whose serialized form becomes the node
/// inputs.
pub trait Kind: Serialize {
    /// Type token, e.g. `aws:ec2:Vpc`.
    const TYPE: &'static str;
    /// Output attributes populated after creation.
    const OUTPUTS: &'static [&'static str];
    /// Managed resource or data lookup.
    const ROLE: NodeRole = NodeRole::Managed;
    /// Whether the kind accepts a `tags` input.
    const TAGGABLE: bool = false;
    /// Inputs that cannot be changed in place.
    const REPLACE_ON: &'static [&'static str] = &[];
}

/// Typed token for a declared resource.
///
/// Consuming a handle's outputs is the only way to create a data edge.
pub struct Handle<K> {
    id: ResourceId,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Handle<K> {
    fn new(id: ResourceId) -> Self {
        Self {
            id,
            _kind: PhantomData,
        }
    }

    /// Name of the resource behind the handle.
    #[must_use]
    pub fn resource_id(&self) -> &ResourceId {
        &self.id
    }

    /// Reference one output attribute.
    #[must_use]
    pub fn output(&self, attr: &str) -> Value {
        Value::Ref(OutputRef::new(self.id.clone(), attr))
    }

    /// Reference the provider-assigned identifier.
    #[must_use]
    pub fn id(&self) -> Value {
        self.output("id")
    }
}

impl<K> Clone for Handle<K> {
    fn clone(&self) -> Self {
        Self::new(self.id.clone())
    }
}

impl<K> fmt::Debug for Handle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&self.id).finish()
    }
}

/// Condition that must hold before a resource counts as ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessGate {
    /// Signal to wait for.
    pub signal: ReadinessSignal,
    /// Give up after this many seconds.
    pub timeout_secs: u64,
    /// Seconds between probes.
    pub interval_secs: u64,
}

/// How readiness is observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReadinessSignal {
    /// Poll the provider with a named check.
    Probe {
        check: String,
        #[serde(default)]
        params: BTreeMap<String, String>,
    },
    /// Ready once a dependent of the given kind is active.
    Attachment { kind: String },
}

/// Per-declaration options.
#[derive(Debug, Clone, Default)]
pub struct Options {
    depends_on: BTreeSet<ResourceId>,
    protect: bool,
    replace_on_changes: Vec<String>,
    readiness: Option<ReadinessGate>,
    provider: Option<ResourceId>,
}

impl Options {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an explicit edge for an ordering constraint with no data flow.
    #[must_use]
    pub fn depends_on<K>(mut self, handle: &Handle<K>) -> Self {
        self.depends_on.insert(handle.id.clone());
        self
    }

    /// Refuse to delete the resource.
    #[must_use]
    pub fn protect(mut self) -> Self {
        self.protect = true;
        self
    }

    /// Force replacement when these inputs change.
    #[must_use]
    pub fn replace_on_changes(mut self, keys: &[&str]) -> Self {
        self.replace_on_changes
            .extend(keys.iter().map(ToString::to_string));
        self
    }

    /// Gate readiness on a signal.
    #[must_use]
    pub fn readiness(mut self, gate: ReadinessGate) -> Self {
        self.readiness = Some(gate);
        self
    }

    /// Scope the resource to a cluster access provider.
    #[must_use]
    pub fn provider<K>(mut self, handle: &Handle<K>) -> Self {
        self.provider = Some(handle.id.clone());
        self
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// One resource in the graph, in document form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: ResourceId,
    pub kind: String,
    #[serde(default)]
    pub role: NodeRole,
    pub inputs: Json,
    pub outputs: Vec<String>,
    #[serde(default)]
    pub depends_on: BTreeSet<ResourceId>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub protect: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replace_on_changes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness: Option<ReadinessGate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ResourceId>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub taggable: bool,
}

impl Node {
    /// Every output reference in the inputs.
    ///
    /// # Errors
    /// Returns [`GraphError::MalformedReference`] for undecodable expressions.
    pub fn references(&self) -> Result<BTreeSet<OutputRef>, GraphError> {
        value::references(&self.inputs).map_err(|detail| GraphError::MalformedReference {
            from: self.id.clone(),
            detail,
        })
    }

    /// Top-level input by key.
    #[must_use]
    pub fn input(&self, key: &str) -> Option<&Json> {
        self.inputs.get(key)
    }

    /// Whether the engine only reads this node.
    #[must_use]
    pub fn is_data(&self) -> bool {
        self.role == NodeRole::Data
    }

    /// Top-level input keys whose value differs from `previous`.
    #[must_use]
    pub fn changed_keys(&self, previous: &Json) -> Vec<String> {
        let empty = serde_json::Map::new();
        let current = self.inputs.as_object().unwrap_or(&empty);
        let previous = previous.as_object().unwrap_or(&empty);
        let keys: BTreeSet<&String> = current.keys().chain(previous.keys()).collect();
        keys.into_iter()
            .filter(|k| current.get(*k) != previous.get(*k))
            .cloned()
            .collect()
    }

    /// Whether changing `key` forces replacement.
    #[must_use]
    pub fn replaces_on(&self, key: &str) -> bool {
        self.replace_on_changes.iter().any(|k| k == key)
    }
}

type Transform = Box<dyn Fn(&mut Node)>;

/// Collects declarations and hands out typed handles.
pub struct GraphBuilder {
    stack: String,
    nodes: Vec<Node>,
    index: HashMap<ResourceId, usize>,
    exports: BTreeMap<String, Json>,
    transforms: Vec<Transform>,
}

impl GraphBuilder {
    /// Start a graph for the named stack.
    #[must_use]
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            nodes: Vec::new(),
            index: HashMap::new(),
            exports: BTreeMap::new(),
            transforms: Vec::new(),
        }
    }

    /// Stack name.
    #[must_use]
    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// Register a transform applied to every later declaration.
    pub fn transform(&mut self, f: impl Fn(&mut Node) + 'static) {
        self.transforms.push(Box::new(f));
    }

    /// Declare a resource.
    ///
    /// # Errors
    /// Fails on invalid or duplicate names, and on references to undeclared
    /// resources or outputs the target kind does not produce.
    pub fn declare<K: Kind>(
        &mut self,
        name: &str,
        args: &K,
        opts: Options,
    ) -> Result<Handle<K>, GraphError> {
        let id = ResourceId::new(name)?;
        if self.index.contains_key(&id) {
            return Err(GraphError::Duplicate(id));
        }

        let inputs = serde_json::to_value(args)?;
        if !inputs.is_object() {
            return Err(GraphError::InputsNotObject(id));
        }

        let mut replace_on_changes: Vec<String> =
            K::REPLACE_ON.iter().map(ToString::to_string).collect();
        replace_on_changes.extend(opts.replace_on_changes);
        replace_on_changes.sort();
        replace_on_changes.dedup();

        let mut node = Node {
            id: id.clone(),
            kind: K::TYPE.to_string(),
            role: K::ROLE,
            inputs,
            outputs: K::OUTPUTS.iter().map(ToString::to_string).collect(),
            depends_on: BTreeSet::new(),
            protect: opts.protect,
            replace_on_changes,
            readiness: opts.readiness,
            provider: opts.provider,
            taggable: K::TAGGABLE,
        };
        for transform in &self.transforms {
            transform(&mut node);
        }

        for r in node.references()? {
            self.check_ref(&id, &r)?;
            node.depends_on.insert(r.resource().clone());
        }
        for dep in opts.depends_on.into_iter().chain(node.provider.clone()) {
            if !self.index.contains_key(&dep) {
                return Err(GraphError::DanglingReference { from: id, to: dep });
            }
            node.depends_on.insert(dep);
        }

        debug!(
            resource = %id,
            kind = K::TYPE,
            deps = node.depends_on.len(),
            "Declared resource"
        );
        self.index.insert(id.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(Handle::new(id))
    }

    /// Publish a named value from the apply pass.
    ///
    /// # Errors
    /// Fails on duplicate names and invalid references.
    pub fn export(&mut self, name: &str, value: impl Into<Value>) -> Result<(), GraphError> {
        if self.exports.contains_key(name) {
            return Err(GraphError::DuplicateExport(name.to_string()));
        }
        let doc = value.into().to_json();
        let from = ResourceId::new(format!("export-{name}"))?;
        let refs = value::references(&doc).map_err(|detail| GraphError::MalformedReference {
            from: from.clone(),
            detail,
        })?;
        for r in &refs {
            self.check_ref(&from, r)?;
        }
        self.exports.insert(name.to_string(), doc);
        Ok(())
    }

    fn check_ref(&self, from: &ResourceId, r: &OutputRef) -> Result<(), GraphError> {
        let target = self
            .index
            .get(r.resource())
            .map(|&i| &self.nodes[i])
            .ok_or_else(|| GraphError::DanglingReference {
                from: from.clone(),
                to: r.resource().clone(),
            })?;
        if target.outputs.iter().any(|o| o == r.attr()) {
            Ok(())
        } else {
            Err(GraphError::UnknownOutput {
                from: from.clone(),
                target: r.resource().clone(),
                attr: r.attr().to_string(),
            })
        }
    }

    /// Validate and freeze the graph.
    ///
    /// # Errors
    /// Propagates validation failures (see [`Graph::from_parts`]).
    pub fn build(self) -> Result<Graph, GraphError> {
        Graph::from_parts(self.stack, self.nodes, self.exports)
    }
}

/// A validated, acyclic resource graph.
#[derive(Debug, Clone)]
pub struct Graph {
    stack: String,
    nodes: Vec<Node>,
    index: HashMap<ResourceId, usize>,
    exports: BTreeMap<String, Json>,
    order: CreateOrder,
}

impl Graph {
    /// Validate nodes and exports into a graph.
    ///
    /// Checks unique names, that every reference targets a declared output,
    /// that every referenced resource is listed in `depends_on`, and that the
    /// edges are acyclic.
    ///
    /// # Errors
    /// Returns the first violation found.
    pub fn from_parts(
        stack: String,
        nodes: Vec<Node>,
        exports: BTreeMap<String, Json>,
    ) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(GraphError::Duplicate(node.id.clone()));
            }
        }

        let lookup = |from: &ResourceId, r: &OutputRef| -> Result<(), GraphError> {
            let target = index
                .get(r.resource())
                .map(|&i| &nodes[i])
                .ok_or_else(|| GraphError::DanglingReference {
                    from: from.clone(),
                    to: r.resource().clone(),
                })?;
            if target.outputs.iter().any(|o| o == r.attr()) {
                Ok(())
            } else {
                Err(GraphError::UnknownOutput {
                    from: from.clone(),
                    target: r.resource().clone(),
                    attr: r.attr().to_string(),
                })
            }
        };

        for node in &nodes {
            for r in node.references()? {
                lookup(&node.id, &r)?;
                if !node.depends_on.contains(r.resource()) {
                    return Err(GraphError::UndeclaredDependency {
                        from: node.id.clone(),
                        to: r.resource().clone(),
                    });
                }
            }
            for dep in &node.depends_on {
                if !index.contains_key(dep) {
                    return Err(GraphError::DanglingReference {
                        from: node.id.clone(),
                        to: dep.clone(),
                    });
                }
            }
        }

        for (name, doc) in &exports {
            let from = ResourceId::new(format!("export-{name}"))?;
            let refs = value::references(doc).map_err(|detail| {
                GraphError::MalformedReference {
                    from: from.clone(),
                    detail,
                }
            })?;
            for r in &refs {
                lookup(&from, r)?;
            }
        }

        let order = CreateOrder::compute(nodes.iter().map(|n| (&n.id, &n.depends_on)))?;

        Ok(Self {
            stack,
            nodes,
            index,
            exports,
            order,
        })
    }

    /// Stack name.
    #[must_use]
    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// Nodes in declaration order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Node by name.
    #[must_use]
    pub fn node(&self, id: &ResourceId) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Node by name string.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Node> {
        ResourceId::new(name).ok().and_then(|id| self.node(&id))
    }

    /// Nodes of one kind, in declaration order.
    pub fn nodes_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes.iter().filter(move |n| n.kind == kind)
    }

    /// Nodes that list `id` as a dependency.
    #[must_use]
    pub fn dependents(&self, id: &ResourceId) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|n| n.depends_on.contains(id))
            .collect()
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Named exports in document form.
    #[must_use]
    pub fn exports(&self) -> &BTreeMap<String, Json> {
        &self.exports
    }

    /// Creation order.
    #[must_use]
    pub fn order(&self) -> &CreateOrder {
        &self.order
    }

    /// Desired-state document for this graph.
    #[must_use]
    pub fn to_document(&self) -> Document {
        Document::from_graph(self)
    }
}
