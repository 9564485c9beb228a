//! Diff between a desired graph and recorded state.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::error::ApplyError;
use crate::graph::{Graph, Node, NodeRole, ResourceId};
use crate::state::{ResourceStatus, StackState};
use crate::value;

/// What the engine will do with one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Not recorded yet.
    Create,
    /// Recorded; the listed inputs change in place.
    Update { changed: Vec<String> },
    /// Recorded; the listed inputs force delete-then-create.
    Replace { changed: Vec<String> },
    /// Recorded but no longer declared.
    Delete,
    /// Data lookup, re-read on every apply.
    Read,
    /// Recorded and unchanged.
    Same,
}

impl Action {
    /// Whether the action modifies a managed resource.
    #[must_use]
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Read | Self::Same)
    }

    /// Short marker used in plan listings.
    #[must_use]
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update { .. } => "~",
            Self::Replace { .. } => "-/+",
            Self::Delete => "-",
            Self::Read => "<=",
            Self::Same => " ",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update { changed } => write!(f, "update ({})", changed.join(", ")),
            Self::Replace { changed } => write!(f, "replace ({})", changed.join(", ")),
            Self::Delete => write!(f, "delete"),
            Self::Read => write!(f, "read"),
            Self::Same => write!(f, "no change"),
        }
    }
}

/// One planned action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub id: ResourceId,
    pub kind: String,
    #[serde(flatten)]
    pub action: Action,
}

/// Counts per action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub read: usize,
    pub same: usize,
}

impl PlanSummary {
    fn add(&mut self, action: &Action) {
        match action {
            Action::Create => self.create += 1,
            Action::Update { .. } => self.update += 1,
            Action::Replace { .. } => self.replace += 1,
            Action::Delete => self.delete += 1,
            Action::Read => self.read += 1,
            Action::Same => self.same += 1,
        }
    }

    /// Whether any managed resource is modified.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.create + self.update + self.replace + self.delete > 0
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.same
        )
    }
}

/// Ordered actions that converge recorded state onto a graph.
///
/// Deletions of undeclared resources come first, in destroy order, followed
/// by every declared resource in creation order.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub stack: String,
    pub steps: Vec<Step>,
    pub summary: PlanSummary,
}

impl Plan {
    /// Diff `graph` against `state`.
    ///
    /// Inputs are compared in document form, so an unchanged declaration
    /// plans no modification. Replacing a resource also touches every
    /// dependent input that references it; those keys are treated as changed.
    ///
    /// # Errors
    /// Returns [`ApplyError::Protected`] if a protected resource would be
    /// deleted or replaced, or a graph error if recorded edges are cyclic.
    pub fn compute(graph: &Graph, state: &StackState) -> Result<Self, ApplyError> {
        let mut steps = Vec::new();
        let mut summary = PlanSummary::default();

        let removed: BTreeSet<&ResourceId> = state
            .resources
            .keys()
            .filter(|id| graph.node(id).is_none())
            .collect();
        for id in state.destroy_order()? {
            if !removed.contains(&id) {
                continue;
            }
            let Some(record) = state.get(&id) else {
                continue;
            };
            if record.protect {
                return Err(ApplyError::Protected(id));
            }
            // Lookups are never deleted; the engine drops their records.
            if record.role == NodeRole::Data {
                continue;
            }
            steps.push(Step {
                id,
                kind: record.kind.clone(),
                action: Action::Delete,
            });
        }

        let mut replaced: BTreeSet<ResourceId> = BTreeSet::new();
        for id in graph.order().creation() {
            let Some(node) = graph.node(&id) else {
                continue;
            };
            let action = diff(node, state, &replaced);
            if matches!(action, Action::Replace { .. }) {
                let was_protected = state.get(&id).is_some_and(|r| r.protect);
                if node.protect || was_protected {
                    return Err(ApplyError::Protected(id));
                }
                replaced.insert(id.clone());
            }
            debug!(resource = %id, action = %action, "Planned step");
            steps.push(Step {
                id,
                kind: node.kind.clone(),
                action,
            });
        }

        for step in &steps {
            summary.add(&step.action);
        }

        Ok(Self {
            stack: graph.stack().to_string(),
            steps,
            summary,
        })
    }

    /// Step for a resource.
    #[must_use]
    pub fn step(&self, id: &ResourceId) -> Option<&Step> {
        self.steps.iter().find(|s| &s.id == id)
    }

    /// Steps that modify managed resources.
    pub fn changes(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(|s| s.action.is_change())
    }

    /// Whether any managed resource is modified.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.summary.has_changes()
    }

    /// Actions keyed by resource.
    #[must_use]
    pub fn actions(&self) -> BTreeMap<&ResourceId, &Action> {
        self.steps.iter().map(|s| (&s.id, &s.action)).collect()
    }
}

fn diff(node: &Node, state: &StackState, replaced: &BTreeSet<ResourceId>) -> Action {
    if node.is_data() {
        return Action::Read;
    }
    let Some(record) = state.get(&node.id) else {
        return Action::Create;
    };
    if record.status == ResourceStatus::Creating
        || (record.status == ResourceStatus::Failed && record.outputs.is_empty())
    {
        return Action::Create;
    }
    if record.kind != node.kind {
        return Action::Replace {
            changed: vec!["kind".to_string()],
        };
    }

    let mut changed = node.changed_keys(&record.inputs);
    if let Some(map) = node.inputs.as_object() {
        for (key, input) in map {
            if changed.contains(key) {
                continue;
            }
            let touches_replaced = value::references(input)
                .map(|refs| refs.iter().any(|r| replaced.contains(r.resource())))
                .unwrap_or(false);
            if touches_replaced {
                changed.push(key.clone());
            }
        }
    }
    changed.sort();

    if record.status == ResourceStatus::Failed {
        return Action::Replace { changed };
    }
    if changed.is_empty() {
        Action::Same
    } else if changed.iter().any(|k| node.replaces_on(k)) {
        Action::Replace { changed }
    } else {
        Action::Update { changed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, Kind, Options};
    use crate::provider::Outputs;
    use crate::state::ResourceRecord;
    use crate::value::Value;
    use serde::Serialize;
    use serde_json::json;

    #[derive(Serialize)]
    struct Net {
        cidr_block: Value,
        name: Value,
    }

    impl Kind for Net {
        const TYPE: &'static str = "test:Net";
        const OUTPUTS: &'static [&'static str] = &["id"];
        const REPLACE_ON: &'static [&'static str] = &["cidr_block"];
    }

    #[derive(Serialize)]
    struct Sub {
        net_id: Value,
        zone: Value,
    }

    impl Kind for Sub {
        const TYPE: &'static str = "test:Sub";
        const OUTPUTS: &'static [&'static str] = &["id"];
    }

    fn graph(cidr: &str, name: &str) -> Graph {
        let mut b = GraphBuilder::new("plan");
        let net = b
            .declare(
                "net",
                &Net {
                    cidr_block: cidr.into(),
                    name: name.into(),
                },
                Options::new(),
            )
            .unwrap();
        b.declare(
            "sub",
            &Sub {
                net_id: net.id(),
                zone: "a".into(),
            },
            Options::new(),
        )
        .unwrap();
        b.build().unwrap()
    }

    fn recorded(graph: &Graph) -> StackState {
        let mut state = StackState::new("plan", "/tmp/plan-test");
        for node in graph.nodes() {
            state.resources.insert(
                node.id.clone(),
                ResourceRecord {
                    kind: node.kind.clone(),
                    role: node.role,
                    inputs: node.inputs.clone(),
                    outputs: Outputs::from_iter([("id".to_string(), json!("x"))]),
                    depends_on: node.depends_on.clone(),
                    status: ResourceStatus::Ready,
                    protect: node.protect,
                    readiness: None,
                    updated_at: String::new(),
                },
            );
        }
        state
    }

    fn id(s: &str) -> ResourceId {
        ResourceId::new(s).unwrap()
    }

    #[test]
    fn test_empty_state_creates_everything() {
        let g = graph("10.0.0.0/16", "main");
        let plan = Plan::compute(&g, &StackState::new("plan", "/tmp")).unwrap();
        assert_eq!(plan.summary.create, 2);
        assert_eq!(plan.steps[0].id, id("net"));
        assert!(plan.has_changes());
    }

    #[test]
    fn test_unchanged_graph_plans_nothing() {
        let g = graph("10.0.0.0/16", "main");
        let plan = Plan::compute(&g, &recorded(&g)).unwrap();
        assert!(!plan.has_changes());
        assert_eq!(plan.summary.same, 2);
    }

    #[test]
    fn test_in_place_update() {
        let state = recorded(&graph("10.0.0.0/16", "main"));
        let plan = Plan::compute(&graph("10.0.0.0/16", "renamed"), &state).unwrap();
        assert_eq!(
            plan.step(&id("net")).unwrap().action,
            Action::Update {
                changed: vec!["name".to_string()]
            }
        );
        assert_eq!(plan.step(&id("sub")).unwrap().action, Action::Same);
    }

    #[test]
    fn test_replacement_propagates_to_referencing_inputs() {
        let state = recorded(&graph("10.0.0.0/16", "main"));
        let plan = Plan::compute(&graph("10.1.0.0/16", "main"), &state).unwrap();
        assert!(matches!(
            plan.step(&id("net")).unwrap().action,
            Action::Replace { .. }
        ));
        assert_eq!(
            plan.step(&id("sub")).unwrap().action,
            Action::Update {
                changed: vec!["net_id".to_string()]
            }
        );
    }

    #[test]
    fn test_removed_resource_is_deleted_first() {
        let g = graph("10.0.0.0/16", "main");
        let mut state = recorded(&g);
        let mut extra = state.resources[&id("sub")].clone();
        extra.depends_on = BTreeSet::from([id("net")]);
        state.resources.insert(id("old"), extra);

        let plan = Plan::compute(&g, &state).unwrap();
        assert_eq!(plan.steps[0].id, id("old"));
        assert_eq!(plan.steps[0].action, Action::Delete);
        assert_eq!(plan.summary.delete, 1);
    }

    #[test]
    fn test_protected_resource_cannot_be_deleted() {
        let g = graph("10.0.0.0/16", "main");
        let mut state = recorded(&g);
        let mut extra = state.resources[&id("sub")].clone();
        extra.protect = true;
        state.resources.insert(id("kept"), extra);
        assert!(matches!(
            Plan::compute(&g, &state),
            Err(ApplyError::Protected(_))
        ));
    }

    #[test]
    fn test_removed_lookup_is_forgotten() {
        let g = graph("10.0.0.0/16", "main");
        let mut state = recorded(&g);
        let mut lookup = state.resources[&id("sub")].clone();
        lookup.role = NodeRole::Data;
        state.resources.insert(id("ami"), lookup);
        let plan = Plan::compute(&g, &state).unwrap();
        assert!(plan.step(&id("ami")).is_none());
        assert!(!plan.has_changes());
    }

    #[test]
    fn test_failed_create_is_retried() {
        let g = graph("10.0.0.0/16", "main");
        let mut state = recorded(&g);
        let rec = state.resources.get_mut(&id("sub")).unwrap();
        rec.status = ResourceStatus::Failed;
        rec.outputs.clear();
        let plan = Plan::compute(&g, &state).unwrap();
        assert_eq!(plan.step(&id("sub")).unwrap().action, Action::Create);
    }
}
