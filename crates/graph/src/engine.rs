//! Convergence driver.
//!
//! Applies a [`Plan`] level by level: resources in one level run concurrently,
//! levels run in order, and state is saved after every level. Removed
//! resources and the old halves of replacements are deleted first, in
//! destroy order. A failure stops
//! the apply once its level settles, leaving finished upstream resources
//! recorded.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as Json;
use tokio::task::JoinSet;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::ApplyError;
use crate::graph::{Graph, Node, NodeRole, ReadinessGate, ReadinessSignal, ResourceId};
use crate::plan::{Action, Plan};
use crate::provider::{Outputs, Probe, Provider, ResourceRequest};
use crate::state::{ResourceRecord, ResourceStatus, StackState};
use crate::value;

/// Result of a successful apply.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    /// The plan that was executed.
    pub plan: Plan,
    /// Exports resolved against the new state.
    pub exports: BTreeMap<String, Json>,
    /// Resources still waiting for an attachment to count as ready.
    pub pending: Vec<ResourceId>,
}

/// Drives a [`Provider`] until recorded state matches a graph.
pub struct Engine {
    provider: Arc<dyn Provider>,
}

struct Task {
    node: Node,
    action: Action,
    request: ResourceRequest,
    current: Outputs,
}

struct Completed {
    outputs: Outputs,
    readiness: Result<bool, ApplyError>,
}

impl Engine {
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    /// Converge `state` onto `graph`.
    ///
    /// # Errors
    /// Returns the first provider, resolution or readiness failure, a
    /// [`ApplyError::Locked`] if another apply runs against the same stack, or
    /// a state error if persistence fails.
    pub async fn apply(
        &self,
        graph: &Graph,
        state: &mut StackState,
    ) -> Result<ApplyReport, ApplyError> {
        let _lock = state.lock()?;
        let plan = Plan::compute(graph, state)?;
        info!(stack = %graph.stack(), summary = %plan.summary, "Applying plan");

        for step in plan.steps.iter().filter(|s| s.action == Action::Delete) {
            self.delete_recorded(state, &step.id).await?;
        }
        forget_lookups(graph, state)?;

        let actions: BTreeMap<&ResourceId, &Action> = plan.actions();
        for id in graph.order().destruction() {
            if matches!(actions.get(&id), Some(Action::Replace { .. })) {
                self.delete_replaced(state, &id).await?;
            }
        }

        for (level, group) in graph.order().groups().iter().enumerate() {
            let mut tasks = Vec::new();
            for id in group {
                let Some(node) = graph.node(id) else {
                    continue;
                };
                let action = actions.get(id).map_or(Action::Same, |a| (*a).clone());
                if let Some(task) = prepare(node, action, state)? {
                    tasks.push(task);
                }
            }
            debug!(level, tasks = tasks.len(), "Starting level");

            let mut set = JoinSet::new();
            for task in tasks {
                if task.action == Action::Create {
                    let mut pending = record(&task.node, Outputs::new());
                    pending.status = ResourceStatus::Creating;
                    state.resources.insert(task.node.id.clone(), pending);
                }
                let provider = Arc::clone(&self.provider);
                set.spawn(async move {
                    let result = execute(provider.as_ref(), &task).await;
                    (task, result)
                });
            }

            let mut failure: Option<ApplyError> = None;
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((task, Ok(done))) => {
                        let id = task.node.id.clone();
                        let mut rec = record(&task.node, done.outputs);
                        rec.status = match done.readiness {
                            Ok(true) => ResourceStatus::Ready,
                            Ok(false) => ResourceStatus::Active,
                            Err(e) => {
                                warn!(resource = %id, error = %e, "Readiness gate failed");
                                failure.get_or_insert(e);
                                ResourceStatus::Failed
                            }
                        };
                        info!(
                            resource = %id,
                            action = %task.action,
                            status = %rec.status,
                            "Applied resource"
                        );
                        state.resources.insert(id, rec);
                    }
                    Ok((task, Err(e))) => {
                        let id = &task.node.id;
                        warn!(resource = %id, error = %e, "Resource action failed");
                        if matches!(task.action, Action::Create | Action::Replace { .. }) {
                            state.resources.remove(id);
                        } else {
                            state.set_status(id, ResourceStatus::Failed);
                        }
                        failure.get_or_insert(e);
                    }
                    Err(e) => {
                        failure.get_or_insert(ApplyError::State(anyhow::anyhow!(
                            "Task panicked: {e}"
                        )));
                    }
                }
            }

            promote_attachments(graph, state);
            state.save()?;

            if let Some(e) = failure {
                warn!(level, "Aborting apply after failed level");
                return Err(e);
            }
        }

        let pending: Vec<ResourceId> = graph
            .nodes()
            .iter()
            .filter(|n| state.status(&n.id) == ResourceStatus::Active)
            .map(|n| n.id.clone())
            .collect();
        for id in &pending {
            warn!(resource = %id, "Resource is active but its readiness signal was never observed");
        }

        let exports = graph
            .exports()
            .iter()
            .map(|(name, doc)| {
                let resolved = value::preview(doc, &mut |r| state.output(r));
                (name.clone(), resolved)
            })
            .collect();

        info!(stack = %graph.stack(), "Apply complete");
        Ok(ApplyReport {
            plan,
            exports,
            pending,
        })
    }

    /// Delete every recorded resource in reverse creation order.
    ///
    /// # Errors
    /// Returns [`ApplyError::Protected`] before deleting anything if a
    /// recorded resource is protected, otherwise the first provider failure.
    pub async fn destroy(&self, state: &mut StackState) -> Result<Vec<ResourceId>, ApplyError> {
        let _lock = state.lock()?;
        let order = state.destroy_order()?;
        if let Some(id) = order
            .iter()
            .find(|id| state.get(id).is_some_and(|r| r.protect))
        {
            return Err(ApplyError::Protected(id.clone()));
        }

        info!(stack = %state.stack, resources = order.len(), "Destroying stack");
        let mut deleted = Vec::new();
        for id in order {
            if self.delete_recorded(state, &id).await? {
                deleted.push(id);
            }
        }
        Ok(deleted)
    }

    /// Delete one recorded resource and save. Lookups are only forgotten.
    async fn delete_recorded(
        &self,
        state: &mut StackState,
        id: &ResourceId,
    ) -> Result<bool, ApplyError> {
        let Some(record) = state.get(id).cloned() else {
            return Ok(false);
        };
        if record.role == NodeRole::Managed {
            if let Err(source) = self.provider.delete(id, &record.kind, &record.outputs).await {
                state.set_status(id, ResourceStatus::Failed);
                state.save()?;
                return Err(ApplyError::Provider {
                    id: id.clone(),
                    source,
                });
            }
            info!(resource = %id, kind = %record.kind, "Deleted resource");
        }
        state.resources.remove(id);
        state.save()?;
        Ok(record.role == NodeRole::Managed)
    }

    /// Delete the old half of a replacement. The record keeps its place with
    /// no outputs, so an interrupted apply plans a plain create next time.
    async fn delete_replaced(
        &self,
        state: &mut StackState,
        id: &ResourceId,
    ) -> Result<(), ApplyError> {
        let Some(record) = state.get(id).cloned() else {
            return Ok(());
        };
        if let Err(source) = self.provider.delete(id, &record.kind, &record.outputs).await {
            state.set_status(id, ResourceStatus::Failed);
            state.save()?;
            return Err(ApplyError::Provider {
                id: id.clone(),
                source,
            });
        }
        info!(resource = %id, kind = %record.kind, "Deleted resource for replacement");
        if let Some(rec) = state.resources.get_mut(id) {
            rec.outputs.clear();
            rec.status = ResourceStatus::Creating;
        }
        state.save()?;
        Ok(())
    }
}

/// Drop records of lookups the graph no longer declares.
fn forget_lookups(graph: &Graph, state: &mut StackState) -> Result<(), ApplyError> {
    let stale: Vec<ResourceId> = state
        .resources
        .iter()
        .filter(|(id, r)| r.role == NodeRole::Data && graph.node(id).is_none())
        .map(|(id, _)| id.clone())
        .collect();
    if stale.is_empty() {
        return Ok(());
    }
    for id in &stale {
        debug!(resource = %id, "Forgetting lookup");
        state.resources.remove(id);
    }
    state.save()?;
    Ok(())
}

/// Build the task for one node, or `None` if nothing needs to run.
fn prepare(
    node: &Node,
    action: Action,
    state: &mut StackState,
) -> Result<Option<Task>, ApplyError> {
    let current = state.get(&node.id).map(|r| r.outputs.clone()).unwrap_or_default();

    if action == Action::Same {
        let status = state.status(&node.id);
        if let Some(rec) = state.resources.get_mut(&node.id) {
            rec.protect = node.protect;
            rec.readiness.clone_from(&node.readiness);
            rec.depends_on.clone_from(&node.depends_on);
        }
        let waits_on_probe = matches!(
            node.readiness,
            Some(ReadinessGate {
                signal: ReadinessSignal::Probe { .. },
                ..
            })
        );
        if status == ResourceStatus::Ready || !waits_on_probe {
            return Ok(None);
        }
    }

    let inputs = value::resolve(&node.inputs, &mut |r| state.output(r)).map_err(|detail| {
        ApplyError::Resolve {
            id: node.id.clone(),
            detail,
        }
    })?;

    Ok(Some(Task {
        request: ResourceRequest {
            id: node.id.clone(),
            kind: node.kind.clone(),
            inputs,
            outputs: node.outputs.clone(),
        },
        node: node.clone(),
        action,
        current,
    }))
}

async fn execute(provider: &dyn Provider, task: &Task) -> Result<Completed, ApplyError> {
    let id = &task.node.id;
    let failed = |source| ApplyError::Provider {
        id: id.clone(),
        source,
    };

    let outputs = match &task.action {
        Action::Create => provider.create(&task.request).await.map_err(failed)?,
        Action::Update { .. } => provider
            .update(&task.request, &task.current)
            .await
            .map_err(failed)?,
        Action::Replace { .. } => provider.create(&task.request).await.map_err(failed)?,
        Action::Read => provider.read(&task.request).await.map_err(failed)?,
        Action::Same | Action::Delete => task.current.clone(),
    };

    let readiness = match &task.node.readiness {
        Some(gate) => await_ready(provider, &task.node, &outputs, gate).await,
        None => Ok(true),
    };

    Ok(Completed { outputs, readiness })
}

/// Poll a probe gate until it reports ready, fails or times out.
///
/// Attachment gates return `Ok(false)`; they are promoted once a dependent
/// of the named kind is applied.
async fn await_ready(
    provider: &dyn Provider,
    node: &Node,
    outputs: &Outputs,
    gate: &ReadinessGate,
) -> Result<bool, ApplyError> {
    if let ReadinessSignal::Attachment { .. } = gate.signal {
        return Ok(false);
    }

    let start = Instant::now();
    let timeout = Duration::from_secs(gate.timeout_secs);
    let interval = Duration::from_secs(gate.interval_secs.max(1));

    loop {
        let probe = provider
            .probe(&node.id, &node.kind, outputs, gate)
            .await
            .map_err(|source| ApplyError::Provider {
                id: node.id.clone(),
                source,
            })?;
        match probe {
            Probe::Ready => {
                info!(resource = %node.id, "Readiness signal observed");
                return Ok(true);
            }
            Probe::Failed(reason) => {
                return Err(ApplyError::NotReady {
                    id: node.id.clone(),
                    reason,
                })
            }
            Probe::Pending(detail) => {
                debug!(resource = %node.id, detail = %detail, "Waiting for readiness");
            }
        }

        if start.elapsed() >= timeout {
            return Err(ApplyError::ReadinessTimeout {
                id: node.id.clone(),
                secs: gate.timeout_secs,
            });
        }
        sleep(interval).await;
    }
}

/// Mark attachment-gated resources ready once a dependent of the named kind
/// is applied.
fn promote_attachments(graph: &Graph, state: &mut StackState) {
    for node in graph.nodes() {
        let Some(ReadinessGate {
            signal: ReadinessSignal::Attachment { kind },
            ..
        }) = &node.readiness
        else {
            continue;
        };
        if state.status(&node.id) != ResourceStatus::Active {
            continue;
        }
        let attached = graph.dependents(&node.id).iter().any(|d| {
            &d.kind == kind
                && matches!(
                    state.status(&d.id),
                    ResourceStatus::Active | ResourceStatus::Ready
                )
        });
        if attached {
            info!(resource = %node.id, attachment = %kind, "Attachment active, resource ready");
            state.set_status(&node.id, ResourceStatus::Ready);
        }
    }
}

fn record(node: &Node, outputs: Outputs) -> ResourceRecord {
    ResourceRecord {
        kind: node.kind.clone(),
        role: node.role,
        inputs: node.inputs.clone(),
        outputs,
        depends_on: node.depends_on.clone(),
        status: ResourceStatus::Active,
        protect: node.protect,
        readiness: node.readiness.clone(),
        updated_at: chrono::Utc::now().to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, Kind, Options};
    use crate::memory::{MemoryProvider, Op};
    use crate::provider::ProviderError;
    use crate::value::Value;
    use serde_json::json;

    #[derive(Serialize)]
    struct Thing {
        parent: Value,
        label: Value,
    }

    impl Kind for Thing {
        const TYPE: &'static str = "test:Thing";
        const OUTPUTS: &'static [&'static str] = &["id", "parent"];
    }

    #[derive(Serialize)]
    struct Group {
        cluster: Value,
    }

    impl Kind for Group {
        const TYPE: &'static str = "test:Group";
        const OUTPUTS: &'static [&'static str] = &["id"];
    }

    #[derive(Serialize)]
    struct Pinned {
        parent: Value,
        cidr_block: Value,
    }

    impl Kind for Pinned {
        const TYPE: &'static str = "test:Pinned";
        const OUTPUTS: &'static [&'static str] = &["id"];
        const REPLACE_ON: &'static [&'static str] = &["cidr_block", "parent"];
    }

    #[derive(Serialize)]
    struct Image {
        name: Value,
    }

    impl Kind for Image {
        const TYPE: &'static str = "test:getImage";
        const OUTPUTS: &'static [&'static str] = &["id"];
        const ROLE: NodeRole = NodeRole::Data;
    }

    fn thing(parent: Value) -> Thing {
        Thing {
            parent,
            label: "x".into(),
        }
    }

    /// `eip` and `igw` are roots, `nat` consumes `eip`, `route` consumes `nat`.
    fn network() -> Graph {
        let mut b = GraphBuilder::new("engine");
        let eip = b.declare("eip", &thing(Value::Null), Options::new()).unwrap();
        b.declare("igw", &thing(Value::Null), Options::new()).unwrap();
        let nat = b.declare("nat", &thing(eip.id()), Options::new()).unwrap();
        b.declare("route", &thing(nat.id()), Options::new()).unwrap();
        b.export("nat_id", nat.id()).unwrap();
        b.build().unwrap()
    }

    /// `sub` references `net`; both are replaced when their inputs change.
    fn pinned(cidr: &str) -> Graph {
        let mut b = GraphBuilder::new("engine");
        let net = b
            .declare(
                "net",
                &Pinned {
                    parent: Value::Null,
                    cidr_block: cidr.into(),
                },
                Options::new(),
            )
            .unwrap();
        b.declare(
            "sub",
            &Pinned {
                parent: net.id(),
                cidr_block: "10.0.1.0/24".into(),
            },
            Options::new(),
        )
        .unwrap();
        b.build().unwrap()
    }

    fn gated(gate: ReadinessGate) -> Graph {
        let mut b = GraphBuilder::new("engine");
        let db = b
            .declare("db", &thing(Value::Null), Options::new().readiness(gate))
            .unwrap();
        b.declare("app", &thing(db.id()), Options::new()).unwrap();
        b.build().unwrap()
    }

    fn probe_gate(timeout_secs: u64) -> ReadinessGate {
        ReadinessGate {
            signal: ReadinessSignal::Probe {
                check: "instance-tag".into(),
                params: BTreeMap::new(),
            },
            timeout_secs,
            interval_secs: 10,
        }
    }

    fn setup() -> (Arc<MemoryProvider>, Engine, tempfile::TempDir) {
        let provider = Arc::new(MemoryProvider::new());
        let engine = Engine::new(provider.clone());
        (provider, engine, tempfile::tempdir().unwrap())
    }

    #[tokio::test]
    async fn test_apply_creates_in_dependency_order() {
        let (provider, engine, dir) = setup();
        let mut state = StackState::new("engine", dir.path());
        let report = engine.apply(&network(), &mut state).await.unwrap();

        let created = provider.calls_of(Op::Create);
        let pos = |n: &str| created.iter().position(|c| c == n).unwrap();
        assert!(pos("eip") < pos("nat"));
        assert!(pos("nat") < pos("route"));
        assert_eq!(report.plan.summary.create, 4);

        let nat_id = state.output(&crate::value::OutputRef::new(
            ResourceId::new("nat").unwrap(),
            "id",
        ));
        assert_eq!(report.exports["nat_id"], nat_id.unwrap());
        assert_eq!(
            state.resources[&ResourceId::new("route").unwrap()].outputs["parent"],
            report.exports["nat_id"]
        );
        assert_eq!(
            state.status(&ResourceId::new("route").unwrap()),
            ResourceStatus::Ready
        );
    }

    #[tokio::test]
    async fn test_reapply_is_idempotent() {
        let (provider, engine, dir) = setup();
        let mut state = StackState::new("engine", dir.path());
        engine.apply(&network(), &mut state).await.unwrap();
        let calls_after_first = provider.calls().len();

        let mut reloaded = StackState::load(dir.path(), "engine").unwrap().unwrap();
        let report = engine.apply(&network(), &mut reloaded).await.unwrap();
        assert!(!report.plan.has_changes());
        assert_eq!(provider.calls().len(), calls_after_first);
    }

    #[tokio::test]
    async fn test_failure_aborts_before_dependents() {
        let (provider, engine, dir) = setup();
        provider.fail_on("eip", ProviderError::QuotaExceeded("addresses".into()));
        let mut state = StackState::new("engine", dir.path());

        let err = engine.apply(&network(), &mut state).await.unwrap_err();
        assert!(matches!(err, ApplyError::Provider { ref id, .. } if id.as_str() == "eip"));
        assert!(!provider.exists("nat"));
        assert!(!provider.exists("route"));
        // The sibling in the failed level finished and stays recorded.
        assert!(provider.exists("igw"));

        let saved = StackState::load(dir.path(), "engine").unwrap().unwrap();
        assert!(saved.get(&ResourceId::new("igw").unwrap()).is_some());
        assert!(saved.get(&ResourceId::new("eip").unwrap()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_timeout() {
        let (provider, engine, dir) = setup();
        provider.script_probes("db", [Probe::Pending("bootstrapping".into())]);
        let mut state = StackState::new("engine", dir.path());

        let err = engine
            .apply(&gated(probe_gate(60)), &mut state)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::ReadinessTimeout { secs: 60, .. }));
        assert_eq!(
            state.status(&ResourceId::new("db").unwrap()),
            ResourceStatus::Failed
        );
        assert!(!provider.exists("app"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_readiness_signal_fails_apply() {
        let (provider, engine, dir) = setup();
        provider.script_probes(
            "db",
            [
                Probe::Pending("bootstrapping".into()),
                Probe::Failed("playbook exited 2".into()),
            ],
        );
        let mut state = StackState::new("engine", dir.path());

        let err = engine
            .apply(&gated(probe_gate(600)), &mut state)
            .await
            .unwrap_err();
        match err {
            ApplyError::NotReady { reason, .. } => assert_eq!(reason, "playbook exited 2"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!provider.exists("app"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_observed_after_polling() {
        let (provider, engine, dir) = setup();
        provider.script_probes(
            "db",
            [Probe::Pending("bootstrapping".into()), Probe::Ready],
        );
        let mut state = StackState::new("engine", dir.path());
        engine
            .apply(&gated(probe_gate(600)), &mut state)
            .await
            .unwrap();
        assert_eq!(provider.calls_of(Op::Probe).len(), 2);
        assert!(provider.exists("app"));
    }

    #[tokio::test]
    async fn test_attachment_promotes_to_ready() {
        let (_provider, engine, dir) = setup();
        let mut b = GraphBuilder::new("engine");
        let cluster = b
            .declare(
                "cluster",
                &thing(Value::Null),
                Options::new().readiness(ReadinessGate {
                    signal: ReadinessSignal::Attachment {
                        kind: Group::TYPE.into(),
                    },
                    timeout_secs: 0,
                    interval_secs: 0,
                }),
            )
            .unwrap();
        b.declare(
            "nodes",
            &Group {
                cluster: cluster.id(),
            },
            Options::new(),
        )
        .unwrap();
        let graph = b.build().unwrap();

        let mut state = StackState::new("engine", dir.path());
        let report = engine.apply(&graph, &mut state).await.unwrap();
        assert!(report.pending.is_empty());
        assert_eq!(
            state.status(cluster.resource_id()),
            ResourceStatus::Ready
        );
    }

    #[tokio::test]
    async fn test_removed_resource_is_deleted() {
        let (provider, engine, dir) = setup();
        let mut state = StackState::new("engine", dir.path());
        engine.apply(&network(), &mut state).await.unwrap();

        let mut b = GraphBuilder::new("engine");
        b.declare("eip", &thing(Value::Null), Options::new()).unwrap();
        b.declare("igw", &thing(Value::Null), Options::new()).unwrap();
        let smaller = b.build().unwrap();

        let report = engine.apply(&smaller, &mut state).await.unwrap();
        assert_eq!(report.plan.summary.delete, 2);
        assert_eq!(
            provider.calls_of(Op::Delete),
            vec!["route".to_string(), "nat".to_string()]
        );
        assert_eq!(state.resources.len(), 2);
    }

    #[tokio::test]
    async fn test_removed_lookup_record_is_dropped() {
        let (provider, engine, dir) = setup();
        let mut b = GraphBuilder::new("engine");
        let image = b
            .declare("image", &Image { name: "al2".into() }, Options::new())
            .unwrap();
        b.declare("host", &thing(image.id()), Options::new()).unwrap();
        let mut state = StackState::new("engine", dir.path());
        engine.apply(&b.build().unwrap(), &mut state).await.unwrap();
        assert!(state.get(image.resource_id()).is_some());

        let mut b = GraphBuilder::new("engine");
        b.declare("igw", &thing(Value::Null), Options::new()).unwrap();
        engine.apply(&b.build().unwrap(), &mut state).await.unwrap();

        assert_eq!(provider.calls_of(Op::Delete), vec!["host".to_string()]);
        let saved = StackState::load(dir.path(), "engine").unwrap().unwrap();
        assert!(saved.get(image.resource_id()).is_none());
        assert_eq!(saved.resources.len(), 1);
    }

    #[tokio::test]
    async fn test_replacement_deletes_dependents_first() {
        let (provider, engine, dir) = setup();
        let mut state = StackState::new("engine", dir.path());
        engine.apply(&pinned("10.0.0.0/16"), &mut state).await.unwrap();

        let report = engine
            .apply(&pinned("10.1.0.0/16"), &mut state)
            .await
            .unwrap();
        assert_eq!(report.plan.summary.replace, 2);
        assert_eq!(
            provider.calls_of(Op::Delete),
            vec!["sub".to_string(), "net".to_string()]
        );

        let calls: Vec<String> = provider
            .calls()
            .iter()
            .map(|(op, id)| format!("{op:?}:{id}"))
            .collect();
        assert_eq!(
            calls[2..],
            ["Delete:sub", "Delete:net", "Create:net", "Create:sub"]
        );
        assert_eq!(
            state.status(&ResourceId::new("sub").unwrap()),
            ResourceStatus::Ready
        );
    }

    #[tokio::test]
    async fn test_failed_replacement_plans_a_create() {
        let (provider, engine, dir) = setup();
        let mut state = StackState::new("engine", dir.path());
        engine.apply(&pinned("10.0.0.0/16"), &mut state).await.unwrap();

        provider.fail_on("net", ProviderError::QuotaExceeded("vpcs".into()));
        let changed = pinned("10.1.0.0/16");
        let err = engine.apply(&changed, &mut state).await.unwrap_err();
        assert!(matches!(err, ApplyError::Provider { ref id, .. } if id.as_str() == "net"));
        assert!(!provider.exists("net"));

        let saved = StackState::load(dir.path(), "engine").unwrap().unwrap();
        assert!(saved.get(&ResourceId::new("net").unwrap()).is_none());
        assert!(saved.resources.values().all(|r| r.outputs.is_empty()));
        let plan = Plan::compute(&changed, &saved).unwrap();
        assert!(plan.steps.iter().all(|s| s.action == Action::Create));

        // A retry against a healthy provider only creates.
        let healthy = Arc::new(MemoryProvider::new());
        let mut retried = saved;
        Engine::new(healthy.clone())
            .apply(&changed, &mut retried)
            .await
            .unwrap();
        assert!(healthy.calls_of(Op::Delete).is_empty());
        assert!(healthy.exists("net"));
        assert!(healthy.exists("sub"));
    }

    #[tokio::test]
    async fn test_update_in_place() {
        let (provider, engine, dir) = setup();
        let mut state = StackState::new("engine", dir.path());
        engine.apply(&network(), &mut state).await.unwrap();

        let mut b = GraphBuilder::new("engine");
        let eip = b.declare("eip", &thing(Value::Null), Options::new()).unwrap();
        b.declare("igw", &Thing { parent: Value::Null, label: "y".into() }, Options::new())
            .unwrap();
        let nat = b.declare("nat", &thing(eip.id()), Options::new()).unwrap();
        b.declare("route", &thing(nat.id()), Options::new()).unwrap();
        let relabeled = b.build().unwrap();

        let report = engine.apply(&relabeled, &mut state).await.unwrap();
        assert_eq!(report.plan.summary.update, 1);
        assert_eq!(provider.calls_of(Op::Update), vec!["igw".to_string()]);
        assert_eq!(
            state.resources[&ResourceId::new("igw").unwrap()].inputs["label"],
            json!("y")
        );
    }

    #[tokio::test]
    async fn test_destroy_runs_in_reverse_order() {
        let (provider, engine, dir) = setup();
        let mut state = StackState::new("engine", dir.path());
        engine.apply(&network(), &mut state).await.unwrap();

        let deleted = engine.destroy(&mut state).await.unwrap();
        let names: Vec<&str> = deleted.iter().map(ResourceId::as_str).collect();
        assert_eq!(names, vec!["route", "nat", "eip", "igw"]);
        assert!(state.resources.is_empty());
        assert!(!provider.exists("eip"));
    }

    #[tokio::test]
    async fn test_concurrent_apply_is_rejected() {
        let (_provider, engine, dir) = setup();
        let mut state = StackState::new("engine", dir.path());
        let _held = state.lock().unwrap();
        let err = engine.apply(&network(), &mut state).await.unwrap_err();
        assert!(matches!(err, ApplyError::Locked { .. }));
    }
}
