//! Static checks for mistakes that declare cleanly but fail or leak at
//! runtime.
//!
//! Manifests are rendered with unknown outputs left as placeholders and
//! parsed into the typed Kubernetes API objects before they are inspected.

use std::collections::BTreeSet;
use std::fmt;

use k8s_openapi::api::apps::v1::Deployment as DeploymentObject;
use k8s_openapi::api::core::v1::ServiceAccount as ServiceAccountObject;
use k8s_openapi::api::rbac::v1::{
    ClusterRoleBinding as ClusterRoleBindingObject, RoleBinding as RoleBindingObject,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as Json;
use tic_graph::{value, Graph, Kind, Node, ResourceId};

use crate::identity::{ServiceAccountRef, ROLE_ARN_ANNOTATION};
use crate::kinds::aws::{
    GetPolicyDocument, Instance, InternetGateway, Policy, Role, SecurityGroupRule, Subnet,
};
use crate::kinds::kubernetes::{
    ClusterRoleBinding, Deployment, ExternalSecret, RoleBinding, ServiceAccount,
};
use crate::network::{default_route_target, target_of};

/// How serious a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One problem found in a graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub resource: ResourceId,
    pub message: String,
}

impl Finding {
    fn error(node: &Node, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            resource: node.id.clone(),
            message: message.into(),
        }
    }

    fn warning(node: &Node, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            resource: node.id.clone(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.severity, self.resource, self.message)
    }
}

/// Run every check. Findings are sorted by severity, errors first.
#[must_use]
pub fn lint(graph: &Graph) -> Vec<Finding> {
    let mut findings = Vec::new();
    let accounts = service_accounts(graph, &mut findings);

    check_trust_subjects(graph, &accounts, &mut findings);
    check_admin_bindings(graph, &mut findings);
    check_secret_wildcards(graph, &mut findings);
    check_bootstrap_gates(graph, &mut findings);
    check_open_ssh(graph, &mut findings);
    check_deployments(graph, &accounts, &mut findings);
    check_private_routes(graph, &mut findings);

    findings.sort_by(|a, b| b.severity.cmp(&a.severity));
    findings
}

fn rendered(doc: &Json) -> Json {
    value::preview(doc, &mut |_| None)
}

/// Parse a manifest into its API type, reporting failures as findings.
fn parse<T: DeserializeOwned>(node: &Node, findings: &mut Vec<Finding>) -> Option<T> {
    let manifest = rendered(node.input("manifest")?);
    match serde_json::from_value(manifest) {
        Ok(object) => Some(object),
        Err(e) => {
            findings.push(Finding::error(node, format!("manifest does not parse: {e}")));
            None
        }
    }
}

/// A declared service account and the role its annotation points at.
struct Account {
    node: ResourceId,
    account: ServiceAccountRef,
    role: Option<ResourceId>,
}

fn service_accounts(graph: &Graph, findings: &mut Vec<Finding>) -> Vec<Account> {
    let mut accounts = Vec::new();
    for node in graph.nodes_of_kind(ServiceAccount::TYPE) {
        let Some(object) = parse::<ServiceAccountObject>(node, findings) else {
            continue;
        };
        let (Some(name), Some(namespace)) = (object.metadata.name, object.metadata.namespace) else {
            findings.push(Finding::error(node, "service account has no name or namespace"));
            continue;
        };
        let role = node
            .input("manifest")
            .and_then(|m| m.pointer("/metadata/annotations"))
            .and_then(|a| a.get(ROLE_ARN_ANNOTATION))
            .and_then(target_of);
        accounts.push(Account {
            node: node.id.clone(),
            account: ServiceAccountRef { namespace, name },
            role,
        });
    }
    accounts
}

/// Subjects a trust document admits through `...:sub` conditions.
fn trusted_subjects(doc: &Node) -> BTreeSet<String> {
    let inputs = rendered(&doc.inputs);
    let mut subjects = BTreeSet::new();
    let statements = inputs.get("statements").and_then(Json::as_array);
    for statement in statements.into_iter().flatten() {
        let conditions = statement.get("conditions").and_then(Json::as_array);
        for condition in conditions.into_iter().flatten() {
            let is_sub = condition
                .get("variable")
                .and_then(Json::as_str)
                .is_some_and(|v| v.ends_with(":sub"));
            if !is_sub {
                continue;
            }
            let values = condition.get("values").and_then(Json::as_array);
            subjects.extend(
                values
                    .into_iter()
                    .flatten()
                    .filter_map(Json::as_str)
                    .map(ToString::to_string),
            );
        }
    }
    subjects
}

fn check_trust_subjects(graph: &Graph, accounts: &[Account], findings: &mut Vec<Finding>) {
    for doc in graph.nodes_of_kind(GetPolicyDocument::TYPE) {
        for subject in trusted_subjects(doc) {
            match ServiceAccountRef::from_subject(&subject) {
                Some(trusted) if accounts.iter().any(|a| a.account == trusted) => {}
                Some(_) => findings.push(Finding::error(
                    doc,
                    format!("trust subject {subject} matches no declared service account"),
                )),
                None => findings.push(Finding::error(
                    doc,
                    format!("trust subject {subject} is not a service account subject"),
                )),
            }
        }
    }

    for account in accounts {
        let Some(role_id) = &account.role else {
            continue;
        };
        let Some(role) = graph.node(role_id).filter(|n| n.kind == Role::TYPE) else {
            continue;
        };
        let Some(trust) = role
            .input("assume_role_policy")
            .and_then(target_of)
            .and_then(|id| graph.node(&id))
            .filter(|n| n.kind == GetPolicyDocument::TYPE)
        else {
            continue;
        };
        let subject = account.account.subject();
        if !trusted_subjects(trust).contains(&subject) {
            if let Some(node) = graph.node(&account.node) {
                findings.push(Finding::error(
                    node,
                    format!(
                        "annotated role {} does not trust {subject}; token exchange will be denied",
                        role.id
                    ),
                ));
            }
        }
    }
}

fn check_admin_bindings(graph: &Graph, findings: &mut Vec<Finding>) {
    const ADMIN: &str = "cluster-admin";
    for node in graph.nodes_of_kind(ClusterRoleBinding::TYPE) {
        if let Some(binding) = parse::<ClusterRoleBindingObject>(node, findings) {
            if binding.role_ref.name == ADMIN {
                findings.push(Finding::error(node, "binds cluster-admin"));
            }
        }
    }
    for node in graph.nodes_of_kind(RoleBinding::TYPE) {
        if let Some(binding) = parse::<RoleBindingObject>(node, findings) {
            if binding.role_ref.name == ADMIN {
                findings.push(Finding::error(node, "binds cluster-admin"));
            }
        }
    }
}

fn as_strings(v: Option<&Json>) -> Vec<String> {
    match v {
        Some(Json::String(s)) => vec![s.clone()],
        Some(Json::Array(items)) => items
            .iter()
            .filter_map(Json::as_str)
            .map(ToString::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn check_secret_wildcards(graph: &Graph, findings: &mut Vec<Finding>) {
    for node in graph.nodes_of_kind(Policy::TYPE) {
        let Some(policy) = node.input("policy").map(rendered) else {
            continue;
        };
        let document = match policy {
            Json::String(s) => match serde_json::from_str::<Json>(&s) {
                Ok(doc) => doc,
                Err(e) => {
                    findings.push(Finding::error(node, format!("policy is not JSON: {e}")));
                    continue;
                }
            },
            other => other,
        };
        let statements = match document.get("Statement") {
            Some(Json::Array(items)) => items.clone(),
            Some(single) => vec![single.clone()],
            None => Vec::new(),
        };
        for statement in statements {
            let actions = as_strings(statement.get("Action"));
            let touches_secrets = actions
                .iter()
                .any(|a| a == "*" || a.starts_with("secretsmanager:"));
            if !touches_secrets {
                continue;
            }
            if actions.iter().any(|a| a == "*" || a == "secretsmanager:*") {
                findings.push(Finding::error(node, "grants every Secrets Manager action"));
            }
            let wildcard = as_strings(statement.get("Resource"))
                .iter()
                .any(|r| r == "*" || r.ends_with(":secret:*"));
            if wildcard {
                findings.push(Finding::error(node, "grants access to every secret"));
            }
        }
    }
}

fn check_bootstrap_gates(graph: &Graph, findings: &mut Vec<Finding>) {
    for node in graph.nodes_of_kind(Instance::TYPE) {
        let has_script = node
            .input("user_data")
            .and_then(Json::as_str)
            .is_some_and(|s| !s.trim().is_empty());
        if has_script && node.readiness.is_none() {
            findings.push(Finding::warning(
                node,
                "runs a bootstrap script without a readiness gate; a failed bootstrap goes unnoticed",
            ));
        }
    }
}

fn check_open_ssh(graph: &Graph, findings: &mut Vec<Finding>) {
    for node in graph.nodes_of_kind(SecurityGroupRule::TYPE) {
        let rendered = rendered(&node.inputs);
        if rendered.get("type").and_then(Json::as_str) != Some("ingress") {
            continue;
        }
        let port = |key: &str| rendered.get(key).and_then(Json::as_u64).unwrap_or(0);
        let all_traffic = rendered.get("protocol").and_then(Json::as_str) == Some("-1");
        let covers_ssh = all_traffic || (port("from_port") <= 22 && 22 <= port("to_port"));
        let world = as_strings(rendered.get("cidr_blocks"))
            .iter()
            .any(|c| c == "0.0.0.0/0");
        if covers_ssh && world {
            findings.push(Finding::error(node, "opens SSH to 0.0.0.0/0"));
        }
    }
}

fn check_deployments(graph: &Graph, accounts: &[Account], findings: &mut Vec<Finding>) {
    let projected: BTreeSet<(String, String)> = graph
        .nodes_of_kind(ExternalSecret::TYPE)
        .filter_map(|n| {
            let manifest = rendered(n.input("manifest")?);
            let namespace = manifest.pointer("/metadata/namespace")?.as_str()?.to_string();
            let target = manifest
                .pointer("/spec/target/name")
                .or_else(|| manifest.pointer("/metadata/name"))?
                .as_str()?
                .to_string();
            Some((namespace, target))
        })
        .collect();

    for node in graph.nodes_of_kind(Deployment::TYPE) {
        let Some(deployment) = parse::<DeploymentObject>(node, findings) else {
            continue;
        };
        let namespace = deployment
            .metadata
            .namespace
            .unwrap_or_else(|| "default".to_string());
        let Some(pod) = deployment.spec.and_then(|s| s.template.spec) else {
            continue;
        };

        let account = pod
            .service_account_name
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let declared = accounts
            .iter()
            .any(|a| a.account.namespace == namespace && a.account.name == account);
        if !declared {
            findings.push(Finding::error(
                node,
                format!("service account {namespace}/{account} is not declared"),
            ));
        }

        let mut secrets = BTreeSet::new();
        for container in &pod.containers {
            for env in container.env.iter().flatten() {
                if let Some(r) = env.value_from.as_ref().and_then(|v| v.secret_key_ref.as_ref()) {
                    secrets.insert(r.name.clone());
                }
            }
            for source in container.env_from.iter().flatten() {
                if let Some(r) = &source.secret_ref {
                    secrets.insert(r.name.clone());
                }
            }
        }
        for secret in secrets {
            if !projected.contains(&(namespace.clone(), secret.clone())) {
                findings.push(Finding::warning(
                    node,
                    format!("secret {namespace}/{secret} is not projected by any external secret"),
                ));
            }
        }
    }
}

fn check_private_routes(graph: &Graph, findings: &mut Vec<Finding>) {
    for node in graph.nodes_of_kind(Subnet::TYPE) {
        let public = node
            .input("map_public_ip_on_launch")
            .and_then(Json::as_bool)
            .unwrap_or(false);
        let Some(target) = default_route_target(graph, &node.id) else {
            continue;
        };
        let via_igw = graph
            .node(&target)
            .is_some_and(|t| t.kind == InternetGateway::TYPE);
        if !public && via_igw {
            findings.push(Finding::error(
                node,
                format!("private subnet routes 0.0.0.0/0 through internet gateway {target}"),
            ));
        }
    }
}
