//! In-memory provider wired with the computed outputs this stack relies on.
//!
//! The generic [`MemoryProvider`] derives opaque strings from resource
//! names. A few kinds need outputs that downstream expressions parse: policy
//! documents must be JSON, the OIDC issuer must be an `https://` URL, the
//! password must come from the real alphabet, and host records resolve to
//! their own names.

use serde_json::{json, Value as Json};
use tic_graph::memory::REHEARSAL_REGION;
use tic_graph::{Kind, MemoryProvider, Outputs, ResourceRequest};

use crate::identity::render_policy_document;
use crate::kinds::aws::{EksCluster, GetPolicyDocument, Record};
use crate::kinds::kubernetes::Service;
use crate::kinds::random::RandomPassword;
use crate::secrets::{generate_password, PASSWORD_LENGTH};

fn single(key: &str, value: impl Into<Json>) -> Outputs {
    Outputs::from_iter([(key.to_string(), value.into())])
}

/// Issuer URL reported for a rehearsed cluster.
#[must_use]
pub fn oidc_issuer(cluster: &str) -> String {
    let id: String = cluster
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    format!("https://oidc.eks.{REHEARSAL_REGION}.amazonaws.com/id/{id}")
}

/// A [`MemoryProvider`] that can rehearse a full stack.
#[must_use]
pub fn rehearsal_provider() -> MemoryProvider {
    MemoryProvider::new()
        .with_outputs(GetPolicyDocument::TYPE, |req: &ResourceRequest| {
            single("json", render_policy_document(&req.inputs))
        })
        .with_outputs(RandomPassword::TYPE, |req: &ResourceRequest| {
            let length = req
                .inputs
                .get("length")
                .and_then(Json::as_u64)
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(PASSWORD_LENGTH as usize);
            single("result", generate_password(length))
        })
        .with_outputs(EksCluster::TYPE, |req: &ResourceRequest| {
            single("oidc_issuer", oidc_issuer(req.id.as_str()))
        })
        .with_outputs(Record::TYPE, |req: &ResourceRequest| {
            req.inputs
                .get("name")
                .map(|name| single("fqdn", name.clone()))
                .unwrap_or_default()
        })
        .with_outputs(Service::TYPE, |req: &ResourceRequest| {
            single(
                "load_balancer_hostname",
                json!(format!("{}.{REHEARSAL_REGION}.elb.amazonaws.com", req.id)),
            )
        })
}
