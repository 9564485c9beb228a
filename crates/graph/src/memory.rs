//! In-memory provider for rehearsals and tests.
//!
//! Outputs are derived deterministically from the resource name, so two
//! rehearsals of the same graph produce identical identifiers. Failures and
//! readiness probes can be scripted per resource.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value as Json;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::graph::{ReadinessGate, ResourceId};
use crate::provider::{Outputs, Probe, Provider, ProviderError, ResourceRequest};

/// Account used in generated ARNs.
pub const REHEARSAL_ACCOUNT: &str = "123456789012";

/// Region used in generated ARNs.
pub const REHEARSAL_REGION: &str = "us-east-1";

/// Provider operation recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Create,
    Update,
    Delete,
    Read,
    Probe,
}

type Generator = Box<dyn Fn(&ResourceRequest) -> Outputs + Send + Sync>;

#[derive(Default)]
struct Inner {
    resources: BTreeMap<ResourceId, Outputs>,
    calls: Vec<(Op, ResourceId)>,
    failures: BTreeMap<ResourceId, ProviderError>,
    probes: BTreeMap<ResourceId, VecDeque<Probe>>,
}

/// Provider that keeps resources in memory.
#[derive(Default)]
pub struct MemoryProvider {
    inner: Mutex<Inner>,
    generators: BTreeMap<String, Generator>,
}

impl MemoryProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute extra outputs for one kind; they override the generated ones.
    #[must_use]
    pub fn with_outputs(
        mut self,
        kind: &str,
        generator: impl Fn(&ResourceRequest) -> Outputs + Send + Sync + 'static,
    ) -> Self {
        self.generators.insert(kind.to_string(), Box::new(generator));
        self
    }

    /// Fail every create, update and read of a resource.
    pub fn fail_on(&self, name: &str, error: ProviderError) {
        if let Ok(id) = ResourceId::new(name) {
            self.lock().failures.insert(id, error);
        }
    }

    /// Script probe results for a resource; the last one repeats.
    pub fn script_probes(&self, name: &str, probes: impl IntoIterator<Item = Probe>) {
        if let Ok(id) = ResourceId::new(name) {
            self.lock().probes.insert(id, probes.into_iter().collect());
        }
    }

    /// Recorded provider calls, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<(Op, ResourceId)> {
        self.lock().calls.clone()
    }

    /// Names passed to one operation, oldest first.
    #[must_use]
    pub fn calls_of(&self, op: Op) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|(o, _)| *o == op)
            .map(|(_, id)| id.to_string())
            .collect()
    }

    /// Whether a resource currently exists.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        ResourceId::new(name).is_ok_and(|id| self.lock().resources.contains_key(&id))
    }

    /// Outputs of an existing resource.
    #[must_use]
    pub fn outputs(&self, name: &str) -> Option<Outputs> {
        let id = ResourceId::new(name).ok()?;
        self.lock().resources.get(&id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn generate(&self, req: &ResourceRequest) -> Outputs {
        let mut outputs = Outputs::new();
        for attr in &req.outputs {
            let value = match req.inputs.get(attr) {
                Some(v) if !v.is_object() && !v.is_null() => v.clone(),
                _ => generated(&req.id, &req.kind, attr),
            };
            outputs.insert(attr.clone(), value);
        }
        if let Some(generator) = self.generators.get(&req.kind) {
            outputs.extend(generator(req));
        }
        outputs
    }

    fn record(&self, op: Op, id: &ResourceId) -> Result<(), ProviderError> {
        let mut inner = self.lock();
        inner.calls.push((op, id.clone()));
        match (op, inner.failures.get(id)) {
            (Op::Create | Op::Update | Op::Read, Some(err)) => Err(err.clone()),
            _ => Ok(()),
        }
    }
}

fn digest(id: &ResourceId, attr: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.as_str().as_bytes());
    hasher.update(b"/");
    hasher.update(attr.as_bytes());
    hex::encode(hasher.finalize())
}

fn generated(id: &ResourceId, kind: &str, attr: &str) -> Json {
    let hash = digest(id, attr);
    let mut segments = kind.split(':');
    let service = segments.nth(1).unwrap_or("resource");
    let type_name = kind.rsplit(':').next().unwrap_or(kind).to_lowercase();

    let value = match attr {
        "id" => format!("{type_name}-{}", &hash[..12]),
        "arn" => format!(
            "arn:aws:{service}:{REHEARSAL_REGION}:{REHEARSAL_ACCOUNT}:{type_name}/{id}"
        ),
        a if a.ends_with("_ip") => {
            let bytes = hash.as_bytes();
            format!("10.0.{}.{}", bytes[0] % 250 + 1, bytes[1] % 250 + 1)
        }
        a if a.ends_with("_dns") || a == "endpoint" || a == "fqdn" => {
            format!("{id}-{}.{REHEARSAL_REGION}.rehearsal.internal", &hash[..8])
        }
        _ => format!("{attr}-{}", &hash[..16]),
    };
    Json::String(value)
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn create(&self, req: &ResourceRequest) -> Result<Outputs, ProviderError> {
        self.record(Op::Create, &req.id)?;
        let outputs = self.generate(req);
        debug!(resource = %req.id, kind = %req.kind, "Created in memory");
        self.lock().resources.insert(req.id.clone(), outputs.clone());
        Ok(outputs)
    }

    async fn update(
        &self,
        req: &ResourceRequest,
        current: &Outputs,
    ) -> Result<Outputs, ProviderError> {
        self.record(Op::Update, &req.id)?;
        let mut outputs = current.clone();
        outputs.extend(self.generate(req));
        // Identifiers survive an in-place update.
        for key in ["id", "arn"] {
            if let Some(v) = current.get(key) {
                outputs.insert(key.to_string(), v.clone());
            }
        }
        self.lock().resources.insert(req.id.clone(), outputs.clone());
        Ok(outputs)
    }

    async fn delete(
        &self,
        id: &ResourceId,
        _kind: &str,
        _current: &Outputs,
    ) -> Result<(), ProviderError> {
        self.record(Op::Delete, id)?;
        self.lock().resources.remove(id);
        Ok(())
    }

    async fn read(&self, req: &ResourceRequest) -> Result<Outputs, ProviderError> {
        self.record(Op::Read, &req.id)?;
        Ok(self.generate(req))
    }

    async fn probe(
        &self,
        id: &ResourceId,
        _kind: &str,
        _outputs: &Outputs,
        _gate: &ReadinessGate,
    ) -> Result<Probe, ProviderError> {
        self.record(Op::Probe, id)?;
        let mut inner = self.lock();
        let Some(queue) = inner.probes.get_mut(id) else {
            return Ok(Probe::Ready);
        };
        let probe = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(probe.unwrap_or(Probe::Ready))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(name: &str, inputs: Json, outputs: &[&str]) -> ResourceRequest {
        ResourceRequest {
            id: ResourceId::new(name).unwrap(),
            kind: "aws:ec2:Vpc".to_string(),
            inputs,
            outputs: outputs.iter().map(ToString::to_string).collect(),
        }
    }

    #[tokio::test]
    async fn test_outputs_are_deterministic() {
        let a = MemoryProvider::new();
        let b = MemoryProvider::new();
        let req = request("vpc", json!({}), &["id", "arn"]);
        let out_a = a.create(&req).await.unwrap();
        let out_b = b.create(&req).await.unwrap();
        assert_eq!(out_a, out_b);
        assert!(out_a["id"].as_str().unwrap().starts_with("vpc-"));
        assert_eq!(
            out_a["arn"],
            json!("arn:aws:ec2:us-east-1:123456789012:vpc/vpc")
        );
    }

    #[tokio::test]
    async fn test_literal_inputs_are_echoed() {
        let p = MemoryProvider::new();
        let req = request(
            "vpc",
            json!({"cidr_block": "10.0.0.0/16"}),
            &["id", "cidr_block"],
        );
        let out = p.create(&req).await.unwrap();
        assert_eq!(out["cidr_block"], json!("10.0.0.0/16"));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let p = MemoryProvider::new();
        p.fail_on("vpc", ProviderError::QuotaExceeded("vpcs".into()));
        let err = p.create(&request("vpc", json!({}), &["id"])).await;
        assert_eq!(err, Err(ProviderError::QuotaExceeded("vpcs".into())));
        assert!(!p.exists("vpc"));
        assert_eq!(p.calls_of(Op::Create), vec!["vpc".to_string()]);
    }

    #[tokio::test]
    async fn test_scripted_probes_repeat_last() {
        let p = MemoryProvider::new();
        p.script_probes(
            "db",
            [Probe::Pending("booting".into()), Probe::Failed("ansible".into())],
        );
        let id = ResourceId::new("db").unwrap();
        let gate = ReadinessGate {
            signal: crate::graph::ReadinessSignal::Attachment {
                kind: "x".into(),
            },
            timeout_secs: 1,
            interval_secs: 1,
        };
        let empty = Outputs::new();
        let first = p.probe(&id, "k", &empty, &gate).await.unwrap();
        let second = p.probe(&id, "k", &empty, &gate).await.unwrap();
        let third = p.probe(&id, "k", &empty, &gate).await.unwrap();
        assert_eq!(first, Probe::Pending("booting".into()));
        assert_eq!(second, Probe::Failed("ansible".into()));
        assert_eq!(third, second);
    }

    #[tokio::test]
    async fn test_update_keeps_identifier_and_delete_tolerates_unknown() {
        let p = MemoryProvider::new();
        let req = request("vpc", json!({"name": "a"}), &["id", "name"]);
        let created = p.create(&req).await.unwrap();
        let updated = p
            .update(&request("vpc", json!({"name": "b"}), &["id", "name"]), &created)
            .await
            .unwrap();
        assert_eq!(updated["id"], created["id"]);
        assert_eq!(updated["name"], json!("b"));

        let ghost = ResourceId::new("ghost").unwrap();
        assert!(p.delete(&ghost, "aws:ec2:Vpc", &Outputs::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_kind_generator_overrides() {
        let p = MemoryProvider::new().with_outputs("aws:ec2:Vpc", |_| {
            Outputs::from_iter([("id".to_string(), json!("vpc-fixed"))])
        });
        let out = p.create(&request("vpc", json!({}), &["id"])).await.unwrap();
        assert_eq!(out["id"], json!("vpc-fixed"));
    }
}
