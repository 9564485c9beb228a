//! Cluster workloads: the external-secrets operator and the application
//! with its namespace, service account, secret projection, deployment and
//! service.

use serde_json::{json, Value as Json};
use tic_graph::{GraphBuilder, GraphError, Handle, Options};
use tracing::debug;

use crate::config::{ExternalSecretsConfig, WebAppConfig};
use crate::identity::{WorkloadIdentity, ROLE_ARN_ANNOTATION};
use crate::kinds::docker::Image;
use crate::kinds::kubernetes::{
    Chart, Deployment, ExternalSecret, Namespace, Provider, RepositoryOpts, SecretStore, Service,
    ServiceAccount,
};
use crate::secrets::{external_secret_manifest, secret_store_manifest, StoredSecret, URI_KEY};

/// Namespace of the external-secrets operator.
pub const OPERATOR_NAMESPACE: &str = "external-secrets";

/// Port the application service listens on.
pub const SERVICE_PORT: u16 = 80;

fn namespace_manifest(name: &str) -> Json {
    json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name },
    })
}

/// The external-secrets operator.
#[derive(Debug, Clone)]
pub struct SecretsOperator {
    pub namespace: Handle<Namespace>,
    pub chart: Handle<Chart>,
}

impl SecretsOperator {
    /// Install the operator chart into its own namespace.
    ///
    /// # Errors
    /// Propagates declaration failures.
    pub fn declare(
        b: &mut GraphBuilder,
        cfg: &ExternalSecretsConfig,
        access: &Handle<Provider>,
    ) -> Result<Self, GraphError> {
        let namespace = b.declare(
            &format!("{OPERATOR_NAMESPACE}-namespace"),
            &Namespace {
                manifest: namespace_manifest(OPERATOR_NAMESPACE),
            },
            Options::new().provider(access),
        )?;
        let chart = b.declare(
            &format!("{OPERATOR_NAMESPACE}-chart"),
            &Chart {
                chart: cfg.helm_chart.clone(),
                version: cfg.helm_chart_version.clone(),
                namespace: OPERATOR_NAMESPACE.to_string(),
                repository_opts: RepositoryOpts {
                    repo: cfg.helm_repo.clone(),
                },
                values: json!({ "installCRDs": true }),
            },
            Options::new().provider(access).depends_on(&namespace),
        )?;
        Ok(Self { namespace, chart })
    }
}

/// Everything the application layer consumes from the layers below.
#[derive(Debug)]
pub struct WorkloadInputs<'a> {
    pub app: &'a WebAppConfig,
    pub region: &'a str,
    pub access: &'a Handle<Provider>,
    pub operator: &'a SecretsOperator,
    pub identity: &'a WorkloadIdentity,
    pub secret: &'a StoredSecret,
    pub image: &'a Handle<Image>,
}

/// Application handles.
#[derive(Debug, Clone)]
pub struct Workload {
    pub namespace: Handle<Namespace>,
    pub service_account: Handle<ServiceAccount>,
    pub secret_store: Handle<SecretStore>,
    pub external_secret: Handle<ExternalSecret>,
    pub deployment: Handle<Deployment>,
    pub service: Handle<Service>,
}

impl Workload {
    /// Declare the application objects, all bound to the cluster access
    /// descriptor.
    ///
    /// Namespace and object names are literals, so the edges between them
    /// are declared explicitly.
    ///
    /// # Errors
    /// Propagates declaration failures.
    pub fn declare(b: &mut GraphBuilder, inputs: &WorkloadInputs<'_>) -> Result<Self, GraphError> {
        let app = inputs.app;
        let name = &app.name;
        let account = &inputs.identity.account;
        let scoped = || Options::new().provider(inputs.access);

        let namespace = b.declare(
            &format!("{name}-namespace"),
            &Namespace {
                manifest: namespace_manifest(&account.namespace),
            },
            scoped(),
        )?;

        let service_account = b.declare(
            &format!("{name}-sa"),
            &ServiceAccount {
                manifest: json!({
                    "apiVersion": "v1",
                    "kind": "ServiceAccount",
                    "metadata": {
                        "name": account.name,
                        "namespace": account.namespace,
                        "annotations": {
                            ROLE_ARN_ANNOTATION: inputs.identity.role.output("arn").to_json(),
                        },
                    },
                }),
            },
            scoped().depends_on(&namespace),
        )?;

        let secret_store = b.declare(
            &format!("{name}-secret-store"),
            &SecretStore {
                manifest: secret_store_manifest(account, inputs.region),
            },
            scoped()
                .depends_on(&service_account)
                .depends_on(&inputs.operator.chart)
                .depends_on(&inputs.identity.attachment),
        )?;

        let secret_name = &inputs.secret.name;
        let external_secret = b.declare(
            &format!("{name}-external-secret"),
            &ExternalSecret {
                manifest: external_secret_manifest(&account.namespace, secret_name),
            },
            scoped()
                .depends_on(&secret_store)
                .depends_on(&inputs.secret.version)
                .depends_on(&inputs.operator.chart),
        )?;

        let labels = json!({ "app": name });
        let deployment = b.declare(
            &format!("{name}-deployment"),
            &Deployment {
                manifest: json!({
                    "apiVersion": "apps/v1",
                    "kind": "Deployment",
                    "metadata": {
                        "name": name,
                        "namespace": account.namespace,
                        "labels": labels,
                    },
                    "spec": {
                        "replicas": app.replicas,
                        "selector": { "matchLabels": labels },
                        "template": {
                            "metadata": { "labels": labels },
                            "spec": {
                                "serviceAccountName": account.name,
                                "containers": [{
                                    "name": name,
                                    "image": inputs.image.output("repo_digest").to_json(),
                                    "ports": [{ "containerPort": app.port }],
                                    "env": [{
                                        "name": "DATABASE_URL",
                                        "valueFrom": {
                                            "secretKeyRef": { "name": secret_name, "key": URI_KEY },
                                        },
                                    }],
                                    "envFrom": [{ "secretRef": { "name": secret_name } }],
                                }],
                            },
                        },
                    },
                }),
            },
            scoped()
                .depends_on(inputs.image)
                .depends_on(&external_secret)
                .depends_on(&service_account),
        )?;

        let service = b.declare(
            &format!("{name}-service"),
            &Service {
                manifest: json!({
                    "apiVersion": "v1",
                    "kind": "Service",
                    "metadata": {
                        "name": name,
                        "namespace": account.namespace,
                    },
                    "spec": {
                        "type": "LoadBalancer",
                        "selector": labels,
                        "ports": [{
                            "port": SERVICE_PORT,
                            "targetPort": app.port,
                            "protocol": "TCP",
                        }],
                    },
                }),
            },
            scoped().depends_on(&deployment),
        )?;

        debug!(app = %name, port = app.port, "Declared workload");
        Ok(Self {
            namespace,
            service_account,
            secret_store,
            external_secret,
            deployment,
            service,
        })
    }
}
