//! Kubernetes resource kinds.
//!
//! Objects carry their full manifest. Expression values (such as a role ARN
//! annotation) are embedded in document form and resolved before the object
//! reaches the cluster.

use serde::Serialize;
use serde_json::Value as Json;
use tic_graph::Value;

/// Access descriptor for one cluster; every cluster-scoped node names it as
/// its provider.
#[derive(Debug, Clone, Serialize)]
pub struct Provider {
    pub kubeconfig: Value,
}

impl_kind!(Provider => "kubernetes:index:Provider",
    outputs: ["id"],
);

#[derive(Debug, Clone, Serialize)]
pub struct RepositoryOpts {
    pub repo: String,
}

/// Helm chart release.
#[derive(Debug, Clone, Serialize)]
pub struct Chart {
    pub chart: String,
    pub version: String,
    pub namespace: String,
    pub repository_opts: RepositoryOpts,
    pub values: Json,
}

impl_kind!(Chart => "kubernetes:helm.sh/v4:Chart",
    outputs: ["id", "resources"],
    replace_on: ["chart", "namespace"],
);

macro_rules! manifest_kind {
    ($(#[$meta:meta])* $name:ident => $token:literal, outputs: [$($out:literal),*]) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Serialize)]
        pub struct $name {
            pub manifest: Json,
        }

        impl_kind!($name => $token, outputs: [$($out),*]);
    };
}

manifest_kind!(Namespace => "kubernetes:core/v1:Namespace", outputs: ["id", "uid"]);
manifest_kind!(ServiceAccount => "kubernetes:core/v1:ServiceAccount", outputs: ["id", "uid"]);
manifest_kind!(Deployment => "kubernetes:apps/v1:Deployment", outputs: ["id", "uid"]);
manifest_kind!(
    /// Exposed through a cloud load balancer.
    Service => "kubernetes:core/v1:Service",
    outputs: ["id", "uid", "load_balancer_hostname"]
);
manifest_kind!(
    ClusterRoleBinding => "kubernetes:rbac.authorization.k8s.io/v1:ClusterRoleBinding",
    outputs: ["id", "uid"]
);
manifest_kind!(
    RoleBinding => "kubernetes:rbac.authorization.k8s.io/v1:RoleBinding",
    outputs: ["id", "uid"]
);
manifest_kind!(
    /// Namespaced store that reads from AWS Secrets Manager.
    SecretStore => "kubernetes:external-secrets.io/v1beta1:SecretStore",
    outputs: ["id", "uid"]
);
manifest_kind!(
    /// Materializes a stored secret as a cluster secret.
    ExternalSecret => "kubernetes:external-secrets.io/v1beta1:ExternalSecret",
    outputs: ["id", "uid"]
);
