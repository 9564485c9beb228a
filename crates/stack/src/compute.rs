//! Compute layer: the managed cluster with its node group and access
//! descriptor, and the standalone database host.

use std::fmt;

use tic_graph::{
    GraphBuilder, GraphError, Handle, Kind, Options, ReadinessGate, ReadinessSignal, ResourceId,
    ResourceStatus, StackState, Value,
};
use tracing::debug;

use crate::bootstrap;
use crate::config::{ClusterConfig, DbInstanceConfig};
use crate::identity::{ClusterRoles, DbHostRole, STS_AUDIENCE};
use crate::kinds::aws::{
    AmiFilter, ClusterVpcConfig, EksAddon, EksCluster, GetAmi, Instance, LoadBalancer, NodeGroup,
    OpenIdConnectProvider, ScalingConfig, SecurityGroup, SecurityGroupEgress, SecurityGroupRule,
};
use crate::kinds::kubernetes::Provider;
use crate::kinds::name_tag;
use crate::kinds::tls::GetCertificate;
use crate::network::Network;

/// Add-ons installed on every cluster.
pub const CLUSTER_ADDONS: [&str; 4] =
    ["coredns", "kube-proxy", "vpc-cni", "eks-pod-identity-agent"];

pub const POSTGRES_PORT: u16 = 5432;
pub const SSH_PORT: u16 = 22;

const CLUSTER_READY_TIMEOUT_SECS: u64 = 1800;
const CLUSTER_READY_INTERVAL_SECS: u64 = 30;

/// Handles of the cluster.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub security_group: Handle<SecurityGroup>,
    pub cluster: Handle<EksCluster>,
    pub addons: Vec<Handle<EksAddon>>,
    pub node_group: Handle<NodeGroup>,
    pub load_balancer: Handle<LoadBalancer>,
    pub oidc_certificate: Handle<GetCertificate>,
    pub oidc_provider: Handle<OpenIdConnectProvider>,
    /// Access descriptor every cluster-scoped node is bound to.
    pub access: Handle<Provider>,
}

impl Cluster {
    /// Declare the cluster on the private subnets.
    ///
    /// The cluster counts as ready only once a node group is attached and
    /// active.
    ///
    /// # Errors
    /// Propagates declaration failures.
    pub fn declare(
        b: &mut GraphBuilder,
        cfg: &ClusterConfig,
        net: &Network,
        roles: &ClusterRoles,
    ) -> Result<Self, GraphError> {
        let security_group = b.declare(
            "node-sg",
            &SecurityGroup {
                vpc_id: net.vpc.id(),
                description: "Cluster and worker node traffic".to_string(),
                egress: vec![SecurityGroupEgress {
                    protocol: "-1".to_string(),
                    from_port: 0,
                    to_port: 0,
                    cidr_blocks: vec!["0.0.0.0/0".to_string()],
                }],
                tags: name_tag("node-sg"),
            },
            Options::new(),
        )?;
        b.declare(
            "allow-sg-ingress-access",
            &SecurityGroupRule {
                rule_type: "ingress".to_string(),
                protocol: "-1".to_string(),
                from_port: 0,
                to_port: 0,
                security_group_id: security_group.id(),
                cidr_blocks: Vec::new(),
                source_security_group_id: Some(security_group.id()),
                description: Some("Traffic between cluster members".to_string()),
            },
            Options::new(),
        )?;

        let cluster = b.declare(
            "eks-cluster",
            &EksCluster {
                name: cfg.name.clone(),
                version: cfg.version.clone(),
                role_arn: roles.cluster_role.output("arn"),
                vpc_config: ClusterVpcConfig {
                    subnet_ids: net.private_subnet_ids(),
                    security_group_ids: vec![security_group.id()],
                },
                tags: name_tag("eks-cluster"),
            },
            Options::new()
                .depends_on(&roles.cluster_policy)
                .readiness(ReadinessGate {
                    signal: ReadinessSignal::Attachment {
                        kind: NodeGroup::TYPE.to_string(),
                    },
                    timeout_secs: CLUSTER_READY_TIMEOUT_SECS,
                    interval_secs: CLUSTER_READY_INTERVAL_SECS,
                }),
        )?;

        let mut addons = Vec::new();
        for addon in CLUSTER_ADDONS {
            addons.push(b.declare(
                &format!("{addon}-addon"),
                &EksAddon {
                    cluster_name: cluster.output("name"),
                    addon_name: addon.to_string(),
                    resolve_conflicts_on_update: "OVERWRITE".to_string(),
                    tags: name_tag(addon),
                },
                Options::new(),
            )?);
        }

        let mut node_opts = Options::new();
        for attachment in &roles.node_policies {
            node_opts = node_opts.depends_on(attachment);
        }
        let node_group = b.declare(
            "eks-node-group",
            &NodeGroup {
                cluster_name: cluster.output("name"),
                node_role_arn: roles.node_role.output("arn"),
                subnet_ids: net.private_subnet_ids(),
                scaling_config: ScalingConfig {
                    desired_size: cfg.desired,
                    min_size: cfg.min,
                    max_size: cfg.max,
                },
                instance_types: vec![cfg.instance_type.clone()],
                tags: name_tag("eks-node-group"),
            },
            node_opts,
        )?;

        let load_balancer = b.declare(
            "eks-load-balancer",
            &LoadBalancer {
                internal: false,
                load_balancer_type: "application".to_string(),
                security_groups: vec![security_group.id()],
                subnets: net.public_subnet_ids(),
                tags: name_tag("eks-load-balancer"),
            },
            Options::new(),
        )?;

        let oidc_certificate = b.declare(
            "oidc-issuer-certificate",
            &GetCertificate {
                url: cluster.output("oidc_issuer"),
            },
            Options::new(),
        )?;
        let oidc_provider = b.declare(
            "oidc-provider",
            &OpenIdConnectProvider {
                url: oidc_certificate.output("url"),
                client_id_lists: vec![STS_AUDIENCE.to_string()],
                thumbprint_lists: vec![oidc_certificate.output("sha1_fingerprint")],
                tags: name_tag("oidc-provider"),
            },
            Options::new(),
        )?;

        let access = b.declare(
            "k8s-provider",
            &Provider {
                kubeconfig: kubeconfig(&cluster),
            },
            Options::new(),
        )?;

        debug!(cluster = %cfg.name, version = %cfg.version, "Declared cluster");
        Ok(Self {
            security_group,
            cluster,
            addons,
            node_group,
            load_balancer,
            oidc_certificate,
            oidc_provider,
            access,
        })
    }
}

/// Kubeconfig document for the cluster with `aws eks get-token` auth.
fn kubeconfig(cluster: &Handle<EksCluster>) -> Value {
    Value::json(Value::object([
        ("apiVersion", Value::from("v1")),
        ("kind", Value::from("Config")),
        (
            "clusters",
            Value::list([Value::object([
                ("name", Value::from("kubernetes")),
                (
                    "cluster",
                    Value::object([
                        ("server", cluster.output("endpoint")),
                        (
                            "certificate-authority-data",
                            cluster.output("certificate_authority_data"),
                        ),
                    ]),
                ),
            ])]),
        ),
        (
            "contexts",
            Value::list([Value::object([
                ("name", Value::from("aws")),
                (
                    "context",
                    Value::object([("cluster", "kubernetes"), ("user", "aws")]),
                ),
            ])]),
        ),
        ("current-context", Value::from("aws")),
        (
            "users",
            Value::list([Value::object([
                ("name", Value::from("aws")),
                (
                    "user",
                    Value::object([(
                        "exec",
                        Value::object([
                            (
                                "apiVersion",
                                Value::from("client.authentication.k8s.io/v1beta1"),
                            ),
                            ("command", Value::from("aws")),
                            (
                                "args",
                                Value::list([
                                    Value::from("eks"),
                                    Value::from("get-token"),
                                    Value::from("--cluster-name"),
                                    cluster.output("name"),
                                ]),
                            ),
                        ]),
                    )]),
                ),
            ])]),
        ),
    ]))
}

/// Observed phase of the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterPhase {
    Declared,
    Creating,
    /// Control plane up, no active node group yet.
    Active,
    /// A node group is attached and active.
    Ready,
    Failed,
}

impl ClusterPhase {
    /// Phase of `cluster` according to recorded state.
    #[must_use]
    pub fn observe(state: &StackState, cluster: &ResourceId) -> Self {
        match state.status(cluster) {
            ResourceStatus::Declared => Self::Declared,
            ResourceStatus::Creating => Self::Creating,
            ResourceStatus::Active => Self::Active,
            ResourceStatus::Ready => Self::Ready,
            ResourceStatus::Failed => Self::Failed,
        }
    }
}

impl fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Declared => "declared",
            Self::Creating => "creating",
            Self::Active => "active",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Handles of the database host.
#[derive(Debug, Clone)]
pub struct DbHost {
    pub ami: Handle<GetAmi>,
    pub security_group: Handle<SecurityGroup>,
    pub postgres_rule: Handle<SecurityGroupRule>,
    pub ssh_rule: Option<Handle<SecurityGroupRule>>,
    pub instance: Handle<Instance>,
}

impl DbHost {
    /// Declare the host in the anchor public subnet with Postgres open to the
    /// VPC only. SSH is opened only to an explicitly configured CIDR.
    ///
    /// # Errors
    /// Propagates declaration failures.
    pub fn declare(
        b: &mut GraphBuilder,
        db: &DbInstanceConfig,
        net: &Network,
        role: &DbHostRole,
        user_data: String,
    ) -> Result<Self, GraphError> {
        let name = &db.name;
        let ami = b.declare(
            &format!("{name}-ami"),
            &GetAmi {
                most_recent: true,
                owners: vec!["amazon".to_string()],
                filters: vec![AmiFilter {
                    name: "name".to_string(),
                    values: vec!["amzn2-ami-hvm-*-x86_64-gp2".to_string()],
                }],
            },
            Options::new(),
        )?;

        let security_group = b.declare(
            &format!("{name}-sg"),
            &SecurityGroup {
                vpc_id: net.vpc.id(),
                description: format!("Security Group for {name}"),
                egress: vec![SecurityGroupEgress {
                    protocol: "-1".to_string(),
                    from_port: 0,
                    to_port: 0,
                    cidr_blocks: vec!["0.0.0.0/0".to_string()],
                }],
                tags: name_tag(&format!("{name}-sg")),
            },
            Options::new(),
        )?;

        let postgres_rule = b.declare(
            &format!("{name}-postgres"),
            &ingress(
                &security_group,
                POSTGRES_PORT,
                net.vpc.output("cidr_block"),
                "Postgres from the VPC",
            ),
            Options::new(),
        )?;

        let ssh_rule = match &db.ssh_cidr {
            Some(cidr) => Some(b.declare(
                &format!("{name}-ssh"),
                &ingress(&security_group, SSH_PORT, cidr.into(), "SSH from the operator network"),
                Options::new(),
            )?),
            None => None,
        };

        let mut opts = Options::new().readiness(bootstrap::readiness_gate(db));
        for attachment in &role.attachments {
            opts = opts.depends_on(attachment);
        }
        let instance = b.declare(
            name,
            &Instance {
                ami: ami.id(),
                instance_type: db.instance_type.clone(),
                subnet_id: net.anchor_subnet.id(),
                vpc_security_group_ids: vec![security_group.id()],
                iam_instance_profile: role.profile.output("name"),
                key_name: db.key_name.clone(),
                user_data,
                user_data_replace_on_change: true,
                tags: name_tag(name),
            },
            opts,
        )?;

        debug!(host = %name, ssh = db.ssh_cidr.is_some(), "Declared database host");
        Ok(Self {
            ami,
            security_group,
            postgres_rule,
            ssh_rule,
            instance,
        })
    }
}

fn ingress(
    group: &Handle<SecurityGroup>,
    port: u16,
    source: Value,
    description: &str,
) -> SecurityGroupRule {
    SecurityGroupRule {
        rule_type: "ingress".to_string(),
        protocol: "tcp".to_string(),
        from_port: port,
        to_port: port,
        security_group_id: group.id(),
        cidr_blocks: vec![source],
        source_security_group_id: None,
        description: Some(description.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::kinds::aws::Bucket;
    use crate::kinds::Tags;
    use tic_graph::{Graph, ResourceRecord};

    struct Fixture {
        graph: Graph,
        cluster: Cluster,
        host: DbHost,
    }

    fn declared(db: &DbInstanceConfig) -> Fixture {
        let mut b = GraphBuilder::new("dev");
        let net = Network::declare(&mut b, &NetworkConfig::default()).unwrap();
        let roles = ClusterRoles::declare(&mut b).unwrap();
        let cluster = Cluster::declare(&mut b, &ClusterConfig::default(), &net, &roles).unwrap();
        let bucket = b
            .declare(
                "db-backups",
                &Bucket {
                    bucket: Some("backups".into()),
                    bucket_prefix: None,
                    force_destroy: false,
                    tags: Tags::new(),
                },
                Options::new(),
            )
            .unwrap();
        let role = DbHostRole::declare(&mut b, &db.name, &bucket).unwrap();
        let host = DbHost::declare(&mut b, db, &net, &role, "#!/bin/bash".into()).unwrap();
        Fixture {
            graph: b.build().unwrap(),
            cluster,
            host,
        }
    }

    #[test]
    fn test_cluster_containment_edges() {
        let f = declared(&DbInstanceConfig::default());
        let cluster = f.graph.node(f.cluster.cluster.resource_id()).unwrap();
        for dep in [
            "private-subnet-a",
            "private-subnet-b",
            "node-sg",
            "eks-role",
            "eks-cluster-eks-role",
        ] {
            assert!(cluster.depends_on.iter().any(|d| d.as_str() == dep), "missing {dep}");
        }
        let group = f.graph.node(f.cluster.node_group.resource_id()).unwrap();
        for dep in ["eks-cluster", "eks-node-role", "eks-cni-policy", "private-subnet-a"] {
            assert!(group.depends_on.iter().any(|d| d.as_str() == dep), "missing {dep}");
        }
        assert_eq!(f.cluster.addons.len(), 4);
        assert!(f.graph.find("vpc-cni-addon").is_some());
    }

    #[test]
    fn test_cluster_ready_waits_for_node_group() {
        let f = declared(&DbInstanceConfig::default());
        let cluster = f.graph.node(f.cluster.cluster.resource_id()).unwrap();
        let gate = cluster.readiness.as_ref().unwrap();
        assert_eq!(
            gate.signal,
            ReadinessSignal::Attachment {
                kind: NodeGroup::TYPE.to_string()
            }
        );
    }

    #[test]
    fn test_kubeconfig_uses_exec_auth() {
        let f = declared(&DbInstanceConfig::default());
        let access = f.graph.node(f.cluster.access.resource_id()).unwrap();
        let mut lookup =
            |r: &tic_graph::OutputRef| Some(serde_json::Value::from(format!("<{}>", r.attr())));
        let resolved = tic_graph::value::resolve(&access.inputs, &mut lookup).unwrap();
        let doc: serde_json::Value =
            serde_json::from_str(resolved["kubeconfig"].as_str().unwrap()).unwrap();
        assert_eq!(doc["clusters"][0]["cluster"]["server"], "<endpoint>");
        assert_eq!(doc["users"][0]["user"]["exec"]["args"][3], "<name>");
    }

    #[test]
    fn test_no_ssh_without_cidr() {
        let f = declared(&DbInstanceConfig::default());
        assert!(f.host.ssh_rule.is_none());
        assert!(f.graph.find("db-instance-ssh").is_none());
        let rule = f.graph.node(f.host.postgres_rule.resource_id()).unwrap();
        assert_eq!(rule.inputs["from_port"], 5432);
        assert!(rule.depends_on.iter().any(|d| d.as_str() == "vpc"));
    }

    #[test]
    fn test_ssh_limited_to_configured_cidr() {
        let db = DbInstanceConfig {
            ssh_cidr: Some("203.0.113.0/24".into()),
            ..DbInstanceConfig::default()
        };
        let f = declared(&db);
        let rule = f.graph.find("db-instance-ssh").unwrap();
        assert_eq!(rule.inputs["cidr_blocks"][0], "203.0.113.0/24");
    }

    #[test]
    fn test_instance_has_bootstrap_gate() {
        let f = declared(&DbInstanceConfig::default());
        let instance = f.graph.node(f.host.instance.resource_id()).unwrap();
        assert!(matches!(
            instance.readiness.as_ref().map(|g| &g.signal),
            Some(ReadinessSignal::Probe { check, .. }) if check == bootstrap::INSTANCE_TAG_CHECK
        ));
        assert!(instance.depends_on.iter().any(|d| d.as_str() == "db-instance-policy-attachment"));
    }

    #[test]
    fn test_cluster_phase_follows_state() {
        let f = declared(&DbInstanceConfig::default());
        let dir = tempfile::tempdir().unwrap();
        let mut state = StackState::new("dev", dir.path());
        let id = f.cluster.cluster.resource_id();
        assert_eq!(ClusterPhase::observe(&state, id), ClusterPhase::Declared);

        let node = f.graph.node(id).unwrap();
        state.resources.insert(
            id.clone(),
            ResourceRecord {
                kind: node.kind.clone(),
                role: node.role,
                inputs: node.inputs.clone(),
                outputs: serde_json::Map::new(),
                depends_on: node.depends_on.clone(),
                status: ResourceStatus::Active,
                protect: false,
                readiness: node.readiness.clone(),
                updated_at: String::new(),
            },
        );
        assert_eq!(ClusterPhase::observe(&state, id), ClusterPhase::Active);
        state.set_status(id, ResourceStatus::Ready);
        assert_eq!(ClusterPhase::observe(&state, id).to_string(), "ready");
    }
}
