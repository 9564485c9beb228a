//! Identity and access: one role per principal, each with the narrowest
//! trust and permissions its workload needs.

use serde_json::{json, Map, Value as Json};
use tic_graph::{GraphBuilder, GraphError, Handle, Options, Value};
use tracing::debug;

use crate::bootstrap::{BOOTSTRAP_TAG, BOOTSTRAP_TAG_VALUES};
use crate::kinds::aws::{
    Bucket, Condition, GetCallerIdentity, GetPolicyDocument, InstanceProfile,
    OpenIdConnectProvider, Policy, Principal, Role, RolePolicyAttachment, Statement,
};
use crate::kinds::name_tag;

pub const POLICY_VERSION: &str = "2012-10-17";
pub const EC2_SERVICE: &str = "ec2.amazonaws.com";
pub const EKS_SERVICE: &str = "eks.amazonaws.com";
/// Audience of tokens exchanged through the cluster OIDC provider.
pub const STS_AUDIENCE: &str = "sts.amazonaws.com";

const MANAGED_POLICY_PREFIX: &str = "arn:aws:iam::aws:policy/";

/// Annotation linking a service account to the role it assumes.
pub const ROLE_ARN_ANNOTATION: &str = "eks.amazonaws.com/role-arn";

/// Secrets Manager actions granted to a workload.
pub const SECRET_READ_ACTIONS: [&str; 2] = [
    "secretsmanager:GetSecretValue",
    "secretsmanager:DescribeSecret",
];

/// Trust policy letting one AWS service assume a role.
#[must_use]
pub fn service_trust_policy(service: &str) -> String {
    json!({
        "Version": POLICY_VERSION,
        "Statement": [{
            "Action": "sts:AssumeRole",
            "Effect": "Allow",
            "Principal": { "Service": service },
        }],
    })
    .to_string()
}

fn managed_policy(name: &str) -> String {
    format!("{MANAGED_POLICY_PREFIX}{name}")
}

/// A Kubernetes service account, the single source of both the account
/// object and the subject its role trusts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccountRef {
    pub namespace: String,
    pub name: String,
}

impl ServiceAccountRef {
    /// The `<app>-sa` account in the `<app>` namespace.
    #[must_use]
    pub fn for_app(app: &str) -> Self {
        Self {
            namespace: app.to_string(),
            name: format!("{app}-sa"),
        }
    }

    /// Web identity subject, `system:serviceaccount:<ns>:<name>`.
    #[must_use]
    pub fn subject(&self) -> String {
        format!("system:serviceaccount:{}:{}", self.namespace, self.name)
    }

    /// Parse a web identity subject.
    #[must_use]
    pub fn from_subject(subject: &str) -> Option<Self> {
        let rest = subject.strip_prefix("system:serviceaccount:")?;
        let (namespace, name) = rest.split_once(':')?;
        if namespace.is_empty() || name.is_empty() || name.contains(':') {
            return None;
        }
        Some(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

fn role_name(b: &GraphBuilder, logical: &str) -> String {
    format!("{}-{logical}", b.stack())
}

fn declare_service_role(
    b: &mut GraphBuilder,
    name: &str,
    service: &str,
) -> Result<Handle<Role>, GraphError> {
    let role = Role {
        name: role_name(b, name),
        assume_role_policy: service_trust_policy(service).into(),
        tags: name_tag(name),
    };
    b.declare(name, &role, Options::new())
}

fn attach(
    b: &mut GraphBuilder,
    name: &str,
    role: &Handle<Role>,
    policy_arn: impl Into<Value>,
) -> Result<Handle<RolePolicyAttachment>, GraphError> {
    b.declare(
        name,
        &RolePolicyAttachment {
            role: role.output("name"),
            policy_arn: policy_arn.into(),
        },
        Options::new(),
    )
}

/// Roles assumed by the cluster control plane and its worker nodes.
#[derive(Debug, Clone)]
pub struct ClusterRoles {
    pub cluster_role: Handle<Role>,
    pub cluster_policy: Handle<RolePolicyAttachment>,
    pub node_role: Handle<Role>,
    pub node_policies: Vec<Handle<RolePolicyAttachment>>,
}

impl ClusterRoles {
    /// Declare the control plane and worker roles with their managed
    /// policies.
    ///
    /// # Errors
    /// Propagates declaration failures.
    pub fn declare(b: &mut GraphBuilder) -> Result<Self, GraphError> {
        let cluster_role = declare_service_role(b, "eks-role", EKS_SERVICE)?;
        let cluster_policy = attach(
            b,
            "eks-cluster-eks-role",
            &cluster_role,
            managed_policy("AmazonEKSClusterPolicy"),
        )?;

        let node_role = declare_service_role(b, "eks-node-role", EC2_SERVICE)?;
        let mut node_policies = Vec::new();
        for (name, policy) in [
            ("node-role-ssm-managed", "AmazonSSMManagedInstanceCore"),
            ("eks-worker-node-policy", "AmazonEKSWorkerNodePolicy"),
            ("eks-cni-policy", "AmazonEKS_CNI_Policy"),
            ("ecr-readonly-policy", "AmazonEC2ContainerRegistryReadOnly"),
        ] {
            node_policies.push(attach(b, name, &node_role, managed_policy(policy))?);
        }

        Ok(Self {
            cluster_role,
            cluster_policy,
            node_role,
            node_policies,
        })
    }
}

/// Role and instance profile of the database host.
#[derive(Debug, Clone)]
pub struct DbHostRole {
    pub role: Handle<Role>,
    pub policy: Handle<Policy>,
    pub attachments: Vec<Handle<RolePolicyAttachment>>,
    pub profile: Handle<InstanceProfile>,
}

impl DbHostRole {
    /// Declare the host role: SSM access, read/write on the backup bucket,
    /// and tagging of its own instance with the bootstrap status only.
    ///
    /// # Errors
    /// Propagates declaration failures.
    pub fn declare(
        b: &mut GraphBuilder,
        host: &str,
        backups: &Handle<Bucket>,
    ) -> Result<Self, GraphError> {
        let role = declare_service_role(b, &format!("{host}-role"), EC2_SERVICE)?;

        let bucket_arn = backups.output("arn");
        let document = Value::object([
            ("Version", Value::from(POLICY_VERSION)),
            (
                "Statement",
                Value::list([
                    Value::object([
                        ("Sid", Value::from("BackupBucketList")),
                        ("Effect", Value::from("Allow")),
                        ("Action", Value::list(["s3:ListBucket"])),
                        ("Resource", bucket_arn.clone()),
                    ]),
                    Value::object([
                        ("Sid", Value::from("BackupObjects")),
                        ("Effect", Value::from("Allow")),
                        (
                            "Action",
                            Value::list(["s3:GetObject", "s3:PutObject", "s3:DeleteObject"]),
                        ),
                        ("Resource", Value::concat([bucket_arn, Value::from("/*")])),
                    ]),
                    Value::object([
                        ("Sid", Value::from("BootstrapStatusTag")),
                        ("Effect", Value::from("Allow")),
                        ("Action", Value::list(["ec2:CreateTags"])),
                        ("Resource", Value::from("arn:aws:ec2:*:*:instance/*")),
                        (
                            "Condition",
                            Value::object([
                                (
                                    "StringEquals",
                                    Value::object([(
                                        "aws:ARN",
                                        Value::from("${ec2:SourceInstanceARN}"),
                                    )]),
                                ),
                                (
                                    "ForAllValues:StringEquals",
                                    Value::object([(
                                        "aws:TagKeys",
                                        Value::list([BOOTSTRAP_TAG]),
                                    )]),
                                ),
                                (
                                    "StringEqualsIfExists",
                                    Value::object([(
                                        format!("aws:RequestTag/{BOOTSTRAP_TAG}"),
                                        Value::list(BOOTSTRAP_TAG_VALUES),
                                    )]),
                                ),
                            ]),
                        ),
                    ]),
                ]),
            ),
        ]);

        let policy = b.declare(
            &format!("{host}-policy"),
            &Policy {
                name: role_name(b, &format!("{host}-policy")),
                description: format!("Backups and bootstrap signalling for {host}"),
                policy: Value::json(document),
                tags: name_tag(&format!("{host}-policy")),
            },
            Options::new(),
        )?;

        let attachments = vec![
            attach(
                b,
                &format!("{host}-ssm-managed"),
                &role,
                managed_policy("AmazonSSMManagedInstanceCore"),
            )?,
            attach(b, &format!("{host}-policy-attachment"), &role, policy.output("arn"))?,
        ];

        let profile = b.declare(
            &format!("{host}-instance-profile"),
            &InstanceProfile {
                name: role_name(b, &format!("{host}-instance-profile")),
                role: role.output("name"),
                tags: name_tag(&format!("{host}-instance-profile")),
            },
            Options::new(),
        )?;

        Ok(Self {
            role,
            policy,
            attachments,
            profile,
        })
    }
}

/// Role assumed by one service account through the cluster OIDC provider.
#[derive(Debug, Clone)]
pub struct WorkloadIdentity {
    pub account: ServiceAccountRef,
    pub trust: Handle<GetPolicyDocument>,
    pub role: Handle<Role>,
    pub policy: Handle<Policy>,
    pub attachment: Handle<RolePolicyAttachment>,
}

/// Inputs of a workload role.
#[derive(Debug)]
pub struct WorkloadGrant<'a> {
    pub app: &'a str,
    pub account: &'a ServiceAccountRef,
    pub oidc: &'a Handle<OpenIdConnectProvider>,
    pub caller: &'a Handle<GetCallerIdentity>,
    pub region: &'a str,
    /// Name of the one secret the workload may read.
    pub secret: &'a str,
}

fn issuer_condition(oidc: &Handle<OpenIdConnectProvider>, key: &str, value: String) -> Condition {
    Condition {
        test: "StringEquals".to_string(),
        variable: Value::concat([
            Value::trim_prefix(oidc.output("url"), "https://"),
            Value::from(format!(":{key}")),
        ]),
        values: vec![value.into()],
    }
}

impl WorkloadIdentity {
    /// Declare the trust document, role and secret-read policy for a
    /// workload.
    ///
    /// The trust subject is derived from `grant.account`, the same value
    /// the service account object is built from.
    ///
    /// # Errors
    /// Propagates declaration failures.
    pub fn declare(b: &mut GraphBuilder, grant: &WorkloadGrant<'_>) -> Result<Self, GraphError> {
        let app = grant.app;
        let trust = b.declare(
            &format!("{app}-irsa-trust"),
            &GetPolicyDocument {
                statements: vec![Statement {
                    effect: "Allow".to_string(),
                    actions: vec!["sts:AssumeRoleWithWebIdentity".to_string()],
                    principals: vec![Principal {
                        principal_type: "Federated".to_string(),
                        identifiers: vec![grant.oidc.output("arn")],
                    }],
                    conditions: vec![
                        issuer_condition(grant.oidc, "sub", grant.account.subject()),
                        issuer_condition(grant.oidc, "aud", STS_AUDIENCE.to_string()),
                    ],
                }],
            },
            Options::new(),
        )?;

        let role = b.declare(
            &format!("{app}-irsa"),
            &Role {
                name: role_name(b, &format!("{app}-irsa")),
                assume_role_policy: trust.output("json"),
                tags: name_tag(&format!("{app}-irsa")),
            },
            Options::new(),
        )?;

        let document = Value::object([
            ("Version", Value::from(POLICY_VERSION)),
            (
                "Statement",
                Value::list([Value::object([
                    ("Effect", Value::from("Allow")),
                    ("Action", Value::list(SECRET_READ_ACTIONS)),
                    ("Resource", secret_arn_pattern(grant)),
                ])]),
            ),
        ]);
        let policy = b.declare(
            &format!("{app}-secrets-policy"),
            &Policy {
                name: role_name(b, &format!("{app}-secrets-policy")),
                description: format!("Read the {} secret", grant.secret),
                policy: Value::json(document),
                tags: name_tag(&format!("{app}-secrets-policy")),
            },
            Options::new(),
        )?;
        let attachment = attach(
            b,
            &format!("{app}-irsa-policy-attachment"),
            &role,
            policy.output("arn"),
        )?;

        debug!(app, subject = %grant.account.subject(), "Declared workload identity");
        Ok(Self {
            account: grant.account.clone(),
            trust,
            role,
            policy,
            attachment,
        })
    }
}

fn secret_arn_pattern(grant: &WorkloadGrant<'_>) -> Value {
    Value::concat([
        Value::from(format!("arn:aws:secretsmanager:{}:", grant.region)),
        grant.caller.output("account_id"),
        Value::from(format!(":secret:{}*", grant.secret)),
    ])
}

/// Render resolved `getPolicyDocument` inputs as an IAM policy document.
#[must_use]
pub fn render_policy_document(inputs: &Json) -> String {
    let statements: Vec<Json> = inputs
        .get("statements")
        .and_then(Json::as_array)
        .map(|list| list.iter().map(render_statement).collect())
        .unwrap_or_default();
    json!({ "Version": POLICY_VERSION, "Statement": statements }).to_string()
}

fn render_statement(s: &Json) -> Json {
    let mut out = Map::new();
    if let Some(effect) = s.get("effect") {
        out.insert("Effect".into(), effect.clone());
    }
    if let Some(actions) = s.get("actions") {
        out.insert("Action".into(), actions.clone());
    }

    let mut principals = Map::new();
    for p in s.get("principals").and_then(Json::as_array).into_iter().flatten() {
        if let Some(kind) = p.get("type").and_then(Json::as_str) {
            principals.insert(
                kind.to_string(),
                p.get("identifiers").cloned().unwrap_or(Json::Null),
            );
        }
    }
    if !principals.is_empty() {
        out.insert("Principal".into(), Json::Object(principals));
    }

    let mut conditions = Map::new();
    for c in s.get("conditions").and_then(Json::as_array).into_iter().flatten() {
        let (Some(test), Some(variable)) = (
            c.get("test").and_then(Json::as_str),
            c.get("variable").and_then(Json::as_str),
        ) else {
            continue;
        };
        let entry = conditions
            .entry(test.to_string())
            .or_insert_with(|| Json::Object(Map::new()));
        if let Json::Object(map) = entry {
            map.insert(
                variable.to_string(),
                c.get("values").cloned().unwrap_or(Json::Null),
            );
        }
    }
    if !conditions.is_empty() {
        out.insert("Condition".into(), Json::Object(conditions));
    }
    Json::Object(out)
}
