//! AWS resource kinds.

use serde::Serialize;
use tic_graph::Value;

use super::{no_tags, Tags};

// ---------------------------------------------------------------------------
// EC2 networking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Vpc {
    pub cidr_block: String,
    pub enable_dns_hostnames: bool,
    pub enable_dns_support: bool,
    #[serde(skip_serializing_if = "no_tags")]
    pub tags: Tags,
}

impl_kind!(Vpc => "aws:ec2:Vpc",
    outputs: ["id", "arn", "cidr_block"],
    taggable: true,
    replace_on: ["cidr_block"],
);

#[derive(Debug, Clone, Serialize)]
pub struct Subnet {
    pub vpc_id: Value,
    pub cidr_block: String,
    pub availability_zone: String,
    pub map_public_ip_on_launch: bool,
    #[serde(skip_serializing_if = "no_tags")]
    pub tags: Tags,
}

impl_kind!(Subnet => "aws:ec2:Subnet",
    outputs: ["id", "arn", "cidr_block", "availability_zone"],
    taggable: true,
    replace_on: ["vpc_id", "cidr_block", "availability_zone"],
);

#[derive(Debug, Clone, Serialize)]
pub struct InternetGateway {
    pub vpc_id: Value,
    #[serde(skip_serializing_if = "no_tags")]
    pub tags: Tags,
}

impl_kind!(InternetGateway => "aws:ec2:InternetGateway",
    outputs: ["id", "arn"],
    taggable: true,
);

#[derive(Debug, Clone, Serialize)]
pub struct Eip {
    pub domain: String,
    #[serde(skip_serializing_if = "no_tags")]
    pub tags: Tags,
}

impl_kind!(Eip => "aws:ec2:Eip",
    outputs: ["id", "allocation_id", "public_ip"],
    taggable: true,
);

#[derive(Debug, Clone, Serialize)]
pub struct NatGateway {
    pub subnet_id: Value,
    pub allocation_id: Value,
    #[serde(skip_serializing_if = "no_tags")]
    pub tags: Tags,
}

impl_kind!(NatGateway => "aws:ec2:NatGateway",
    outputs: ["id", "private_ip", "public_ip"],
    taggable: true,
    replace_on: ["subnet_id", "allocation_id"],
);

/// One route of a route table. Exactly one target is set.
#[derive(Debug, Clone, Serialize)]
pub struct Route {
    pub cidr_block: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nat_gateway_id: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteTable {
    pub vpc_id: Value,
    pub routes: Vec<Route>,
    #[serde(skip_serializing_if = "no_tags")]
    pub tags: Tags,
}

impl_kind!(RouteTable => "aws:ec2:RouteTable",
    outputs: ["id", "arn"],
    taggable: true,
    replace_on: ["vpc_id"],
);

#[derive(Debug, Clone, Serialize)]
pub struct RouteTableAssociation {
    pub route_table_id: Value,
    pub subnet_id: Value,
}

impl_kind!(RouteTableAssociation => "aws:ec2:RouteTableAssociation",
    outputs: ["id"],
    replace_on: ["subnet_id"],
);

/// Inline egress rule of a security group.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityGroupEgress {
    pub protocol: String,
    pub from_port: u16,
    pub to_port: u16,
    pub cidr_blocks: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityGroup {
    pub vpc_id: Value,
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub egress: Vec<SecurityGroupEgress>,
    #[serde(skip_serializing_if = "no_tags")]
    pub tags: Tags,
}

impl_kind!(SecurityGroup => "aws:ec2:SecurityGroup",
    outputs: ["id", "arn"],
    taggable: true,
    replace_on: ["vpc_id", "description"],
);

#[derive(Debug, Clone, Serialize)]
pub struct SecurityGroupRule {
    #[serde(rename = "type")]
    pub rule_type: String,
    pub protocol: String,
    pub from_port: u16,
    pub to_port: u16,
    pub security_group_id: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cidr_blocks: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_security_group_id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl_kind!(SecurityGroupRule => "aws:ec2:SecurityGroupRule",
    outputs: ["id"],
    replace_on: [
        "type",
        "protocol",
        "from_port",
        "to_port",
        "cidr_blocks",
        "source_security_group_id",
    ],
);

// ---------------------------------------------------------------------------
// EC2 compute
// ---------------------------------------------------------------------------

/// Name filter of an AMI lookup.
#[derive(Debug, Clone, Serialize)]
pub struct AmiFilter {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetAmi {
    pub most_recent: bool,
    pub owners: Vec<String>,
    pub filters: Vec<AmiFilter>,
}

impl_kind!(GetAmi => "aws:ec2:getAmi",
    outputs: ["id", "name"],
    role: Data,
);

#[derive(Debug, Clone, Serialize)]
pub struct Instance {
    pub ami: Value,
    pub instance_type: String,
    pub subnet_id: Value,
    pub vpc_security_group_ids: Vec<Value>,
    pub iam_instance_profile: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    pub user_data: String,
    pub user_data_replace_on_change: bool,
    #[serde(skip_serializing_if = "no_tags")]
    pub tags: Tags,
}

impl_kind!(Instance => "aws:ec2:Instance",
    outputs: ["id", "arn", "private_ip", "private_dns", "public_dns"],
    taggable: true,
    replace_on: ["ami", "subnet_id", "user_data"],
);

// ---------------------------------------------------------------------------
// IAM
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct GetCallerIdentity {}

impl_kind!(GetCallerIdentity => "aws:index:getCallerIdentity",
    outputs: ["account_id", "arn", "user_id"],
    role: Data,
);

/// Principal block of a policy statement.
#[derive(Debug, Clone, Serialize)]
pub struct Principal {
    #[serde(rename = "type")]
    pub principal_type: String,
    pub identifiers: Vec<Value>,
}

/// Condition block of a policy statement.
#[derive(Debug, Clone, Serialize)]
pub struct Condition {
    pub test: String,
    pub variable: Value,
    pub values: Vec<Value>,
}

/// Statement of a computed policy document.
#[derive(Debug, Clone, Serialize)]
pub struct Statement {
    pub effect: String,
    pub actions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub principals: Vec<Principal>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Policy document whose condition keys depend on other outputs.
#[derive(Debug, Clone, Serialize)]
pub struct GetPolicyDocument {
    pub statements: Vec<Statement>,
}

impl_kind!(GetPolicyDocument => "aws:iam:getPolicyDocument",
    outputs: ["json"],
    role: Data,
);

#[derive(Debug, Clone, Serialize)]
pub struct Role {
    pub name: String,
    pub assume_role_policy: Value,
    #[serde(skip_serializing_if = "no_tags")]
    pub tags: Tags,
}

impl_kind!(Role => "aws:iam:Role",
    outputs: ["id", "arn", "name"],
    taggable: true,
    replace_on: ["name"],
);

#[derive(Debug, Clone, Serialize)]
pub struct Policy {
    pub name: String,
    pub description: String,
    pub policy: Value,
    #[serde(skip_serializing_if = "no_tags")]
    pub tags: Tags,
}

impl_kind!(Policy => "aws:iam:Policy",
    outputs: ["id", "arn"],
    taggable: true,
    replace_on: ["name"],
);

#[derive(Debug, Clone, Serialize)]
pub struct RolePolicyAttachment {
    pub role: Value,
    pub policy_arn: Value,
}

impl_kind!(RolePolicyAttachment => "aws:iam:RolePolicyAttachment",
    outputs: ["id"],
    replace_on: ["role", "policy_arn"],
);

#[derive(Debug, Clone, Serialize)]
pub struct InstanceProfile {
    pub name: String,
    pub role: Value,
    #[serde(skip_serializing_if = "no_tags")]
    pub tags: Tags,
}

impl_kind!(InstanceProfile => "aws:iam:InstanceProfile",
    outputs: ["id", "arn", "name"],
    taggable: true,
    replace_on: ["name"],
);

#[derive(Debug, Clone, Serialize)]
pub struct OpenIdConnectProvider {
    pub url: Value,
    pub client_id_lists: Vec<String>,
    pub thumbprint_lists: Vec<Value>,
    #[serde(skip_serializing_if = "no_tags")]
    pub tags: Tags,
}

impl_kind!(OpenIdConnectProvider => "aws:iam:OpenIdConnectProvider",
    outputs: ["arn", "url"],
    taggable: true,
    replace_on: ["url"],
);

// ---------------------------------------------------------------------------
// EKS and load balancing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ClusterVpcConfig {
    pub subnet_ids: Vec<Value>,
    pub security_group_ids: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EksCluster {
    pub name: String,
    pub version: String,
    pub role_arn: Value,
    pub vpc_config: ClusterVpcConfig,
    #[serde(skip_serializing_if = "no_tags")]
    pub tags: Tags,
}

impl_kind!(EksCluster => "aws:eks:Cluster",
    outputs: [
        "id",
        "arn",
        "name",
        "endpoint",
        "certificate_authority_data",
        "oidc_issuer",
        "version",
    ],
    taggable: true,
    replace_on: ["name", "role_arn", "vpc_config"],
);

#[derive(Debug, Clone, Serialize)]
pub struct EksAddon {
    pub cluster_name: Value,
    pub addon_name: String,
    pub resolve_conflicts_on_update: String,
    #[serde(skip_serializing_if = "no_tags")]
    pub tags: Tags,
}

impl_kind!(EksAddon => "aws:eks:Addon",
    outputs: ["id", "arn"],
    taggable: true,
    replace_on: ["cluster_name", "addon_name"],
);

#[derive(Debug, Clone, Serialize)]
pub struct ScalingConfig {
    pub desired_size: u32,
    pub min_size: u32,
    pub max_size: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeGroup {
    pub cluster_name: Value,
    pub node_role_arn: Value,
    pub subnet_ids: Vec<Value>,
    pub scaling_config: ScalingConfig,
    pub instance_types: Vec<String>,
    #[serde(skip_serializing_if = "no_tags")]
    pub tags: Tags,
}

impl_kind!(NodeGroup => "aws:eks:NodeGroup",
    outputs: ["id", "arn", "status"],
    taggable: true,
    replace_on: ["cluster_name", "node_role_arn", "subnet_ids", "instance_types"],
);

#[derive(Debug, Clone, Serialize)]
pub struct LoadBalancer {
    pub internal: bool,
    pub load_balancer_type: String,
    pub security_groups: Vec<Value>,
    pub subnets: Vec<Value>,
    #[serde(skip_serializing_if = "no_tags")]
    pub tags: Tags,
}

impl_kind!(LoadBalancer => "aws:lb:LoadBalancer",
    outputs: ["id", "arn", "dns_name"],
    taggable: true,
    replace_on: ["internal", "load_balancer_type"],
);

// ---------------------------------------------------------------------------
// ECR
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ImageScanningConfiguration {
    pub scan_on_push: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EcrRepository {
    pub name: String,
    pub image_tag_mutability: String,
    pub image_scanning_configuration: ImageScanningConfiguration,
    pub force_delete: bool,
    #[serde(skip_serializing_if = "no_tags")]
    pub tags: Tags,
}

impl_kind!(EcrRepository => "aws:ecr:Repository",
    outputs: ["id", "arn", "name", "repository_url", "registry_id"],
    taggable: true,
    replace_on: ["name"],
);

#[derive(Debug, Clone, Serialize)]
pub struct EcrLifecyclePolicy {
    pub repository: Value,
    pub policy: Value,
}

impl_kind!(EcrLifecyclePolicy => "aws:ecr:LifecyclePolicy",
    outputs: ["id"],
    replace_on: ["repository"],
);

#[derive(Debug, Clone, Serialize)]
pub struct GetAuthorizationToken {
    pub registry_id: Value,
}

impl_kind!(GetAuthorizationToken => "aws:ecr:getAuthorizationToken",
    outputs: ["user_name", "password", "proxy_endpoint"],
    role: Data,
);

// ---------------------------------------------------------------------------
// Route 53 and Secrets Manager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ZoneVpc {
    pub vpc_id: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Zone {
    pub name: String,
    pub comment: String,
    pub vpcs: Vec<ZoneVpc>,
    #[serde(skip_serializing_if = "no_tags")]
    pub tags: Tags,
}

impl_kind!(Zone => "aws:route53:Zone",
    outputs: ["zone_id", "arn", "name"],
    taggable: true,
    replace_on: ["name"],
);

#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub zone_id: Value,
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub ttl: u32,
    pub records: Vec<Value>,
}

impl_kind!(Record => "aws:route53:Record",
    outputs: ["id", "fqdn"],
    replace_on: ["zone_id", "name", "type"],
);

#[derive(Debug, Clone, Serialize)]
pub struct Secret {
    pub name: String,
    pub description: String,
    pub recovery_window_in_days: u32,
    #[serde(skip_serializing_if = "no_tags")]
    pub tags: Tags,
}

impl_kind!(Secret => "aws:secretsmanager:Secret",
    outputs: ["id", "arn", "name"],
    taggable: true,
    replace_on: ["name"],
);

#[derive(Debug, Clone, Serialize)]
pub struct SecretVersion {
    pub secret_id: Value,
    pub secret_string: Value,
}

impl_kind!(SecretVersion => "aws:secretsmanager:SecretVersion",
    outputs: ["id", "arn", "version_id"],
    replace_on: ["secret_id"],
);

// ---------------------------------------------------------------------------
// S3 and AWS Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Bucket {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_prefix: Option<String>,
    pub force_destroy: bool,
    #[serde(skip_serializing_if = "no_tags")]
    pub tags: Tags,
}

impl_kind!(Bucket => "aws:s3:Bucket",
    outputs: ["id", "arn", "bucket"],
    taggable: true,
    replace_on: ["bucket", "bucket_prefix"],
);

#[derive(Debug, Clone, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct BucketPublicAccessBlock {
    pub bucket: Value,
    pub block_public_acls: bool,
    pub block_public_policy: bool,
    pub ignore_public_acls: bool,
    pub restrict_public_buckets: bool,
}

impl_kind!(BucketPublicAccessBlock => "aws:s3:BucketPublicAccessBlock",
    outputs: ["id"],
    replace_on: ["bucket"],
);

#[derive(Debug, Clone, Serialize)]
pub struct BucketPolicy {
    pub bucket: Value,
    pub policy: Value,
}

impl_kind!(BucketPolicy => "aws:s3:BucketPolicy",
    outputs: ["id"],
    replace_on: ["bucket"],
);

#[derive(Debug, Clone, Serialize)]
pub struct RecordingGroup {
    pub all_supported: bool,
    pub include_global_resource_types: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigRecorder {
    pub name: String,
    pub role_arn: Value,
    pub recording_group: RecordingGroup,
}

impl_kind!(ConfigRecorder => "aws:cfg:Recorder",
    outputs: ["id", "name"],
    replace_on: ["name"],
);

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotDeliveryProperties {
    pub delivery_frequency: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigDeliveryChannel {
    pub name: String,
    pub s3_bucket_name: Value,
    pub snapshot_delivery_properties: SnapshotDeliveryProperties,
}

impl_kind!(ConfigDeliveryChannel => "aws:cfg:DeliveryChannel",
    outputs: ["id"],
    replace_on: ["name"],
);

#[derive(Debug, Clone, Serialize)]
pub struct ConfigRecorderStatus {
    pub name: Value,
    pub is_enabled: bool,
}

impl_kind!(ConfigRecorderStatus => "aws:cfg:RecorderStatus",
    outputs: ["id"],
    replace_on: ["name"],
);

#[derive(Debug, Clone, Serialize)]
pub struct RuleSource {
    pub owner: String,
    pub source_identifier: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigRule {
    pub name: String,
    pub source: RuleSource,
}

impl_kind!(ConfigRule => "aws:cfg:Rule",
    outputs: ["id", "arn"],
    replace_on: ["name"],
);
