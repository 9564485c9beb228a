//! Backup bucket and the configuration audit trail.

use tic_graph::{GraphBuilder, GraphError, Handle, Options, Value};

use crate::identity::{service_trust_policy, POLICY_VERSION};
use crate::kinds::aws::{
    Bucket, BucketPolicy, BucketPublicAccessBlock, ConfigDeliveryChannel, ConfigRecorder,
    ConfigRecorderStatus, ConfigRule, RecordingGroup, Role, RolePolicyAttachment, RuleSource,
    SnapshotDeliveryProperties,
};
use crate::kinds::name_tag;

const CONFIG_SERVICE: &str = "config.amazonaws.com";

fn block_public_access(
    b: &mut GraphBuilder,
    name: &str,
    bucket: &Handle<Bucket>,
) -> Result<Handle<BucketPublicAccessBlock>, GraphError> {
    b.declare(
        name,
        &BucketPublicAccessBlock {
            bucket: bucket.id(),
            block_public_acls: true,
            block_public_policy: true,
            ignore_public_acls: true,
            restrict_public_buckets: true,
        },
        Options::new(),
    )
}

/// Database backup bucket.
#[derive(Debug, Clone)]
pub struct Backups {
    pub bucket: Handle<Bucket>,
    pub public_access_block: Handle<BucketPublicAccessBlock>,
}

impl Backups {
    /// Declare the bucket named `name` with public access blocked.
    ///
    /// Unlike the audit bucket it refuses deletion while it holds objects.
    ///
    /// # Errors
    /// Propagates declaration failures.
    pub fn declare(b: &mut GraphBuilder, name: &str) -> Result<Self, GraphError> {
        let bucket = b.declare(
            "db-backups",
            &Bucket {
                bucket: Some(name.to_string()),
                bucket_prefix: None,
                force_destroy: false,
                tags: name_tag(name),
            },
            Options::new(),
        )?;
        let public_access_block =
            block_public_access(b, "db-backups-public-access-block", &bucket)?;
        Ok(Self {
            bucket,
            public_access_block,
        })
    }
}

/// AWS Config recorder writing snapshots to its own bucket, with the
/// public-read rule for buckets.
#[derive(Debug, Clone)]
pub struct Audit {
    pub bucket: Handle<Bucket>,
    pub bucket_policy: Handle<BucketPolicy>,
    pub role: Handle<Role>,
    pub recorder: Handle<ConfigRecorder>,
    pub channel: Handle<ConfigDeliveryChannel>,
    pub status: Handle<ConfigRecorderStatus>,
    pub rule: Handle<ConfigRule>,
}

impl Audit {
    /// Declare the recorder chain.
    ///
    /// The recorder is enabled only after the delivery channel exists, and
    /// the rule is registered only after the recorder.
    ///
    /// # Errors
    /// Propagates declaration failures.
    pub fn declare(b: &mut GraphBuilder) -> Result<Self, GraphError> {
        let bucket = b.declare(
            "config-bucket",
            &Bucket {
                bucket: None,
                bucket_prefix: Some("aws-config-".to_string()),
                force_destroy: true,
                tags: name_tag("config-bucket"),
            },
            Options::new(),
        )?;
        block_public_access(b, "config-bucket-public-access-block", &bucket)?;

        let bucket_arn = bucket.output("arn");
        let service = || Value::object([("Service", CONFIG_SERVICE)]);
        let policy = Value::object([
            ("Version", Value::from(POLICY_VERSION)),
            (
                "Statement",
                Value::list([
                    Value::object([
                        ("Effect", Value::from("Allow")),
                        ("Principal", service()),
                        ("Action", Value::from("s3:PutObject")),
                        ("Resource", Value::concat([bucket_arn.clone(), Value::from("/*")])),
                        (
                            "Condition",
                            Value::object([(
                                "StringEquals",
                                Value::object([("s3:x-amz-acl", "bucket-owner-full-control")]),
                            )]),
                        ),
                    ]),
                    Value::object([
                        ("Effect", Value::from("Allow")),
                        ("Principal", service()),
                        ("Action", Value::from("s3:GetBucketAcl")),
                        ("Resource", bucket_arn),
                    ]),
                ]),
            ),
        ]);
        let bucket_policy = b.declare(
            "config-bucket-policy",
            &BucketPolicy {
                bucket: bucket.id(),
                policy: Value::json(policy),
            },
            Options::new(),
        )?;

        let role = b.declare(
            "config-role",
            &Role {
                name: format!("{}-config-role", b.stack()),
                assume_role_policy: service_trust_policy(CONFIG_SERVICE).into(),
                tags: name_tag("config-role"),
            },
            Options::new(),
        )?;
        let attachment = b.declare(
            "config-role-attachment",
            &RolePolicyAttachment {
                role: role.output("name"),
                policy_arn: "arn:aws:iam::aws:policy/service-role/AWS_ConfigRole".into(),
            },
            Options::new(),
        )?;

        let recorder = b.declare(
            "config-recorder",
            &ConfigRecorder {
                name: format!("{}-recorder", b.stack()),
                role_arn: role.output("arn"),
                recording_group: RecordingGroup {
                    all_supported: true,
                    include_global_resource_types: true,
                },
            },
            Options::new().depends_on(&attachment),
        )?;
        let channel = b.declare(
            "config-delivery-channel",
            &ConfigDeliveryChannel {
                name: format!("{}-delivery-channel", b.stack()),
                s3_bucket_name: bucket.output("bucket"),
                snapshot_delivery_properties: SnapshotDeliveryProperties {
                    delivery_frequency: "One_Hour".to_string(),
                },
            },
            Options::new().depends_on(&bucket_policy).depends_on(&recorder),
        )?;
        let status = b.declare(
            "config-recorder-status",
            &ConfigRecorderStatus {
                name: recorder.output("name"),
                is_enabled: true,
            },
            Options::new().depends_on(&channel),
        )?;
        let rule = b.declare(
            "s3-public-read-prohibited-rule",
            &ConfigRule {
                name: "s3-bucket-public-read-prohibited".to_string(),
                source: RuleSource {
                    owner: "AWS".to_string(),
                    source_identifier: "S3_BUCKET_PUBLIC_READ_PROHIBITED".to_string(),
                },
            },
            Options::new().depends_on(&recorder),
        )?;

        Ok(Self {
            bucket,
            bucket_policy,
            role,
            recorder,
            channel,
            status,
            rule,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_bucket_blocks_public_access() {
        let mut b = GraphBuilder::new("dev");
        let backups = Backups::declare(&mut b, "ultra-tic-dev-db-backups").unwrap();
        let graph = b.build().unwrap();
        let bucket = graph.node(backups.bucket.resource_id()).unwrap();
        assert_eq!(bucket.inputs["force_destroy"], false);
        assert_eq!(bucket.inputs["bucket"], "ultra-tic-dev-db-backups");
        let block = graph.node(backups.public_access_block.resource_id()).unwrap();
        assert_eq!(block.inputs["restrict_public_buckets"], true);
    }

    #[test]
    fn test_audit_chain_order() {
        let mut b = GraphBuilder::new("dev");
        let audit = Audit::declare(&mut b).unwrap();
        let graph = b.build().unwrap();
        let order = graph.order();
        let level = |h: &tic_graph::ResourceId| order.level(h).unwrap();
        assert!(level(audit.recorder.resource_id()) < level(audit.channel.resource_id()));
        assert!(level(audit.channel.resource_id()) < level(audit.status.resource_id()));
        assert!(level(audit.recorder.resource_id()) < level(audit.rule.resource_id()));
        assert!(level(audit.role.resource_id()) < level(audit.recorder.resource_id()));
    }
}
