//! Whole-stack synthesis: configuration in, validated graph out.

use tic_graph::{Graph, GraphBuilder, Options, Value};
use tracing::info;

use crate::bootstrap::render_user_data;
use crate::compute::{Cluster, DbHost};
use crate::config::StackConfig;
use crate::error::StackError;
use crate::identity::{ClusterRoles, DbHostRole, ServiceAccountRef, WorkloadGrant, WorkloadIdentity};
use crate::kinds::aws::GetCallerIdentity;
use crate::network::Network;
use crate::registry::Registry;
use crate::secrets::{Database, StoredSecret};
use crate::storage::{Audit, Backups};
use crate::tagging::AutoTags;
use crate::workload::{SecretsOperator, Workload, WorkloadInputs};

/// Build the graph for a stack.
///
/// `created` is the creation stamp written into the `user:stack-created`
/// tag; pass the date recorded in state so re-applies do not churn tags.
///
/// # Errors
/// Fails on invalid configuration, on a web app without a database, and on
/// any declaration the graph rejects.
pub fn synthesize(cfg: &StackConfig, created: &str) -> Result<Graph, StackError> {
    cfg.validate()?;
    if let (Some(app), None) = (&cfg.web_app, &cfg.db_instance) {
        return Err(StackError::MissingDatabase {
            app: app.name.clone(),
        });
    }

    let mut b = GraphBuilder::new(&cfg.stack);
    let tags = AutoTags::new(&cfg.tags, created);
    tags.install(&mut b);

    let net = Network::declare(&mut b, &cfg.network)?;
    let backups = Backups::declare(&mut b, &cfg.s3_bucket)?;
    if cfg.audit.enabled {
        Audit::declare(&mut b)?;
    }

    let roles = ClusterRoles::declare(&mut b)?;
    let cluster = Cluster::declare(&mut b, &cfg.cluster, &net, &roles)?;
    let registry = Registry::declare(&mut b, &cfg.registry)?;

    let database = match &cfg.db_instance {
        Some(db) => {
            let role = DbHostRole::declare(&mut b, &db.name, &backups.bucket)?;
            let user_data = render_user_data(db, &cfg.region, &cfg.git_repo_url, &cfg.s3_bucket)?;
            let host = DbHost::declare(&mut b, db, &net, &role, user_data)?;
            let database =
                Database::declare(&mut b, db, &cfg.internal_domain, &net, &host.instance)?;
            b.export("db_instance_private_dns", host.instance.output("private_dns"))?;
            b.export("db_host", database.record.output("fqdn"))?;
            Some(database)
        }
        None => None,
    };

    let operator = SecretsOperator::declare(&mut b, &cfg.external_secrets, &cluster.access)?;

    if let (Some(app), Some(database)) = (&cfg.web_app, &database) {
        let caller = b.declare("caller-identity", &GetCallerIdentity {}, Options::new())?;
        let account = ServiceAccountRef::for_app(&app.name);
        let identity = WorkloadIdentity::declare(
            &mut b,
            &WorkloadGrant {
                app: &app.name,
                account: &account,
                oidc: &cluster.oidc_provider,
                caller: &caller,
                region: &cfg.region,
                secret: &app.postgres_secret,
            },
        )?;
        let secret = StoredSecret::declare(&mut b, &app.postgres_secret, database)?;
        let image = registry.image(&mut b, &app.name, &app.image)?;
        let workload = Workload::declare(
            &mut b,
            &WorkloadInputs {
                app,
                region: &cfg.region,
                access: &cluster.access,
                operator: &operator,
                identity: &identity,
                secret: &secret,
                image: &image,
            },
        )?;
        b.export("web_app_hostname", workload.service.output("load_balancer_hostname"))?;
    }

    b.export("vpc_id", net.vpc.id())?;
    b.export("public_subnets", Value::list(net.public_subnet_ids()))?;
    b.export("private_subnets", Value::list(net.private_subnet_ids()))?;
    b.export("eks_cluster_name", cluster.cluster.output("name"))?;
    b.export("eks_cluster_endpoint", cluster.cluster.output("endpoint"))?;
    b.export("load_balancer_dns", cluster.load_balancer.output("dns_name"))?;
    b.export("ecr_repository_url", registry.repository.output("repository_url"))?;
    b.export("s3_bucket_name", backups.bucket.output("bucket"))?;
    b.export("tags", tags.as_map().clone())?;

    let graph = b.build()?;
    info!(
        stack = %cfg.stack,
        resources = graph.len(),
        levels = graph.order().groups().len(),
        "Synthesized stack"
    );
    Ok(graph)
}
