//! Database host bootstrap script.
//!
//! The script installs Ansible, runs `ansible-pull` against the stack's
//! playbook repository and reports the outcome as an instance tag. The
//! apply driver polls that tag through the instance readiness gate.

use std::collections::BTreeMap;

use handlebars::Handlebars;
use serde::Serialize;
use tic_graph::{ReadinessGate, ReadinessSignal};

use crate::config::DbInstanceConfig;
use crate::error::StackError;

/// Instance tag carrying the bootstrap outcome.
pub const BOOTSTRAP_TAG: &str = "bootstrap-status";
pub const BOOTSTRAP_COMPLETE: &str = "complete";
pub const BOOTSTRAP_FAILED: &str = "failed";
pub const BOOTSTRAP_TAG_VALUES: [&str; 2] = [BOOTSTRAP_COMPLETE, BOOTSTRAP_FAILED];

/// Provider check polled for the tag.
pub const INSTANCE_TAG_CHECK: &str = "instance-tag";

const POLL_INTERVAL_SECS: u64 = 15;

const USER_DATA: &str = r#"#!/bin/bash
set -euo pipefail
exec > >(tee -a /var/log/bootstrap.log) 2>&1

# No instance id to tag yet: failures here only reach the console.
trap 'echo "{{tag}}={{failed}}: instance metadata unavailable" > /dev/console' ERR

IMDS=http://169.254.169.254/latest
TOKEN=$(curl -sf --retry 5 -X PUT "$IMDS/api/token" \
  -H "X-aws-ec2-metadata-token-ttl-seconds: 300")
INSTANCE_ID=$(curl -sf --retry 5 -H "X-aws-ec2-metadata-token: $TOKEN" \
  "$IMDS/meta-data/instance-id")

report() {
  aws ec2 create-tags --region {{region}} --resources "$INSTANCE_ID" \
    --tags "Key={{tag}},Value=$1"
}
trap 'report {{failed}}' ERR

yum install -y git python3-pip
pip3 install ansible

ansible-pull -U {{git_repo_url}} \
  -e db_name={{database}} \
  -e db_user={{username}} \
  -e backup_bucket={{backup_bucket}} \
  {{playbook}}

trap - ERR
report {{complete}}
"#;

#[derive(Serialize)]
struct Context<'a> {
    region: &'a str,
    git_repo_url: &'a str,
    playbook: &'a str,
    database: &'a str,
    username: &'a str,
    backup_bucket: &'a str,
    tag: &'a str,
    complete: &'a str,
    failed: &'a str,
}

/// Render the user-data script for the database host.
///
/// # Errors
/// Returns [`StackError::Bootstrap`] if the template fails to render.
pub fn render_user_data(
    db: &DbInstanceConfig,
    region: &str,
    git_repo_url: &str,
    backup_bucket: &str,
) -> Result<String, StackError> {
    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars.set_strict_mode(true);
    handlebars
        .register_template_string("user-data", USER_DATA)
        .map_err(|e| StackError::Bootstrap(format!("Invalid user-data template: {e}")))?;

    let context = Context {
        region,
        git_repo_url,
        playbook: &db.playbook,
        database: &db.database,
        username: &db.username,
        backup_bucket,
        tag: BOOTSTRAP_TAG,
        complete: BOOTSTRAP_COMPLETE,
        failed: BOOTSTRAP_FAILED,
    };
    handlebars
        .render("user-data", &context)
        .map_err(|e| StackError::Bootstrap(format!("Failed to render user-data: {e}")))
}

/// Gate that holds the host until the bootstrap tag reads `complete`.
#[must_use]
pub fn readiness_gate(db: &DbInstanceConfig) -> ReadinessGate {
    ReadinessGate {
        signal: ReadinessSignal::Probe {
            check: INSTANCE_TAG_CHECK.to_string(),
            params: BTreeMap::from([
                ("key".to_string(), BOOTSTRAP_TAG.to_string()),
                ("ready".to_string(), BOOTSTRAP_COMPLETE.to_string()),
                ("failed".to_string(), BOOTSTRAP_FAILED.to_string()),
            ]),
        },
        timeout_secs: db.bootstrap_timeout_secs,
        interval_secs: POLL_INTERVAL_SECS,
    }
}
