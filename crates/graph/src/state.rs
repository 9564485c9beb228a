//! Stack state persistence.
//!
//! Records what the last apply produced for each resource: the inputs it was
//! created from, the outputs the provider reported and its lifecycle status.
//! Planning diffs the desired graph against this record.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{info, warn};

use crate::error::{ApplyError, GraphError};
use crate::graph::{NodeRole, ReadinessGate, ResourceId};
use crate::order::CreateOrder;
use crate::provider::Outputs;
use crate::value::OutputRef;

/// Lifecycle of a recorded resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Known to the graph, no action taken yet.
    Declared,
    /// Provider call in flight.
    Creating,
    /// Provider reported success.
    Active,
    /// Readiness gate passed (or none declared).
    Ready,
    /// Provider call or readiness gate failed.
    Failed,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Declared => write!(f, "declared"),
            Self::Creating => write!(f, "creating"),
            Self::Active => write!(f, "active"),
            Self::Ready => write!(f, "ready"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// What the last apply recorded for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Type token.
    pub kind: String,
    /// Managed or data.
    #[serde(default)]
    pub role: NodeRole,
    /// Inputs in document form, as last applied.
    pub inputs: Json,
    /// Outputs reported by the provider.
    #[serde(default)]
    pub outputs: Outputs,
    /// Edges at the time of the last apply.
    #[serde(default)]
    pub depends_on: BTreeSet<ResourceId>,
    /// Lifecycle status.
    pub status: ResourceStatus,
    /// Deletion guard.
    #[serde(default)]
    pub protect: bool,
    /// Readiness gate at the time of the last apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness: Option<ReadinessGate>,
    /// Timestamp of last update.
    pub updated_at: String,
}

/// Persistent state of one stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackState {
    /// Stack name.
    pub stack: String,
    /// Records keyed by resource name.
    #[serde(default)]
    pub resources: BTreeMap<ResourceId, ResourceRecord>,
    /// Timestamp of the first save.
    pub created_at: String,
    /// Timestamp of last update.
    pub updated_at: String,
    /// Directory holding the state file.
    #[serde(skip)]
    pub state_dir: PathBuf,
}

impl StackState {
    /// Create an empty state.
    #[must_use]
    pub fn new(stack: impl Into<String>, state_dir: impl Into<PathBuf>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            stack: stack.into(),
            resources: BTreeMap::new(),
            created_at: now.clone(),
            updated_at: now,
            state_dir: state_dir.into(),
        }
    }

    /// Get the state file path.
    #[must_use]
    pub fn state_file(state_dir: &Path, stack: &str) -> PathBuf {
        state_dir.join(format!("{stack}.state.json"))
    }

    /// Get the lock file path.
    #[must_use]
    pub fn lock_file(state_dir: &Path, stack: &str) -> PathBuf {
        state_dir.join(format!("{stack}.lock"))
    }

    /// Load state from file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(state_dir: &Path, stack: &str) -> Result<Option<Self>> {
        let path = Self::state_file(state_dir, stack);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path).context("Failed to read state file")?;
        let mut state: Self =
            serde_json::from_str(&content).context("Failed to parse state file")?;
        state.state_dir = state_dir.to_path_buf();

        info!(
            stack = %state.stack,
            resources = state.resources.len(),
            "Loaded stack state"
        );
        Ok(Some(state))
    }

    /// Load state from file, or start empty.
    ///
    /// # Errors
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_or_new(state_dir: &Path, stack: &str) -> Result<Self> {
        Ok(Self::load(state_dir, stack)?.unwrap_or_else(|| Self::new(stack, state_dir)))
    }

    /// Save state to file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&mut self) -> Result<()> {
        self.updated_at = chrono::Utc::now().to_rfc3339();

        let path = Self::state_file(&self.state_dir, &self.stack);
        std::fs::create_dir_all(&self.state_dir).context("Failed to create state directory")?;

        let content = serde_json::to_string_pretty(self).context("Failed to serialize state")?;
        std::fs::write(&path, content).context("Failed to write state file")?;

        Ok(())
    }

    /// Take the apply lock for this stack.
    ///
    /// # Errors
    /// Returns [`ApplyError::Locked`] if another apply holds it, or a state
    /// error if the lock file cannot be created.
    pub fn lock(&self) -> Result<StateLock, ApplyError> {
        std::fs::create_dir_all(&self.state_dir).context("Failed to create state directory")?;
        let path = Self::lock_file(&self.state_dir, &self.stack);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id()).context("Failed to write lock file")?;
                Ok(StateLock { path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(ApplyError::Locked {
                stack: self.stack.clone(),
                path: path.display().to_string(),
            }),
            Err(e) => Err(ApplyError::State(
                anyhow::Error::new(e).context("Failed to create lock file"),
            )),
        }
    }

    /// Record for a resource.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&ResourceRecord> {
        self.resources.get(id)
    }

    /// Status of a resource, `Declared` if unknown.
    #[must_use]
    pub fn status(&self, id: &ResourceId) -> ResourceStatus {
        self.resources
            .get(id)
            .map_or(ResourceStatus::Declared, |r| r.status)
    }

    /// Update the status of a recorded resource.
    pub fn set_status(&mut self, id: &ResourceId, status: ResourceStatus) {
        if let Some(record) = self.resources.get_mut(id) {
            record.status = status;
            record.updated_at = chrono::Utc::now().to_rfc3339();
        }
    }

    /// Output value for a reference, if recorded.
    #[must_use]
    pub fn output(&self, r: &OutputRef) -> Option<Json> {
        self.resources
            .get(r.resource())
            .and_then(|rec| rec.outputs.get(r.attr()))
            .cloned()
    }

    /// Order for tearing down every recorded resource.
    ///
    /// # Errors
    /// Returns [`GraphError::Cycle`] if the recorded edges are cyclic.
    pub fn destroy_order(&self) -> Result<Vec<ResourceId>, GraphError> {
        let order = CreateOrder::compute(self.resources.iter().map(|(id, r)| (id, &r.depends_on)))?;
        Ok(order.destruction())
    }

    /// Date part of `created_at`, used as a stable creation stamp.
    #[must_use]
    pub fn created_date(&self) -> String {
        chrono::DateTime::parse_from_rfc3339(&self.created_at).map_or_else(
            |_| self.created_at.clone(),
            |dt| dt.format("%Y-%m-%d").to_string(),
        )
    }
}

/// Held while an apply runs; removes the lock file on drop.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove lock file");
        }
    }
}
