//! Declaration-time and apply-time errors.

use thiserror::Error;

use crate::graph::ResourceId;
use crate::provider::ProviderError;

/// Errors raised while declaring or validating a resource graph.
///
/// These are surfaced before any resource action is attempted.
#[derive(Error, Debug)]
pub enum GraphError {
    /// Resource name is empty, too long or contains unsupported characters.
    #[error("Invalid resource name '{0}': expected 1-128 characters of [A-Za-z0-9_-]")]
    InvalidName(String),

    /// Two declarations share a name.
    #[error("Duplicate resource name: {0}")]
    Duplicate(ResourceId),

    /// A reference points at a resource that is not part of the graph.
    #[error("Resource {from} references {to}, which is not declared")]
    DanglingReference { from: ResourceId, to: ResourceId },

    /// A reference names an output the target kind does not produce.
    #[error("Resource {from} references unknown output '{attr}' of {target}")]
    UnknownOutput {
        from: ResourceId,
        target: ResourceId,
        attr: String,
    },

    /// An expression in the inputs could not be interpreted.
    #[error("Malformed reference in {from}: {detail}")]
    MalformedReference { from: ResourceId, detail: String },

    /// A document references another resource without declaring the edge.
    #[error("Resource {from} references {to} but does not list it in depends_on")]
    UndeclaredDependency { from: ResourceId, to: ResourceId },

    /// The dependency graph contains a cycle.
    #[error("Dependency cycle detected, stuck resources: {0:?}")]
    Cycle(Vec<ResourceId>),

    /// Resource arguments did not serialize to an object.
    #[error("Inputs of {0} must serialize to a JSON object")]
    InputsNotObject(ResourceId),

    /// Export name is reused.
    #[error("Duplicate export: {0}")]
    DuplicateExport(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while converging a graph against a provider.
#[derive(Error, Debug)]
pub enum ApplyError {
    /// The graph or document failed validation.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The provider rejected an operation on a resource.
    #[error("Provider failed on {id}: {source}")]
    Provider {
        id: ResourceId,
        #[source]
        source: ProviderError,
    },

    /// An input expression could not be resolved against recorded outputs.
    #[error("Cannot resolve inputs of {id}: {detail}")]
    Resolve { id: ResourceId, detail: String },

    /// The readiness gate reported a failure.
    #[error("Resource {id} reported not ready: {reason}")]
    NotReady { id: ResourceId, reason: String },

    /// The readiness gate did not report ready in time.
    #[error("Resource {id} did not become ready within {secs} seconds")]
    ReadinessTimeout { id: ResourceId, secs: u64 },

    /// A protected resource was scheduled for deletion.
    #[error("Resource {0} is protected and cannot be deleted")]
    Protected(ResourceId),

    /// Another apply holds the stack lock.
    #[error("Stack '{stack}' is locked by another apply ({path})")]
    Locked { stack: String, path: String },

    /// State persistence failed.
    #[error(transparent)]
    State(#[from] anyhow::Error),
}
