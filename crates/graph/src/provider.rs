//! Provider trait and common types.
//!
//! A provider turns resolved resource inputs into real cloud objects and
//! reports their output attributes. The convergence driver only talks to
//! providers through this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use thiserror::Error;

use crate::graph::{ReadinessGate, ResourceId};

/// Output attributes reported by a provider.
pub type Outputs = serde_json::Map<String, Json>;

/// Errors that can occur during provider operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Quota exceeded.
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// A parameter was rejected.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Caller lacks permission.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Operation timed out.
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    /// The provider does not handle this kind.
    #[error("Unsupported resource kind: {0}")]
    UnsupportedKind(String),
}

/// A resource operation with fully resolved inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// Logical name.
    pub id: ResourceId,
    /// Type token.
    pub kind: String,
    /// Inputs with every expression resolved.
    pub inputs: Json,
    /// Output attributes the graph expects back.
    pub outputs: Vec<String>,
}

/// Result of a readiness probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum Probe {
    /// Signal observed.
    Ready,
    /// Not yet; keep polling.
    Pending(String),
    /// Signal reported failure; stop polling.
    Failed(String),
}

/// Trait for infrastructure providers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Create a resource and return its outputs.
    async fn create(&self, req: &ResourceRequest) -> Result<Outputs, ProviderError>;

    /// Update a resource in place.
    async fn update(
        &self,
        req: &ResourceRequest,
        current: &Outputs,
    ) -> Result<Outputs, ProviderError>;

    /// Delete a resource.
    async fn delete(
        &self,
        id: &ResourceId,
        kind: &str,
        current: &Outputs,
    ) -> Result<(), ProviderError>;

    /// Look up a data source.
    async fn read(&self, req: &ResourceRequest) -> Result<Outputs, ProviderError>;

    /// Check a readiness gate.
    async fn probe(
        &self,
        id: &ResourceId,
        kind: &str,
        outputs: &Outputs,
        gate: &ReadinessGate,
    ) -> Result<Probe, ProviderError>;
}
