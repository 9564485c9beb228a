//! Synthesis errors.

use thiserror::Error;
use tic_graph::GraphError;

use crate::config::ConfigError;

/// Errors raised while turning a stack config into a graph.
#[derive(Error, Debug)]
pub enum StackError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A declaration was rejected by the graph.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The web app needs the database layer, which is not configured.
    #[error("Web app '{app}' requires a db_instance section: its secret is derived from the database")]
    MissingDatabase { app: String },

    /// The bootstrap script could not be rendered.
    #[error("Failed to render bootstrap script: {0}")]
    Bootstrap(String),
}
