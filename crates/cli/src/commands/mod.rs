//! Subcommands.

pub mod lint;
pub mod order;
pub mod plan;
pub mod rehearse;
pub mod synth;

use std::path::Path;

use anyhow::{Context, Result};
use tic_graph::{Graph, StackState};
use tic_stack::{synthesize, StackConfig};

/// Default directory for recorded state.
pub const DEFAULT_STATE_DIR: &str = ".tic-state";

/// Load and validate the stack file.
pub fn load_config(path: &Path) -> Result<StackConfig> {
    StackConfig::load(path).with_context(|| format!("Failed to load stack file {}", path.display()))
}

/// Synthesize with today's date as the creation stamp.
pub fn synthesize_fresh(cfg: &StackConfig) -> Result<Graph> {
    let created = chrono::Utc::now().format("%Y-%m-%d").to_string();
    synthesize(cfg, &created).context("Failed to synthesize stack")
}

/// Synthesize with the creation stamp recorded in `state`.
pub fn synthesize_for(cfg: &StackConfig, state: &StackState) -> Result<Graph> {
    synthesize(cfg, &state.created_date()).context("Failed to synthesize stack")
}
