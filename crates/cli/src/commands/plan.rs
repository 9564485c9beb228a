//! Plan command - diff the stack against recorded state.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;
use tic_graph::{Plan, StackState};

use super::{load_config, synthesize_for, DEFAULT_STATE_DIR};
use crate::ui;

/// Show what an apply would change.
#[derive(Args)]
pub struct PlanCommand {
    /// Directory holding recorded state.
    #[arg(long, default_value = DEFAULT_STATE_DIR)]
    state_dir: PathBuf,

    /// Also list unchanged resources and lookups.
    #[arg(long)]
    all: bool,

    /// Output the plan as JSON.
    #[arg(long)]
    json: bool,
}

impl PlanCommand {
    /// Run the plan command.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack does not synthesize, state cannot be
    /// read, or the plan would delete a protected resource.
    pub fn run(&self, config: &Path) -> Result<()> {
        let cfg = load_config(config)?;
        let state = StackState::load_or_new(&self.state_dir, &cfg.stack)?;
        let graph = synthesize_for(&cfg, &state)?;
        let plan = Plan::compute(&graph, &state)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&plan)?);
            return Ok(());
        }

        ui::print_section(&format!("Plan for {}", cfg.stack));
        ui::print_plan(&plan, self.all);
        if !plan.has_changes() {
            ui::print_success("No changes. Recorded state matches the stack.");
        }
        Ok(())
    }
}
