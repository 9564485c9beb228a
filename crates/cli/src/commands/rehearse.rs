//! Rehearse and destroy commands - drive the in-memory provider.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tic_graph::{Engine, StackState};
use tic_stack::rehearsal_provider;
use tracing::info;

use super::{load_config, synthesize_for, DEFAULT_STATE_DIR};
use crate::ui;

/// Apply the stack against the rehearsal provider.
#[derive(Args)]
pub struct RehearseCommand {
    /// Directory holding recorded state.
    #[arg(long, default_value = DEFAULT_STATE_DIR)]
    state_dir: PathBuf,
}

impl RehearseCommand {
    /// Run the rehearse command.
    ///
    /// # Errors
    ///
    /// Returns the first synthesis, provider, readiness or state failure.
    /// Resources applied before the failure stay recorded.
    pub async fn run(&self, config: &Path) -> Result<()> {
        let cfg = load_config(config)?;
        let mut state = StackState::load_or_new(&self.state_dir, &cfg.stack)?;
        let graph = synthesize_for(&cfg, &state)?;

        ui::print_section(&format!("Rehearsing {}", cfg.stack));
        let engine = Engine::new(Arc::new(rehearsal_provider()));
        let report = engine
            .apply(&graph, &mut state)
            .await
            .context("Rehearsal failed")?;

        ui::print_plan(&report.plan, false);
        for id in &report.pending {
            ui::print_warning(&format!("{id} is active but not yet ready"));
        }
        println!();
        println!("{}", serde_json::to_string_pretty(&report.exports)?);
        info!(
            stack = %cfg.stack,
            state = %StackState::state_file(&self.state_dir, &cfg.stack).display(),
            "Rehearsal recorded"
        );
        ui::print_success("Rehearsal complete");
        Ok(())
    }
}

/// Delete every recorded resource.
#[derive(Args)]
pub struct DestroyCommand {
    /// Directory holding recorded state.
    #[arg(long, default_value = DEFAULT_STATE_DIR)]
    state_dir: PathBuf,
}

impl DestroyCommand {
    /// Run the destroy command.
    ///
    /// # Errors
    ///
    /// Returns an error if a recorded resource is protected or a delete
    /// fails.
    pub async fn run(&self, config: &Path) -> Result<()> {
        let cfg = load_config(config)?;
        let Some(mut state) = StackState::load(&self.state_dir, &cfg.stack)? else {
            ui::print_info(&format!("No recorded state for {}", cfg.stack));
            return Ok(());
        };

        ui::print_section(&format!("Destroying {}", cfg.stack));
        let engine = Engine::new(Arc::new(rehearsal_provider()));
        match engine.destroy(&mut state).await {
            Ok(deleted) => {
                for id in &deleted {
                    println!("  - {id}");
                }
                ui::print_success(&format!("Deleted {} resources", deleted.len()));
                Ok(())
            }
            Err(e) => {
                ui::print_error(&e.to_string());
                Err(e).context("Destroy failed")
            }
        }
    }
}
