//! Lint command - check for mistakes the graph accepts.

use std::path::Path;

use anyhow::Result;
use clap::Args;
use tic_stack::{lint, Severity};

use super::{load_config, synthesize_fresh};
use crate::ui;

/// Lint the synthesized stack.
#[derive(Args)]
pub struct LintCommand {
    /// Fail on warnings as well as errors.
    #[arg(long)]
    deny_warnings: bool,
}

impl LintCommand {
    /// Run the lint command.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack does not synthesize or any finding is
    /// severe enough to fail.
    pub fn run(&self, config: &Path) -> Result<()> {
        let cfg = load_config(config)?;
        let graph = synthesize_fresh(&cfg)?;
        let findings = lint(&graph);

        for finding in &findings {
            ui::print_finding(finding);
        }

        let errors = findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .count();
        let warnings = findings.len() - errors;
        let failing = if self.deny_warnings { findings.len() } else { errors };

        if failing > 0 {
            anyhow::bail!("Lint found {errors} errors and {warnings} warnings");
        }
        if warnings > 0 {
            ui::print_warning(&format!("{warnings} warnings"));
        } else {
            ui::print_success(&format!("{} resources, no findings", graph.len()));
        }
        Ok(())
    }
}
