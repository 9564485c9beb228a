//! Order command - show creation levels.

use std::path::Path;

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::{load_config, synthesize_fresh};
use crate::ui;

/// Print the creation order, one level per group.
#[derive(Args)]
pub struct OrderCommand {
    /// Print the destruction order instead.
    #[arg(long)]
    destroy: bool,
}

impl OrderCommand {
    /// Run the order command.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack does not synthesize.
    pub fn run(&self, config: &Path) -> Result<()> {
        let cfg = load_config(config)?;
        let graph = synthesize_fresh(&cfg)?;
        let order = graph.order();

        if self.destroy {
            ui::print_section(&format!("Destruction order for {}", cfg.stack));
            for (i, id) in order.destruction().iter().enumerate() {
                println!("{:>4}  {}", i + 1, id);
            }
            return Ok(());
        }

        ui::print_section(&format!("Creation levels for {}", cfg.stack));
        for (level, group) in order.groups().iter().enumerate() {
            println!("{}", format!("Level {level}").cyan().bold());
            for id in group {
                let kind = graph.node(id).map(|n| n.kind.as_str()).unwrap_or_default();
                println!("  {} {}", id, kind.bright_black());
            }
        }
        println!();
        ui::print_info(&format!(
            "{} resources in {} levels",
            graph.len(),
            order.groups().len()
        ));
        Ok(())
    }
}
