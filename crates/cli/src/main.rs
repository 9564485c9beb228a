//! ultra-tic infrastructure CLI.
//!
//! Synthesizes the platform stack from a YAML stack file, shows its creation
//! order and planned changes, lints it, and rehearses applies and destroys
//! against the in-memory provider.

#![allow(clippy::doc_markdown)]

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod ui;

use commands::lint::LintCommand;
use commands::order::OrderCommand;
use commands::plan::PlanCommand;
use commands::rehearse::{DestroyCommand, RehearseCommand};
use commands::synth::SynthCommand;

/// ultra-tic infrastructure graph.
#[derive(Parser)]
#[command(
    name = "tic-infra",
    version,
    about = "Typed infrastructure graph for the ultra-tic platform",
    long_about = "Declare the ultra-tic AWS platform as a typed resource graph.\n\n\
                  The stack file is synthesized into a validated graph; plan and\n\
                  rehearse diff it against recorded state, so re-running a command\n\
                  with unchanged configuration changes nothing."
)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Stack file.
    #[arg(
        short,
        long,
        global = true,
        env = "TIC_STACK_FILE",
        default_value = "stacks/dev.yaml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the desired-state document.
    Synth(SynthCommand),

    /// Show creation levels.
    Order(OrderCommand),

    /// Diff the stack against recorded state.
    Plan(PlanCommand),

    /// Check for mistakes the graph accepts.
    Lint(LintCommand),

    /// Apply against the in-memory provider, persisting state.
    Rehearse(RehearseCommand),

    /// Delete every recorded resource in reverse creation order.
    Destroy(DestroyCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("info,tic_graph=debug,tic_stack=debug,tic_infra=debug")
    } else {
        EnvFilter::new("warn,tic_graph=info,tic_stack=info,tic_infra=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Synth(cmd) => cmd.run(&cli.config),
        Commands::Order(cmd) => cmd.run(&cli.config),
        Commands::Plan(cmd) => cmd.run(&cli.config),
        Commands::Lint(cmd) => cmd.run(&cli.config),
        Commands::Rehearse(cmd) => cmd.run(&cli.config).await,
        Commands::Destroy(cmd) => cmd.run(&cli.config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "tic-infra",
            "plan",
            "--state-dir",
            "state",
            "-c",
            "prod.yaml",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("prod.yaml"));
        assert!(matches!(cli.command, Commands::Plan(_)));
    }
}
