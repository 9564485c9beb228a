//! Synth command - write the desired-state document.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use tracing::info;

use super::{load_config, synthesize_fresh};

/// Document encoding.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Format {
    Json,
    Yaml,
}

/// Synthesize the stack into a desired-state document.
#[derive(Args)]
pub struct SynthCommand {
    /// Write the document here instead of stdout.
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Output encoding.
    #[arg(long, value_enum, default_value = "json")]
    format: Format,
}

impl SynthCommand {
    /// Run the synth command.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack does not synthesize or the document
    /// cannot be written.
    pub fn run(&self, config: &Path) -> Result<()> {
        let cfg = load_config(config)?;
        let graph = synthesize_fresh(&cfg)?;
        let document = graph.to_document();

        let encoded = match self.format {
            Format::Json => document.to_json_pretty()?,
            Format::Yaml => serde_yaml::to_string(&document).context("Failed to encode YAML")?,
        };

        match &self.out {
            Some(path) => {
                std::fs::write(path, encoded)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!(
                    stack = %cfg.stack,
                    resources = graph.len(),
                    path = %path.display(),
                    "Wrote desired-state document"
                );
            }
            None => println!("{encoded}"),
        }
        Ok(())
    }
}
