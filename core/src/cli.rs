use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::EngineConfig;
use crate::init::InitBuilder;
use crate::scenario;

#[derive(Parser)]
#[command(name = "routine")]
#[command(about = "Routine - deterministic async routines pumped by their host", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides ROUTINE_CONFIG_PATH)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Let newly spawned tasks run inline while their context is executing
    #[arg(long, global = true)]
    pub permit_inline: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the workflow/activity/signal sample and print its trace
    Sample {
        /// Number of runs; every run must produce the same trace
        #[arg(long, default_value = "1")]
        runs: usize,

        /// Print the runs as JSON, including pending-operation snapshots
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

pub fn run_cli() -> Result<()> {
    run(Cli::parse())
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Sample { runs, json } => {
            if runs == 0 {
                bail!("--runs must be at least 1");
            }

            let mut init = InitBuilder::new();
            if let Some(path) = cli.config {
                init = init.config_path(path);
            }
            if cli.permit_inline {
                init = init.permit_inline_execution(true);
            }
            let engine = init.init().context("Failed to initialize routine engine")?;

            let results = scenario::run_repeated(engine, runs)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
                return Ok(());
            }

            if let Some(first) = results.first() {
                for line in &first.trace {
                    println!("{}", line);
                }
                println!();
                println!("Result: {}", first.result);
            }
            if runs > 1 {
                println!("All {} runs produced identical traces", runs);
            }
        }

        Commands::Config => {
            let mut builder = EngineConfig::builder().config_path(cli.config);
            if cli.permit_inline {
                builder = builder.permit_inline_execution(true);
            }
            let config = builder.build().context("Failed to load configuration")?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample() {
        let cli = Cli::try_parse_from(["routine", "sample", "--runs", "3", "--json"]).unwrap();
        assert!(!cli.permit_inline);
        assert!(matches!(cli.command, Commands::Sample { runs: 3, json: true }));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["routine", "config", "--config", "engine.toml", "--permit-inline"])
                .unwrap();
        assert!(cli.permit_inline);
        assert_eq!(cli.config, Some(PathBuf::from("engine.toml")));
        assert!(matches!(cli.command, Commands::Config));
    }

    #[test]
    fn test_zero_runs_rejected() {
        let cli = Cli::try_parse_from(["routine", "sample", "--runs", "0"]).unwrap();
        assert!(run(cli).is_err());
    }
}
