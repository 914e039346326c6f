//! Command-line interface definitions for simforge.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Compile, cache and run simulation models.
#[derive(Parser)]
#[command(name = "simforge", version, about)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Recompile even if a valid cached artifact or miss record exists.
    #[arg(long, short = 'f', global = true)]
    pub force: bool,

    /// Show only errors and the final summary.
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Enable verbose output with timing and cache diagnostics.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Generate and compile a model, or confirm its cached artifact.
    Compile(ModelArgs),
    /// Compile if needed, then run a model.
    Run(RunArgs),
    /// Inspect and maintain the artifact cache.
    #[command(subcommand)]
    Cache(CacheCommand),
    /// Remove all build output, including the cache.
    Clean,
}

/// A model file argument.
#[derive(Parser)]
pub struct ModelArgs {
    /// Path to the model file.
    pub model: PathBuf,
}

/// Arguments for the `run` subcommand.
#[derive(Parser)]
pub struct RunArgs {
    /// Path to the model file.
    pub model: PathBuf,

    /// Number of replications (overrides simforge.toml).
    #[arg(long)]
    pub replications: Option<u32>,

    /// Simulation stop time (overrides simforge.toml).
    #[arg(long)]
    pub stop_time: Option<f64>,

    /// Ask the model for verbose output.
    #[arg(long)]
    pub model_verbose: bool,
}

/// `cache` subcommands.
#[derive(Subcommand)]
pub enum CacheCommand {
    /// List cached artifacts and known failures.
    List,
    /// Forget one model's artifact and miss record.
    Invalidate(ModelArgs),
    /// Forget everything and delete all cached artifacts.
    Clear,
    /// Delete executables no cache entry refers to.
    Gc,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "simforge",
            "run",
            "models/queue.xml",
            "--replications",
            "5",
            "--stop-time",
            "120.5",
            "-f",
            "-v",
        ])
        .unwrap();
        assert!(cli.force && cli.verbose);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.model, PathBuf::from("models/queue.xml"));
        assert_eq!(args.replications, Some(5));
        assert_eq!(args.stop_time, Some(120.5));
        assert!(!args.model_verbose);
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["simforge", "-q", "-v", "clean"]).is_err());
    }

    #[test]
    fn cache_subcommands() {
        let cli = Cli::try_parse_from(["simforge", "cache", "invalidate", "m.xml"]).unwrap();
        assert!(matches!(cli.command, Command::Cache(CacheCommand::Invalidate(_))));
        let cli = Cli::try_parse_from(["simforge", "cache", "gc"]).unwrap();
        assert!(matches!(cli.command, Command::Cache(CacheCommand::Gc)));
    }
}
