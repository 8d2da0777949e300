//! CLI definitions for the `skylark` binary.

pub mod check;
pub mod db;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use db::DbCommand;

/// A Misskey bot driven by an OpenAI-compatible model.
#[derive(Parser)]
#[command(name = "skylark", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (defaults to $SKYLARK_CONFIG, then config.toml).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Raise the log level (-v debug, -vv trace). `RUST_LOG` still wins.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output machine-readable JSON where supported.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Connect to the instance and serve until interrupted (default).
    Run,

    /// Validate the configuration and print it with secrets masked.
    Check,

    /// Database maintenance.
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run)
    }

    /// Effective log level: the configured one unless `-v` was given.
    pub fn log_level(&self, configured: &str) -> String {
        match self.verbose {
            0 => configured.to_string(),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_is_the_default_command() {
        let cli = Cli::try_parse_from(["skylark"]).unwrap();
        assert_eq!(cli.command(), Commands::Run);
        assert!(cli.config.is_none());
    }

    #[test]
    fn parses_db_prune_with_global_flags() {
        let cli =
            Cli::try_parse_from(["skylark", "db", "prune", "--days", "7", "-c", "bot.toml", "-vv"]).unwrap();
        assert_eq!(
            cli.command(),
            Commands::Db {
                command: DbCommand::Prune { days: Some(7) }
            }
        );
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("bot.toml")));
        assert_eq!(cli.log_level("info"), "trace");
    }

    #[test]
    fn verbosity_overrides_configured_level() {
        let quiet = Cli::try_parse_from(["skylark", "check"]).unwrap();
        assert_eq!(quiet.log_level("warn"), "warn");
        let verbose = Cli::try_parse_from(["skylark", "-v", "check"]).unwrap();
        assert_eq!(verbose.log_level("warn"), "debug");
    }

    #[test]
    fn rejects_unknown_db_subcommand() {
        assert!(Cli::try_parse_from(["skylark", "db", "drop"]).is_err());
    }
}
