//! Skylark entry point.
//!
//! Binary name: `skylark`
//!
//! Loads the configuration, installs tracing, then either serves the bot
//! until interrupted or runs a one-off command.

mod cli;
mod run;
mod state;

use anyhow::anyhow;
use clap::Parser;

use cli::{Cli, Commands};
use skylark_infra::config::{load_config, resolve_config_path};
use skylark_observe::tracing_setup::{init_tracing, shutdown_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command();

    let path = resolve_config_path(cli.config.as_deref());
    let config = load_config(&path).await?;

    let level = cli.log_level(&config.log.level);
    let enable_otel = config.log.otel && command == Commands::Run;
    init_tracing(&level, enable_otel).map_err(|e| anyhow!("failed to initialize tracing: {e}"))?;

    let result = match command {
        Commands::Run => run::run(config).await,
        Commands::Check => cli::check::check(&path, &config, cli.json),
        Commands::Db { command } => cli::db::handle_db_command(command, &config, cli.json).await,
    };

    shutdown_tracing();
    result
}
