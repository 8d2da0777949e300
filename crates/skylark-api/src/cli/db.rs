//! `skylark db`: maintenance without starting the bot.

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, ContentArrangement, Table, presets};
use console::style;

use skylark_core::clock::SystemClock;
use skylark_core::maintenance::{PruneOutcome, run_prune};
use skylark_core::storage::{MaintenanceRepository, TableStat};
use skylark_types::config::BotConfig;

use crate::state;

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum DbCommand {
    /// Row counts per table.
    Stats,

    /// Rebuild the database file to reclaim space.
    Vacuum,

    /// Apply the retention policy now.
    Prune {
        /// Override `db.retention_days` (0 purges every conversation row).
        #[arg(long)]
        days: Option<i64>,
    },
}

pub async fn handle_db_command(cmd: DbCommand, config: &BotConfig, json: bool) -> Result<()> {
    let store = state::open_store(&config.db)
        .await
        .with_context(|| format!("failed to open database at {}", config.db.path))?;

    match cmd {
        DbCommand::Stats => {
            let stats = store.table_stats().await?;
            if json {
                let rows: serde_json::Map<String, serde_json::Value> = stats
                    .iter()
                    .map(|s| (s.name.clone(), s.rows.into()))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                println!("{}", stats_table(&stats));
            }
        }
        DbCommand::Vacuum => {
            store.vacuum().await?;
            println!("  {} database vacuumed", style("✓").green());
        }
        DbCommand::Prune { days } => {
            let days = days.unwrap_or(config.db.retention_days);
            let outcome = run_prune(&store, &SystemClock, days).await?;
            println!("  {} {}", style("✓").green(), describe(outcome, days));
        }
    }
    Ok(())
}

fn stats_table(stats: &[TableStat]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Table", "Rows"]);
    for stat in stats {
        table.add_row(vec![Cell::new(&stat.name), Cell::new(stat.rows)]);
    }
    table
}

fn describe(outcome: PruneOutcome, days: i64) -> String {
    match outcome {
        PruneOutcome::Disabled => "retention is disabled, nothing removed".to_string(),
        PruneOutcome::Purged(rows) => format!("purged {rows} conversation rows"),
        PruneOutcome::Pruned(rows) => format!("removed {rows} rows older than {days} days"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_table_lists_every_table() {
        let stats = vec![
            TableStat {
                name: "conversation_turns".into(),
                rows: 12,
            },
            TableStat {
                name: "plugin_data".into(),
                rows: 0,
            },
        ];
        let rendered = stats_table(&stats).to_string();
        assert!(rendered.contains("conversation_turns"));
        assert!(rendered.contains("12"));
        assert!(rendered.contains("plugin_data"));
    }

    #[test]
    fn prune_outcomes_read_naturally() {
        assert_eq!(describe(PruneOutcome::Pruned(3), 30), "removed 3 rows older than 30 days");
        assert_eq!(describe(PruneOutcome::Purged(5), 0), "purged 5 conversation rows");
        assert!(describe(PruneOutcome::Disabled, -1).contains("disabled"));
    }

    #[tokio::test]
    async fn prune_command_runs_against_a_file_database() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = BotConfig::default();
        config.db.path = tmp.path().join("skylark.db").display().to_string();

        handle_db_command(DbCommand::Prune { days: Some(0) }, &config, false)
            .await
            .unwrap();
        handle_db_command(DbCommand::Stats, &config, true).await.unwrap();
        handle_db_command(DbCommand::Vacuum, &config, false).await.unwrap();
    }
}
