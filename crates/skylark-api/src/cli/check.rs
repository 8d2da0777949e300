//! `skylark check`: validate the configuration and show what would run.

use std::path::Path;

use anyhow::Result;
use console::style;

use skylark_core::plugin::PluginSource;
use skylark_infra::plugins::DirectorySource;
use skylark_types::config::BotConfig;

pub fn check(path: &Path, config: &BotConfig, json: bool) -> Result<()> {
    let validation = config.validate();
    let plugins = DirectorySource::new(&config.plugins.dir)
        .discover()
        .unwrap_or_default();

    if json {
        let report = serde_json::json!({
            "path": path.display().to_string(),
            "valid": validation.is_ok(),
            "error": validation.as_ref().err().map(|e| e.to_string()),
            "plugins": plugins
                .iter()
                .map(|p| serde_json::json!({ "name": p.name, "enabled": p.manifest.enabled }))
                .collect::<Vec<_>>(),
            "config": config.redacted(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        println!("  {} {}", style("Configuration").bold(), style(path.display()).cyan());
        match &validation {
            Ok(()) => println!("  {} valid", style("✓").green()),
            Err(e) => println!("  {} {e}", style("✗").red()),
        }
        for plugin in &plugins {
            let mark = if plugin.manifest.enabled {
                style("✓").green()
            } else {
                style("-").dim()
            };
            println!("  {mark} plugin {}", plugin.name);
        }
        println!();
        println!("{}", toml::to_string_pretty(&config.redacted())?);
    }

    validation.map_err(Into::into)
}
