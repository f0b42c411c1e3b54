//! `tether status` - show the resolved configuration.

use std::path::PathBuf;

use anyhow::Result;
use colored::Colorize;

use crate::config::Config;

/// Print the resolved config and detection setup.
/// Usage: tether status [--config <path>]
pub fn execute(config_path: Option<PathBuf>) -> Result<()> {
    let (config, path) = Config::load(config_path.as_deref())?;

    println!("{}\n", crate::LOGO.cyan());
    println!("{}  {}", "Config:".bold(), path.display());
    println!("{}  {}", "Command:".bold(), config.command);
    println!("{}  {:?}", "Detection:".bold(), config.detection);
    println!(
        "{}  {}",
        "API key:".bold(),
        if config.validate().is_ok() {
            format!("configured ({})", mask_key(&config.api_key)).green()
        } else {
            "missing or invalid".red()
        }
    );
    println!(
        "{}  auto_switch={} prompt_before_switch={} auto_revert_on_reset={}",
        "Switching:".bold(),
        config.auto_switch,
        config.prompt_before_switch,
        config.auto_revert_on_reset
    );
    println!(
        "{}  cost_limit_per_session=${:.2} notify_at_percentage={}%",
        "Budget:".bold(),
        config.cost_limit_per_session,
        config.notify_at_percentage
    );
    Ok(())
}

/// Show only enough of the key to recognize it.
fn mask_key(key: &str) -> String {
    let prefix: String = key.chars().take(10).collect();
    format!("{prefix}…")
}
