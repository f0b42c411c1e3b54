//! `tether init` - write a config template.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use colored::Colorize;

use crate::config::{Config, CONFIG_TEMPLATE, LOCAL_CONFIG_NAME};

/// Write the config template.
/// Usage: tether init [--user] [--force]
pub fn execute(user: bool, force: bool) -> Result<()> {
    let path = if user {
        let Some(path) = Config::user_config_path() else {
            bail!("Could not determine the user config directory");
        };
        path
    } else {
        PathBuf::from(LOCAL_CONFIG_NAME)
    };

    if path.exists() && !force {
        bail!(
            "{} already exists. Use --force to overwrite it.",
            path.display()
        );
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
    }

    std::fs::write(&path, CONFIG_TEMPLATE)
        .with_context(|| format!("Failed to write config template: {}", path.display()))?;

    println!("{} {}", "Wrote".green(), path.display());
    println!("Set {} before running `tether run`.", "api_key".bold());
    Ok(())
}
