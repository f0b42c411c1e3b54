//! Configuration loading and the two spawn environments.
//!
//! The config file is JSON. Resolution order: an explicit `--config` path,
//! then `./tether.json`, then `~/.config/tether/config.json`. The loaded
//! value is immutable for the rest of the session; the supervisor only
//! derives environment maps from it at each spawn.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use crate::trigger::TriggerSet;

/// The credential variable toggled between the two modes.
pub const CREDENTIAL_ENV: &str = "ANTHROPIC_API_KEY";

/// File name probed in the working directory.
pub const LOCAL_CONFIG_NAME: &str = "tether.json";

/// How usage-limit detection observes the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Detection {
    /// Match trigger phrases in the PTY output stream.
    #[default]
    Pty,
    /// Tail the Claude Code session log (`~/.claude/projects/...`).
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// API key used in elevated mode. Supports `${ENV_VAR}` expansion.
    pub api_key: String,
    /// Switch without asking when a limit is detected.
    #[serde(default)]
    pub auto_switch: bool,
    /// Ask for confirmation before switching.
    #[serde(default = "default_true")]
    pub prompt_before_switch: bool,
    /// Soft cost ceiling for one API-mode session, in dollars.
    #[serde(default = "default_cost_limit")]
    pub cost_limit_per_session: f64,
    /// Record usage events for later inspection.
    #[serde(default = "default_true")]
    pub log_usage: bool,
    /// Percentage of the cost ceiling at which to notify.
    #[serde(default = "default_notify_percentage")]
    pub notify_at_percentage: u8,
    /// Drop back to subscription mode when the quota window resets.
    #[serde(default = "default_true")]
    pub auto_revert_on_reset: bool,
    /// The supervised command line (program plus arguments).
    #[serde(default = "default_command")]
    pub command: String,
    /// Detection strategy.
    #[serde(default)]
    pub detection: Detection,
    /// Override the built-in trigger phrase list.
    #[serde(default)]
    pub triggers: Option<Vec<String>>,
}

fn default_true() -> bool {
    true
}

fn default_cost_limit() -> f64 {
    10.0
}

fn default_notify_percentage() -> u8 {
    80
}

fn default_command() -> String {
    "claude".to_string()
}

/// Template written by `tether init` and shown in remediation output.
pub const CONFIG_TEMPLATE: &str = r#"{
  "api_key": "sk-ant-api03-...",
  "auto_switch": false,
  "prompt_before_switch": true,
  "cost_limit_per_session": 10.0,
  "log_usage": true,
  "notify_at_percentage": 80,
  "auto_revert_on_reset": true,
  "command": "claude",
  "detection": "pty"
}
"#;

impl Config {
    /// Load and expand the config from the resolved path.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, PathBuf)> {
        let path = Self::resolve_path(explicit)?;
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.api_key = expand_env_vars(&config.api_key);
        Ok((config, path))
    }

    /// Find the config file, or fail with remediation guidance.
    pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if !path.exists() {
                bail!("Config file not found at {}", path.display());
            }
            return Ok(path.to_path_buf());
        }

        let local = PathBuf::from(LOCAL_CONFIG_NAME);
        if local.exists() {
            return Ok(local);
        }

        if let Some(path) = Self::user_config_path() {
            if path.exists() {
                return Ok(path);
            }
        }

        bail!(
            "No config file found. Looked for ./{LOCAL_CONFIG_NAME} and \
             ~/.config/tether/config.json.\n\
             Run `tether init` to create one, then set your API key."
        )
    }

    /// `~/.config/tether/config.json`, if a config dir exists.
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("tether").join("config.json"))
    }

    /// Validate the loaded settings. Fatal before any child spawns.
    pub fn validate(&self) -> Result<()> {
        if !self.api_key.starts_with("sk-ant-") {
            bail!(
                "Invalid api_key format (expected an `sk-ant-` key). \
                 Edit your config or export the variable it references."
            );
        }
        if self.cost_limit_per_session <= 0.0 {
            bail!("cost_limit_per_session must be positive");
        }
        if self.notify_at_percentage > 100 {
            bail!("notify_at_percentage must be between 0 and 100");
        }
        if self.command.trim().is_empty() {
            bail!("command must not be empty");
        }
        Ok(())
    }

    /// Environment for subscription mode: current env minus the credential.
    pub fn baseline_env(&self) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = env::vars().collect();
        env.remove(CREDENTIAL_ENV);
        env
    }

    /// Environment for API mode: current env with the credential set.
    pub fn elevated_env(&self) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = env::vars().collect();
        env.insert(CREDENTIAL_ENV.to_string(), self.api_key.clone());
        env
    }

    /// The trigger set to watch for: configured phrases, or the defaults.
    pub fn trigger_set(&self) -> TriggerSet {
        match &self.triggers {
            Some(phrases) => TriggerSet::from_phrases(phrases),
            None => TriggerSet::usage_limit_defaults(),
        }
    }
}

/// Expand `${VAR}` and `$VAR` patterns from the environment.
pub fn expand_env_vars(s: &str) -> String {
    let re = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("Invalid regex pattern");

    re.replace_all(s, |caps: &regex::Captures| {
        if let Some(var_name) = caps.get(1).or_else(|| caps.get(2)) {
            if let Ok(value) = env::var(var_name.as_str()) {
                return value;
            }
        }
        // Leave unknown variables untouched so validation reports them.
        caps.get(0).map_or(String::new(), |m| m.as_str().to_string())
    })
    .to_string()
}
