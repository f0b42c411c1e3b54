use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tether::commands::{init, run, status};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tether")]
#[command(
    about = "Supervise Claude Code and fall back to API billing when the usage limit is hit",
    long_about = None
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the supervised session (exit status mirrors the child's)
    Run {
        /// Path to the config file (default: ./tether.json, then
        /// ~/.config/tether/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the supervised command line from the config
        #[arg(long)]
        command: Option<String>,

        /// Suppress desktop notifications
        #[arg(short, long)]
        quiet: bool,
    },

    /// Write a config template
    Init {
        /// Write to ~/.config/tether/config.json instead of ./tether.json
        #[arg(short, long)]
        user: bool,

        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the resolved configuration
    Status {
        /// Path to the config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    // Diagnostics go to stderr and stay silent unless TETHER_LOG is set,
    // so they never interleave with the relayed child output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("TETHER_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            command,
            quiet,
        } => {
            let code = run::execute(config, command, quiet);
            ExitCode::from(code.clamp(0, 255) as u8)
        }
        Commands::Init { user, force } => report(init::execute(user, force)),
        Commands::Status { config } => report(status::execute(config)),
    }
}

fn report(result: anyhow::Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
