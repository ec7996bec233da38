//! syncrepl: an LDAP content-synchronization replication consumer.
//!
//! Reads a directive-line configuration file (spec §6), schedules one
//! session per replica on a shared worker pool (spec §4.7), and drives
//! each session's bind/search/dispatch/persist cycle (spec §4.6) until
//! told to stop.

mod commands;
mod config;
mod runtime;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "syncrepl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file and report every directive's resolved
    /// settings without connecting to anything.
    CheckConfig {
        /// Path to the directive-line configuration file.
        config: PathBuf,
    },

    /// Run every configured replica until interrupted.
    Start {
        /// Path to the directive-line configuration file.
        config: PathBuf,

        /// Worker threads in the shared pool (default: available parallelism).
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Print each configured replica's static settings as JSON.
    Status {
        /// Path to the directive-line configuration file.
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig { config } => commands::check_config::run(&config),
        Commands::Start { config, workers } => commands::start::run(&config, workers),
        Commands::Status { config } => commands::status::run(&config),
    }
}
