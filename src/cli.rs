//! Command line interface, built on clap.
//!
//! Defines the [`Cli`] struct with subcommands [`Command`] (run, status,
//! check, login) and the global --config flag.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::CONFIG_FILE;

/// dropship — watches a drop folder and pushes files through a remote
/// publishing pipeline.
#[derive(Debug, Parser)]
#[command(name = "dropship", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the configuration file.
    #[arg(long, global = true, default_value = CONFIG_FILE)]
    pub config: PathBuf,

    /// Enable verbose output.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Watch the drop directory and process files until interrupted.
    Run,

    /// Show the queue snapshot from the last run.
    Status,

    /// Probe the remote API and report the authenticated account.
    Check,

    /// Store an access token in the configuration file.
    Login {
        /// Token obtained from the service's app settings page.
        token: String,
    },
}
