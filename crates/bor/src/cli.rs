//! Command-line definitions for the `bor` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// boxofrocks -- local issue-tracking daemon mirroring upstream repos.
#[derive(Parser)]
#[command(name = "bor", version, about)]
pub struct Cli {
    /// Path to config.json (default: <data-dir>/config.json).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory override (default: ~/.boxofrocks).
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Verbose logging to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the daemon in the foreground.
    Daemon(DaemonArgs),

    /// Inspect or downgrade the database schema version.
    Migrate(MigrateArgs),
}

#[derive(clap::Args)]
pub struct DaemonArgs {
    /// Listen address override (e.g. 127.0.0.1:8042 or :8042).
    #[arg(long)]
    pub listen_addr: Option<String>,
}

#[derive(clap::Args)]
pub struct MigrateArgs {
    #[command(subcommand)]
    pub command: MigrateCommands,
}

#[derive(Subcommand)]
pub enum MigrateCommands {
    /// Print the stored and supported schema versions.
    Status,

    /// Downgrade the database schema to an older version. Run this
    /// before handing the database to an older binary.
    Downgrade(DowngradeArgs),
}

#[derive(clap::Args)]
pub struct DowngradeArgs {
    /// Target schema version.
    #[arg(long)]
    pub to: i32,
}
