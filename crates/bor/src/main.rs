//! `bor` -- the boxofrocks daemon entry point.
//!
//! Parses arguments with clap, loads `config.json`, opens the store and
//! dispatches to the daemon or the migrate tool. Startup failures (bind,
//! migration, store open) exit non-zero with a diagnostic.

mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use bor_config::{DaemonConfig, DataDir, token};
use bor_server::Daemon;
use bor_storage::{DB_SCHEMA_VERSION, SqliteStore, peek_schema_version};
use bor_sync::github::GithubUpstream;
use bor_sync::{RateGate, SyncManager};

use cli::{Cli, Commands, MigrateCommands};

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "bor=debug" } else { "bor=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let data_dir = DataDir::new(
        cli.data_dir
            .clone()
            .unwrap_or_else(DataDir::default_root),
    );
    let config_path = cli.config.clone().unwrap_or_else(|| data_dir.config_path());
    let mut config = DaemonConfig::load(&config_path).context("loading config")?;
    if cli.data_dir.is_some() {
        config.data_dir = data_dir.root().to_path_buf();
    }

    match cli.command {
        Commands::Daemon(args) => {
            if let Some(listen_addr) = args.listen_addr {
                config.listen_addr = listen_addr;
            }
            run_daemon(config)
        }
        Commands::Migrate(args) => run_migrate(&config, &args.command),
    }
}

fn run_daemon(config: DaemonConfig) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("starting runtime")?;
    runtime.block_on(async {
        DataDir::new(&config.data_dir)
            .ensure()
            .context("creating data dir")?;
        let store =
            Arc::new(SqliteStore::open(config.db_path()).context("opening store")?);

        let gate = Arc::new(RateGate::new());
        let api_token = token::discover(&DataDir::new(&config.data_dir).token_path());
        if api_token.is_none() {
            info!("no upstream token found, syncing unauthenticated");
        }
        let upstream = Arc::new(GithubUpstream::new(api_token, gate.clone()));
        let sync = Arc::new(SyncManager::new(store.clone(), upstream, gate));

        let daemon = Daemon::init(&config, store, Some(sync))
            .await
            .context("starting daemon")?;

        let shutdown = async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        };
        daemon.run(shutdown).await.context("running daemon")?;
        Ok(())
    })
}

fn run_migrate(config: &DaemonConfig, command: &MigrateCommands) -> anyhow::Result<()> {
    let db_path = config.db_path();
    match command {
        MigrateCommands::Status => {
            let stored = peek_schema_version(&db_path).context("reading schema version")?;
            println!("database version: {stored}\nsupported version: {DB_SCHEMA_VERSION}");
        }
        MigrateCommands::Downgrade(args) => {
            let store = SqliteStore::open(&db_path).context("opening store")?;
            store
                .downgrade(args.to)
                .context("downgrading schema")?;
            println!("downgraded {} to version {}", db_path.display(), args.to);
        }
    }
    Ok(())
}
