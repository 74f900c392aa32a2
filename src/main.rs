mod cli;
mod config;
mod notify;
mod pipeline;
mod remote;
mod ui;
mod watch;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use config::DropshipConfig;
use notify::LogNotifier;
use pipeline::{Scheduler, SnapshotStore};
use remote::{PublishClient, RemoteApi};
use ui::Report;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "dropship=debug" } else { "dropship=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Command::Run => run(&cli).await,
        Command::Status => status(&cli),
        Command::Check => check(&cli).await,
        Command::Login { token } => {
            config::save_token(&cli.config, &token)?;
            println!("token saved to {}", cli.config.display());
            Ok(())
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let config = DropshipConfig::load(&cli.config)?;
    let client = Arc::new(authenticated_client(&config)?);

    std::fs::create_dir_all(&config.drop_dir)
        .with_context(|| format!("could not create drop dir {}", config.drop_dir.display()))?;
    if let Some(dir) = &config.complete_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("could not create complete dir {}", dir.display()))?;
    }

    let store = SnapshotStore::new(config.queues_file.clone());
    let queues = store.load().unwrap_or_default();
    let (mut scheduler, rx) =
        Scheduler::new(client, LogNotifier, store, queues, config.settings());

    let listing = watch::scan(&config.drop_dir)
        .with_context(|| format!("could not read drop dir {}", config.drop_dir.display()))?;
    scheduler.recover(&listing);
    watch::spawn_watcher(
        config.drop_dir.clone(),
        config.tick_interval(),
        &listing,
        scheduler.sender(),
    );

    tracing::info!("watching {} for new files", config.drop_dir.display());
    scheduler.connect();
    scheduler.run(rx, config.tick_interval()).await;
    Ok(())
}

fn status(cli: &Cli) -> Result<()> {
    let config = DropshipConfig::load(&cli.config)?;
    let store = SnapshotStore::new(config.queues_file);
    let queues = store.load().unwrap_or_default();
    Report::new().print_queues(&queues);
    Ok(())
}

async fn check(cli: &Cli) -> Result<()> {
    let config = DropshipConfig::load(&cli.config)?;
    let client = authenticated_client(&config)?;
    let result = client.current_user().await;
    let ok = result.is_ok();
    Report::new().print_check(&result);
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn authenticated_client(config: &DropshipConfig) -> Result<PublishClient> {
    if config.access_token.is_empty() {
        bail!("no access token configured; run `dropship login <token>` first");
    }
    Ok(PublishClient::new(
        config.access_token.clone(),
        config.request_timeout(),
    ))
}
