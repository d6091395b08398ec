mod cli;
mod commands;
mod handlers;
mod output;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use jobloom_infra::jobs::{InMemoryJobStore, PostgresJobStore};

use cli::{Cli, Command};

fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();
    jobloom_observability::init();

    let cli = Cli::parse();
    let config = cli.worker_config().context("invalid configuration")?;
    let mut stdout = std::io::stdout().lock();

    let Some(url) = config.database_url.clone() else {
        tracing::warn!("DATABASE_URL not set; using an in-memory store, nothing will persist");
        return commands::execute(InMemoryJobStore::arc(), cli.command, config, &mut stdout);
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let store = PostgresJobStore::connect(&url, cli.max_connections, runtime.handle().clone())
        .context("failed to connect to PostgreSQL")?;

    if cli.command == Command::Migrate {
        store.migrate_blocking().context("failed to create schema")?;
        tracing::info!("job schema is up to date");
        return Ok(());
    }

    commands::execute(Arc::new(store), cli.command, config, &mut stdout)
}
