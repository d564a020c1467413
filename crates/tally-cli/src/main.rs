//! Tally CLI: edit bookkeeping records locally and back them up as snapshots.

mod auth;
mod cli;
mod commands;
mod config_profiles;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::auth_cmd::run_auth;
use crate::commands::common::Context;
use crate::commands::config::run_config;
use crate::commands::records::run_records;
use crate::commands::sync::{
    run_backups, run_restore, run_save, run_status, run_sync, run_watch,
};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "tally=info".parse::<tracing_subscriber::filter::Directive>() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = Context {
        workspace: cli.workspace,
        db_path: cli.db_path,
    };

    match cli.command {
        Commands::Config { command } => run_config(command, &ctx)?,
        Commands::Auth { command } => run_auth(command, &ctx)?,
        Commands::Records { command } => run_records(command, &ctx).await?,
        Commands::Status { json } => run_status(&ctx, json).await?,
        Commands::Save => run_save(&ctx).await?,
        Commands::Backups { limit, json } => run_backups(&ctx, limit, json).await?,
        Commands::Restore { backup, yes } => run_restore(&ctx, backup.as_deref(), yes).await?,
        Commands::Sync { resolve } => run_sync(&ctx, resolve).await?,
        Commands::Watch => run_watch(&ctx).await?,
    }

    Ok(())
}
