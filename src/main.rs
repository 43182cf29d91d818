//! KFH Rewards tracker - remaining vouchers for rewards.kfh deals
//!
//! Runs the JSON API by default, or a single tracker operation when given a
//! subcommand.

use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kfhrewards::cli::{Cli, Command};
use kfhrewards::data::{DealCatalog, FileCatalog, HttpFetcher, QuantityExtractor, StaticCatalog};
use kfhrewards::refresh::RefreshHandle;
use kfhrewards::server::{self, DealResponse, DealsResponse, RefreshResponse};
use kfhrewards::tracker::DealTracker;

/// Sets up log output on stderr, filtered by `RUST_LOG` (default `info`)
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Loads the catalog file if one is configured, else the built-in deals
fn load_catalog(cli: &Cli) -> Result<Arc<dyn DealCatalog>, Box<dyn std::error::Error>> {
    match cli.catalog_path() {
        Some(path) => {
            info!(path = %path.display(), "Using deal catalog file");
            Ok(Arc::new(FileCatalog::open(path)?))
        }
        None => Ok(Arc::new(StaticCatalog::builtin())),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Resolves on Ctrl+C
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    let catalog = load_catalog(&cli)?;
    let extractor = QuantityExtractor::new(HttpFetcher::new(&cli.fetcher_config())?);
    let tracker = Arc::new(DealTracker::new(
        catalog,
        Arc::new(extractor),
        cli.tracker_config(),
    ));

    match cli.command() {
        Command::Serve => {
            let config = cli.serve_config()?;
            info!("Starting KFH Rewards Tracker API");
            let refresh = RefreshHandle::spawn(tracker.clone(), config.refresh);
            server::serve(config.addr, tracker, shutdown_signal()).await?;
            refresh.shutdown().await;
        }
        Command::List => print_json(&DealsResponse::from(tracker.list_all().await?))?,
        Command::Show { id } => print_json(&DealResponse::from(tracker.get_one(&id).await?))?,
        Command::Refresh => {
            print_json(&RefreshResponse::from(tracker.force_refresh().await?))?
        }
    }

    Ok(())
}
