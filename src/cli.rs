//! Command-line interface parsing for the KFH Rewards tracker
//!
//! This module handles parsing of CLI arguments using clap. With no subcommand
//! the API server starts; `list`, `show` and `refresh` run a single tracker
//! operation and print its JSON response.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;

use crate::data::{default_catalog_path, FetcherConfig};
use crate::refresh::RefreshConfig;
use crate::tracker::TrackerConfig;

/// Error types for CLI argument handling
#[derive(Debug, Error)]
pub enum CliError {
    /// Host is not an IPv4 or IPv6 address
    #[error("Invalid bind address: '{0}'")]
    InvalidBindAddress(String),
}

/// KFH Rewards tracker - remaining voucher counts for rewards.kfh deals
#[derive(Parser, Debug)]
#[command(name = "kfhrewards")]
#[command(about = "Track remaining vouchers on KFH Rewards deals")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub serve: ServeArgs,

    /// JSON catalog file of deals to track (defaults to the built-in list)
    #[arg(long, global = true, env = "KFH_CATALOG", value_name = "PATH")]
    pub catalog: Option<PathBuf>,

    /// Seconds a full refresh stays fresh
    #[arg(long, global = true, default_value_t = 300, value_name = "SECS")]
    pub freshness: u64,

    /// Pause after each deal page during a full refresh
    #[arg(long, global = true, default_value_t = 1000, value_name = "MS")]
    pub delay_ms: u64,

    /// Timeout for each deal page fetch
    #[arg(long, global = true, default_value_t = 10, value_name = "SECS")]
    pub timeout: u64,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Fetch every deal and print the listing
    List,
    /// Fetch a single deal by id
    Show {
        /// Deal id, e.g. 113316
        id: String,
    },
    /// Force a full refresh and print the result
    Refresh,
}

/// Options for the API server
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// IPv4 or IPv6 address to bind
    #[arg(long, global = true, env = "KFH_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, global = true, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Skip the initial refresh at startup
    #[arg(long, global = true)]
    pub no_warmup: bool,

    /// Force a full refresh every SECS seconds (0 disables)
    #[arg(long, global = true, value_name = "SECS")]
    pub auto_refresh: Option<u64>,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            no_warmup: false,
            auto_refresh: None,
        }
    }
}

/// Server settings derived from CLI arguments
#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub addr: SocketAddr,
    pub refresh: RefreshConfig,
}

impl ServeConfig {
    /// Creates a ServeConfig from parsed serve arguments.
    ///
    /// # Returns
    /// * `Ok(ServeConfig)` with the bind address and background refresh settings
    /// * `Err(CliError::InvalidBindAddress)` if host is not an IP address
    pub fn from_args(args: &ServeArgs) -> Result<Self, CliError> {
        let ip: IpAddr = args
            .host
            .parse()
            .map_err(|_| CliError::InvalidBindAddress(args.host.clone()))?;
        let addr = SocketAddr::new(ip, args.port);

        Ok(ServeConfig {
            addr,
            refresh: RefreshConfig {
                warmup: !args.no_warmup,
                interval: args
                    .auto_refresh
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs),
            },
        })
    }
}

impl Cli {
    /// The subcommand to run, `serve` when none was given
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    pub fn serve_config(&self) -> Result<ServeConfig, CliError> {
        ServeConfig::from_args(&self.serve)
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            freshness_window: Duration::from_secs(self.freshness),
            request_delay: Duration::from_millis(self.delay_ms),
        }
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            timeout: Duration::from_secs(self.timeout),
            ..FetcherConfig::default()
        }
    }

    /// Catalog file to load, if any
    ///
    /// An explicit `--catalog` wins; otherwise the XDG config file is used
    /// when it exists.
    pub fn catalog_path(&self) -> Option<PathBuf> {
        self.catalog
            .clone()
            .or_else(|| default_catalog_path().filter(|path| path.exists()))
    }
}
