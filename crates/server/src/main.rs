// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! fieldsync-server: offline-first sync server for field and office clients.
//!
//! Serves the sync protocol over WebSocket and the bulk photo endpoints over
//! HTTP, both backed by one SQLite database.

mod config;
mod error;
mod http;
mod hub;
mod locks;
mod server;
mod service;
mod session;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fieldsync_core::{ConflictPolicy, SqliteStore};

use config::Config;
use service::SyncService;

/// fieldsync-server: offline-first sync server
#[derive(Parser, Debug)]
#[command(name = "fieldsync-server")]
#[command(about = "WebSocket sync server with CRDT documents and conflict resolution")]
struct Args {
    /// Address to bind the WebSocket endpoint to
    #[arg(short, long, default_value = "0.0.0.0:7890")]
    bind: SocketAddr,

    /// Address to bind the REST endpoints to
    #[arg(long, default_value = "0.0.0.0:7891")]
    http_bind: SocketAddr,

    /// Directory for the database
    #[arg(short, long, default_value = ".")]
    data: PathBuf,

    /// Optional TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Policy for devices without a stored one (overrides the config file)
    #[arg(long)]
    default_conflict_policy: Option<ConflictPolicy>,

    /// Cap on changes per sync_request (overrides the config file)
    #[arg(long)]
    max_changes_per_request: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn load_config(&self) -> Result<Config, config::ConfigError> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(policy) = self.default_conflict_policy {
            config.sync.default_conflict_policy = policy;
        }
        if let Some(cap) = self.max_changes_per_request {
            config.sync.max_changes_per_request = cap;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fieldsync_server={level},fieldsync_core={level},tower_http={level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = args.load_config()?;
    let db_path = args.data.join("fieldsync.db");

    info!("Starting fieldsync-server");
    info!("  WebSocket address: {}", args.bind);
    info!("  HTTP address: {}", args.http_bind);
    info!("  Database: {}", db_path.display());
    info!("  Default conflict policy: {}", config.sync.default_conflict_policy);

    let store = Arc::new(SqliteStore::open(&db_path)?);
    let service = Arc::new(SyncService::new(store, config));
    let sweeper = service.start();

    let signals = Arc::clone(&service);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received"),
            Err(e) => error!(error = %e, "failed to listen for interrupt"),
        }
        signals.shutdown();
    });

    let served = tokio::try_join!(
        server::run(args.bind, Arc::clone(&service)),
        http::run(args.http_bind, Arc::clone(&service)),
    );
    service.shutdown();
    sweeper.await?;
    served?;

    info!("fieldsync-server stopped");
    Ok(())
}
