//! Harbor Server
//!
//! Offline-first gateway in front of a deployed web application. Pre-caches the
//! build assets of the current deployment, reclaims caches of older deployments
//! and answers requests from the cache, the offline fallback page or the network.

mod api;
mod gateway;

use anyhow::Context;
use axum::Router;
use clap::{Parser, Subcommand};
use harbor_core::cache::{
    AssetManifest, CacheManager, CacheStorage, HttpFetcher, SqliteCacheStorage,
};
use harbor_core::store::{LocalStorage, SharedStorage};
use harbor_core::{HarborConfig, HarborDb};
use reqwest::Url;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state
pub struct AppState {
    manager: CacheManager,
    storage: LocalStorage,
    /// Client for pass-through requests
    client: reqwest::Client,
}

pub type SharedState = Arc<AppState>;

/// Log filter used when `RUST_LOG` is unset; one directive per crate target
const DEFAULT_LOG_FILTER: &str = "harbor=info,harbor_core=info";

/// Longest wait between install attempts
const MAX_INSTALL_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Parser, Clone)]
#[command(author, version, about = "Harbor - offline-first asset gateway")]
struct Args {
    /// SQLite database for caches and storage
    #[arg(long, global = true, env = "HARBOR_DB", default_value = harbor_core::db::DEFAULT_DB_PATH)]
    db: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Install the current deployment and serve requests
    Serve {
        /// Asset manifest (JSON) of the current build
        #[arg(short, long, env = "HARBOR_MANIFEST")]
        manifest: PathBuf,
        /// Origin of the application being fronted
        #[arg(short, long, env = "HARBOR_UPSTREAM")]
        upstream: Url,
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Development build: no offline fallback
        #[arg(long)]
        dev: bool,
    },
    /// Install and activate the current deployment, then exit
    Install {
        #[arg(short, long, env = "HARBOR_MANIFEST")]
        manifest: PathBuf,
        #[arg(short, long, env = "HARBOR_UPSTREAM")]
        upstream: Url,
    },
    /// List existing caches
    Caches,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let db = HarborDb::open_at(&args.db)?;

    match args.command {
        CliCommand::Serve {
            manifest,
            upstream,
            port,
            dev,
        } => {
            let manager = build_manager(&db, &manifest, upstream, dev)?;
            run_server(db, manager, port).await
        }
        CliCommand::Install { manifest, upstream } => {
            let manager = build_manager(&db, &manifest, upstream, false)?;
            let report = manager.install().await?;
            let deleted = manager.activate().await?;
            println!(
                "Installed {} assets into {} ({} stale caches removed)",
                report.assets,
                report.cache,
                deleted.len()
            );
            Ok(())
        }
        CliCommand::Caches => {
            let storage = SqliteCacheStorage::new(&db);
            for name in storage.keys().await? {
                println!("{}", name);
            }
            Ok(())
        }
    }
}

fn build_manager(
    db: &HarborDb,
    manifest: &Path,
    upstream: Url,
    dev: bool,
) -> anyhow::Result<CacheManager> {
    let manifest = AssetManifest::load(manifest)?;
    let mut config = HarborConfig::from_env();
    config.dev |= dev;

    let fetcher = HttpFetcher::new().context("Failed to create fetcher")?;

    Ok(CacheManager::new(
        config,
        &manifest,
        upstream,
        Arc::new(SqliteCacheStorage::new(db)),
        Arc::new(fetcher),
    ))
}

/// Install then activate, retrying failed installs with exponential backoff
async fn run_lifecycle(state: SharedState) {
    let mut backoff = Duration::from_secs(1);

    loop {
        match state.manager.install().await {
            Ok(report) => {
                tracing::info!(cache = %report.cache, assets = report.assets, "Install complete");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, retry_in = ?backoff, "Install failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_INSTALL_BACKOFF);
            }
        }
    }

    if let Err(e) = state.manager.activate().await {
        tracing::error!(error = %e, "Activation failed");
    }
}

async fn run_server(db: HarborDb, manager: CacheManager, port: u16) -> anyhow::Result<()> {
    let storage = LocalStorage::new(Arc::new(SharedStorage::sqlite(&db).area()));

    let state: SharedState = Arc::new(AppState {
        manager,
        storage,
        client: reqwest::Client::new(),
    });

    // Requests pass through untouched until activation completes
    tokio::spawn(run_lifecycle(Arc::clone(&state)));

    let app = Router::new()
        .nest("/_harbor", api::api_routes())
        .fallback(gateway::intercept)
        .with_state(Arc::clone(&state));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(
        %addr,
        upstream = %state.manager.origin(),
        version = state.manager.version(),
        "Harbor listening"
    );
    axum::serve(listener, app).await?;
    Ok(())
}
