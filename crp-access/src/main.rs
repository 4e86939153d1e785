//! Access boundary service (crp-access) - Main entry point
//!
//! Opens the primary and audit stores, wires the access components and
//! serves the HTTP adapter until Ctrl+C or SIGTERM.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use crp_common::api::signature::load_shared_secret;
use crp_common::config::{
    load_toml_config_or_default, CompiledDefaults, RootFolderInitializer, RootFolderResolver,
    TomlConfig,
};
use crp_common::db::{init_audit_database, init_database};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crp_access::api::{self, AppContext};
use crp_access::audit::SqliteAuditStore;
use crp_access::AccessServices;

/// Command-line arguments for crp-access
#[derive(Parser, Debug)]
#[command(name = "crp-access")]
#[command(about = "Program tiering and client visibility boundary")]
#[command(version)]
struct Args {
    /// Root folder holding crp.db and crp-audit.db
    #[arg(short, long, env = "CRP_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Address to listen on (overrides config file)
    #[arg(short, long)]
    bind: Option<String>,

    /// Audit store location (overrides config file)
    #[arg(long)]
    audit_database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_toml_config_or_default();

    init_tracing(&config)?;

    info!(
        "Starting crp-access v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    // Root folder and store locations
    let root_folder = RootFolderResolver::with_config(config.clone())
        .with_cli_arg(args.root_folder.clone())
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder)
        .with_audit_database(args.audit_database.clone().or(config.audit_database.clone()));
    initializer
        .ensure_directory_exists()
        .context("Failed to create root folder")?;
    let (primary_path, audit_path) = initializer
        .store_paths()
        .context("Invalid store configuration")?;

    info!("Root folder: {}", initializer.root_folder().display());

    let pool = init_database(&primary_path)
        .await
        .context("Failed to open primary store")?;
    let audit_pool = init_audit_database(&audit_path)
        .await
        .context("Failed to open audit store")?;

    let sink = Arc::new(SqliteAuditStore::new(audit_pool));
    let services = Arc::new(
        AccessServices::new(pool.clone(), sink)
            .await
            .context("Failed to initialize access services")?,
    );
    info!(
        "Program registry loaded ({} programs)",
        services.registry.list_programs().await.len()
    );

    let shared_secret = load_shared_secret(&pool)
        .await
        .context("Failed to load API shared secret")?;
    if shared_secret == 0 {
        warn!("Request signing is disabled (api_shared_secret = 0)");
    }

    let app = api::create_router(AppContext {
        services,
        shared_secret,
    });

    let addr: SocketAddr = match &args.bind {
        Some(bind) => bind
            .parse()
            .with_context(|| format!("Invalid --bind address '{}'", bind))?,
        None => config
            .bind_address(&CompiledDefaults::for_current_platform())
            .context("Invalid bind_address in config")?,
    };

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// RUST_LOG wins over the config file's `[logging] level`
fn init_tracing(config: &TomlConfig) -> Result<()> {
    let default_level = config
        .logging
        .level
        .clone()
        .unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
