//! # gitmeta-server
//!
//! Long-running HTTP service that mirrors a configured set of remote Git
//! repositories to local disk and exposes the latest content of selected
//! files as JSON endpoints under `/v1/metadata`. Callers never talk to the
//! upstream repositories; the service absorbs their latency, failures, and
//! polling load.

mod config;
mod logging;
mod middleware;
mod plugins;
mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use gitmeta_core::{MountTable, PluginRegistry, SyncManager};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::AppEnv;
use crate::routes::AppState;

/// Command line arguments for the gitmeta server
#[derive(Parser, Debug)]
#[command(name = "gitmeta-server")]
#[command(about = "Community metadata service backed by mirrored Git repositories")]
struct Args {
    /// Directory holding app.toml and <env>.app.toml
    #[arg(long, env = "APP_CONFIG_DIR", default_value = "./config")]
    config_dir: PathBuf,

    /// Server port (overrides config)
    #[arg(short, long, env = "APP_PORT")]
    port: Option<u16>,

    /// Deployment environment
    #[arg(long, env = "APP_ENV", value_enum)]
    env: Option<AppEnv>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let env = args.env.unwrap_or_default();

    let config = config::load(&args.config_dir, env)?;
    logging::init(env, &config.log.level)?;

    let port = args.port.unwrap_or(config.app.http_port);
    info!(%env, port, name = %config.app.name, "bootstrap complete");

    let mut registry = PluginRegistry::new();
    plugins::register_all(&mut registry);

    let mounts = MountTable::new();
    let manager = SyncManager::new(
        config.manager.clone(),
        &registry,
        &config.enabled_plugins(),
        mounts.clone(),
        port,
    )
    .context("failed to initialize sync manager")?;
    let manager = Arc::new(manager);
    manager.start();

    let state = AppState {
        manager: manager.clone(),
        mounts,
        app_name: config.app.name.clone(),
        env,
    };
    let app = routes::create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, pid = std::process::id(), "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    // Runners and containers are signalled, not joined; a short grace
    // period lets in-flight sync children die before the process exits.
    manager.close();
    info!("draining for 3s before exit");
    tokio::time::sleep(Duration::from_secs(3)).await;
    info!("goodbye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("shutdown by ctrl-c"),
        _ = terminate => info!("shutdown by signal"),
    }
}
