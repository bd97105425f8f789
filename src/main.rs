//! TaskGate - authentication, rate-limiting, and session gateway for a
//! JSON-RPC tool-execution engine.
//!
//! The binary wires the shared store, identity client, and engine client
//! into the gateway state, starts the session sweep, and serves the HTTP
//! routes with graceful shutdown.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use taskgate::auth::{HttpIdentityVerifier, credential_fingerprint};
use taskgate::config::GatewayConfig;
use taskgate::engine::HttpEngine;
use taskgate::gateway::{self, GatewayState};
use taskgate::store::{KvStore, MemoryStore, RedisStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Command-line configuration for the gateway server.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "TASKGATE_PORT", default_value = "4150")]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = GatewayConfig::from_env();

    let store: Arc<dyn KvStore> = match &config.redis_url {
        Some(url) => match RedisStore::connect(url).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                // Startup stays up on a store outage; requests fail closed
                // until the store returns, same as a mid-flight outage.
                warn!(error = %e, "Shared store unreachable, using in-process store");
                Arc::new(MemoryStore::new())
            }
        },
        None => {
            info!("No store URL configured, using in-process store");
            Arc::new(MemoryStore::new())
        }
    };

    let identity = Arc::new(HttpIdentityVerifier::new(
        config.identity_url.clone(),
        config.request_timeout,
    )?);
    let engine = Arc::new(HttpEngine::new(
        config.engine_url.clone(),
        config.request_timeout,
    )?);

    let admin_count = config.admin_tokens.len();
    let state = GatewayState::new(config, store, identity, engine);
    if admin_count > 0 {
        let fingerprints: Vec<String> = state
            .config
            .admin_tokens
            .iter()
            .map(|t| credential_fingerprint(t))
            .collect();
        info!(
            count = admin_count,
            fingerprints = ?fingerprints,
            "Admin credentials exempt from quota"
        );
    }

    let shutdown = CancellationToken::new();
    state.spawn_maintenance(shutdown.clone());

    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "TaskGate listening");

    let app = gateway::router(Arc::clone(&state));
    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            serve_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    let drained = state.sessions.drain_all();
    info!(drained, "Shutdown complete");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install SIGINT handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
