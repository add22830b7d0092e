//! # Initialization
//!
//! Process-wide setup done once before any control loop starts: rustls
//! provider, tracing subscriber, metrics registry and the HTTP server.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::observability::metrics;
use crate::server::{start_server, ServerState};

const SERVER_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const SERVER_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Install the subscriber. `RUST_LOG` wins over the default filter.
pub fn init_tracing(debug: bool) {
    let default_filter = if debug {
        "backup_maker_controller=debug"
    } else {
        "backup_maker_controller=info"
    };
    let result = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .try_init();
    if let Err(e) = result {
        eprintln!("Tracing subscriber already initialized: {e}");
    }
}

/// Select ring as the rustls crypto provider, must run before the first TLS connection
pub fn install_crypto_provider() {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider was already installed");
    }
}

pub fn log_build_info() {
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
}

/// Register metrics and serve probes, returning once the listener is bound
pub async fn start_http(port: u16) -> Result<(Arc<ServerState>, JoinHandle<()>)> {
    metrics::register_metrics().context("Failed to register metrics")?;

    let state = Arc::new(ServerState {
        is_listening: Arc::new(AtomicBool::new(false)),
        is_ready: Arc::new(AtomicBool::new(false)),
    });
    let server_state = state.clone();
    let handle = tokio::spawn(async move {
        if let Err(e) = start_server(port, server_state).await {
            error!("HTTP server error: {}", e);
        }
    });

    let started = Instant::now();
    while !state.is_listening.load(Ordering::Relaxed) {
        if handle.is_finished() {
            anyhow::bail!("HTTP server failed to start on port {port}");
        }
        if started.elapsed() > SERVER_STARTUP_TIMEOUT {
            anyhow::bail!(
                "HTTP server did not listen within {}s",
                SERVER_STARTUP_TIMEOUT.as_secs()
            );
        }
        tokio::time::sleep(SERVER_POLL_INTERVAL).await;
    }
    Ok((state, handle))
}
