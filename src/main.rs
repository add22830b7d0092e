//! # Backup Maker Controller
//!
//! Kubernetes controller turning ScheduledBackup and RequestedBackupAction
//! resources into backup and restore Jobs and CronJobs.

use anyhow::{Context, Result};
use backup_maker_controller::cli::Args;
use backup_maker_controller::config::ControllerConfig;
use backup_maker_controller::constants::LEADER_LEASE_NAME;
use backup_maker_controller::runtime::{controllers, initialization, LeaderElector};
use clap::Parser;
use kube::Client;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    initialization::init_tracing(args.debug);
    initialization::install_crypto_provider();

    let mut config = ControllerConfig::from_env();
    args.apply(&mut config);

    info!("Starting Backup Maker Controller");
    initialization::log_build_info();
    info!(
        lock_backend = ?config.lock_backend,
        leader_election = config.leader_election,
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );

    let (server_state, _server) = initialization::start_http(config.metrics_port).await?;
    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let mut leadership = if config.leader_election {
        let elector = Arc::new(LeaderElector::new(
            client.clone(),
            LEADER_LEASE_NAME,
            &config.lock_namespace,
            &config.identity,
        ));
        Some(elector.acquire().await)
    } else {
        None
    };

    server_state.is_ready.store(true, Ordering::Relaxed);
    let loops = controllers::run(client, config);

    match leadership.as_mut() {
        Some(guard) => {
            tokio::select! {
                () = loops => info!("Controller stopped"),
                () = guard.lost() => {
                    server_state.is_ready.store(false, Ordering::Relaxed);
                    error!("Leadership lost, exiting");
                    anyhow::bail!("leader lease was lost");
                }
            }
        }
        None => {
            loops.await;
            info!("Controller stopped");
        }
    }

    server_state.is_ready.store(false, Ordering::Relaxed);
    Ok(())
}
