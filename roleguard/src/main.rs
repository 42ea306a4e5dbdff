//! roleguard: lease-based leader election for a group of pods.
//!
//! Each replica runs one instance. The instance holding the group's lease
//! labels its own pod as the active one and every other instance labels
//! its pod as inactive, so Services can select the leader by label.
//!
//! Exit codes:
//! - 0: clean shutdown after SIGINT or SIGTERM
//! - 1: invalid configuration or startup failure

mod config;
mod server;
mod telemetry;

use anyhow::Context;
use clap::Parser;
use roleguard_kube::{KubeLeaseStore, KubePodApi};
use roleguard_leader::{LeaderCoordinator, LeaderError, LeaseElector, MetricsReporter};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    telemetry::init(config.log_format);

    let election = Arc::new(
        config
            .election_config()
            .context("invalid election configuration")?,
    );
    let metrics = Arc::new(MetricsReporter::new(&election.identity)?);

    let client = roleguard_kube::default_client()
        .await
        .map_err(|e| LeaderError::FatalStartup {
            reason: e.to_string(),
        })?;
    let listener = server::bind(config.metrics_addr).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let coordinator = LeaderCoordinator::new(
        election,
        Arc::new(LeaseElector::new(Arc::new(KubeLeaseStore::new(
            client.clone(),
        )))),
        Arc::new(KubePodApi::new(client)),
        Arc::clone(&metrics),
    );

    let election_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            let result = coordinator.run(shutdown.clone()).await;
            // Stops the metrics endpoint if the election ends on its own.
            shutdown.cancel();
            result
        }
    });

    if let Err(e) = server::serve(listener, metrics, shutdown.clone()).await {
        error!(error = %e, "Metrics endpoint failed");
        shutdown.cancel();
    }

    let result = election_task.await.context("election task failed")?;
    result?;
    info!("Shut down cleanly");
    Ok(())
}

/// Cancels `shutdown` on SIGINT or SIGTERM.
async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}
