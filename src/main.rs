//! CHPA Kubernetes Operator
//!
//! Runs the ConfigurableAutoscaler controller against the cluster the
//! kubeconfig points at.
//!
//! ## Usage
//!
//! ```bash
//! # Run the operator (requires kubeconfig)
//! chpa-operator
//!
//! # Run with custom log level
//! RUST_LOG=debug chpa-operator
//! ```

use chpa_operator::leader_election::{self, LeaderElection};
use chpa_operator::{AutoscalerController, ControllerSettings};
use clap::Parser;
use kube::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// CHPA Kubernetes Operator
#[derive(Parser, Debug)]
#[command(name = "chpa-operator")]
#[command(version, about = "Configurable horizontal pod autoscaler for Kubernetes")]
struct Args {
    /// Enable leader election for HA deployments
    #[arg(long, default_value = "false")]
    leader_election: bool,

    /// Namespace for the leader election Lease (auto-detected if empty)
    #[arg(long, default_value = "")]
    leader_election_namespace: String,

    /// Namespace to watch (empty for all namespaces)
    #[arg(long, default_value = "")]
    namespace: String,

    /// Seconds between reconcile passes per autoscaler object
    #[arg(long, default_value = "15")]
    sync_period_seconds: u64,

    /// The single workload kind autoscalers may reference
    #[arg(long, default_value = "Deployment")]
    target_kind: String,

    /// Metrics bind address
    #[arg(long, default_value = "0.0.0.0:8080")]
    metrics_bind_address: String,

    /// Health probe bind address
    #[arg(long, default_value = "0.0.0.0:8081")]
    health_probe_bind_address: String,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .init();
}

/// Resolves once leadership is gone; never resolves when election is off.
async fn leadership_watch(election: Option<Arc<LeaderElection>>) {
    match election {
        Some(election) => election.keep_renewing().await,
        None => std::future::pending().await,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    info!(
        target_kind = %args.target_kind,
        sync_period_seconds = args.sync_period_seconds,
        leader_election = args.leader_election,
        namespace = %if args.namespace.is_empty() { "<all>" } else { &args.namespace },
        "Starting CHPA operator"
    );

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    // With leader election on, block here until this replica wins the lease;
    // standbys sit in this call until the incumbent resigns or goes stale.
    let election = args.leader_election.then(|| {
        let ns = leader_election::detect_namespace(&args.leader_election_namespace);
        Arc::new(LeaderElection::new(client.clone(), &ns))
    });
    if let Some(election) = &election {
        election.acquire().await?;
    }

    let settings = ControllerSettings {
        sync_period: Duration::from_secs(args.sync_period_seconds),
        target_kind: args.target_kind.clone(),
        watch_namespace: args.namespace.clone(),
    };
    let controller = Arc::new(AutoscalerController::new(client, settings));

    let controller_task = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move {
            if let Err(err) = controller.run().await {
                error!(error = %err, "Autoscaler controller stopped with an error");
            }
        }
    });

    // Run until ctrl-c, until the controller ends, or until leadership is
    // lost. Exiting on lost leadership lets the new leader reconcile alone.
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        outcome = controller_task => {
            if let Err(err) = outcome {
                error!(error = %err, "Autoscaler controller task panicked");
            }
        }
        _ = leadership_watch(election.clone()) => {
            error!("Leadership lost, shutting down");
        }
    }

    // Hand the lease off on the way out instead of letting it expire.
    if let Some(election) = &election {
        election.resign().await;
    }

    info!("CHPA operator stopped");
    Ok(())
}
