//! Chime member binary.
//!
//! Joins a statically configured ring, owns its share of the reminders and
//! serves the operator API.

use std::sync::Arc;

use chime_ring::{ClusterRing, RingProvider};
use chime_service::{
    api, ChimeConfig, LoggingSink, ReminderManagement, ReminderPartitionService,
    ReminderRegistry, SystemClock,
};
use chime_table::TableProvider;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Chime reminder service.
#[derive(Parser, Debug)]
#[command(name = "chime")]
#[command(about = "Run a chime reminder service member")]
#[command(version)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialise tracing
    let filter = if cli.verbose {
        "debug,hyper=info,tower=info"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    info!("Chime starting");

    let config = ChimeConfig::load(cli.config.as_deref())?;
    let member = config.service.member_id.clone();
    info!(
        member = %member,
        listen_addr = %config.api.listen_addr,
        peers = config.ring.members.len(),
        "Configuration loaded"
    );

    let tables = TableProvider::from_config(&config.table)?;
    let migration = tables.migration().ok();

    let mut members = config.ring.members.clone();
    if !members.contains(&member) {
        members.push(member.clone());
    }
    let ring = Arc::new(ClusterRing::with_members(config.ring.strategy, members));
    let view: Arc<dyn RingProvider> = Arc::new(ring.member_view(member.clone()));

    let clock = Arc::new(SystemClock);
    let partition = Arc::new(ReminderPartitionService::new(
        view,
        tables.table(),
        Arc::new(LoggingSink),
        clock.clone(),
        config.service.clone(),
    ));
    partition.start().await?;

    let registry = Arc::new(ReminderRegistry::new(
        ring.clone(),
        config.service.minimum_period,
    ));
    registry.register_service(member.clone(), partition.clone());

    let state = Arc::new(api::AppState {
        management: ReminderManagement::new(tables.table(), clock)
            .with_registry(registry.clone()),
        registry,
        partition: partition.clone(),
        migration,
    });
    let app = api::router(state);

    let listener = TcpListener::bind(&config.api.listen_addr).await?;
    info!(addr = %config.api.listen_addr, "Operator API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    partition.stop().await;
    info!("Chime shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
