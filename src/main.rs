use std::path::Path;

use d_broker::start_server;
use d_broker::BrokerConfig;
use d_broker::BrokerTypeConfig;
use d_broker::CallContext;
use d_broker::Error;
use d_broker::Manager;
use d_broker::MemoryHub;
use d_broker::Result;
use d_broker::TracingHost;
use d_broker::TracingReporter;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1);
    let settings = BrokerConfig::load(config_path.as_deref())?;

    // Initializing Logs
    let _guard = init_observability(&settings.log.log_dir)?;

    // Initializing Shutdown Signal
    let (graceful_tx, graceful_rx) = watch::channel(());

    if settings.monitoring.prometheus_enabled {
        let port = settings.monitoring.prometheus_port;
        let rx = graceful_rx.clone();
        tokio::spawn(async move {
            start_server(port, rx).await;
        });
    }

    // Build Manager
    let hub = MemoryHub::new();
    let mut manager: Manager<BrokerTypeConfig> =
        Manager::new(settings.clone(), hub.endpoint(), TracingHost::new(), TracingReporter);
    let ctx = CallContext::Internal;
    let port = manager.listen(&ctx, &settings.channel.listen_address, settings.channel.listen_port);
    for peer in &settings.channel.peers {
        manager.peer(&ctx, &peer.address, peer.port, settings.channel.connect_retry());
    }
    manager.init_post_script();

    info!(node_id = manager.node_id(), port, "broker started. Waiting for CTRL+C signal...");
    // Listen on Shutdown Signal
    tokio::spawn(async {
        if let Err(e) = graceful_shutdown(graceful_tx).await {
            error!("Failed to shutdown: {:?}", e);
        }
    });

    // Start poll loop
    if let Err(e) = manager.run(graceful_rx).await {
        error!("broker stops: {:?}", e);
    }

    println!("Exiting program.");
    Ok(())
}

async fn graceful_shutdown(graceful_tx: watch::Sender<()>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }

    graceful_tx.send(()).map_err(|e| {
        error!("Failed to send shutdown signal: {}", e);
        Error::Fatal(format!("Failed to send shutdown signal: {}", e))
    })?;

    info!("Shutdown completed");
    Ok(())
}

pub fn init_observability(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;
    let log_file = tracing_appender::rolling::never(log_dir, "d-broker.log");

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    Ok(guard)
}
