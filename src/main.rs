//! netpulse - Network Health Monitor

use netpulse::alert::AlertManager;
use netpulse::config::MonitorConfig;
use netpulse::db::Store;
use netpulse::monitor::Monitor;
use netpulse::probe::{build_prober, ProbeAdapter};
use netpulse::web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("netpulse=info".parse()?),
        )
        .init();

    // Load configuration
    let cfg = MonitorConfig::from_env();
    tracing::info!("Using database at {}", cfg.database.path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.database.path)?);
    tracing::info!("Database initialized successfully");

    let adapter = ProbeAdapter::new(build_prober(cfg.probe.backend));
    let alerts = Arc::new(AlertManager::new(store.clone(), cfg.alerts.cooldown()));

    let http = cfg.http.clone();
    let monitor = Arc::new(Monitor::new(cfg, store.clone(), alerts, adapter));

    // Start web server
    if http.enabled {
        let server = Server::new(http.port, store, monitor.clone());
        let listener = server.bind().await?;
        tokio::spawn(async move {
            if let Err(e) = server.serve(listener).await {
                tracing::error!("Web server failed: {}", e);
            }
        });
    }

    // Stop on Ctrl+C
    let signal_monitor = monitor.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received interrupt signal");
                signal_monitor.stop().await;
            }
            Err(e) => tracing::error!("Failed to listen for interrupt: {}", e),
        }
    });

    monitor.start().await;

    Ok(())
}
