//! Security monitor service.
//!
//! # Architecture Overview
//!
//! ```text
//!     Front end                ┌──────────────────────────────────────────────┐
//!     ─────────────────────────┼─▶ http/server  ──▶  SecurityMonitor          │
//!      rate-limit checks,      │                      ├─ RateLimiter          │
//!      security events,        │                      ├─ ThreatDetector       │
//!      audit records           │                      │   └─ EventStore       │
//!                              │                      └─ AuditSink            │
//!     Operator                 │                                              │
//!     ─────────────────────────┼─▶ admin (bearer)  ──▶  reset/status/insights │
//!                              │                                              │
//!                              │  lifecycle: cleanup task, shutdown, reload   │
//!                              └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use security_monitor::admin::{setup_admin_router, AdminState};
use security_monitor::config::{load_config, watcher::ConfigWatcher, MonitorConfig};
use security_monitor::http::HttpServer;
use security_monitor::lifecycle::{cleanup::CleanupTask, shutdown, signals, startup, Shutdown};
use security_monitor::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "security-monitor")]
#[command(about = "Rate limiting and threat detection for the registration API", long_about = None)]
struct Args {
    /// Path to a TOML config file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => MonitorConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "security-monitor starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        rules = config.rate_limits.len(),
        max_events_per_key = config.event_store.max_events_per_key,
        admin_enabled = config.admin.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let (monitor, _sink) = startup::build_monitor(&config)?;
    let shutdown = Arc::new(Shutdown::new());

    let cleanup = CleanupTask::new(
        monitor.clone(),
        Duration::from_secs(config.event_store.cleanup_interval_secs),
    );
    tokio::spawn(cleanup.run(shutdown.subscribe()));

    // Hot reload of the rule table.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let monitor = monitor.clone();
            tokio::spawn(async move {
                while let Some(rules) = updates.recv().await {
                    monitor.update_rules(rules);
                }
            });
            Some(watcher.run()?)
        }
        None => None,
    };

    if config.admin.enabled {
        let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
        let admin_router = setup_admin_router(AdminState::new(monitor.clone(), &config.admin));
        let admin_shutdown = shutdown.subscribe();
        tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(admin_listener, admin_router)
                .with_graceful_shutdown(shutdown::wait(admin_shutdown))
                .await
            {
                tracing::error!(error = %e, "Admin server failed");
            }
        });
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server_shutdown = shutdown.subscribe();

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        signals::shutdown_on_ctrl_c(&signal_shutdown).await;
    });

    let server = HttpServer::new(config, monitor);
    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
