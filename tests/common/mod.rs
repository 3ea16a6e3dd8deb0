//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use security_monitor::admin::{setup_admin_router, AdminState};
use security_monitor::http::HttpServer;
use security_monitor::lifecycle::{shutdown, startup::build_monitor};
use security_monitor::security::audit::MemoryAuditSink;
use security_monitor::{MonitorConfig, SecurityMonitor, Shutdown};
use tokio::net::TcpListener;

pub const ADMIN_KEY: &str = "integration-admin-key";

/// A running monitor with both listeners bound to ephemeral ports.
#[allow(dead_code)]
pub struct TestMonitor {
    pub api: SocketAddr,
    pub admin: SocketAddr,
    pub monitor: Arc<SecurityMonitor>,
    pub sink: Arc<MemoryAuditSink>,
    pub shutdown: Shutdown,
    pub client: Client,
}

#[allow(dead_code)]
impl TestMonitor {
    pub fn api_url(&self, path: &str) -> String {
        format!("http://{}{}", self.api, path)
    }

    pub fn admin_url(&self, path: &str) -> String {
        format!("http://{}{}", self.admin, path)
    }

    pub fn admin_get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(self.admin_url(path)).bearer_auth(ADMIN_KEY)
    }

    pub fn admin_delete(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.delete(self.admin_url(path)).bearer_auth(ADMIN_KEY)
    }
}

impl Drop for TestMonitor {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn spawn_monitor() -> TestMonitor {
    spawn_monitor_with(MonitorConfig::default()).await
}

#[allow(dead_code)]
pub async fn spawn_monitor_with(mut config: MonitorConfig) -> TestMonitor {
    config.listener.bind_address = "127.0.0.1:0".into();
    config.observability.metrics_enabled = false;
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.into();

    let (monitor, sink) = build_monitor(&config).unwrap();
    let shutdown = Shutdown::new();

    let admin_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let admin = admin_listener.local_addr().unwrap();
    let admin_router = setup_admin_router(AdminState::new(monitor.clone(), &config.admin));
    let admin_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        axum::serve(admin_listener, admin_router)
            .with_graceful_shutdown(shutdown::wait(admin_shutdown))
            .await
            .unwrap();
    });

    let api_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let api = api_listener.local_addr().unwrap();
    let server = HttpServer::new(config, monitor.clone());
    tokio::spawn(server.run(api_listener, shutdown.subscribe()));

    TestMonitor {
        api,
        admin,
        monitor,
        sink,
        shutdown,
        client: Client::new(),
    }
}

/// Poll `check` until it holds; sink writes land on background tasks.
#[allow(dead_code)]
pub async fn eventually<F: Fn() -> bool>(check: F) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within one second");
}
