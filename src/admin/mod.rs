//! Operator API.
//!
//! Served on its own listener, bound to loopback by default, and guarded by
//! a bearer token.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::config::AdminConfig;
use crate::security::SecurityMonitor;

/// State of the operator API. The key never reaches the ingestion router.
#[derive(Clone)]
pub struct AdminState {
    pub monitor: Arc<SecurityMonitor>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(monitor: Arc<SecurityMonitor>, config: &AdminConfig) -> Self {
        Self {
            monitor,
            api_key: Arc::from(config.api_key.as_str()),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/insights", get(get_insights))
        .route(
            "/admin/rate-limits/{rule}/{identifier}",
            get(get_rate_limit).delete(reset_rate_limit),
        )
        .route("/admin/threats/{key}", get(get_threat))
        .route("/admin/audit", get(get_audit_logs))
        .route("/admin/statistics", get(get_statistics))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
