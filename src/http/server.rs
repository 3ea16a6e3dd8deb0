//! HTTP server setup and ingestion handlers.
//!
//! # Responsibilities
//! - Create Axum Router with the ingestion API
//! - Wire up middleware (tracing, timeout, request ID)
//! - Translate JSON requests into SecurityMonitor calls
//! - Serve until the shutdown broadcast fires

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::MonitorConfig;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::http::response::{error_response, rate_limit_headers};
use crate::lifecycle::shutdown;
use crate::security::audit::{SecurityAuditLog, Severity};
use crate::security::events::SecurityContext;
use crate::security::identity::{client_ip, identify};
use crate::security::SecurityMonitor;

/// State shared by the ingestion handlers.
#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<SecurityMonitor>,
}

/// HTTP server for the ingestion API.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: MonitorConfig, monitor: Arc<SecurityMonitor>) -> Self {
        let router = Self::build_router(&config, AppState { monitor });
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &MonitorConfig, state: AppState) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/api/rate-limit/{rule}", post(check_rate_limit))
            .route("/api/rate-limit/{rule}/outcome", post(record_outcome))
            .route("/api/events", post(record_event))
            .route("/api/audit", post(record_audit))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown::wait(shutdown))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Default, Deserialize)]
pub struct RateLimitCheck {
    pub user_id: Option<String>,
    /// Path of the guarded route, echoed in a 429 body.
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RateLimitCheckResponse {
    pub identifier: String,
    pub allowed: bool,
    pub remaining: u32,
    pub reset_time: DateTime<Utc>,
}

async fn check_rate_limit(
    State(state): State<AppState>,
    Path(rule): Path<String>,
    headers: HeaderMap,
    uri: Uri,
    Json(body): Json<RateLimitCheck>,
) -> Response {
    let handler = match state.monitor.rate_limit_handler(&rule) {
        Ok(handler) => handler,
        Err(e) => return error_response(StatusCode::NOT_FOUND, "UNKNOWN_RULE", e.to_string()),
    };

    let Some(outcome) = handler.evaluate(&headers, body.user_id.as_deref()) else {
        return error_response(StatusCode::NOT_FOUND, "UNKNOWN_RULE", format!("unknown rate limit rule: {}", rule));
    };

    if !outcome.decision.allowed {
        let path = body.path.as_deref().unwrap_or(uri.path());
        return handler.reject(&outcome, path);
    }

    (
        rate_limit_headers(&outcome.rule, &outcome.decision),
        Json(RateLimitCheckResponse {
            identifier: outcome.identifier,
            allowed: true,
            remaining: outcome.decision.remaining,
            reset_time: outcome.decision.reset_time,
        }),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct OutcomeReport {
    pub user_id: Option<String>,
    pub success: bool,
}

async fn record_outcome(
    State(state): State<AppState>,
    Path(rule): Path<String>,
    headers: HeaderMap,
    Json(body): Json<OutcomeReport>,
) -> Response {
    if state.monitor.rules().get(&rule).is_none() {
        return error_response(StatusCode::NOT_FOUND, "UNKNOWN_RULE", format!("unknown rate limit rule: {}", rule));
    }

    let identifier = identify(&headers, body.user_id.as_deref());
    let refunded = if body.success {
        state.monitor.record_success(&rule, &identifier)
    } else {
        state.monitor.record_failure(&rule, &identifier)
    };

    Json(serde_json::json!({ "identifier": identifier, "refunded": refunded })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct EventReport {
    #[serde(rename = "type")]
    pub event_type: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    /// Overrides the address derived from proxy headers.
    pub ip_address: Option<String>,
    pub request_path: Option<String>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Serialize)]
pub struct EventReportResponse {
    pub identity_key: String,
    pub threats: Vec<ThreatSummary>,
    pub threat_level: Severity,
    pub should_block: bool,
}

#[derive(Debug, Serialize)]
pub struct ThreatSummary {
    pub pattern: String,
    pub severity: Severity,
    pub mitigated: bool,
}

async fn record_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<EventReport>,
) -> Json<EventReportResponse> {
    let context = SecurityContext {
        user_id: body.user_id,
        session_id: body.session_id,
        ip_address: Some(body.ip_address.unwrap_or_else(|| client_ip(&headers))),
        user_agent: headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        request_path: body.request_path,
        timestamp: state.monitor.clock().now(),
    };
    let identity_key = context.identity_key();

    let threats = state
        .monitor
        .record_security_event(&body.event_type, context, body.metadata)
        .await
        .into_iter()
        .map(|t| ThreatSummary {
            pattern: t.event_type,
            severity: t.severity,
            mitigated: t.mitigated,
        })
        .collect();

    let threat_level = state.monitor.threat_level(&identity_key);
    Json(EventReportResponse {
        should_block: threat_level == Severity::Critical,
        identity_key,
        threats,
        threat_level,
    })
}

async fn record_audit(State(state): State<AppState>, Json(entry): Json<SecurityAuditLog>) -> StatusCode {
    state.monitor.store_audit_log(entry);
    StatusCode::ACCEPTED
}
