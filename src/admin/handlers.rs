use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::http::response::error_response;
use crate::admin::AdminState;
use crate::security::audit::{AuditQuery, Severity, Timeframe};
use crate::security::detector::ThreatInsights;
use crate::security::rate_limit::RuleTable;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub monitored_keys: usize,
    pub rate_limit_entries: usize,
    pub rules: RuleTable,
}

#[derive(Serialize)]
pub struct ThreatStatus {
    pub key: String,
    pub threat_level: Severity,
    pub should_block: bool,
    pub recent_events: usize,
}

#[derive(Deserialize)]
pub struct StatisticsParams {
    #[serde(default)]
    pub timeframe: Timeframe,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let monitor = &state.monitor;
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        monitored_keys: monitor.detector().store().len(),
        rate_limit_entries: monitor.limiter().len(),
        rules: (*monitor.rules()).clone(),
    })
}

pub async fn get_insights(State(state): State<AdminState>) -> Json<ThreatInsights> {
    Json(state.monitor.insights())
}

pub async fn get_rate_limit(
    State(state): State<AdminState>,
    Path((rule, identifier)): Path<(String, String)>,
) -> Response {
    match state.monitor.status(&identifier, &rule) {
        Some(entry) => Json(entry).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("no rate limit entry for {} under '{}'", identifier, rule),
        ),
    }
}

pub async fn reset_rate_limit(
    State(state): State<AdminState>,
    Path((rule, identifier)): Path<(String, String)>,
) -> Json<serde_json::Value> {
    let reset = state.monitor.reset(&identifier, &rule);
    Json(serde_json::json!({ "rule": rule, "identifier": identifier, "reset": reset }))
}

pub async fn get_threat(State(state): State<AdminState>, Path(key): Path<String>) -> Json<ThreatStatus> {
    let monitor = &state.monitor;
    let threat_level = monitor.threat_level(&key);
    Json(ThreatStatus {
        recent_events: monitor.detector().store().get(&key).len(),
        should_block: threat_level == Severity::Critical,
        threat_level,
        key,
    })
}

pub async fn get_audit_logs(State(state): State<AdminState>, Query(filters): Query<AuditQuery>) -> Response {
    match state.monitor.query_audit_logs(filters).await {
        Ok(logs) => Json(logs).into_response(),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, "AUDIT_UNAVAILABLE", e.to_string()),
    }
}

pub async fn get_statistics(State(state): State<AdminState>, Query(params): Query<StatisticsParams>) -> Response {
    match state.monitor.statistics(params.timeframe).await {
        Ok(stats) => Json(serde_json::json!({
            "timeframe": params.timeframe.as_str(),
            "statistics": stats,
        }))
        .into_response(),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, "AUDIT_UNAVAILABLE", e.to_string()),
    }
}
