//! Security facade.
//!
//! [`SecurityMonitor`] owns the rate limiter, the threat detector and the
//! audit sink, and is built once at startup and shared through an `Arc`.
//! Request handlers reach the limiter through a [`RateLimitHandler`], which
//! resolves its rule by name when it is created so a typo fails at startup
//! rather than on the first request.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
};

use crate::http::response::{rate_limit_headers, rate_limited_response};
use crate::observability::metrics;
use crate::security::audit::{
    AuditError, AuditQuery, AuditSink, AuditStatistics, SecurityAuditLog, Severity,
    ThreatDetectionEvent, Timeframe,
};
use crate::security::clock::Clock;
use crate::security::detector::{ThreatDetector, ThreatInsights};
use crate::security::error::SecurityError;
use crate::security::events::SecurityContext;
use crate::security::identity::identify;
use crate::security::rate_limit::{RateLimitDecision, RateLimitEntry, RateLimitRule, RateLimiter, RuleTable};

/// User id attached to a request by upstream authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

pub struct SecurityMonitor {
    limiter: RateLimiter,
    detector: ThreatDetector,
    rules: ArcSwap<RuleTable>,
    sink: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl SecurityMonitor {
    pub fn new(rules: RuleTable, detector: ThreatDetector, sink: Arc<dyn AuditSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            limiter: RateLimiter::new(clock.clone()),
            detector,
            rules: ArcSwap::from_pointee(rules),
            sink,
            clock,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn detector(&self) -> &ThreatDetector {
        &self.detector
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn rules(&self) -> Arc<RuleTable> {
        self.rules.load_full()
    }

    /// Swap in a new rule table. Existing windows keep their counts.
    pub fn update_rules(&self, rules: RuleTable) {
        let names: Vec<&str> = rules.names().collect();
        tracing::info!(rules = ?names, "Rate limit rules updated");
        self.rules.store(Arc::new(rules));
    }

    /// A request guard for `rule_name`.
    pub fn rate_limit_handler(self: &Arc<Self>, rule_name: &str) -> Result<RateLimitHandler, SecurityError> {
        self.rules.load().require(rule_name)?;
        Ok(RateLimitHandler {
            monitor: Arc::clone(self),
            rule_name: rule_name.to_string(),
        })
    }

    /// Count one request against `identifier`. `None` if the rule is unknown.
    pub fn check(&self, rule_name: &str, identifier: &str) -> Option<(RateLimitRule, RateLimitDecision)> {
        let rules = self.rules.load();
        let Some(rule) = rules.get(rule_name) else {
            tracing::error!(rule = rule_name, "Rate limit rule not configured, allowing request");
            return None;
        };

        let decision = self.limiter.check(identifier, rule, rule_name);
        if !decision.allowed {
            metrics::record_rate_limited(rule_name);
            tracing::info!(
                rule = rule_name,
                client = identifier,
                retry_after = decision.retry_after,
                "Rate limit exceeded"
            );
        }
        Some((rule.clone(), decision))
    }

    pub fn record_success(&self, rule_name: &str, identifier: &str) -> bool {
        match self.rules.load().get(rule_name) {
            Some(rule) => self.limiter.record_success(identifier, rule, rule_name),
            None => false,
        }
    }

    pub fn record_failure(&self, rule_name: &str, identifier: &str) -> bool {
        match self.rules.load().get(rule_name) {
            Some(rule) => self.limiter.record_failure(identifier, rule, rule_name),
            None => false,
        }
    }

    pub async fn record_security_event(
        &self,
        event_type: &str,
        context: SecurityContext,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> Vec<ThreatDetectionEvent> {
        self.detector.record_security_event(event_type, context, metadata).await
    }

    /// Persist an audit record on a background task. Failures are logged,
    /// never returned.
    pub fn store_audit_log(&self, entry: SecurityAuditLog) {
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            let operation = entry.operation.clone();
            if let Err(e) = sink.store_audit_log(entry).await {
                tracing::error!(operation = %operation, error = %e, "Failed to persist audit log");
                metrics::record_audit_failure("store_audit_log");
            }
        });
    }

    pub async fn query_audit_logs(&self, filters: AuditQuery) -> Result<Vec<SecurityAuditLog>, AuditError> {
        self.sink.query_audit_logs(filters).await.inspect_err(|e| {
            tracing::error!(error = %e, "Audit query failed");
            metrics::record_audit_failure("query_audit_logs");
        })
    }

    pub async fn statistics(&self, timeframe: Timeframe) -> Result<AuditStatistics, AuditError> {
        self.sink.get_statistics(timeframe).await.inspect_err(|e| {
            tracing::error!(timeframe = timeframe.as_str(), error = %e, "Audit statistics failed");
            metrics::record_audit_failure("get_statistics");
        })
    }

    pub fn reset(&self, identifier: &str, rule_name: &str) -> bool {
        let existed = self.limiter.reset(identifier, rule_name);
        tracing::info!(rule = rule_name, client = identifier, existed, "Rate limit reset");
        existed
    }

    pub fn status(&self, identifier: &str, rule_name: &str) -> Option<RateLimitEntry> {
        self.limiter.status(identifier, rule_name)
    }

    pub fn threat_level(&self, key: &str) -> Severity {
        self.detector.threat_level(key)
    }

    pub fn should_block(&self, key: &str) -> bool {
        self.detector.should_block(key)
    }

    pub fn insights(&self) -> ThreatInsights {
        self.detector.insights()
    }
}

/// The result of running a request through a [`RateLimitHandler`].
#[derive(Debug, Clone)]
pub struct RateLimitOutcome {
    pub identifier: String,
    pub rule: RateLimitRule,
    pub decision: RateLimitDecision,
}

/// Rate limit guard bound to one rule name.
#[derive(Clone)]
pub struct RateLimitHandler {
    monitor: Arc<SecurityMonitor>,
    rule_name: String,
}

impl RateLimitHandler {
    /// Identify the client and count the request. `None` means the rule was
    /// dropped by a reload and the request is let through.
    pub fn evaluate(&self, headers: &HeaderMap, user_id: Option<&str>) -> Option<RateLimitOutcome> {
        let identifier = identify(headers, user_id);
        let (rule, decision) = self.monitor.check(&self.rule_name, &identifier)?;
        Some(RateLimitOutcome {
            identifier,
            rule,
            decision,
        })
    }

    /// `Some(429)` if the request must be rejected, `None` to proceed.
    ///
    /// On `None` the caller owns reporting the outcome through
    /// [`RateLimitHandler::record_success`] or [`RateLimitHandler::record_failure`].
    pub fn handle<B>(&self, request: &Request<B>, user_id: Option<&str>) -> Option<Response> {
        let outcome = self.evaluate(request.headers(), user_id)?;
        if outcome.decision.allowed {
            return None;
        }
        Some(self.reject(&outcome, request.uri().path()))
    }

    pub fn reject(&self, outcome: &RateLimitOutcome, path: &str) -> Response {
        rate_limited_response(&outcome.rule, &outcome.decision, path, self.monitor.clock.now())
    }

    pub fn record_success(&self, identifier: &str) -> bool {
        self.monitor.record_success(&self.rule_name, identifier)
    }

    pub fn record_failure(&self, identifier: &str) -> bool {
        self.monitor.record_failure(&self.rule_name, identifier)
    }
}

/// Axum middleware form of [`RateLimitHandler`].
///
/// Allowed responses carry the `X-RateLimit-*` headers. A 2xx/3xx response is
/// reported as a success and a 5xx as a failure, so rules that skip either
/// kind are refunded without help from the route.
pub async fn rate_limit_middleware(
    State(handler): State<RateLimitHandler>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let user_id = request
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|u| u.0.clone());

    let Some(outcome) = handler.evaluate(request.headers(), user_id.as_deref()) else {
        return next.run(request).await;
    };

    if !outcome.decision.allowed {
        let path = request.uri().path().to_string();
        return handler.reject(&outcome, &path);
    }

    let mut response = next.run(request).await;

    let status = response.status();
    if status.is_success() || status.is_redirection() {
        handler.record_success(&outcome.identifier);
    } else if status.is_server_error() {
        handler.record_failure(&outcome.identifier);
    }

    let headers = response.headers_mut();
    for (name, value) in rate_limit_headers(&outcome.rule, &outcome.decision) {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
    response
}
