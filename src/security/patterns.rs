//! Threat pattern catalog.
//!
//! Each pattern is a stateless rule over the current request context and the
//! client's recent event log. Patterns never touch shared state: the detector
//! hands them a snapshot of the log.
//!
//! | Pattern                 | Severity | Trigger                                              |
//! |-------------------------|----------|------------------------------------------------------|
//! | `brute_force_attack`    | high     | >= 5 `login_failed` in 5 min                         |
//! | `sql_injection_attempt` | critical | request path matches an SQL injection signature      |
//! | `xss_attempt`           | high     | request path matches a script injection signature    |
//! | `suspicious_navigation` | medium   | path traversal in any event of the last minute       |
//! | `rapid_requests`        | medium   | > 100 events in 1 min                                |
//! | `privilege_escalation`  | critical | >= 3 `access_denied` on `/admin` paths in 10 min     |
//! | `data_exfiltration`     | critical | > 50 `data_access` over >= 20 distinct paths, 5 min  |
//!
//! Signatures are matched with `regex`, whose automata run in linear time, so
//! hostile input cannot make detection itself expensive.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use regex::{RegexSet, RegexSetBuilder};

use crate::security::audit::Severity;
use crate::security::error::MitigationError;
use crate::security::events::{SecurityContext, SecurityEvent, ACCESS_DENIED, DATA_ACCESS, LOGIN_FAILED};

/// A detection rule with an optional mitigation hook.
pub trait ThreatPattern: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn severity(&self) -> Severity;

    /// Whether the client's activity matches this pattern. `events` is the
    /// client's log, oldest first, already including the current event.
    fn detect(&self, context: &SecurityContext, events: &[SecurityEvent], now: DateTime<Utc>) -> bool;

    /// Mitigation to run on a match. `None` if the pattern has no hook;
    /// otherwise the action taken or why it failed.
    fn mitigate(&self, _context: &SecurityContext) -> Option<Result<String, MitigationError>> {
        None
    }
}

/// The patterns every detector runs, in evaluation order.
pub fn default_catalog() -> Vec<Box<dyn ThreatPattern>> {
    vec![
        Box::new(BruteForce),
        Box::new(SqlInjection::new()),
        Box::new(CrossSiteScripting::new()),
        Box::new(SuspiciousNavigation),
        Box::new(RapidRequests),
        Box::new(PrivilegeEscalation),
        Box::new(DataExfiltration),
    ]
}

fn count_recent<F>(events: &[SecurityEvent], now: DateTime<Utc>, window: Duration, pred: F) -> usize
where
    F: Fn(&SecurityEvent) -> bool,
{
    events
        .iter()
        .filter(|e| e.within(now, window) && pred(e))
        .count()
}

fn signature_set(patterns: &[&str]) -> RegexSet {
    RegexSetBuilder::new(patterns)
        .case_insensitive(true)
        .build()
        .expect("threat signatures are valid regular expressions")
}

pub struct BruteForce;

impl BruteForce {
    const THRESHOLD: usize = 5;
    const WINDOW_MINS: i64 = 5;
}

impl ThreatPattern for BruteForce {
    fn name(&self) -> &str {
        "brute_force_attack"
    }

    fn description(&self) -> &str {
        "Multiple failed login attempts detected"
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    fn detect(&self, _context: &SecurityContext, events: &[SecurityEvent], now: DateTime<Utc>) -> bool {
        count_recent(events, now, Duration::minutes(Self::WINDOW_MINS), |e| e.is(LOGIN_FAILED))
            >= Self::THRESHOLD
    }

    fn mitigate(&self, context: &SecurityContext) -> Option<Result<String, MitigationError>> {
        // Account lockout is not wired up yet; the match is only flagged.
        let key = context.identity_key();
        tracing::warn!(client = %key, "Brute force detected, login lockout requested");
        Some(Ok(format!("login lockout requested for {}", key)))
    }
}

pub struct SqlInjection {
    signatures: RegexSet,
}

impl SqlInjection {
    pub fn new() -> Self {
        Self {
            signatures: signature_set(&[
                r"union\s+select",
                r"drop\s+table",
                r"delete\s+from",
                r"update\s+.*\s+set",
                r"'.*or.*'.*=.*'",
                r"exec\s*\(",
            ]),
        }
    }
}

impl Default for SqlInjection {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreatPattern for SqlInjection {
    fn name(&self) -> &str {
        "sql_injection_attempt"
    }

    fn description(&self) -> &str {
        "SQL injection patterns detected in request"
    }

    fn severity(&self) -> Severity {
        Severity::Critical
    }

    fn detect(&self, context: &SecurityContext, _events: &[SecurityEvent], _now: DateTime<Utc>) -> bool {
        context
            .request_path
            .as_deref()
            .is_some_and(|path| self.signatures.is_match(path))
    }
}

pub struct CrossSiteScripting {
    signatures: RegexSet,
}

impl CrossSiteScripting {
    pub fn new() -> Self {
        Self {
            signatures: signature_set(&[
                r"<script[^>]*>",
                r"javascript:",
                r"on\w+\s*=",
                r"<iframe[^>]*>",
                r"eval\s*\(",
            ]),
        }
    }
}

impl Default for CrossSiteScripting {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreatPattern for CrossSiteScripting {
    fn name(&self) -> &str {
        "xss_attempt"
    }

    fn description(&self) -> &str {
        "Cross-site scripting patterns detected"
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    fn detect(&self, context: &SecurityContext, _events: &[SecurityEvent], _now: DateTime<Utc>) -> bool {
        context
            .request_path
            .as_deref()
            .is_some_and(|path| self.signatures.is_match(path))
    }
}

pub struct SuspiciousNavigation;

impl ThreatPattern for SuspiciousNavigation {
    fn name(&self) -> &str {
        "suspicious_navigation"
    }

    fn description(&self) -> &str {
        "Path traversal attempt detected"
    }

    fn severity(&self) -> Severity {
        Severity::Medium
    }

    fn detect(&self, _context: &SecurityContext, events: &[SecurityEvent], now: DateTime<Utc>) -> bool {
        count_recent(events, now, Duration::minutes(1), |e| {
            let path = e.path();
            path.contains("../") || path.contains("..\\")
        }) > 0
    }
}

pub struct RapidRequests;

impl RapidRequests {
    const THRESHOLD: usize = 100;
}

impl ThreatPattern for RapidRequests {
    fn name(&self) -> &str {
        "rapid_requests"
    }

    fn description(&self) -> &str {
        "Unusually high request rate detected"
    }

    fn severity(&self) -> Severity {
        Severity::Medium
    }

    fn detect(&self, _context: &SecurityContext, events: &[SecurityEvent], now: DateTime<Utc>) -> bool {
        count_recent(events, now, Duration::minutes(1), |_| true) > Self::THRESHOLD
    }

    fn mitigate(&self, context: &SecurityContext) -> Option<Result<String, MitigationError>> {
        // Throttling itself belongs to the rate limiter.
        let key = context.identity_key();
        tracing::warn!(client = %key, "Rapid requests detected, throttling requested");
        Some(Ok(format!("throttling requested for {}", key)))
    }
}

pub struct PrivilegeEscalation;

impl PrivilegeEscalation {
    const THRESHOLD: usize = 3;
}

impl ThreatPattern for PrivilegeEscalation {
    fn name(&self) -> &str {
        "privilege_escalation"
    }

    fn description(&self) -> &str {
        "Repeated denied access to administrative resources"
    }

    fn severity(&self) -> Severity {
        Severity::Critical
    }

    fn detect(&self, _context: &SecurityContext, events: &[SecurityEvent], now: DateTime<Utc>) -> bool {
        count_recent(events, now, Duration::minutes(10), |e| {
            e.is(ACCESS_DENIED) && e.path().contains("/admin")
        }) >= Self::THRESHOLD
    }
}

pub struct DataExfiltration;

impl DataExfiltration {
    const ACCESS_THRESHOLD: usize = 50;
    const DISTINCT_PATHS: usize = 20;
}

impl ThreatPattern for DataExfiltration {
    fn name(&self) -> &str {
        "data_exfiltration"
    }

    fn description(&self) -> &str {
        "Bulk data access across many resources"
    }

    fn severity(&self) -> Severity {
        Severity::Critical
    }

    fn detect(&self, _context: &SecurityContext, events: &[SecurityEvent], now: DateTime<Utc>) -> bool {
        let window = Duration::minutes(5);
        let accesses: Vec<&SecurityEvent> = events
            .iter()
            .filter(|e| e.within(now, window) && e.is(DATA_ACCESS))
            .collect();

        if accesses.len() <= Self::ACCESS_THRESHOLD {
            return false;
        }

        let paths: HashSet<&str> = accesses.iter().map(|e| e.path()).collect();
        paths.len() >= Self::DISTINCT_PATHS
    }
}
