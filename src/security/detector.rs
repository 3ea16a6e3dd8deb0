//! Threat detection over per-client event history.
//!
//! # Data Flow
//! ```text
//! record_security_event(type, context)
//!     → EventStore (append, snapshot of the client's log)
//!     → EventStore cleanup (when inline cleanup is on)
//!     → every ThreatPattern, in catalog order, over the snapshot
//!     → on match: mitigation hook, structured log, AuditSink (spawned task)
//! ```
//!
//! Analysis runs inline and sees the log exactly as it was right after the
//! event was appended. Sink and mitigation failures are logged and dropped;
//! nothing here returns an error to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;

use crate::observability::metrics;
use crate::security::audit::{AuditSink, Severity, ThreatDetectionEvent};
use crate::security::clock::Clock;
use crate::security::events::{EventStore, SecurityContext, SecurityEvent, ACCESS_DENIED, LOGIN_FAILED};
use crate::security::patterns::{default_catalog, ThreatPattern};

/// Lookback for per-client threat levels.
const THREAT_LEVEL_WINDOW_MINS: i64 = 10;

/// Aggregate view across every monitored client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreatInsights {
    /// Clients at high or critical.
    pub active_threats: usize,
    /// Clients at critical.
    pub blocked_keys: usize,
    pub monitored_keys: usize,
    pub avg_threat_level: Severity,
}

pub struct ThreatDetector {
    store: Arc<EventStore>,
    patterns: Vec<Box<dyn ThreatPattern>>,
    sink: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    inline_cleanup: bool,
}

impl ThreatDetector {
    /// A detector running the standard catalog.
    pub fn new(store: Arc<EventStore>, sink: Arc<dyn AuditSink>, clock: Arc<dyn Clock>) -> Self {
        Self::with_patterns(store, sink, clock, default_catalog())
    }

    pub fn with_patterns(
        store: Arc<EventStore>,
        sink: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        patterns: Vec<Box<dyn ThreatPattern>>,
    ) -> Self {
        Self {
            store,
            patterns,
            sink,
            clock,
            inline_cleanup: true,
        }
    }

    /// Skip the per-event cleanup pass; a background task must then sweep
    /// the store instead.
    pub fn without_inline_cleanup(mut self) -> Self {
        self.inline_cleanup = false;
        self
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// Record an event for the context's client and run every pattern.
    ///
    /// Returns the threat records produced by this event, if any. Records
    /// are written to the sink in the background; this never waits on it.
    pub async fn record_security_event(
        &self,
        event_type: &str,
        context: SecurityContext,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> Vec<ThreatDetectionEvent> {
        let key = context.identity_key();
        let event = SecurityEvent::new(event_type, context.clone(), metadata);
        metrics::record_security_event(event_type);

        let log = self.store.append_and_snapshot(&key, event);
        let now = self.clock.now();
        if self.inline_cleanup {
            self.store.cleanup(now);
        }
        metrics::record_monitored_keys(self.store.len());

        let mut detections = Vec::new();
        for pattern in &self.patterns {
            if pattern.detect(&context, &log, now) {
                detections.push(self.handle_detection(pattern.as_ref(), &context, &key, now));
            }
        }
        detections
    }

    fn handle_detection(
        &self,
        pattern: &dyn ThreatPattern,
        context: &SecurityContext,
        key: &str,
        now: DateTime<Utc>,
    ) -> ThreatDetectionEvent {
        let mut details = HashMap::new();
        details.insert("pattern".to_string(), json!(pattern.name()));
        details.insert("description".to_string(), json!(pattern.description()));
        details.insert("identity_key".to_string(), json!(key));
        if let Some(path) = &context.request_path {
            details.insert("request_path".to_string(), json!(path));
        }
        if let Some(agent) = &context.user_agent {
            details.insert("user_agent".to_string(), json!(agent));
        }
        if let Some(session) = &context.session_id {
            details.insert("session_id".to_string(), json!(session));
        }

        let mut threat = ThreatDetectionEvent {
            event_type: pattern.name().to_string(),
            severity: pattern.severity(),
            source_ip: context.source_ip().to_string(),
            user_id: context.user_id.clone(),
            details,
            timestamp: now,
            mitigated: false,
            mitigation_action: None,
        };

        match pattern.mitigate(context) {
            None => {}
            Some(Ok(action)) => {
                threat.mitigated = true;
                threat.mitigation_action = Some(action);
                metrics::record_mitigation(pattern.name(), "applied");
            }
            Some(Err(e)) => {
                tracing::error!(pattern = pattern.name(), client = %key, error = %e, "Threat mitigation failed");
                metrics::record_mitigation(pattern.name(), "failed");
            }
        }

        self.persist(threat.clone(), key);

        metrics::record_threat(pattern.name(), threat.severity);
        tracing::warn!(
            pattern = pattern.name(),
            severity = %threat.severity,
            identity_key = %key,
            mitigated = threat.mitigated,
            "Security threat detected"
        );

        threat
    }

    /// Hand the record to the sink on a separate task.
    fn persist(&self, threat: ThreatDetectionEvent, key: &str) {
        let sink = Arc::clone(&self.sink);
        let key = key.to_string();
        tokio::spawn(async move {
            let pattern = threat.event_type.clone();
            if let Err(e) = sink.store_threat_event(threat).await {
                tracing::error!(pattern = %pattern, client = %key, error = %e, "Failed to persist threat event");
                metrics::record_audit_failure("store_threat_event");
            }
        });
    }

    /// Classify a client by its activity over the last ten minutes.
    pub fn threat_level(&self, key: &str) -> Severity {
        let now = self.clock.now();
        let window = Duration::minutes(THREAT_LEVEL_WINDOW_MINS);
        let events = self.store.get(key);

        let recent = events.iter().filter(|e| e.within(now, window));
        let (mut failed_logins, mut access_denied, mut total) = (0usize, 0usize, 0usize);
        for event in recent {
            total += 1;
            if event.is(LOGIN_FAILED) {
                failed_logins += 1;
            } else if event.is(ACCESS_DENIED) {
                access_denied += 1;
            }
        }

        if failed_logins >= 10 || access_denied >= 5 {
            Severity::Critical
        } else if failed_logins >= 5 || access_denied >= 3 || total > 200 {
            Severity::High
        } else if failed_logins >= 2 || total > 100 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn should_block(&self, key: &str) -> bool {
        self.threat_level(key) == Severity::Critical
    }

    pub fn insights(&self) -> ThreatInsights {
        let levels: Vec<Severity> = self
            .store
            .keys()
            .iter()
            .map(|key| self.threat_level(key))
            .collect();

        let monitored_keys = levels.len();
        let avg_threat_level = if monitored_keys == 0 {
            Severity::Low
        } else {
            let total: u32 = levels.iter().map(|l| u32::from(l.score())).sum();
            Severity::from_score(f64::from(total) / monitored_keys as f64)
        };

        ThreatInsights {
            active_threats: levels.iter().filter(|l| **l >= Severity::High).count(),
            blocked_keys: levels.iter().filter(|l| **l == Severity::Critical).count(),
            monitored_keys,
            avg_threat_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::audit::{AuditError, AuditQuery, AuditStatistics, MemoryAuditSink, SecurityAuditLog, Timeframe};
    use crate::security::clock::ManualClock;
    use crate::security::error::MitigationError;
    use async_trait::async_trait;

    struct Fixture {
        clock: Arc<ManualClock>,
        sink: Arc<MemoryAuditSink>,
        detector: ThreatDetector,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let sink = Arc::new(MemoryAuditSink::new(1000, clock.clone()));
        let detector = ThreatDetector::new(Arc::new(EventStore::default()), sink.clone(), clock.clone());
        Fixture { clock, sink, detector }
    }

    fn ctx(f: &Fixture, ip: &str, path: &str) -> SecurityContext {
        SecurityContext::new(f.clock.now()).with_ip(ip).with_path(path)
    }

    /// Let spawned sink writes run.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn count(sink: &MemoryAuditSink, name: &str) -> usize {
        sink.threat_events().iter().filter(|t| t.event_type == name).count()
    }

    #[tokio::test]
    async fn test_brute_force_fires_on_fifth_failure() {
        let f = fixture();
        for _ in 0..4 {
            let c = ctx(&f, "198.51.100.4", "/api/auth/login");
            assert!(f.detector.record_security_event(LOGIN_FAILED, c, None).await.is_empty());
            f.clock.advance(Duration::seconds(20));
        }
        assert!(f.sink.threat_events().is_empty());

        let c = ctx(&f, "198.51.100.4", "/api/auth/login");
        let detections = f.detector.record_security_event(LOGIN_FAILED, c, None).await;
        settle().await;

        assert_eq!(detections.len(), 1);
        assert_eq!(count(&f.sink, "brute_force_attack"), 1);
        let threat = &f.sink.threat_events()[0];
        assert_eq!(threat.severity, Severity::High);
        assert_eq!(threat.source_ip, "198.51.100.4");
        assert!(threat.mitigated);
        assert!(threat.mitigation_action.is_some());
    }

    #[tokio::test]
    async fn test_sql_injection_needs_no_history() {
        let f = fixture();
        let c = ctx(&f, "203.0.113.9", "/api/residents?name=' OR '1'='1'");
        let detections = f.detector.record_security_event("api_call", c, None).await;

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].event_type, "sql_injection_attempt");
        assert_eq!(detections[0].severity, Severity::Critical);
        assert!(!detections[0].mitigated);
        assert_eq!(
            detections[0].details["request_path"],
            json!("/api/residents?name=' OR '1'='1'")
        );
    }

    #[tokio::test]
    async fn test_threat_level_thresholds() {
        let f = fixture();
        for _ in 0..9 {
            let c = ctx(&f, "10.0.0.9", "/api/auth/login");
            f.detector.record_security_event(LOGIN_FAILED, c, None).await;
        }
        assert_eq!(f.detector.threat_level("ip:10.0.0.9"), Severity::High);
        assert!(!f.detector.should_block("ip:10.0.0.9"));

        let c = ctx(&f, "10.0.0.9", "/api/auth/login");
        f.detector.record_security_event(LOGIN_FAILED, c, None).await;
        assert_eq!(f.detector.threat_level("ip:10.0.0.9"), Severity::Critical);
        assert!(f.detector.should_block("ip:10.0.0.9"));

        f.clock.advance(Duration::minutes(11));
        assert_eq!(f.detector.threat_level("ip:10.0.0.9"), Severity::Low);
    }

    #[tokio::test]
    async fn test_threat_level_access_denied_and_volume() {
        let f = fixture();
        for _ in 0..3 {
            let c = ctx(&f, "10.0.0.1", "/api/households");
            f.detector.record_security_event(ACCESS_DENIED, c, None).await;
        }
        assert_eq!(f.detector.threat_level("ip:10.0.0.1"), Severity::High);

        for _ in 0..101 {
            let c = ctx(&f, "10.0.0.2", "/api/residents");
            f.detector.record_security_event("api_call", c, None).await;
        }
        assert_eq!(f.detector.threat_level("ip:10.0.0.2"), Severity::Medium);
        settle().await;
        assert_eq!(count(&f.sink, "rapid_requests"), 1);
        assert_eq!(f.detector.threat_level("ip:unseen"), Severity::Low);
    }

    #[tokio::test]
    async fn test_insights_aggregate_levels() {
        let f = fixture();
        for _ in 0..10 {
            f.detector.record_security_event(LOGIN_FAILED, ctx(&f, "a", "/login"), None).await;
        }
        f.detector.record_security_event("api_call", ctx(&f, "b", "/api"), None).await;
        for _ in 0..3 {
            f.detector.record_security_event(LOGIN_FAILED, ctx(&f, "c", "/login"), None).await;
        }

        let insights = f.detector.insights();
        assert_eq!(
            insights,
            ThreatInsights {
                active_threats: 1,
                blocked_keys: 1,
                monitored_keys: 3,
                avg_threat_level: Severity::Medium,
            }
        );
    }

    #[tokio::test]
    async fn test_insights_empty() {
        let f = fixture();
        let insights = f.detector.insights();
        assert_eq!(insights.monitored_keys, 0);
        assert_eq!(insights.avg_threat_level, Severity::Low);
    }

    struct Always {
        name: &'static str,
        fail: bool,
    }

    impl ThreatPattern for Always {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "always matches"
        }
        fn severity(&self) -> Severity {
            Severity::Low
        }
        fn detect(&self, _: &SecurityContext, _: &[SecurityEvent], _: DateTime<Utc>) -> bool {
            true
        }
        fn mitigate(&self, _: &SecurityContext) -> Option<Result<String, MitigationError>> {
            if self.fail {
                Some(Err(MitigationError::new(self.name, "firewall unreachable")))
            } else {
                Some(Ok("blocked".to_string()))
            }
        }
    }

    #[tokio::test]
    async fn test_failed_mitigation_does_not_stop_later_patterns() {
        let clock = Arc::new(ManualClock::default());
        let sink = Arc::new(MemoryAuditSink::new(100, clock.clone()));
        let detector = ThreatDetector::with_patterns(
            Arc::new(EventStore::default()),
            sink.clone(),
            clock.clone(),
            vec![
                Box::new(Always { name: "first", fail: true }),
                Box::new(Always { name: "second", fail: false }),
            ],
        );

        let detections = detector
            .record_security_event("api_call", SecurityContext::new(clock.now()), None)
            .await;

        assert_eq!(detections.len(), 2);
        assert!(!detections[0].mitigated);
        assert!(detections[0].mitigation_action.is_none());
        assert!(detections[1].mitigated);
        assert_eq!(detections[1].mitigation_action.as_deref(), Some("blocked"));
        settle().await;
        assert_eq!(sink.threat_events().len(), 2);
    }

    struct DownSink;

    #[async_trait]
    impl AuditSink for DownSink {
        async fn store_audit_log(&self, _: SecurityAuditLog) -> Result<(), AuditError> {
            Err(AuditError::Unavailable("connection refused".into()))
        }
        async fn store_threat_event(&self, _: ThreatDetectionEvent) -> Result<(), AuditError> {
            Err(AuditError::Unavailable("connection refused".into()))
        }
        async fn query_audit_logs(&self, _: AuditQuery) -> Result<Vec<SecurityAuditLog>, AuditError> {
            Err(AuditError::Unavailable("connection refused".into()))
        }
        async fn get_statistics(&self, _: Timeframe) -> Result<AuditStatistics, AuditError> {
            Err(AuditError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_sink_failure_is_absorbed() {
        let clock = Arc::new(ManualClock::default());
        let detector = ThreatDetector::new(Arc::new(EventStore::default()), Arc::new(DownSink), clock.clone());

        let c = SecurityContext::new(clock.now())
            .with_ip("1.1.1.1")
            .with_path("/search?q=<script>alert(1)</script>");
        let detections = detector.record_security_event("api_call", c, None).await;

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].event_type, "xss_attempt");
        assert_eq!(detector.store().get("ip:1.1.1.1").len(), 1);
    }

    struct StalledSink;

    #[async_trait]
    impl AuditSink for StalledSink {
        async fn store_audit_log(&self, _: SecurityAuditLog) -> Result<(), AuditError> {
            std::future::pending().await
        }
        async fn store_threat_event(&self, _: ThreatDetectionEvent) -> Result<(), AuditError> {
            std::future::pending().await
        }
        async fn query_audit_logs(&self, _: AuditQuery) -> Result<Vec<SecurityAuditLog>, AuditError> {
            std::future::pending().await
        }
        async fn get_statistics(&self, _: Timeframe) -> Result<AuditStatistics, AuditError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stalled_sink_does_not_hold_up_detection() {
        let clock = Arc::new(ManualClock::default());
        let detector = ThreatDetector::new(Arc::new(EventStore::default()), Arc::new(StalledSink), clock.clone());

        let c = SecurityContext::new(clock.now())
            .with_ip("5.5.5.5")
            .with_path("/api/residents?id=1 UNION SELECT 1");
        let detections = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            detector.record_security_event("api_call", c, None),
        )
        .await
        .expect("detection must not wait on the sink");

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].event_type, "sql_injection_attempt");
    }

    #[tokio::test]
    async fn test_inline_cleanup_purges_other_keys() {
        let f = fixture();
        f.detector.record_security_event("api_call", ctx(&f, "old", "/api"), None).await;
        f.clock.advance(Duration::minutes(31));
        f.detector.record_security_event("api_call", ctx(&f, "new", "/api"), None).await;

        assert!(f.detector.store().get("ip:old").is_empty());
        assert_eq!(f.detector.store().len(), 1);
    }
}
