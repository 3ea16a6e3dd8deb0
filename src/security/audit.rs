//! Audit persistence interface.
//!
//! The security core hands audit and threat records to an [`AuditSink`] and
//! never depends on the outcome: callers log sink failures and carry on.
//! [`MemoryAuditSink`] is a bounded in-process implementation used when no
//! database is attached.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::security::clock::Clock;

/// Ordered severity scale shared by audit records, threat patterns and
/// per-client threat levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// 1 for low through 4 for critical.
    pub fn score(self) -> u8 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }

    /// Nearest level to an averaged score, clamped to the scale.
    pub fn from_score(score: f64) -> Self {
        match score.round() as i64 {
            i64::MIN..=1 => Severity::Low,
            2 => Severity::Medium,
            3 => Severity::High,
            _ => Severity::Critical,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// A security-relevant operation performed by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAuditLog {
    pub operation: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    pub severity: Severity,
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// A threat pattern match, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatDetectionEvent {
    pub event_type: String,
    pub severity: Severity,
    pub source_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub details: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub mitigated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mitigation_action: Option<String>,
}

/// Filters for [`AuditSink::query_audit_logs`]. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditQuery {
    pub user_id: Option<String>,
    pub operation: Option<String>,
    pub severity: Option<Severity>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub const DEFAULT_LIMIT: usize = 100;

    fn matches(&self, log: &SecurityAuditLog) -> bool {
        self.user_id.as_ref().map_or(true, |u| *u == log.user_id)
            && self.operation.as_ref().map_or(true, |o| *o == log.operation)
            && self.severity.map_or(true, |s| s == log.severity)
            && self.start_date.map_or(true, |d| log.timestamp >= d)
            && self.end_date.map_or(true, |d| log.timestamp <= d)
    }
}

/// Lookback window for [`AuditSink::get_statistics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Timeframe {
    #[default]
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
}

impl Timeframe {
    pub fn duration(self) -> Duration {
        match self {
            Timeframe::Day => Duration::hours(24),
            Timeframe::Week => Duration::days(7),
            Timeframe::Month => Duration::days(30),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::Day => "24h",
            Timeframe::Week => "7d",
            Timeframe::Month => "30d",
        }
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "24h" => Ok(Timeframe::Day),
            "7d" => Ok(Timeframe::Week),
            "30d" => Ok(Timeframe::Month),
            other => Err(format!("unknown timeframe: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStatistics {
    pub total_events: u64,
    pub critical_events: u64,
    pub threat_events: u64,
    pub failed_logins: u64,
    pub suspicious_activities: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuditError {
    /// The backing store could not be reached.
    #[error("audit store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the record.
    #[error("audit record rejected: {0}")]
    Rejected(String),
}

/// External persistence for audit and threat records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn store_audit_log(&self, entry: SecurityAuditLog) -> Result<(), AuditError>;

    async fn store_threat_event(&self, entry: ThreatDetectionEvent) -> Result<(), AuditError>;

    async fn query_audit_logs(&self, filters: AuditQuery) -> Result<Vec<SecurityAuditLog>, AuditError>;

    async fn get_statistics(&self, timeframe: Timeframe) -> Result<AuditStatistics, AuditError>;
}

/// Bounded in-memory sink. The oldest record is dropped once a buffer is full.
pub struct MemoryAuditSink {
    audit_logs: Mutex<VecDeque<SecurityAuditLog>>,
    threat_events: Mutex<VecDeque<ThreatDetectionEvent>>,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl MemoryAuditSink {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            audit_logs: Mutex::new(VecDeque::new()),
            threat_events: Mutex::new(VecDeque::new()),
            capacity,
            clock,
        }
    }

    /// All stored threat events, oldest first.
    pub fn threat_events(&self) -> Vec<ThreatDetectionEvent> {
        self.threat_events
            .lock()
            .expect("audit sink mutex poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn audit_log_count(&self) -> usize {
        self.audit_logs.lock().expect("audit sink mutex poisoned").len()
    }
}

fn push_bounded<T>(buf: &mut VecDeque<T>, item: T, capacity: usize) {
    buf.push_back(item);
    while buf.len() > capacity {
        buf.pop_front();
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn store_audit_log(&self, entry: SecurityAuditLog) -> Result<(), AuditError> {
        let mut logs = self.audit_logs.lock().expect("audit sink mutex poisoned");
        push_bounded(&mut logs, entry, self.capacity);
        Ok(())
    }

    async fn store_threat_event(&self, entry: ThreatDetectionEvent) -> Result<(), AuditError> {
        let mut events = self.threat_events.lock().expect("audit sink mutex poisoned");
        push_bounded(&mut events, entry, self.capacity);
        Ok(())
    }

    async fn query_audit_logs(&self, filters: AuditQuery) -> Result<Vec<SecurityAuditLog>, AuditError> {
        let logs = self.audit_logs.lock().expect("audit sink mutex poisoned");
        let limit = filters.limit.unwrap_or(AuditQuery::DEFAULT_LIMIT);
        Ok(logs
            .iter()
            .rev()
            .filter(|log| filters.matches(log))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_statistics(&self, timeframe: Timeframe) -> Result<AuditStatistics, AuditError> {
        let since = self.clock.now() - timeframe.duration();
        let mut stats = AuditStatistics::default();

        {
            let logs = self.audit_logs.lock().expect("audit sink mutex poisoned");
            for log in logs.iter().filter(|l| l.timestamp >= since) {
                stats.total_events += 1;
                if log.severity == Severity::Critical {
                    stats.critical_events += 1;
                }
                if log.operation == "login" && !log.success {
                    stats.failed_logins += 1;
                }
            }
        }

        let events = self.threat_events.lock().expect("audit sink mutex poisoned");
        for event in events.iter().filter(|e| e.timestamp >= since) {
            stats.threat_events += 1;
            if event.severity == Severity::Critical {
                stats.critical_events += 1;
            }
            if event.severity >= Severity::High {
                stats.suspicious_activities += 1;
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::clock::ManualClock;

    fn audit(operation: &str, user: &str, severity: Severity, success: bool, ts: DateTime<Utc>) -> SecurityAuditLog {
        SecurityAuditLog {
            operation: operation.to_string(),
            user_id: user.to_string(),
            resource_type: Some("resident".to_string()),
            resource_id: None,
            severity,
            details: HashMap::new(),
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: None,
            session_id: None,
            timestamp: ts,
            success,
            error_message: None,
        }
    }

    fn threat(severity: Severity, ts: DateTime<Utc>) -> ThreatDetectionEvent {
        ThreatDetectionEvent {
            event_type: "xss_attempt".to_string(),
            severity,
            source_ip: "10.0.0.1".to_string(),
            user_id: None,
            details: HashMap::new(),
            timestamp: ts,
            mitigated: false,
            mitigation_action: None,
        }
    }

    #[test]
    fn test_severity_scale() {
        assert!(Severity::Critical > Severity::High);
        assert_eq!(Severity::from_score(2.5), Severity::High);
        assert_eq!(Severity::from_score(2.4), Severity::Medium);
        assert_eq!(Severity::from_score(0.0), Severity::Low);
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
        assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), "\"critical\"");
    }

    #[test]
    fn test_timeframe_parsing() {
        assert_eq!("7d".parse::<Timeframe>().unwrap(), Timeframe::Week);
        assert!("1y".parse::<Timeframe>().is_err());
        assert_eq!(Timeframe::Month.duration(), Duration::days(30));
    }

    #[tokio::test]
    async fn test_query_filters_newest_first() {
        let clock = Arc::new(ManualClock::default());
        let now = clock.now();
        let sink = MemoryAuditSink::new(100, clock);

        sink.store_audit_log(audit("login", "u1", Severity::Low, true, now - Duration::minutes(3))).await.unwrap();
        sink.store_audit_log(audit("resident_create", "u1", Severity::Medium, true, now - Duration::minutes(2))).await.unwrap();
        sink.store_audit_log(audit("login", "u2", Severity::Low, false, now - Duration::minutes(1))).await.unwrap();

        let all = sink.query_audit_logs(AuditQuery::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].user_id, "u2");

        let u1_logins = sink
            .query_audit_logs(AuditQuery {
                user_id: Some("u1".into()),
                operation: Some("login".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(u1_logins.len(), 1);

        let recent = sink
            .query_audit_logs(AuditQuery {
                start_date: Some(now - Duration::seconds(150)),
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].user_id, "u2");
    }

    #[tokio::test]
    async fn test_statistics_respect_timeframe() {
        let clock = Arc::new(ManualClock::default());
        let now = clock.now();
        let sink = MemoryAuditSink::new(100, clock);

        sink.store_audit_log(audit("login", "u1", Severity::Low, false, now - Duration::hours(1))).await.unwrap();
        sink.store_audit_log(audit("delete_resident", "u1", Severity::Critical, true, now - Duration::hours(2))).await.unwrap();
        sink.store_audit_log(audit("login", "u1", Severity::Low, false, now - Duration::days(3))).await.unwrap();
        sink.store_threat_event(threat(Severity::High, now - Duration::minutes(5))).await.unwrap();
        sink.store_threat_event(threat(Severity::Critical, now - Duration::minutes(5))).await.unwrap();
        sink.store_threat_event(threat(Severity::Medium, now - Duration::minutes(5))).await.unwrap();

        let day = sink.get_statistics(Timeframe::Day).await.unwrap();
        assert_eq!(
            day,
            AuditStatistics {
                total_events: 2,
                critical_events: 2,
                threat_events: 3,
                failed_logins: 1,
                suspicious_activities: 2,
            }
        );

        let week = sink.get_statistics(Timeframe::Week).await.unwrap();
        assert_eq!(week.total_events, 3);
        assert_eq!(week.failed_logins, 2);
    }

    #[tokio::test]
    async fn test_capacity_drops_oldest() {
        let clock = Arc::new(ManualClock::default());
        let now = clock.now();
        let sink = MemoryAuditSink::new(2, clock);
        for i in 0..3 {
            sink.store_audit_log(audit(&format!("op{}", i), "u", Severity::Low, true, now)).await.unwrap();
        }
        assert_eq!(sink.audit_log_count(), 2);
        let ops: Vec<_> = sink
            .query_audit_logs(AuditQuery::default())
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.operation)
            .collect();
        assert_eq!(ops, vec!["op2", "op1"]);
    }
}
