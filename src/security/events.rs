//! Security events and the per-client event log.
//!
//! # Invariants
//! - A client's log is ordered oldest first and never exceeds the configured
//!   cap; overflow drops the oldest events.
//! - Events older than the TTL are purged by [`EventStore::cleanup`], and keys
//!   whose log becomes empty are forgotten.
//! - Every access to a key's log happens under that key's shard lock, so
//!   appends for one client are never lost or reordered.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Maximum events retained per client key.
pub const MAX_EVENTS_PER_KEY: usize = 1000;

/// Events older than this are purged on cleanup.
pub const CACHE_TTL_SECS: i64 = 30 * 60;

pub const LOGIN_FAILED: &str = "login_failed";
pub const ACCESS_DENIED: &str = "access_denied";
pub const DATA_ACCESS: &str = "data_access";

/// Snapshot of who made a request and where it went.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_path: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SecurityContext {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            user_id: None,
            session_id: None,
            ip_address: None,
            user_agent: None,
            request_path: None,
            timestamp,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.request_path = Some(path.into());
        self
    }

    /// The key this context is tracked under. Matches
    /// [`identify`](crate::security::identity::identify) for the same client.
    pub fn identity_key(&self) -> String {
        match (&self.user_id, &self.ip_address) {
            (Some(user_id), _) => format!("user:{}", user_id),
            (None, Some(ip)) => format!("ip:{}", ip),
            (None, None) => "ip:unknown".to_string(),
        }
    }

    /// Address reported on threat records.
    pub fn source_ip(&self) -> &str {
        self.ip_address.as_deref().unwrap_or("unknown")
    }
}

/// One entry in a client's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub context: SecurityContext,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl SecurityEvent {
    pub fn new(
        event_type: impl Into<String>,
        context: SecurityContext,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> Self {
        let timestamp = context.timestamp;
        Self {
            event_type: event_type.into(),
            context,
            timestamp,
            metadata,
        }
    }

    pub fn is(&self, event_type: &str) -> bool {
        self.event_type == event_type
    }

    pub fn path(&self) -> &str {
        self.context.request_path.as_deref().unwrap_or("")
    }

    /// True if this event happened less than `window` before `now`.
    pub fn within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now - self.timestamp < window
    }
}

/// Bounded, TTL-evicting event log per client key.
pub struct EventStore {
    logs: DashMap<String, VecDeque<SecurityEvent>>,
    max_events_per_key: usize,
    ttl: Duration,
}

impl EventStore {
    pub fn new(max_events_per_key: usize, ttl: Duration) -> Self {
        Self {
            logs: DashMap::new(),
            max_events_per_key,
            ttl,
        }
    }

    /// Push an event onto `key`'s log, evicting the oldest on overflow, and
    /// return the resulting log in the same critical section.
    pub fn append_and_snapshot(&self, key: &str, event: SecurityEvent) -> Vec<SecurityEvent> {
        let mut log = self.logs.entry(key.to_string()).or_default();
        log.push_back(event);
        while log.len() > self.max_events_per_key {
            log.pop_front();
        }
        log.iter().cloned().collect()
    }

    /// A copy of `key`'s log, oldest first. Empty if the key is unknown.
    pub fn get(&self, key: &str) -> Vec<SecurityEvent> {
        self.logs
            .get(key)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop expired events and empty keys. Returns the number of events removed.
    pub fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.ttl;
        let mut removed = 0;
        self.logs.retain(|_, log| {
            let before = log.len();
            log.retain(|event| event.within(now, ttl));
            removed += before - log.len();
            !log.is_empty()
        });
        removed
    }

    pub fn keys(&self) -> Vec<String> {
        self.logs.iter().map(|r| r.key().clone()).collect()
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new(MAX_EVENTS_PER_KEY, Duration::seconds(CACHE_TTL_SECS))
    }
}
