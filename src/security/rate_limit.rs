//! Fixed-window rate limiting keyed by client and rule.
//!
//! A client's window opens on its first request under a rule and closes
//! `window_ms` later; windows are not aligned to the wall clock, so two
//! clients may be mid-window at different offsets. An expired entry is
//! replaced lazily by the next check.
//!
//! The request that uses the last slot of a window is allowed and marks the
//! entry blocked; the following request is the first rejected one. A blocked
//! entry only opens again on window rotation or a refund through
//! [`RateLimiter::record_success`] / [`RateLimiter::record_failure`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::security::clock::Clock;
use crate::security::error::SecurityError;

pub const RULE_LOGIN: &str = "login";
pub const RULE_API: &str = "api";
pub const RULE_UPLOAD: &str = "upload";
pub const RULE_SEARCH_RESIDENTS: &str = "search_residents";
pub const RULE_RESIDENT_CREATE: &str = "resident_create";

/// Longest window a rule may declare (one year).
pub const MAX_WINDOW_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// Rule names callers depend on; every rule table must define them.
pub const REQUIRED_RULES: [&str; 5] = [
    RULE_LOGIN,
    RULE_API,
    RULE_UPLOAD,
    RULE_SEARCH_RESIDENTS,
    RULE_RESIDENT_CREATE,
];

/// Quota for one rule name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub max_requests: u32,
    pub window_ms: u64,
    /// Successful requests are refunded.
    #[serde(default)]
    pub skip_successful: bool,
    /// Failed requests are refunded.
    #[serde(default)]
    pub skip_failed: bool,
}

impl RateLimitRule {
    pub fn new(max_requests: u32, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
            skip_successful: false,
            skip_failed: false,
        }
    }

    pub fn skip_successful(mut self) -> Self {
        self.skip_successful = true;
        self
    }

    pub fn skip_failed(mut self) -> Self {
        self.skip_failed = true;
        self
    }

    /// Window length, clamped to [`MAX_WINDOW_MS`].
    pub fn window(&self) -> Duration {
        Duration::milliseconds(self.window_ms.min(MAX_WINDOW_MS) as i64)
    }

    /// Window length in whole seconds, as reported to clients.
    pub fn window_secs(&self) -> u64 {
        self.window_ms / 1000
    }

    pub fn validate(&self, name: &str) -> Result<(), SecurityError> {
        if self.max_requests == 0 {
            return Err(SecurityError::InvalidRule {
                name: name.to_string(),
                reason: "max_requests must be greater than 0".to_string(),
            });
        }
        if self.window_ms == 0 {
            return Err(SecurityError::InvalidRule {
                name: name.to_string(),
                reason: "window_ms must be greater than 0".to_string(),
            });
        }
        if self.window_ms > MAX_WINDOW_MS {
            return Err(SecurityError::InvalidRule {
                name: name.to_string(),
                reason: format!("window_ms must not exceed {}", MAX_WINDOW_MS),
            });
        }
        Ok(())
    }
}

/// Named rules. Immutable once built; reloads swap in a whole new table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleTable {
    rules: BTreeMap<String, RateLimitRule>,
}

impl RuleTable {
    /// Build a table, rejecting any rule that breaks the quota invariants.
    pub fn new(rules: BTreeMap<String, RateLimitRule>) -> Result<Self, SecurityError> {
        for (name, rule) in &rules {
            rule.validate(name)?;
        }
        Ok(Self { rules })
    }

    pub fn get(&self, name: &str) -> Option<&RateLimitRule> {
        self.rules.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&RateLimitRule, SecurityError> {
        self.get(name)
            .ok_or_else(|| SecurityError::UnknownRule(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RateLimitRule)> {
        self.rules.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

/// The rule table the registration front end is built against.
pub fn default_rules() -> BTreeMap<String, RateLimitRule> {
    const MINUTE_MS: u64 = 60 * 1000;

    let mut rules = BTreeMap::new();
    rules.insert(
        RULE_LOGIN.to_string(),
        RateLimitRule::new(5, 15 * MINUTE_MS).skip_successful(),
    );
    rules.insert(RULE_API.to_string(), RateLimitRule::new(100, MINUTE_MS));
    rules.insert(RULE_UPLOAD.to_string(), RateLimitRule::new(10, MINUTE_MS));
    rules.insert(
        RULE_SEARCH_RESIDENTS.to_string(),
        RateLimitRule::new(50, MINUTE_MS),
    );
    rules.insert(
        RULE_RESIDENT_CREATE.to_string(),
        RateLimitRule::new(20, MINUTE_MS),
    );
    rules
}

/// Per (rule, client) window state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitEntry {
    pub count: u32,
    pub reset_time: DateTime<Utc>,
    pub blocked: bool,
}

impl RateLimitEntry {
    fn fresh(now: DateTime<Utc>, rule: &RateLimitRule) -> Self {
        Self {
            count: 0,
            reset_time: now + rule.window(),
            blocked: false,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.reset_time
    }
}

/// Outcome of a [`RateLimiter::check`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_time: DateTime<Utc>,
    /// Seconds until the window closes. Only set when rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EntryKey {
    rule: String,
    identifier: String,
}

impl EntryKey {
    fn new(identifier: &str, rule_name: &str) -> Self {
        Self {
            rule: rule_name.to_string(),
            identifier: identifier.to_string(),
        }
    }
}

/// Quota tracker shared by all request handlers.
pub struct RateLimiter {
    entries: DashMap<EntryKey, RateLimitEntry>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Count a request against `identifier`'s quota under `rule_name`.
    pub fn check(&self, identifier: &str, rule: &RateLimitRule, rule_name: &str) -> RateLimitDecision {
        let now = self.clock.now();

        let mut entry = self
            .entries
            .entry(EntryKey::new(identifier, rule_name))
            .or_insert_with(|| RateLimitEntry::fresh(now, rule));

        if entry.is_expired(now) {
            *entry = RateLimitEntry::fresh(now, rule);
        }

        let allowed = entry.count < rule.max_requests && !entry.blocked;
        if allowed {
            entry.count += 1;
            if entry.count >= rule.max_requests {
                entry.blocked = true;
            }
        }

        let remaining = rule.max_requests.saturating_sub(entry.count);
        let reset_time = entry.reset_time;
        drop(entry);

        RateLimitDecision {
            allowed,
            remaining,
            reset_time,
            retry_after: (!allowed).then(|| retry_after_secs(reset_time, now)),
        }
    }

    /// Refund one request if the rule skips successful requests.
    pub fn record_success(&self, identifier: &str, rule: &RateLimitRule, rule_name: &str) -> bool {
        if !rule.skip_successful {
            return false;
        }
        self.refund(identifier, rule_name)
    }

    /// Refund one request if the rule skips failed requests.
    pub fn record_failure(&self, identifier: &str, rule: &RateLimitRule, rule_name: &str) -> bool {
        if !rule.skip_failed {
            return false;
        }
        self.refund(identifier, rule_name)
    }

    fn refund(&self, identifier: &str, rule_name: &str) -> bool {
        match self.entries.get_mut(&EntryKey::new(identifier, rule_name)) {
            Some(mut entry) => {
                entry.count = entry.count.saturating_sub(1);
                entry.blocked = false;
                true
            }
            None => false,
        }
    }

    /// Forget a client's window. Returns whether an entry existed.
    pub fn reset(&self, identifier: &str, rule_name: &str) -> bool {
        self.entries
            .remove(&EntryKey::new(identifier, rule_name))
            .is_some()
    }

    pub fn status(&self, identifier: &str, rule_name: &str) -> Option<RateLimitEntry> {
        self.entries
            .get(&EntryKey::new(identifier, rule_name))
            .map(|entry| entry.value().clone())
    }

    /// Drop entries whose window has closed. Returns the number removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of live (rule, client) entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn retry_after_secs(reset_time: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let ms = (reset_time - now).num_milliseconds().max(0) as u64;
    ms.div_ceil(1000)
}
