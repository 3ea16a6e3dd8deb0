//! Security monitoring core.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → identity.rs (user id or client IP → identity key)
//!     → rate_limit.rs (per rule + identity quota, 429 on exhaustion)
//!     → route handler
//!
//! Security event (login failure, denied access, data access, ...):
//!     → events.rs (append to the client's bounded log)
//!     → detector.rs (run patterns.rs catalog over the log)
//!     → audit.rs (persist threat records, best effort)
//! ```
//!
//! # Design Decisions
//! - State lives in stores built once at startup and shared by `Arc`
//! - Per-key critical sections via sharded maps; no lock is held across I/O
//! - Nothing on the request path fails because auditing or mitigation did

pub mod audit;
pub mod clock;
pub mod detector;
pub mod error;
pub mod events;
pub mod identity;
pub mod monitor;
pub mod patterns;
pub mod rate_limit;

pub use audit::{AuditSink, MemoryAuditSink, Severity};
pub use clock::{Clock, ManualClock, SystemClock};
pub use detector::{ThreatDetector, ThreatInsights};
pub use error::SecurityError;
pub use events::{EventStore, SecurityContext, SecurityEvent};
pub use monitor::{RateLimitHandler, SecurityMonitor};
pub use rate_limit::{RateLimitRule, RateLimiter, RuleTable};
