//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → MonitorConfig (validated, immutable)
//!     → rule table handed to the SecurityMonitor
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs reads the [rate_limits] tables
//!     → validation.rs checks the rules
//!     → atomic swap of the rule table
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Only the rule table is hot-reloaded; other sections need a restart

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_rules, ConfigError};
pub use schema::{
    AdminConfig, AuditConfig, EventStoreConfig, ListenerConfig, MonitorConfig,
    ObservabilityConfig, TimeoutConfig,
};
