//! In-process security monitoring for the resident registration API.
//!
//! Rate limits requests per client and rule, keeps a bounded history of
//! security events per client, and runs a fixed catalog of threat patterns
//! over that history.

pub mod admin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::MonitorConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use security::SecurityMonitor;
