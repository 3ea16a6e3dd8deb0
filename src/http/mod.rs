//! HTTP surface of the monitor.
//!
//! # Data Flow
//! ```text
//! Front end request
//!     → request.rs (request ID)
//!     → server.rs (ingestion handlers)
//!     → SecurityMonitor (rate limit, events, audit)
//!     → response.rs (429 contract, JSON errors)
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
