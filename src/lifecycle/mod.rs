//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Build SecurityMonitor → Start listeners
//!
//! Background (cleanup.rs):
//!     Interval tick → purge expired events → sweep closed windows
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     Ctrl+C → broadcast → background tasks exit → servers drain
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)

pub mod cleanup;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
