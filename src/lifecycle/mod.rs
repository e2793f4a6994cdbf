//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → server stops accepting → drain requests → telemetry final flush → exit
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, flush telemetry
//! - Telemetry flush is bounded by the export timeout

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
