//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, layer stack)
//!     → middleware.rs (extract context, start span, count)
//!     → handlers.rs (relay or greet)
//!         → client.rs (inject context, call downstream)
//!     → middleware.rs (record latency, end span)
//!     → Send to client
//! ```

pub mod client;
pub mod handlers;
pub mod middleware;
pub mod server;

pub use client::{DownstreamClient, DownstreamError};
pub use middleware::{instrument, RequestScope};
pub use server::{instrumented, HttpServer};
