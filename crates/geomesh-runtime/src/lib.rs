//! GeoMesh Runtime - coordination services and the node event loop
//!
//! - [`coordinator`]: hazard and traffic reporting, caching, corroboration
//! - [`qr`]: business QR codes and proof-of-presence reviews
//! - [`store`]: hazard cache persistence
//! - [`node`]: the tokio task that owns both services and drives timers
//! - [`telemetry`]: tracing subscriber setup

pub mod config;
pub mod coordinator;
pub mod node;
pub mod qr;
pub mod store;
pub mod telemetry;

pub use config::*;
pub use coordinator::*;
pub use node::*;
pub use qr::*;
pub use store::*;
pub use telemetry::{init_tracing, TelemetryConfig, TelemetryError};
