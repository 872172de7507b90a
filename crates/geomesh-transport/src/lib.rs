//! GeoMesh Transport Layer - interfaces to the outside world
//!
//! This crate provides:
//! - The P2P pub/sub transport and session channel traits
//! - Topic names and session event shapes
//! - Best-effort error handling for fire-and-forget sends
//! - An in-memory bus for tests and simulations
//! - A tokio channel adapter for real network drivers

pub mod error;
pub mod topics;
pub mod session;
pub mod transport;
pub mod memory;
pub mod channel;

pub use error::*;
pub use topics::*;
pub use session::*;
pub use transport::*;
pub use memory::{MemoryBus, MemoryPeer};
pub use channel::{channel_transport, ChannelTransport, Outbound, OutboundReceiver};
