//! GeoMesh Core - Fundamental types and primitives
//!
//! This crate defines the core types used throughout the GeoMesh layer:
//! - Timestamps and clocks (epoch milliseconds)
//! - Locations and coordinates
//! - Report payloads, signed reports and cache projections
//! - Report identifiers
//! - Error taxonomy

pub mod time;
pub mod location;
pub mod report;
pub mod id;
pub mod error;

pub use time::*;
pub use location::*;
pub use report::*;
pub use id::*;
pub use error::*;
