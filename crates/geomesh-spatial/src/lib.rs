//! GeoMesh Spatial - Where reports live and who may see them
//!
//! - Proximity: haversine distances and radius checks
//! - Obfuscation: deterministic, session-salted coordinate fuzzing
//! - Region cache: reports bucketed into 0.1° cells with TTL eviction

pub mod proximity;
pub mod obfuscation;
pub mod region;

pub use proximity::*;
pub use obfuscation::*;
pub use region::*;
