//! GeoMesh test harness
//!
//! This crate provides:
//! - An in-process swarm of peers sharing a bus, a relay and a clock
//! - Delivery chaos (loss, duplication, reordering)
//! - End-to-end reporting and review scenarios

pub mod harness;
pub mod integration;

pub use harness::*;
pub use integration::*;
