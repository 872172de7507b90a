//! GeoMesh Crypto - Report signing and replay protection
//!
//! Provides the cryptographic primitives of the GeoMesh layer:
//! - Identity management (Ed25519)
//! - Canonical report payloads, signing and verification
//! - Replay protection for single-use proofs

pub mod identity;
pub mod codec;
pub mod replay;

pub use identity::*;
pub use codec::*;
pub use replay::*;
