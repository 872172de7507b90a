//! Error types for GeoMesh

use thiserror::Error;

/// Core GeoMesh errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeoError {
    // Crypto errors
    #[error("Invalid signature")]
    SignatureInvalid,

    // Validity errors
    #[error("Report expired")]
    ReportExpired,

    #[error("Proof already used")]
    ProofAlreadyUsed,

    #[error("Out of proximity range: {distance:.1}m from target, max {max:.1}m")]
    OutOfProximityRange { distance: f64, max: f64 },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unknown business: {0}")]
    UnknownBusiness(String),

    // Collaborator errors
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),
}

/// Result type for GeoMesh operations
pub type GeoResult<T> = Result<T, GeoError>;
