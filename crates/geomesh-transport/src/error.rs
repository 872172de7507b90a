//! Transport errors and the best-effort contract

use thiserror::Error;

use geomesh_core::GeoError;

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport not initialized")]
    NotInitialized,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Transport closed")]
    Closed,
}

impl From<TransportError> for GeoError {
    fn from(err: TransportError) -> Self {
        GeoError::TransportUnavailable(err.to_string())
    }
}

/// Result of a transport call
pub type TransportResult<T> = Result<T, TransportError>;

/// Marks a transport call as best effort: failures are logged and dropped
/// so they never fail the local operation that triggered them.
pub trait BestEffort {
    /// Log a failure at `warn`; returns whether the call succeeded
    fn best_effort(self, action: &str) -> bool;
}

impl BestEffort for TransportResult<()> {
    fn best_effort(self, action: &str) -> bool {
        match self {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(action, error = %e, "best-effort transport call failed");
                false
            }
        }
    }
}
