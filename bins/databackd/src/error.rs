use databack_core::store::StoreError;
use thiserror::Error;

/// Failures a reconciliation hands back to the control loop for retry.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Reading the desired-state store failed for a reason other than absence.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
