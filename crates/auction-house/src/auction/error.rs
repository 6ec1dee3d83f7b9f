// Error taxonomy for auction operations.

use thiserror::Error;

use crate::store::StorageError;

/// Every way an auction operation can be refused or fail.
///
/// Apart from `Storage`, a returned error guarantees the state was left
/// untouched. A `Storage` error means the in-memory change was rolled back
/// and other observers may be looking at stale data.
#[derive(Debug, Error)]
pub enum AuctionError {
    /// Malformed or insufficient input (start preconditions, turn order,
    /// candidate or team fields).
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("it is not {team}'s turn (current turn: {})", .current.as_deref().unwrap_or("none"))]
    Turn {
        team: String,
        current: Option<String>,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("candidate {0} is not available")]
    NotAvailable(String),

    #[error("the auction is not in progress")]
    NotInProgress,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AuctionError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        AuctionError::Validation(message.into())
    }

    pub(crate) fn conflict(message: impl Into<String>) -> Self {
        AuctionError::Conflict(message.into())
    }
}
