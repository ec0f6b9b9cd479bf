use thiserror::Error;

use crate::repository::StoreError;

/// Errors surfaced by wallet operations. Cache failures never show up here:
/// the write path logs them and the read path falls through to the store.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("amount must be positive")]
    InvalidAmount,
    #[error("cannot transfer to self")]
    SelfTransfer,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("wallet not found")]
    WalletNotFound,
    #[error("optimistic lock conflict")]
    OptimisticConflict,
    #[error("database error: {0}")]
    Store(sqlx::Error),
}

impl From<StoreError> for WalletError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Sqlx(e) => WalletError::Store(e),
            // Losing a create race or a duplicate-key race is resolved the
            // same way: abort, retry, and land on the committed row.
            StoreError::OptimisticConflict
            | StoreError::Conflict
            | StoreError::DuplicateIdempotency => WalletError::OptimisticConflict,
        }
    }
}
