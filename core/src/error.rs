use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Referral code '{code}' is not owned by an active referrer")]
    InvalidCode { code: String },

    #[error("Customer '{customer_id}' cannot be referred by themselves")]
    SelfReferral { customer_id: String },

    #[error("No policy snapshot has been published")]
    PolicyUnavailable,

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Referrer '{referrer_id}' not found")]
    ReferrerNotFound { referrer_id: String },

    #[error("Referrer '{referrer_id}' is {status}, expected {expected}")]
    UnexpectedStatus {
        referrer_id: String,
        status: String,
        expected: String,
    },

    #[error("Referrer '{referrer_id}' was modified concurrently")]
    ConcurrentModification { referrer_id: String },

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Ledger inconsistency: {0}")]
    Inconsistent(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LedgerError {
    /// Conflicts worth retrying: a lost optimistic-version race or a busy database.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConcurrentModification { .. } => true,
            Self::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
