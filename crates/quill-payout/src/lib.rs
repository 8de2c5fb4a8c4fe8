//! # quill-payout
//!
//! Writer payouts: requests against accumulated earnings, and their
//! completion or failure at the disbursement provider.
//!
//! A pending request reserves its amount. Completing it turns the
//! reservation into a paid-out amount; failing it releases the reservation.

pub mod processor;

use quill_db::DbError;
use quill_ledger::LedgerError;
use quill_types::payout::PayoutStatus;
use quill_types::{Decimal, PayoutId};

pub use processor::{Disburser, PayoutConfig, PayoutProcessor};

/// Error types for payout operations.
#[derive(Debug, thiserror::Error)]
pub enum PayoutError {
    /// Zero or negative amount.
    #[error("invalid payout amount: {0}")]
    InvalidAmount(Decimal),

    /// Amount is below the configured minimum.
    #[error("payout of {amount} is below the minimum of {minimum}")]
    BelowMinimum {
        /// Requested amount.
        amount: Decimal,
        /// Configured minimum.
        minimum: Decimal,
    },

    /// Payouts are only made in the base currency.
    #[error("unsupported payout currency: {0}")]
    UnsupportedCurrency(String),

    /// The writer has not earned enough.
    #[error("insufficient earnings: requested {requested}, available {available}")]
    InsufficientEarnings {
        /// Requested amount.
        requested: Decimal,
        /// Earned minus paid and reserved.
        available: Decimal,
    },

    #[error("payout not found: {0}")]
    NotFound(PayoutId),

    /// The request is not in a state that allows the operation.
    #[error("payout {id} is {status}")]
    InvalidState {
        /// The payout.
        id: PayoutId,
        /// Its current status.
        status: PayoutStatus,
    },

    /// The provider rejected the disbursement.
    #[error("disbursement failed: {0}")]
    Disbursement(String),

    /// Recording the payout in the ledger failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

impl PayoutError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            PayoutError::Storage(e) => e.is_retryable(),
            PayoutError::Ledger(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Convenience result type for payout operations.
pub type Result<T> = std::result::Result<T, PayoutError>;
