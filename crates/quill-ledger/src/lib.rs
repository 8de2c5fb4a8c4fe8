//! # quill-ledger
//!
//! The coin ledger: per-user balances and the append-only transaction log.
//!
//! Every balance change is posted as a transaction that starts `pending` and
//! ends `completed` or `failed` inside one storage transaction. Debits are a
//! single conditional update, so concurrent spends can never overdraw.
//!
//! ## Modules
//!
//! - [`ledger`]: balances, credits, debits, history, fiat records
//! - [`transfer`]: tips between users
//! - [`packages`]: coin package catalog and purchases

pub mod ledger;
pub mod packages;
pub mod transfer;

use quill_db::DbError;
use quill_types::{ContentId, Decimal, UserId};
use serde::{Deserialize, Serialize};

pub use ledger::Ledger;
pub use transfer::TipReceipt;

/// Error types for ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The balance does not cover the debit. The failed attempt is recorded.
    #[error("insufficient funds: have {available}, need {required} (short {shortfall})")]
    InsufficientFunds {
        /// Account that was debited.
        user_id: UserId,
        /// Coins requested.
        required: u64,
        /// Coins held at the time of the attempt.
        available: u64,
        /// `required - available`.
        shortfall: u64,
    },

    /// Zero, negative, or out-of-range amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Sender and recipient are the same account.
    #[error("cannot transfer coins to yourself")]
    SelfTransfer,

    /// Unknown coin package id.
    #[error("coin package not found: {0}")]
    PackageNotFound(String),

    /// The package exists but is no longer sold.
    #[error("coin package is inactive: {0}")]
    PackageInactive(String),

    /// The idempotency key is already held by a different posting.
    #[error("idempotency key {0:?} was used for a different posting")]
    IdempotencyConflict(String),

    /// Another posting under the same idempotency key has not finished.
    #[error("a transaction with idempotency key {0:?} is still in flight")]
    InFlight(String),

    /// Storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

impl LedgerError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Storage(e) => e.is_retryable(),
            LedgerError::InFlight(_) => true,
            _ => false,
        }
    }

    pub(crate) fn overflow(amount: u64) -> Self {
        LedgerError::InvalidAmount(format!("crediting {amount} coins would overflow the balance"))
    }

    pub(crate) fn insufficient(user_id: UserId, required: u64, available: u64) -> Self {
        LedgerError::InsufficientFunds {
            user_id,
            required,
            available,
            shortfall: required.saturating_sub(available),
        }
    }
}

/// Convenience result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Optional attributes attached to a posting.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionMeta {
    pub fiat_amount: Option<Decimal>,
    pub currency: Option<String>,
    pub related_content_id: Option<ContentId>,
    /// Idempotency key, unique per user among non-failed transactions.
    pub external_transaction_id: Option<String>,
    pub description: Option<String>,
}

impl TransactionMeta {
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.external_transaction_id = Some(key.into());
        self
    }

    pub fn with_content(mut self, content_id: ContentId) -> Self {
        self.related_content_id = Some(content_id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_fiat(mut self, amount: Decimal, currency: impl Into<String>) -> Self {
        self.fiat_amount = Some(amount);
        self.currency = Some(currency.into());
        self
    }
}

pub(crate) fn coin_amount(amount: u64) -> Result<i64> {
    if amount == 0 {
        return Err(LedgerError::InvalidAmount("amount must be positive".into()));
    }
    i64::try_from(amount)
        .map_err(|_| LedgerError::InvalidAmount(format!("{amount} coins is out of range")))
}
