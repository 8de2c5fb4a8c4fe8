//! # quill-access
//!
//! Decides whether a reader may open a piece of monetized content, and sells
//! access for coins.
//!
//! Precedence, first match wins: a previous purchase, then an active
//! subscription whose tier unlocks the content type. Otherwise the content is
//! purchasable when the balance covers the price.
//!
//! ## Modules
//!
//! - [`pricing`]: per content type coin price and unlocking tiers
//! - [`directory`]: content ownership and subscription lookups
//! - [`gate`]: access checks and purchases

pub mod directory;
pub mod gate;
pub mod pricing;

use quill_db::DbError;
use quill_ledger::LedgerError;
use quill_types::content::ContentType;
use quill_types::{ContentId, UserId};

pub use directory::{ContentDirectory, DbContentDirectory, DbSubscriptions, SubscriptionLookup};
pub use gate::{AccessDecision, AccessGate, AccessMethod, PurchaseOption, PurchaseResult};
pub use pricing::{ContentPrice, PricingPolicy};

/// Error types for access operations.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// The balance does not cover the price.
    #[error("insufficient coins: price {required}, balance {available}, short {shortfall}")]
    InsufficientFunds {
        /// Reader attempting the purchase.
        user_id: UserId,
        /// Price in coins.
        required: u64,
        /// Reader's balance.
        available: u64,
        /// Coins still needed.
        shortfall: u64,
    },

    /// No price is configured for the content type.
    #[error("no price configured for {0}")]
    ContentNotPriced(ContentType),

    /// The content has no registered writer.
    #[error("unknown content: {0}")]
    UnknownContent(ContentId),

    /// The caller named a different content type than the one registered.
    #[error("content {content_id} is registered as {registered}, not {requested}")]
    ContentTypeMismatch {
        content_id: ContentId,
        registered: ContentType,
        requested: ContentType,
    },

    /// The pricing policy is malformed.
    #[error("invalid pricing policy: {0}")]
    InvalidPricing(String),

    /// Ledger failure other than insufficient funds.
    #[error(transparent)]
    Ledger(LedgerError),

    /// Storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

impl From<LedgerError> for AccessError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds {
                user_id,
                required,
                available,
                shortfall,
            } => AccessError::InsufficientFunds {
                user_id,
                required,
                available,
                shortfall,
            },
            other => AccessError::Ledger(other),
        }
    }
}

impl AccessError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AccessError::Ledger(e) => e.is_retryable(),
            AccessError::Storage(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Convenience result type for access operations.
pub type Result<T> = std::result::Result<T, AccessError>;
