//! # quill-exchange
//!
//! Currency conversion between fiat currencies and coins.
//!
//! Rates are quoted as the USD value of one unit of a currency. The
//! converter never invents a rate: a currency without a usable quote is an
//! error, and USD always converts at exactly 1.
//!
//! ## Modules
//!
//! - [`feed`]: rate sources (fixed table, database snapshot)
//! - [`converter`]: cached converter and coin valuation

pub mod converter;
pub mod feed;

pub use converter::{ConverterConfig, CurrencyConverter};
pub use feed::{DbRateFeed, ExchangeRate, RateFeed, StaticRateFeed};

/// Error types for currency conversion.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// No usable rate for the currency: missing, non-positive, or stale.
    #[error("exchange rate unavailable for {currency}: {reason}")]
    RateUnavailable {
        /// Currency code that could not be priced.
        currency: String,
        /// Why the rate was rejected.
        reason: String,
    },

    /// Amount would overflow decimal arithmetic.
    #[error("amount out of range converting {0}")]
    Overflow(String),

    /// Negative amounts are not convertible.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Rate store failure.
    #[error("rate storage error: {0}")]
    Storage(#[from] quill_db::DbError),
}

impl ExchangeError {
    pub(crate) fn unavailable(currency: &str, reason: impl Into<String>) -> Self {
        ExchangeError::RateUnavailable {
            currency: currency.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same conversion may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExchangeError::Storage(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Convenience result type for conversion operations.
pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Canonical form of a currency code.
pub fn normalize_currency(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}
