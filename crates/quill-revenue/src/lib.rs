//! # quill-revenue
//!
//! Revenue distribution and writer earnings.
//!
//! Every monetary event is split between the writer, an optional studio and
//! the platform. Shares are floored to whole cents and the platform absorbs
//! the remainder, so the shares of a split always sum to its gross amount.
//!
//! ## Modules
//!
//! - [`splits`]: split table and split arithmetic
//! - [`engine`]: content purchase and licensing distribution, earnings
//! - [`pool`]: subscription pool distribution and engagement scoring

pub mod engine;
pub mod pool;
pub mod splits;

use quill_db::DbError;
use quill_exchange::ExchangeError;

pub use engine::RevenueEngine;
pub use pool::{EngagementScorer, FixedEngagement, PoolDistribution, PurchaseEngagement};
pub use splits::SplitTable;

/// Error types for revenue operations.
#[derive(Debug, thiserror::Error)]
pub enum RevenueError {
    /// The split table is incomplete or does not sum to 100.
    #[error("invalid split configuration: {0}")]
    InvalidSplitConfiguration(String),

    /// Zero or negative gross, or an event that cannot be distributed.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The source transaction is not a completed coin spend.
    #[error("transaction {0} is not a completed coin spend")]
    NotDistributable(String),

    /// `period_start` must precede `period_end`.
    #[error("invalid period [{start}, {end})")]
    InvalidPeriod {
        /// Inclusive start.
        start: u64,
        /// Exclusive end.
        end: u64,
    },

    /// Another run of this subscription pool period has not finished.
    #[error("subscription pool run for [{start}, {end}) is already in progress")]
    PoolRunInProgress {
        /// Inclusive start.
        start: u64,
        /// Exclusive end.
        end: u64,
    },

    /// Arithmetic overflow.
    #[error("arithmetic overflow in revenue calculation")]
    Overflow,

    /// Currency conversion failed.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// Storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

impl RevenueError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RevenueError::Storage(e) => e.is_retryable(),
            RevenueError::Exchange(e) => e.is_retryable(),
            RevenueError::PoolRunInProgress { .. } => true,
            _ => false,
        }
    }
}

/// Convenience result type for revenue operations.
pub type Result<T> = std::result::Result<T, RevenueError>;
