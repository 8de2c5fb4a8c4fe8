//! # quill-types
//!
//! Shared domain types used across the Quill workspace: identifiers, ledger
//! transactions, content and subscription descriptors, revenue splits and
//! payout requests.

pub mod content;
pub mod ledger;
pub mod payout;
pub mod revenue;

use std::sync::atomic::{AtomicU64, Ordering};

pub use rust_decimal::Decimal;
pub use uuid::Uuid;

/// Common identifier aliases.
pub type UserId = Uuid;
pub type ContentId = Uuid;
pub type TransactionId = Uuid;
pub type PayoutId = Uuid;
pub type WorkflowId = Uuid;
pub type AgreementId = Uuid;
pub type SplitId = Uuid;

/// Currency all earnings, splits and payouts are denominated in.
pub const BASE_CURRENCY: &str = "USD";

/// Seconds in one day.
pub const DAY_SECS: u64 = 24 * 60 * 60;

/// Error returned when a stored or configured tag does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseTagError {
    /// Which enum was being parsed.
    pub kind: &'static str,
    /// The rejected tag.
    pub value: String,
}

impl ParseTagError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Source of the current Unix time in seconds.
///
/// Components take a clock instead of reading the system time so that
/// windowed operations (subscription pools, expiry) can be tested.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        unix_now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Get the current Unix timestamp in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
