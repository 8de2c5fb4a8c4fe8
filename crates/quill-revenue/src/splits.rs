//! Split table and split arithmetic.
//!
//! Default percentages (writer / platform):
//!
//! - **coin_purchase**: 70 / 30
//! - **subscription**: 65 / 35
//! - **licensing**: 85 / 15
//! - **advertising**: 60 / 40
//!
//! Any entry may also carry a studio percentage. Each entry must sum to 100.

use std::collections::HashMap;

use quill_types::revenue::{RevenueEventType, RevenueSplit, SplitPercentages, SplitSource};
use quill_types::BASE_CURRENCY;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Result, RevenueError};

pub const DEFAULT_COIN_PURCHASE: SplitPercentages = SplitPercentages::new(70, 0, 30);
pub const DEFAULT_SUBSCRIPTION: SplitPercentages = SplitPercentages::new(65, 0, 35);
pub const DEFAULT_LICENSING: SplitPercentages = SplitPercentages::new(85, 0, 15);
pub const DEFAULT_ADVERTISING: SplitPercentages = SplitPercentages::new(60, 0, 40);

/// Percentages per event type. Construct with [`SplitTable::new`] or
/// deserialize; both validate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "HashMap<RevenueEventType, SplitPercentages>",
    into = "HashMap<RevenueEventType, SplitPercentages>"
)]
pub struct SplitTable {
    entries: HashMap<RevenueEventType, SplitPercentages>,
}

impl SplitTable {
    /// Build a table, rejecting missing event types and entries that do not
    /// sum to 100.
    pub fn new(entries: HashMap<RevenueEventType, SplitPercentages>) -> Result<Self> {
        for event_type in RevenueEventType::ALL {
            let pct = entries.get(&event_type).ok_or_else(|| {
                RevenueError::InvalidSplitConfiguration(format!("no split for {event_type}"))
            })?;
            if pct.total() != 100 {
                return Err(RevenueError::InvalidSplitConfiguration(format!(
                    "{event_type} percentages sum to {}",
                    pct.total()
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn get(&self, event_type: RevenueEventType) -> SplitPercentages {
        // Every event type is present once constructed.
        self.entries
            .get(&event_type)
            .copied()
            .unwrap_or_else(|| default_percentages(event_type))
    }

    /// Split `gross` for `event_type`. The result is unattributed and unsaved.
    pub fn calculate(&self, event_type: RevenueEventType, gross: Decimal, now: u64) -> Result<RevenueSplit> {
        calculate_split(event_type, self.get(event_type), gross, now)
    }
}

impl Default for SplitTable {
    fn default() -> Self {
        let entries = RevenueEventType::ALL
            .into_iter()
            .map(|t| (t, default_percentages(t)))
            .collect();
        Self { entries }
    }
}

impl TryFrom<HashMap<RevenueEventType, SplitPercentages>> for SplitTable {
    type Error = RevenueError;

    fn try_from(entries: HashMap<RevenueEventType, SplitPercentages>) -> Result<Self> {
        Self::new(entries)
    }
}

impl From<SplitTable> for HashMap<RevenueEventType, SplitPercentages> {
    fn from(table: SplitTable) -> Self {
        table.entries
    }
}

fn default_percentages(event_type: RevenueEventType) -> SplitPercentages {
    match event_type {
        RevenueEventType::CoinPurchase => DEFAULT_COIN_PURCHASE,
        RevenueEventType::Subscription => DEFAULT_SUBSCRIPTION,
        RevenueEventType::Licensing => DEFAULT_LICENSING,
        RevenueEventType::Advertising => DEFAULT_ADVERTISING,
    }
}

/// Round down to whole cents.
pub fn floor_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::ToNegativeInfinity)
}

/// `floor_cents(amount * pct / 100)`.
pub fn percent_of(amount: Decimal, pct: u8) -> Result<Decimal> {
    let scaled = amount
        .checked_mul(Decimal::from(pct))
        .ok_or(RevenueError::Overflow)?;
    Ok(floor_cents(scaled / Decimal::ONE_HUNDRED))
}

/// Split `gross` by `pct`. Writer and studio shares are floored to cents;
/// the platform receives the rest.
///
/// # Errors
///
/// - [`RevenueError::InvalidSplitConfiguration`] if `pct` does not sum to 100
/// - [`RevenueError::InvalidAmount`] if `gross` is not positive
pub fn calculate_split(
    event_type: RevenueEventType,
    pct: SplitPercentages,
    gross: Decimal,
    now: u64,
) -> Result<RevenueSplit> {
    if pct.total() != 100 {
        return Err(RevenueError::InvalidSplitConfiguration(format!(
            "{event_type} percentages sum to {}",
            pct.total()
        )));
    }
    if gross <= Decimal::ZERO {
        return Err(RevenueError::InvalidAmount(format!(
            "gross must be positive, got {gross}"
        )));
    }

    let writer_share = percent_of(gross, pct.writer_pct)?;
    let studio_share = if pct.studio_pct > 0 {
        Some(percent_of(gross, pct.studio_pct)?)
    } else {
        None
    };
    let platform_share = gross - writer_share - studio_share.unwrap_or(Decimal::ZERO);

    Ok(RevenueSplit {
        id: Uuid::new_v4(),
        event_type,
        source: SplitSource::Unattributed,
        writer_id: None,
        studio_id: None,
        gross_amount: gross,
        writer_share,
        studio_share,
        platform_share,
        percentages: pct,
        currency: BASE_CURRENCY.to_string(),
        created_at: now,
    })
}
