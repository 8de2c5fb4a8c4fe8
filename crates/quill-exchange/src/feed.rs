//! Exchange rate sources.

use std::collections::HashMap;

use quill_db::queries::rates;
use quill_db::Db;
use quill_types::BASE_CURRENCY;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{normalize_currency, ExchangeError, Result};

/// USD value of one unit of `currency`, as observed at `observed_at`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub currency: String,
    pub usd_per_unit: Decimal,
    pub observed_at: u64,
}

/// A source of the latest known rate per currency.
pub trait RateFeed: Send + Sync {
    /// Latest quote for `currency` (already normalized), or `None` if the
    /// source has never seen it.
    fn latest(&self, currency: &str) -> Result<Option<ExchangeRate>>;
}

/// A fixed rate table.
///
/// Used for bootstrapping and tests. Quotes never age: `observed_at` is
/// reported as `u64::MAX` so staleness checks always pass.
#[derive(Debug, Clone, Default)]
pub struct StaticRateFeed {
    rates: HashMap<String, Decimal>,
}

impl StaticRateFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style rate registration.
    pub fn with_rate(mut self, currency: &str, usd_per_unit: Decimal) -> Self {
        self.set_rate(currency, usd_per_unit);
        self
    }

    pub fn set_rate(&mut self, currency: &str, usd_per_unit: Decimal) {
        tracing::debug!(currency, %usd_per_unit, "static rate set");
        self.rates.insert(normalize_currency(currency), usd_per_unit);
    }
}

impl RateFeed for StaticRateFeed {
    fn latest(&self, currency: &str) -> Result<Option<ExchangeRate>> {
        Ok(self.rates.get(currency).map(|rate| ExchangeRate {
            currency: currency.to_string(),
            usd_per_unit: *rate,
            observed_at: u64::MAX,
        }))
    }
}

/// Reads the `exchange_rates` table maintained by the external feed.
#[derive(Clone)]
pub struct DbRateFeed {
    db: Db,
}

impl DbRateFeed {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Store a quote pushed by the feed.
    pub fn publish(&self, rate: &ExchangeRate) -> Result<()> {
        let currency = normalize_currency(&rate.currency);
        if currency == BASE_CURRENCY {
            return Err(ExchangeError::InvalidAmount(
                "the base currency rate is fixed at 1".into(),
            ));
        }
        if rate.usd_per_unit <= Decimal::ZERO {
            return Err(ExchangeError::unavailable(
                &currency,
                format!("non-positive rate {}", rate.usd_per_unit),
            ));
        }
        self.db.with_conn(|conn| {
            rates::upsert(conn, &currency, rate.usd_per_unit, rate.observed_at)
                .map_err(ExchangeError::from)
        })?;
        tracing::info!(
            currency = %currency,
            usd_per_unit = %rate.usd_per_unit,
            observed_at = rate.observed_at,
            "exchange rate updated"
        );
        Ok(())
    }
}

impl RateFeed for DbRateFeed {
    fn latest(&self, currency: &str) -> Result<Option<ExchangeRate>> {
        let row = self
            .db
            .with_conn(|conn| rates::get(conn, currency).map_err(ExchangeError::from))?;
        Ok(row.map(|(usd_per_unit, observed_at)| ExchangeRate {
            currency: currency.to_string(),
            usd_per_unit,
            observed_at,
        }))
    }
}
