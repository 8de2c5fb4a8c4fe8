//! Cached currency converter and coin valuation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use quill_types::{Clock, BASE_CURRENCY};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::feed::RateFeed;
use crate::{normalize_currency, ExchangeError, Result};

/// Default value of one coin in USD.
pub fn default_coin_value_usd() -> Decimal {
    Decimal::new(1, 2)
}

fn default_cache_ttl_secs() -> u64 {
    300
}

/// Converter settings (`[exchange]` in the daemon config).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// USD value of one coin.
    #[serde(default = "default_coin_value_usd")]
    pub coin_value_usd: Decimal,
    /// How long a fetched rate is reused before asking the feed again.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Reject quotes observed longer ago than this. `None` accepts any age.
    #[serde(default)]
    pub max_rate_age_secs: Option<u64>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            coin_value_usd: default_coin_value_usd(),
            cache_ttl_secs: default_cache_ttl_secs(),
            max_rate_age_secs: None,
        }
    }
}

#[derive(Clone, Copy)]
struct CachedRate {
    usd_per_unit: Decimal,
    observed_at: u64,
    fetched_at: u64,
}

/// Converts fiat amounts through USD using the latest known rate.
pub struct CurrencyConverter {
    feed: Arc<dyn RateFeed>,
    clock: Arc<dyn Clock>,
    config: ConverterConfig,
    cache: RwLock<HashMap<String, CachedRate>>,
}

impl CurrencyConverter {
    pub fn new(feed: Arc<dyn RateFeed>, clock: Arc<dyn Clock>, config: ConverterConfig) -> Self {
        Self {
            feed,
            clock,
            config,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    pub fn coin_value_usd(&self) -> Decimal {
        self.config.coin_value_usd
    }

    /// USD value of one unit of `currency`.
    pub fn rate(&self, currency: &str) -> Result<Decimal> {
        let currency = normalize_currency(currency);
        if currency == BASE_CURRENCY {
            return Ok(Decimal::ONE);
        }
        let now = self.clock.now();

        if let Some(cached) = self.cached(&currency, now) {
            self.check_age(&currency, cached.observed_at, now)?;
            return Ok(cached.usd_per_unit);
        }

        let quote = self
            .feed
            .latest(&currency)?
            .ok_or_else(|| ExchangeError::unavailable(&currency, "no quote"))?;
        if quote.usd_per_unit <= Decimal::ZERO {
            tracing::warn!(currency = %currency, rate = %quote.usd_per_unit, "rejecting non-positive rate");
            return Err(ExchangeError::unavailable(
                &currency,
                format!("non-positive rate {}", quote.usd_per_unit),
            ));
        }
        self.check_age(&currency, quote.observed_at, now)?;

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(
                currency.clone(),
                CachedRate {
                    usd_per_unit: quote.usd_per_unit,
                    observed_at: quote.observed_at,
                    fetched_at: now,
                },
            );
        }
        tracing::debug!(currency = %currency, rate = %quote.usd_per_unit, "rate fetched");
        Ok(quote.usd_per_unit)
    }

    /// Drop cached quotes so the next lookup reads the feed.
    pub fn invalidate(&self, currency: Option<&str>) {
        if let Ok(mut cache) = self.cache.write() {
            match currency {
                Some(code) => {
                    cache.remove(&normalize_currency(code));
                }
                None => cache.clear(),
            }
        }
    }

    pub fn to_usd(&self, amount: Decimal, currency: &str) -> Result<Decimal> {
        let rate = self.rate(currency)?;
        amount
            .checked_mul(rate)
            .ok_or_else(|| ExchangeError::Overflow(format!("{amount} {currency}")))
    }

    pub fn from_usd(&self, amount: Decimal, currency: &str) -> Result<Decimal> {
        let rate = self.rate(currency)?;
        amount
            .checked_div(rate)
            .ok_or_else(|| ExchangeError::Overflow(format!("{amount} USD")))
    }

    pub fn convert(&self, amount: Decimal, from: &str, to: &str) -> Result<Decimal> {
        if normalize_currency(from) == normalize_currency(to) {
            return Ok(amount);
        }
        let usd = self.to_usd(amount, from)?;
        self.from_usd(usd, to)
    }

    /// USD value of a coin amount.
    pub fn coins_to_usd(&self, coins: u64) -> Result<Decimal> {
        Decimal::from(coins)
            .checked_mul(self.config.coin_value_usd)
            .ok_or_else(|| ExchangeError::Overflow(format!("{coins} coins")))
    }

    /// Whole coins purchasable with `usd`, rounded down.
    pub fn usd_to_coins(&self, usd: Decimal) -> Result<u64> {
        if usd < Decimal::ZERO {
            return Err(ExchangeError::InvalidAmount(format!("{usd} USD")));
        }
        let coins = usd
            .checked_div(self.config.coin_value_usd)
            .ok_or_else(|| ExchangeError::Overflow(format!("{usd} USD")))?
            .round_dp_with_strategy(0, RoundingStrategy::ToZero);
        u64::try_from(coins).map_err(|_| ExchangeError::Overflow(format!("{usd} USD")))
    }

    fn cached(&self, currency: &str, now: u64) -> Option<CachedRate> {
        let cache = self.cache.read().ok()?;
        let entry = cache.get(currency)?;
        (now.saturating_sub(entry.fetched_at) < self.config.cache_ttl_secs).then_some(*entry)
    }

    fn check_age(&self, currency: &str, observed_at: u64, now: u64) -> Result<()> {
        match self.config.max_rate_age_secs {
            Some(max_age) if now.saturating_sub(observed_at) > max_age => {
                tracing::warn!(currency, observed_at, max_age, "rejecting stale rate");
                Err(ExchangeError::unavailable(
                    currency,
                    format!("quote from {observed_at} older than {max_age}s"),
                ))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{DbRateFeed, ExchangeRate, StaticRateFeed};
    use quill_db::Db;
    use quill_types::ManualClock;

    fn converter(feed: StaticRateFeed) -> CurrencyConverter {
        CurrencyConverter::new(
            Arc::new(feed),
            Arc::new(ManualClock::new(1_000)),
            ConverterConfig::default(),
        )
    }

    #[test]
    fn test_usd_is_identity() {
        let conv = converter(StaticRateFeed::new());
        assert_eq!(conv.rate("usd").expect("rate"), Decimal::ONE);
        assert_eq!(
            conv.to_usd(Decimal::new(1234, 2), "USD").expect("convert"),
            Decimal::new(1234, 2)
        );
    }

    #[test]
    fn test_missing_rate_is_an_error() {
        let conv = converter(StaticRateFeed::new());
        let err = conv.to_usd(Decimal::ONE, "EUR").expect_err("no rate");
        assert!(matches!(err, ExchangeError::RateUnavailable { .. }));
    }

    #[test]
    fn test_zero_rate_rejected() {
        let conv = converter(StaticRateFeed::new().with_rate("EUR", Decimal::ZERO));
        assert!(conv.rate("EUR").is_err());
    }

    #[test]
    fn test_cross_conversion() {
        let conv = converter(
            StaticRateFeed::new()
                .with_rate("EUR", Decimal::new(2, 0))
                .with_rate("GBP", Decimal::new(4, 0)),
        );
        assert_eq!(
            conv.convert(Decimal::new(10, 0), "EUR", "GBP").expect("convert"),
            Decimal::new(5, 0)
        );
        assert_eq!(
            conv.from_usd(Decimal::new(10, 0), "EUR").expect("convert"),
            Decimal::new(5, 0)
        );
    }

    #[test]
    fn test_coin_valuation() {
        let conv = converter(StaticRateFeed::new());
        assert_eq!(conv.coins_to_usd(250).expect("usd"), Decimal::new(250, 2));
        assert_eq!(conv.usd_to_coins(Decimal::new(1999, 3)).expect("coins"), 199);
        assert!(conv.usd_to_coins(Decimal::new(-1, 0)).is_err());
    }

    #[test]
    fn test_stale_rate_rejected() {
        let db = Db::open_memory().expect("db");
        let feed = DbRateFeed::new(db);
        feed.publish(&ExchangeRate {
            currency: "EUR".into(),
            usd_per_unit: Decimal::new(108, 2),
            observed_at: 100,
        })
        .expect("publish");

        let clock = Arc::new(ManualClock::new(200));
        let conv = CurrencyConverter::new(
            Arc::new(feed),
            clock.clone(),
            ConverterConfig {
                max_rate_age_secs: Some(500),
                ..ConverterConfig::default()
            },
        );
        assert_eq!(conv.rate("EUR").expect("fresh"), Decimal::new(108, 2));

        clock.set(700);
        assert!(matches!(
            conv.rate("EUR"),
            Err(ExchangeError::RateUnavailable { .. })
        ));
    }

    #[test]
    fn test_cache_ttl() {
        let db = Db::open_memory().expect("db");
        let feed = Arc::new(DbRateFeed::new(db));
        let publish = |rate: i64| {
            feed.publish(&ExchangeRate {
                currency: "EUR".into(),
                usd_per_unit: Decimal::new(rate, 2),
                observed_at: 0,
            })
            .expect("publish");
        };
        publish(100);

        let clock = Arc::new(ManualClock::new(0));
        let conv = CurrencyConverter::new(feed.clone(), clock.clone(), ConverterConfig::default());
        assert_eq!(conv.rate("EUR").expect("rate"), Decimal::new(100, 2));

        publish(120);
        assert_eq!(conv.rate("EUR").expect("cached"), Decimal::new(100, 2));

        clock.advance(301);
        assert_eq!(conv.rate("EUR").expect("refetched"), Decimal::new(120, 2));
    }
}
