//! Subscription pool distribution.
//!
//! All completed subscription payments in a period form one gross pool. The
//! writer pool is the subscription writer percentage of that gross, and it is
//! apportioned across writers by engagement score. Each writer receives one
//! split whose gross is their slice of the pool.
//!
//! A period is distributed at most once. The run record moves
//! `running → completed`, or `running → failed` on error, and a failed run may
//! be claimed again.

use quill_db::queries::distributions::{self, PoolRunStatus};
use quill_db::queries::{purchases, splits, transactions};
use quill_db::Db;
use quill_types::ledger::TransactionType;
use quill_types::revenue::{RevenueEventType, RevenueSplit, SplitSource};
use quill_types::{UserId, BASE_CURRENCY};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{record_split, RevenueEngine};
use crate::splits::{floor_cents, percent_of};
use crate::{Result, RevenueError};

/// Source of per-writer engagement for a period.
pub trait EngagementScorer: Send + Sync {
    /// Scores for writers active in `[period_start, period_end)`. Writers not
    /// listed, or listed with zero, receive nothing.
    fn scores(&self, period_start: u64, period_end: u64) -> Result<Vec<(UserId, u64)>>;
}

/// Scores each writer by coins spent on their content in the period.
#[derive(Clone)]
pub struct PurchaseEngagement {
    db: Db,
}

impl PurchaseEngagement {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

impl EngagementScorer for PurchaseEngagement {
    fn scores(&self, period_start: u64, period_end: u64) -> Result<Vec<(UserId, u64)>> {
        self.db.with_conn(|conn| {
            purchases::coins_by_writer(conn, period_start, period_end).map_err(RevenueError::from)
        })
    }
}

/// Scores supplied up front, for external analytics feeds and tests.
#[derive(Clone, Debug, Default)]
pub struct FixedEngagement {
    scores: Vec<(UserId, u64)>,
}

impl FixedEngagement {
    pub fn new(scores: Vec<(UserId, u64)>) -> Self {
        Self { scores }
    }
}

impl EngagementScorer for FixedEngagement {
    fn scores(&self, _period_start: u64, _period_end: u64) -> Result<Vec<(UserId, u64)>> {
        Ok(self.scores.clone())
    }
}

/// Result of distributing one period.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoolDistribution {
    pub period_start: u64,
    pub period_end: u64,
    pub gross_pool: Decimal,
    pub writer_pool: Decimal,
    pub splits: Vec<RevenueSplit>,
    /// The period had already been distributed; `splits` are the stored ones.
    pub replayed: bool,
}

impl RevenueEngine {
    /// Distribute the subscription pool of `[period_start, period_end)`.
    ///
    /// # Errors
    ///
    /// - [`RevenueError::InvalidPeriod`] if the window is empty
    /// - [`RevenueError::PoolRunInProgress`] if another run holds the period
    /// - [`RevenueError::Exchange`] if a payment currency has no usable rate
    pub fn distribute_subscription_pool(&self, period_start: u64, period_end: u64) -> Result<PoolDistribution> {
        if period_start >= period_end {
            return Err(RevenueError::InvalidPeriod {
                start: period_start,
                end: period_end,
            });
        }
        let writer_pct = self.table.get(RevenueEventType::Subscription).writer_pct;
        let now = self.clock.now();

        let existing = self.db.with_tx(|conn| {
            distributions::claim_pool_run(conn, period_start, period_end, now)
                .map_err(RevenueError::from)
        })?;
        if let Some(run) = existing {
            if run.status == PoolRunStatus::Running {
                tracing::warn!(period_start, period_end, "subscription pool run already in progress");
                return Err(RevenueError::PoolRunInProgress {
                    start: period_start,
                    end: period_end,
                });
            }
            let gross_pool = run.gross_pool.unwrap_or(Decimal::ZERO);
            let stored = self.db.with_conn(|conn| {
                splits::list_for_period(conn, period_start, period_end).map_err(RevenueError::from)
            })?;
            return Ok(PoolDistribution {
                period_start,
                period_end,
                gross_pool,
                writer_pool: percent_of(gross_pool, writer_pct)?,
                splits: stored,
                replayed: true,
            });
        }

        tracing::info!(period_start, period_end, "subscription pool run started");
        match self.run_pool(period_start, period_end, writer_pct, now) {
            Ok(distribution) => {
                tracing::info!(
                    period_start,
                    period_end,
                    gross_pool = %distribution.gross_pool,
                    writer_pool = %distribution.writer_pool,
                    writers = distribution.splits.len(),
                    "subscription pool distributed"
                );
                Ok(distribution)
            }
            Err(e) => {
                tracing::warn!(period_start, period_end, error = %e, "subscription pool run failed");
                let closed = self.db.with_conn(|conn| {
                    distributions::finish_pool_run(
                        conn,
                        period_start,
                        period_end,
                        PoolRunStatus::Failed,
                        None,
                        self.clock.now(),
                    )
                    .map_err(RevenueError::from)
                });
                if let Err(close_err) = closed {
                    tracing::warn!(period_start, period_end, error = %close_err, "could not mark pool run failed");
                }
                Err(e)
            }
        }
    }

    fn run_pool(&self, period_start: u64, period_end: u64, writer_pct: u8, now: u64) -> Result<PoolDistribution> {
        let gross_pool = self.gross_pool(period_start, period_end)?;
        let writer_pool = percent_of(gross_pool, writer_pct)?;

        let mut scores: Vec<(UserId, u64)> = self
            .scorer
            .scores(period_start, period_end)?
            .into_iter()
            .filter(|(_, score)| *score > 0)
            .collect();
        scores.sort_by_key(|(writer, _)| *writer);
        let total_score: u64 = scores.iter().map(|(_, s)| *s).fold(0, u64::saturating_add);

        let splits = if gross_pool <= Decimal::ZERO || total_score == 0 {
            tracing::info!(period_start, period_end, %gross_pool, total_score, "nothing to distribute");
            Vec::new()
        } else {
            apportion(
                gross_pool,
                writer_pool,
                &scores,
                total_score,
                self.table.get(RevenueEventType::Subscription),
                (period_start, period_end),
                now,
            )?
        };

        self.db.with_tx(|conn| -> Result<()> {
            for split in &splits {
                record_split(conn, split, now)?;
            }
            distributions::finish_pool_run(
                conn,
                period_start,
                period_end,
                PoolRunStatus::Completed,
                Some(gross_pool),
                now,
            )?;
            Ok(())
        })?;

        Ok(PoolDistribution {
            period_start,
            period_end,
            gross_pool,
            writer_pool,
            splits,
            replayed: false,
        })
    }

    /// Sum of completed subscription payments in the window, in USD.
    fn gross_pool(&self, period_start: u64, period_end: u64) -> Result<Decimal> {
        let payments = self.db.with_conn(|conn| {
            transactions::completed_in_window(conn, TransactionType::Subscription, period_start, period_end)
                .map_err(RevenueError::from)
        })?;

        let mut gross = Decimal::ZERO;
        for payment in payments {
            let Some(amount) = payment.fiat_amount else {
                tracing::warn!(tx_id = %payment.id, "subscription payment without fiat amount skipped");
                continue;
            };
            let currency = payment.currency.as_deref().unwrap_or(BASE_CURRENCY);
            let usd = self.converter.to_usd(amount, currency)?.round_dp(2);
            gross = gross.checked_add(usd).ok_or(RevenueError::Overflow)?;
        }
        Ok(gross)
    }
}

/// Apportion the pool by score. Every split but the last is floored to
/// cents; the last takes the remaining gross, and each split's platform share
/// is its gross minus its writer share.
fn apportion(
    gross_pool: Decimal,
    writer_pool: Decimal,
    scores: &[(UserId, u64)],
    total_score: u64,
    percentages: quill_types::revenue::SplitPercentages,
    (period_start, period_end): (u64, u64),
    now: u64,
) -> Result<Vec<RevenueSplit>> {
    let total = Decimal::from(total_score);
    let slice = |amount: Decimal, score: u64| -> Result<Decimal> {
        let scaled = amount
            .checked_mul(Decimal::from(score))
            .ok_or(RevenueError::Overflow)?;
        Ok(floor_cents(scaled.checked_div(total).ok_or(RevenueError::Overflow)?))
    };

    let mut allocated = Decimal::ZERO;
    let mut result = Vec::with_capacity(scores.len());
    for (index, (writer_id, score)) in scores.iter().enumerate() {
        let gross = if index + 1 == scores.len() {
            gross_pool - allocated
        } else {
            slice(gross_pool, *score)?
        };
        allocated += gross;
        let writer_share = slice(writer_pool, *score)?;

        result.push(RevenueSplit {
            id: Uuid::new_v4(),
            event_type: RevenueEventType::Subscription,
            source: SplitSource::SubscriptionPool {
                period_start,
                period_end,
            },
            writer_id: Some(*writer_id),
            studio_id: None,
            gross_amount: gross,
            writer_share,
            studio_share: None,
            platform_share: gross - writer_share,
            percentages,
            currency: BASE_CURRENCY.to_string(),
            created_at: now,
        });
    }
    Ok(result)
}
