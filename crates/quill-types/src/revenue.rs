//! Revenue split and writer earnings records.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{ParseTagError, SplitId, TransactionId, UserId, WorkflowId};

/// Monetary event that produces a revenue split.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevenueEventType {
    CoinPurchase,
    Subscription,
    Licensing,
    Advertising,
}

impl RevenueEventType {
    pub const ALL: [RevenueEventType; 4] = [
        RevenueEventType::CoinPurchase,
        RevenueEventType::Subscription,
        RevenueEventType::Licensing,
        RevenueEventType::Advertising,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RevenueEventType::CoinPurchase => "coin_purchase",
            RevenueEventType::Subscription => "subscription",
            RevenueEventType::Licensing => "licensing",
            RevenueEventType::Advertising => "advertising",
        }
    }
}

impl FromStr for RevenueEventType {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseTagError::new("revenue event type", s))
    }
}

impl fmt::Display for RevenueEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whole-percentage shares for one event type. Must sum to 100.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPercentages {
    pub writer_pct: u8,
    #[serde(default)]
    pub studio_pct: u8,
    pub platform_pct: u8,
}

impl SplitPercentages {
    pub const fn new(writer_pct: u8, studio_pct: u8, platform_pct: u8) -> Self {
        Self {
            writer_pct,
            studio_pct,
            platform_pct,
        }
    }

    pub fn total(&self) -> u16 {
        u16::from(self.writer_pct) + u16::from(self.studio_pct) + u16::from(self.platform_pct)
    }
}

/// What a split was computed for. Holds ids only; the split never owns the
/// referenced transaction or workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SplitSource {
    /// Not yet attributed (a bare `calculate_split`).
    Unattributed,
    /// A coin spend on content.
    Transaction { transaction_id: TransactionId },
    /// A licensing payment: a milestone id or a royalty reference.
    Workflow {
        workflow_id: WorkflowId,
        reference: String,
    },
    /// One writer's slice of a subscription pool.
    SubscriptionPool { period_start: u64, period_end: u64 },
}

/// Apportionment of a gross amount. `writer + studio + platform == gross`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RevenueSplit {
    pub id: SplitId,
    pub event_type: RevenueEventType,
    pub source: SplitSource,
    pub writer_id: Option<UserId>,
    pub studio_id: Option<UserId>,
    pub gross_amount: Decimal,
    pub writer_share: Decimal,
    pub studio_share: Option<Decimal>,
    pub platform_share: Decimal,
    pub percentages: SplitPercentages,
    pub currency: String,
    pub created_at: u64,
}

impl RevenueSplit {
    /// Sum of all shares; equals `gross_amount` for every well-formed split.
    pub fn shares_total(&self) -> Decimal {
        self.writer_share + self.studio_share.unwrap_or(Decimal::ZERO) + self.platform_share
    }
}

/// Writer earnings summary in the base currency.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WriterEarnings {
    pub writer_id: UserId,
    pub total_earned: Decimal,
    pub paid_out: Decimal,
    pub pending_payout: Decimal,
}

impl WriterEarnings {
    pub fn available_for_payout(&self) -> Decimal {
        (self.total_earned - self.paid_out - self.pending_payout).max(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentages_total() {
        assert_eq!(SplitPercentages::new(70, 0, 30).total(), 100);
        assert_eq!(SplitPercentages::new(200, 200, 200).total(), 600);
    }

    #[test]
    fn test_available_for_payout() {
        let earnings = WriterEarnings {
            writer_id: crate::Uuid::nil(),
            total_earned: Decimal::new(100_00, 2),
            paid_out: Decimal::new(40_00, 2),
            pending_payout: Decimal::new(10_50, 2),
        };
        assert_eq!(earnings.available_for_payout(), Decimal::new(49_50, 2));
    }

    #[test]
    fn test_source_serde_tag() {
        let source = SplitSource::SubscriptionPool {
            period_start: 10,
            period_end: 20,
        };
        let json = serde_json::to_value(&source).expect("serialize");
        assert_eq!(json["kind"], "subscription_pool");
    }
}
