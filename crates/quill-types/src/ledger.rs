//! Coin ledger structures: balances, transactions and the coin package catalog.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{ContentId, ParseTagError, TransactionId, UserId};

/// Kind of ledger movement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Coins bought with fiat through a payment gateway.
    CoinPurchase,
    /// Coins spent unlocking content.
    CoinSpend,
    /// Coins sent from one user to another.
    Tip,
    /// A fiat subscription payment; carries no coins.
    Subscription,
    /// A fiat disbursement of writer earnings; carries no coins.
    Payout,
}

impl TransactionType {
    pub const ALL: [TransactionType; 5] = [
        TransactionType::CoinPurchase,
        TransactionType::CoinSpend,
        TransactionType::Tip,
        TransactionType::Subscription,
        TransactionType::Payout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::CoinPurchase => "coin_purchase",
            TransactionType::CoinSpend => "coin_spend",
            TransactionType::Tip => "tip",
            TransactionType::Subscription => "subscription",
            TransactionType::Payout => "payout",
        }
    }
}

impl FromStr for TransactionType {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseTagError::new("transaction type", s))
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction lifecycle. `Pending` moves exactly once to a terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl FromStr for TransactionStatus {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(ParseTagError::new("transaction status", other)),
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ledger movement. Immutable once terminal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    /// Signed coin delta; negative for debits.
    pub coin_amount: i64,
    pub fiat_amount: Option<Decimal>,
    pub currency: Option<String>,
    pub status: TransactionStatus,
    pub related_content_id: Option<ContentId>,
    /// Client or gateway supplied idempotency key.
    pub external_transaction_id: Option<String>,
    /// The opposite leg of a tip.
    pub counterpart_id: Option<TransactionId>,
    pub description: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: u64,
    pub completed_at: Option<u64>,
}

impl Transaction {
    /// Absolute number of coins moved.
    pub fn coins(&self) -> u64 {
        self.coin_amount.unsigned_abs()
    }

    pub fn is_completed(&self) -> bool {
        self.status == TransactionStatus::Completed
    }
}

/// A user's spendable coin balance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinBalance {
    pub user_id: UserId,
    pub balance: u64,
    pub lifetime_earned: u64,
    pub lifetime_spent: u64,
}

impl CoinBalance {
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: 0,
            lifetime_earned: 0,
            lifetime_spent: 0,
        }
    }
}

/// Coin package catalog entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoinPackage {
    pub id: String,
    pub name: String,
    pub coin_amount: u64,
    /// Extra coins granted on purchase, as a whole percentage of `coin_amount`.
    pub bonus_percentage: u8,
    pub base_price_usd: Decimal,
    pub is_active: bool,
}

impl CoinPackage {
    /// Coins credited for one purchase of this package, bonus included.
    pub fn total_coins(&self) -> u64 {
        let bonus = self.coin_amount.saturating_mul(u64::from(self.bonus_percentage)) / 100;
        self.coin_amount.saturating_add(bonus)
    }
}
