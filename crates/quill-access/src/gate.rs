//! Access checks and content purchases.

use std::sync::Arc;

use quill_db::queries::purchases::{self, PurchaseRow};
use quill_ledger::{Ledger, TransactionMeta};
use quill_revenue::RevenueEngine;
use quill_types::content::{ContentType, SubscriptionTier};
use quill_types::ledger::{Transaction, TransactionType};
use quill_types::revenue::RevenueSplit;
use quill_types::{Clock, ContentId, UserId};
use serde::{Deserialize, Serialize};

use crate::directory::{ContentDirectory, SubscriptionLookup};
use crate::pricing::PricingPolicy;
use crate::{AccessError, Result};

/// How access was granted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMethod {
    PreviousPurchase,
    Subscription,
    Free,
}

/// A way to unlock content that the reader does not yet have.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PurchaseOption {
    Coins { price: u64 },
    Subscription { tier: SubscriptionTier },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub has_access: bool,
    pub access_method: Option<AccessMethod>,
    pub required_coins: u64,
    pub user_balance: u64,
    pub coins_needed: u64,
    /// Not granted, but the balance covers the price.
    pub purchasable: bool,
    pub purchase_options: Vec<PurchaseOption>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PurchaseResult {
    pub success: bool,
    /// The reader already had access; nothing was charged.
    pub already_owned: bool,
    pub access_method: Option<AccessMethod>,
    pub transaction: Option<Transaction>,
    pub split: Option<RevenueSplit>,
    pub coins_spent: u64,
    pub new_balance: u64,
}

/// Idempotency key under which a content unlock is debited.
pub fn purchase_key(content_id: &ContentId) -> String {
    format!("content:{content_id}")
}

#[derive(Clone)]
pub struct AccessGate {
    ledger: Ledger,
    revenue: RevenueEngine,
    pricing: PricingPolicy,
    subscriptions: Arc<dyn SubscriptionLookup>,
    directory: Arc<dyn ContentDirectory>,
    clock: Arc<dyn Clock>,
}

impl AccessGate {
    pub fn new(
        ledger: Ledger,
        revenue: RevenueEngine,
        pricing: PricingPolicy,
        subscriptions: Arc<dyn SubscriptionLookup>,
        directory: Arc<dyn ContentDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            revenue,
            pricing,
            subscriptions,
            directory,
            clock,
        }
    }

    pub fn pricing(&self) -> &PricingPolicy {
        &self.pricing
    }

    /// Content the directory knows is priced by its registered type; a caller
    /// naming a different type gets [`AccessError::ContentTypeMismatch`].
    pub fn check_access(
        &self,
        user_id: &UserId,
        content_id: &ContentId,
        content_type: ContentType,
    ) -> Result<AccessDecision> {
        self.registered_writer(content_id, content_type)?;
        let price = self.pricing.price(content_type)?;
        let user_balance = self.ledger.balance(user_id)?;
        let mut decision = AccessDecision {
            has_access: false,
            access_method: None,
            required_coins: price.coins,
            user_balance,
            coins_needed: price.coins.saturating_sub(user_balance),
            purchasable: false,
            purchase_options: Vec::new(),
        };

        let method = if price.coins == 0 {
            Some(AccessMethod::Free)
        } else if self.ledger.has_completed_spend(user_id, content_id)? {
            Some(AccessMethod::PreviousPurchase)
        } else if self.subscription_unlocks(user_id, content_type)? {
            Some(AccessMethod::Subscription)
        } else {
            None
        };

        if let Some(method) = method {
            decision.has_access = true;
            decision.access_method = Some(method);
            decision.coins_needed = 0;
            tracing::debug!(user_id = %user_id, content_id = %content_id, ?method, "access granted");
            return Ok(decision);
        }

        decision.purchasable = user_balance >= price.coins;
        decision.purchase_options.push(PurchaseOption::Coins { price: price.coins });
        decision.purchase_options.extend(
            price
                .tiers
                .iter()
                .map(|tier| PurchaseOption::Subscription { tier: *tier }),
        );
        tracing::debug!(user_id = %user_id, content_id = %content_id, purchasable = decision.purchasable, "access denied");
        Ok(decision)
    }

    /// Buy access with coins.
    ///
    /// Existing access is returned without a charge. The debit uses
    /// [`purchase_key`], so racing purchases of the same content charge once,
    /// and the content purchase record commits in the same storage
    /// transaction as the debit.
    /// A distribution failure after the debit does not fail the purchase; the
    /// spend is queued for reconciliation instead.
    pub fn purchase(
        &self,
        user_id: &UserId,
        content_id: &ContentId,
        content_type: ContentType,
    ) -> Result<PurchaseResult> {
        let decision = self.check_access(user_id, content_id, content_type)?;
        if decision.has_access {
            return Ok(PurchaseResult {
                success: true,
                already_owned: true,
                access_method: decision.access_method,
                transaction: None,
                split: None,
                coins_spent: 0,
                new_balance: decision.user_balance,
            });
        }

        let writer_id = self
            .registered_writer(content_id, content_type)?
            .ok_or(AccessError::UnknownContent(*content_id))?;

        let meta = TransactionMeta::default()
            .with_content(*content_id)
            .with_idempotency_key(purchase_key(content_id))
            .with_description(format!("unlock {content_type}"));
        let tx = self
            .ledger
            .debit_with(
                user_id,
                decision.required_coins,
                TransactionType::CoinSpend,
                meta,
                |conn, tx| purchases::record(conn, &purchase_row(tx, content_id, content_type, &writer_id)),
            )
            .inspect_err(|e| {
                if matches!(e, quill_ledger::LedgerError::InsufficientFunds { .. }) {
                    tracing::info!(user_id = %user_id, content_id = %content_id, "purchase declined: insufficient coins");
                }
            })?;

        let split = match self.revenue.distribute_content_purchase(&tx, &writer_id) {
            Ok(split) => Some(split),
            Err(e) => {
                if let Err(queue_err) = self.revenue.queue_reconciliation(&tx.id, &writer_id, &e.to_string()) {
                    tracing::error!(tx_id = %tx.id, error = %e, queue_error = %queue_err, "distribution lost: could not queue reconciliation");
                }
                None
            }
        };

        let new_balance = self.ledger.balance(user_id)?;
        tracing::info!(
            user_id = %user_id,
            content_id = %content_id,
            tx_id = %tx.id,
            coins = tx.coins(),
            "content purchased"
        );
        Ok(PurchaseResult {
            success: true,
            already_owned: false,
            access_method: Some(AccessMethod::PreviousPurchase),
            coins_spent: tx.coins(),
            transaction: Some(tx),
            split,
            new_balance,
        })
    }

    fn subscription_unlocks(&self, user_id: &UserId, content_type: ContentType) -> Result<bool> {
        let Some(subscription) = self.subscriptions.subscription(user_id)? else {
            return Ok(false);
        };
        let price = self.pricing.price(content_type)?;
        Ok(subscription.is_active(self.clock.now()) && price.unlocked_by(subscription.tier))
    }

    /// The registered writer, after checking the caller's content type
    /// against the registry. Unregistered content has no writer.
    fn registered_writer(&self, content_id: &ContentId, content_type: ContentType) -> Result<Option<UserId>> {
        match self.directory.lookup(content_id)? {
            Some((_, registered)) if registered != content_type => {
                tracing::warn!(content_id = %content_id, %registered, requested = %content_type, "content type mismatch");
                Err(AccessError::ContentTypeMismatch {
                    content_id: *content_id,
                    registered,
                    requested: content_type,
                })
            }
            Some((writer_id, _)) => Ok(Some(writer_id)),
            None => Ok(None),
        }
    }
}

fn purchase_row(tx: &Transaction, content_id: &ContentId, content_type: ContentType, writer_id: &UserId) -> PurchaseRow {
    PurchaseRow {
        transaction_id: tx.id,
        user_id: tx.user_id,
        content_id: *content_id,
        content_type,
        writer_id: *writer_id,
        coin_amount: tx.coins(),
        purchased_at: tx.completed_at.unwrap_or(tx.created_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DbContentDirectory, DbSubscriptions};
    use quill_db::Db;
    use quill_exchange::{ConverterConfig, CurrencyConverter, StaticRateFeed};
    use quill_revenue::{PurchaseEngagement, SplitTable};
    use quill_types::content::Subscription;
    use quill_types::{Decimal, ManualClock};
    use uuid::Uuid;

    struct Fixture {
        db: Db,
        gate: AccessGate,
        ledger: Ledger,
        subscriptions: DbSubscriptions,
        directory: DbContentDirectory,
    }

    fn fixture() -> Fixture {
        let db = Db::open_memory().expect("db");
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_000));
        let ledger = Ledger::new(db.clone(), clock.clone());
        let converter = Arc::new(CurrencyConverter::new(
            Arc::new(StaticRateFeed::new()),
            clock.clone(),
            ConverterConfig::default(),
        ));
        let revenue = RevenueEngine::new(
            db.clone(),
            clock.clone(),
            converter,
            SplitTable::default(),
            Arc::new(PurchaseEngagement::new(db.clone())),
        );
        let subscriptions = DbSubscriptions::new(db.clone(), clock.clone());
        let directory = DbContentDirectory::new(db.clone(), clock.clone());
        let gate = AccessGate::new(
            ledger.clone(),
            revenue,
            PricingPolicy::default(),
            Arc::new(subscriptions.clone()),
            Arc::new(directory.clone()),
            clock,
        );
        Fixture {
            db,
            gate,
            ledger,
            subscriptions,
            directory,
        }
    }

    fn fund(f: &Fixture, user: &UserId, coins: u64) {
        f.ledger
            .credit(user, coins, TransactionType::CoinPurchase, TransactionMeta::default())
            .expect("fund");
    }

    #[test]
    fn test_purchasable_with_balance() {
        let f = fixture();
        let user = Uuid::new_v4();
        fund(&f, &user, 15);

        let decision = f
            .gate
            .check_access(&user, &Uuid::new_v4(), ContentType::Chapter)
            .expect("check");
        assert!(!decision.has_access);
        assert!(decision.purchasable);
        assert_eq!(decision.required_coins, 10);
        assert_eq!(decision.purchase_options.len(), 4);
    }

    #[test]
    fn test_insufficient_balance_reports_shortfall() {
        let f = fixture();
        let user = Uuid::new_v4();
        fund(&f, &user, 40);
        let content = Uuid::new_v4();
        f.directory
            .register(&content, &Uuid::new_v4(), ContentType::Story)
            .expect("register");

        let decision = f.gate.check_access(&user, &content, ContentType::Story).expect("check");
        assert_eq!(decision.coins_needed, 60);
        assert!(!decision.purchasable);

        let err = f.gate.purchase(&user, &content, ContentType::Story).expect_err("short");
        assert!(matches!(
            err,
            AccessError::InsufficientFunds {
                required: 100,
                available: 40,
                shortfall: 60,
                ..
            }
        ));
    }

    #[test]
    fn test_subscription_grants_matching_tiers_only() {
        let f = fixture();
        let user = Uuid::new_v4();
        f.subscriptions
            .set(
                &user,
                &Subscription {
                    tier: SubscriptionTier::Premium,
                    expires_at: 2_000,
                },
            )
            .expect("subscribe");

        let story = f.gate.check_access(&user, &Uuid::new_v4(), ContentType::Story).expect("check");
        assert_eq!(story.access_method, Some(AccessMethod::Subscription));

        let exclusive = f
            .gate
            .check_access(&user, &Uuid::new_v4(), ContentType::ExclusiveContent)
            .expect("check");
        assert!(!exclusive.has_access);
    }

    #[test]
    fn test_expired_subscription_denied() {
        let f = fixture();
        let user = Uuid::new_v4();
        f.subscriptions
            .set(
                &user,
                &Subscription {
                    tier: SubscriptionTier::Vip,
                    expires_at: 1_000,
                },
            )
            .expect("subscribe");
        let decision = f.gate.check_access(&user, &Uuid::new_v4(), ContentType::Chapter).expect("check");
        assert!(!decision.has_access);
    }

    #[test]
    fn test_purchase_charges_once_and_pays_writer() {
        let f = fixture();
        let (user, writer, content) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        fund(&f, &user, 100);
        f.directory.register(&content, &writer, ContentType::Story).expect("register");

        let bought = f.gate.purchase(&user, &content, ContentType::Story).expect("purchase");
        assert!(bought.success && !bought.already_owned);
        assert_eq!(bought.coins_spent, 100);
        assert_eq!(bought.new_balance, 0);
        let split = bought.split.expect("split");
        assert_eq!(split.writer_share, Decimal::new(70, 2));

        let again = f.gate.purchase(&user, &content, ContentType::Story).expect("again");
        assert!(again.already_owned);
        assert_eq!(again.access_method, Some(AccessMethod::PreviousPurchase));
        assert_eq!(f.ledger.balance(&user).expect("balance"), 0);
    }

    #[test]
    fn test_unknown_content_not_charged() {
        let f = fixture();
        let user = Uuid::new_v4();
        fund(&f, &user, 100);
        assert!(matches!(
            f.gate.purchase(&user, &Uuid::new_v4(), ContentType::Chapter),
            Err(AccessError::UnknownContent(_))
        ));
        assert_eq!(f.ledger.balance(&user).expect("balance"), 100);
    }

    #[test]
    fn test_free_content() {
        let f = fixture();
        let mut prices = std::collections::HashMap::new();
        prices.insert(ContentType::Chapter, crate::pricing::ContentPrice::new(0, &[]));
        let gate = AccessGate {
            pricing: PricingPolicy::new(prices),
            ..f.gate.clone()
        };
        let decision = gate
            .check_access(&Uuid::new_v4(), &Uuid::new_v4(), ContentType::Chapter)
            .expect("check");
        assert_eq!(decision.access_method, Some(AccessMethod::Free));
    }

    #[test]
    fn test_mismatched_type_not_underpriced() {
        let f = fixture();
        let (user, content) = (Uuid::new_v4(), Uuid::new_v4());
        fund(&f, &user, 10);
        f.directory
            .register(&content, &Uuid::new_v4(), ContentType::Story)
            .expect("register");

        assert!(matches!(
            f.gate.purchase(&user, &content, ContentType::Chapter),
            Err(AccessError::ContentTypeMismatch {
                registered: ContentType::Story,
                requested: ContentType::Chapter,
                ..
            })
        ));
        assert!(matches!(
            f.gate.check_access(&user, &content, ContentType::Chapter),
            Err(AccessError::ContentTypeMismatch { .. })
        ));
        assert_eq!(f.ledger.balance(&user).expect("balance"), 10);

        let decision = f.gate.check_access(&user, &content, ContentType::Story).expect("check");
        assert!(!decision.has_access);
        assert_eq!(decision.required_coins, 100);
    }

    #[test]
    fn test_bare_content_spend_does_not_unlock() {
        let f = fixture();
        let (user, content) = (Uuid::new_v4(), Uuid::new_v4());
        fund(&f, &user, 1);
        f.directory
            .register(&content, &Uuid::new_v4(), ContentType::ExclusiveContent)
            .expect("register");

        f.ledger
            .debit(
                &user,
                1,
                TransactionType::CoinSpend,
                TransactionMeta::default().with_content(content),
            )
            .expect("spend");

        let decision = f
            .gate
            .check_access(&user, &content, ContentType::ExclusiveContent)
            .expect("check");
        assert!(!decision.has_access);
        assert_eq!(decision.coins_needed, 250);
    }

    #[test]
    fn test_purchase_record_commits_with_debit() {
        let f = fixture();
        let (user, writer, content) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        fund(&f, &user, 10);
        f.directory.register(&content, &writer, ContentType::Chapter).expect("register");

        let bought = f.gate.purchase(&user, &content, ContentType::Chapter).expect("purchase");
        let tx = bought.transaction.expect("transaction");
        let scores = f
            .db
            .with_conn(|conn| purchases::coins_by_writer(conn, 0, u64::MAX))
            .expect("scores");
        assert_eq!(scores, vec![(writer, 10)]);
        assert!(f.ledger.has_completed_spend(&user, &content).expect("check"));
        assert_eq!(tx.related_content_id, Some(content));
    }
}
