//! Test harness for end-to-end Quill flows.
//!
//! [`Platform`] wires every component onto one in-memory database and a
//! manual clock, the same way the daemon wires them onto its database file.

use std::sync::Arc;

use quill_access::{AccessGate, DbContentDirectory, DbSubscriptions, PricingPolicy};
use quill_db::Db;
use quill_exchange::{ConverterConfig, CurrencyConverter, DbRateFeed, ExchangeRate};
use quill_ledger::{Ledger, TransactionMeta};
use quill_licensing::{LicensingConfig, LicensingEngine};
use quill_payout::{PayoutConfig, PayoutProcessor};
use quill_revenue::{PurchaseEngagement, RevenueEngine, SplitTable};
use quill_types::content::ContentType;
use quill_types::ledger::TransactionType;
use quill_types::{Clock, ContentId, Decimal, ManualClock, UserId, Uuid};

/// Base timestamp for test scenarios.
pub const BASE_TIME: u64 = 1_700_000_000;

/// Every component on one shared database.
#[derive(Clone)]
pub struct Platform {
    pub clock: Arc<ManualClock>,
    pub ledger: Ledger,
    pub rates: DbRateFeed,
    pub converter: Arc<CurrencyConverter>,
    pub revenue: RevenueEngine,
    pub payouts: PayoutProcessor,
    pub subscriptions: DbSubscriptions,
    pub directory: DbContentDirectory,
    pub access: AccessGate,
    pub licensing: LicensingEngine,
}

impl Platform {
    pub fn new() -> Self {
        Self::with_licensing(LicensingConfig::default())
    }

    pub fn with_licensing(licensing: LicensingConfig) -> Self {
        let db = Db::open_memory().expect("open in-memory db");
        let clock = Arc::new(ManualClock::new(BASE_TIME));
        let dyn_clock: Arc<dyn Clock> = clock.clone();

        let rates = DbRateFeed::new(db.clone());
        let converter = Arc::new(CurrencyConverter::new(
            Arc::new(rates.clone()),
            dyn_clock.clone(),
            ConverterConfig::default(),
        ));
        let ledger = Ledger::new(db.clone(), dyn_clock.clone());
        let revenue = RevenueEngine::new(
            db.clone(),
            dyn_clock.clone(),
            converter.clone(),
            SplitTable::default(),
            Arc::new(PurchaseEngagement::new(db.clone())),
        );
        let payouts = PayoutProcessor::new(
            db.clone(),
            ledger.clone(),
            dyn_clock.clone(),
            PayoutConfig::default(),
        );
        let subscriptions = DbSubscriptions::new(db.clone(), dyn_clock.clone());
        let directory = DbContentDirectory::new(db.clone(), dyn_clock.clone());
        let access = AccessGate::new(
            ledger.clone(),
            revenue.clone(),
            PricingPolicy::default(),
            Arc::new(subscriptions.clone()),
            Arc::new(directory.clone()),
            dyn_clock.clone(),
        );
        let licensing = LicensingEngine::new(
            db,
            dyn_clock,
            converter.clone(),
            revenue.clone(),
            payouts.clone(),
            licensing,
        );

        Self {
            clock,
            ledger,
            rates,
            converter,
            revenue,
            payouts,
            subscriptions,
            directory,
            access,
            licensing,
        }
    }

    /// Give `user` coins as if they had bought a package.
    pub fn fund(&self, user: &UserId, coins: u64) {
        self.ledger
            .credit(user, coins, TransactionType::CoinPurchase, TransactionMeta::default())
            .expect("fund user");
    }

    /// Register a new content item owned by `writer`.
    pub fn publish(&self, writer: &UserId, content_type: ContentType) -> ContentId {
        let content_id = Uuid::new_v4();
        self.directory
            .register(&content_id, writer, content_type)
            .expect("register content");
        content_id
    }

    /// Push a fresh quote for `currency`.
    pub fn quote(&self, currency: &str, usd_per_unit: Decimal) {
        self.rates
            .publish(&ExchangeRate {
                currency: currency.into(),
                usd_per_unit,
                observed_at: self.clock.now(),
            })
            .expect("publish rate");
        self.converter.invalidate(Some(currency));
    }

    pub fn balance(&self, user: &UserId) -> u64 {
        self.ledger.balance(user).expect("balance")
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::new()
    }
}
