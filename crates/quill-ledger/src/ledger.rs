//! Balances, postings and the transaction log.

use std::sync::Arc;

use quill_db::queries::{balances, transactions};
use quill_db::{Db, DbError};
use quill_types::ledger::{CoinBalance, Transaction, TransactionStatus, TransactionType};
use quill_types::{Clock, ContentId, Decimal, TransactionId, UserId};
use rusqlite::Connection;
use uuid::Uuid;

use crate::{coin_amount, LedgerError, Result, TransactionMeta};

/// Largest page [`Ledger::history`] returns.
pub const MAX_HISTORY_PAGE: u32 = 200;

/// The coin ledger. Cheap to clone; clones share the same database handle.
#[derive(Clone)]
pub struct Ledger {
    pub(crate) db: Db,
    pub(crate) clock: Arc<dyn Clock>,
}

enum DebitOutcome {
    Posted(Transaction),
    Replayed(Transaction),
    Rejected { available: u64 },
}

impl Ledger {
    pub fn new(db: Db, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Current balance, creating a zero balance on first access.
    pub fn get_balance(&self, user_id: &UserId) -> Result<CoinBalance> {
        let now = self.clock.now();
        self.db
            .with_conn(|conn| balances::get_or_create(conn, user_id, now).map_err(LedgerError::from))
    }

    /// Spendable coins only.
    pub fn balance(&self, user_id: &UserId) -> Result<u64> {
        Ok(self.get_balance(user_id)?.balance)
    }

    /// Add coins to a balance.
    ///
    /// Replaying a completed idempotency key returns the original transaction
    /// and leaves the balance untouched.
    pub fn credit(
        &self,
        user_id: &UserId,
        amount: u64,
        tx_type: TransactionType,
        meta: TransactionMeta,
    ) -> Result<Transaction> {
        let coins = coin_amount(amount)?;
        let now = self.clock.now();

        let (tx, replayed) = self.db.with_tx(|conn| -> Result<(Transaction, bool)> {
            if let Some(existing) = completed_replay(conn, user_id, &meta)? {
                return Ok((existing, true));
            }
            balances::ensure(conn, user_id, now)?;
            let mut tx = pending_transaction(*user_id, tx_type, coins, &meta, now);
            transactions::insert(conn, &tx)?;
            if !balances::credit(conn, user_id, amount, now)? {
                return Err(LedgerError::overflow(amount));
            }
            transactions::mark_completed(conn, &tx.id, now)?;
            complete(&mut tx, now);
            Ok((tx, false))
        })?;

        if replayed {
            tracing::info!(user_id = %user_id, tx_id = %tx.id, "duplicate credit replayed");
        } else {
            tracing::info!(user_id = %user_id, tx_id = %tx.id, tx_type = %tx_type, amount, "coins credited");
        }
        Ok(tx)
    }

    /// Remove coins from a balance.
    ///
    /// The sufficiency check and the decrement are one conditional update. A
    /// rejected debit is still recorded, as a `failed` transaction.
    pub fn debit(
        &self,
        user_id: &UserId,
        amount: u64,
        tx_type: TransactionType,
        meta: TransactionMeta,
    ) -> Result<Transaction> {
        self.debit_with(user_id, amount, tx_type, meta, |_, _| Ok(()))
    }

    /// [`Ledger::debit`], running `on_posted` inside the same storage
    /// transaction once the debit has completed. An error from `on_posted`
    /// rolls the debit back.
    ///
    /// A replay of a completed idempotency key does not run `on_posted`, and
    /// must match the original posting's type, amount and content.
    pub fn debit_with<F>(
        &self,
        user_id: &UserId,
        amount: u64,
        tx_type: TransactionType,
        meta: TransactionMeta,
        on_posted: F,
    ) -> Result<Transaction>
    where
        F: FnOnce(&Connection, &Transaction) -> std::result::Result<(), DbError>,
    {
        let coins = coin_amount(amount)?;
        let now = self.clock.now();

        let outcome = self.db.with_tx(|conn| -> Result<DebitOutcome> {
            if let Some(existing) = completed_replay(conn, user_id, &meta)? {
                if existing.tx_type != tx_type
                    || existing.coin_amount != -coins
                    || existing.related_content_id != meta.related_content_id
                {
                    return Err(LedgerError::IdempotencyConflict(
                        existing.external_transaction_id.unwrap_or_default(),
                    ));
                }
                return Ok(DebitOutcome::Replayed(existing));
            }
            balances::ensure(conn, user_id, now)?;
            let mut tx = pending_transaction(*user_id, tx_type, -coins, &meta, now);
            transactions::insert(conn, &tx)?;

            if !balances::try_debit(conn, user_id, amount, now)? {
                transactions::mark_failed(conn, &tx.id, "insufficient funds", now)?;
                let available = balances::fetch(conn, user_id)?.map_or(0, |b| b.balance);
                return Ok(DebitOutcome::Rejected { available });
            }

            transactions::mark_completed(conn, &tx.id, now)?;
            complete(&mut tx, now);
            on_posted(conn, &tx)?;
            Ok(DebitOutcome::Posted(tx))
        })?;

        match outcome {
            DebitOutcome::Posted(tx) => {
                tracing::info!(user_id = %user_id, tx_id = %tx.id, tx_type = %tx_type, amount, "coins debited");
                Ok(tx)
            }
            DebitOutcome::Replayed(tx) => {
                tracing::info!(user_id = %user_id, tx_id = %tx.id, "duplicate debit replayed");
                Ok(tx)
            }
            DebitOutcome::Rejected { available } => {
                tracing::warn!(user_id = %user_id, required = amount, available, "debit rejected");
                Err(LedgerError::insufficient(*user_id, amount, available))
            }
        }
    }

    /// A user's transactions, newest first. `limit` is capped at
    /// [`MAX_HISTORY_PAGE`].
    pub fn history(&self, user_id: &UserId, limit: u32, offset: u32) -> Result<Vec<Transaction>> {
        let limit = limit.clamp(1, MAX_HISTORY_PAGE);
        self.db.with_conn(|conn| {
            transactions::list_for_user(conn, user_id, limit, offset).map_err(LedgerError::from)
        })
    }

    pub fn get_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>> {
        self.db
            .with_conn(|conn| transactions::get(conn, id).map_err(LedgerError::from))
    }

    /// The live transaction posted under an idempotency key. A client that
    /// timed out calls this before retrying.
    pub fn find_by_idempotency_key(&self, user_id: &UserId, key: &str) -> Result<Option<Transaction>> {
        self.db.with_conn(|conn| {
            transactions::find_by_external_id(conn, user_id, key).map_err(LedgerError::from)
        })
    }

    /// Whether the user holds a completed coin spend on `content_id` that was
    /// recorded as a content purchase.
    pub fn has_completed_spend(&self, user_id: &UserId, content_id: &ContentId) -> Result<bool> {
        self.db.with_conn(|conn| {
            transactions::completed_spend_exists(conn, user_id, content_id)
                .map_err(LedgerError::from)
        })
    }

    /// Record a fiat subscription payment. Coins are not moved; the row feeds
    /// the subscription pool.
    pub fn record_subscription_payment(
        &self,
        user_id: &UserId,
        fiat_amount: Decimal,
        currency: &str,
        external_transaction_id: Option<String>,
    ) -> Result<Transaction> {
        self.record_fiat(
            user_id,
            TransactionType::Subscription,
            fiat_amount,
            currency,
            external_transaction_id,
        )
    }

    /// Record a completed fiat payout to a writer.
    pub fn record_payout(
        &self,
        writer_id: &UserId,
        fiat_amount: Decimal,
        currency: &str,
        external_transaction_id: Option<String>,
    ) -> Result<Transaction> {
        self.record_fiat(
            writer_id,
            TransactionType::Payout,
            fiat_amount,
            currency,
            external_transaction_id,
        )
    }

    /// Completed subscription payments in `[start, end)`.
    pub fn subscription_payments(&self, start: u64, end: u64) -> Result<Vec<Transaction>> {
        self.db.with_conn(|conn| {
            transactions::completed_in_window(conn, TransactionType::Subscription, start, end)
                .map_err(LedgerError::from)
        })
    }

    /// Sum of all balances.
    pub fn total_supply(&self) -> Result<u64> {
        self.db
            .with_conn(|conn| balances::total_supply(conn).map_err(LedgerError::from))
    }

    fn record_fiat(
        &self,
        user_id: &UserId,
        tx_type: TransactionType,
        fiat_amount: Decimal,
        currency: &str,
        external_transaction_id: Option<String>,
    ) -> Result<Transaction> {
        if fiat_amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(format!(
                "fiat amount must be positive, got {fiat_amount}"
            )));
        }
        let meta = TransactionMeta {
            fiat_amount: Some(fiat_amount),
            currency: Some(currency.trim().to_ascii_uppercase()),
            external_transaction_id,
            ..TransactionMeta::default()
        };
        let now = self.clock.now();

        let tx = self.db.with_tx(|conn| -> Result<Transaction> {
            if let Some(existing) = completed_replay(conn, user_id, &meta)? {
                return Ok(existing);
            }
            let mut tx = pending_transaction(*user_id, tx_type, 0, &meta, now);
            transactions::insert(conn, &tx)?;
            transactions::mark_completed(conn, &tx.id, now)?;
            complete(&mut tx, now);
            Ok(tx)
        })?;
        tracing::info!(
            user_id = %user_id,
            tx_id = %tx.id,
            tx_type = %tx_type,
            %fiat_amount,
            currency,
            "fiat payment recorded"
        );
        Ok(tx)
    }
}

/// Look up a prior posting under the meta's idempotency key.
///
/// A completed prior posting is returned for replay. A pending one means a
/// concurrent caller holds the key.
pub(crate) fn completed_replay(
    conn: &Connection,
    user_id: &UserId,
    meta: &TransactionMeta,
) -> Result<Option<Transaction>> {
    let Some(key) = meta.external_transaction_id.as_deref() else {
        return Ok(None);
    };
    match transactions::find_by_external_id(conn, user_id, key)? {
        Some(tx) if tx.status == TransactionStatus::Completed => Ok(Some(tx)),
        Some(_) => Err(LedgerError::InFlight(key.to_string())),
        None => Ok(None),
    }
}

pub(crate) fn pending_transaction(
    user_id: UserId,
    tx_type: TransactionType,
    coin_amount: i64,
    meta: &TransactionMeta,
    now: u64,
) -> Transaction {
    Transaction {
        id: Uuid::new_v4(),
        user_id,
        tx_type,
        coin_amount,
        fiat_amount: meta.fiat_amount,
        currency: meta.currency.clone(),
        status: TransactionStatus::Pending,
        related_content_id: meta.related_content_id,
        external_transaction_id: meta.external_transaction_id.clone(),
        counterpart_id: None,
        description: meta.description.clone(),
        failure_reason: None,
        created_at: now,
        completed_at: None,
    }
}

pub(crate) fn complete(tx: &mut Transaction, now: u64) {
    tx.status = TransactionStatus::Completed;
    tx.completed_at = Some(now);
}
