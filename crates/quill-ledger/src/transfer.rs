//! Tips: coin transfers between two users.
//!
//! Both legs are written in one storage transaction. Readers see either both
//! legs or neither.

use quill_db::queries::{balances, transactions};
use quill_types::ledger::{Transaction, TransactionType};
use quill_types::UserId;
use serde::{Deserialize, Serialize};

use crate::ledger::{complete, completed_replay, pending_transaction};
use crate::{coin_amount, Ledger, LedgerError, Result, TransactionMeta};

/// The two legs of a tip. `sent.counterpart_id == Some(received.id)` and
/// vice versa.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TipReceipt {
    pub sent: Transaction,
    pub received: Transaction,
}

enum TransferOutcome {
    Posted(TipReceipt),
    Replayed(TipReceipt),
    Rejected { available: u64 },
}

impl Ledger {
    /// Move `amount` coins from `from_user` to `to_user` as a tip.
    ///
    /// The idempotency key is stored on the sender's leg only. A rejected tip
    /// records both legs as `failed`.
    pub fn transfer(
        &self,
        from_user: &UserId,
        to_user: &UserId,
        amount: u64,
        message: Option<String>,
        idempotency_key: Option<String>,
    ) -> Result<TipReceipt> {
        if from_user == to_user {
            return Err(LedgerError::SelfTransfer);
        }
        let coins = coin_amount(amount)?;
        let now = self.clock.now();
        let meta = TransactionMeta {
            external_transaction_id: idempotency_key,
            description: message,
            ..TransactionMeta::default()
        };

        let outcome = self.db.with_tx(|conn| -> Result<TransferOutcome> {
            if let Some(sent) = completed_replay(conn, from_user, &meta)? {
                let received = match sent.counterpart_id {
                    Some(id) => transactions::get(conn, &id)?,
                    None => None,
                }
                .ok_or_else(|| {
                    LedgerError::Storage(quill_db::DbError::Corrupt(format!(
                        "tip {} has no counterpart leg",
                        sent.id
                    )))
                })?;
                return Ok(TransferOutcome::Replayed(TipReceipt { sent, received }));
            }

            balances::ensure(conn, from_user, now)?;
            balances::ensure(conn, to_user, now)?;

            let mut sent = pending_transaction(*from_user, TransactionType::Tip, -coins, &meta, now);
            let mut received = pending_transaction(*to_user, TransactionType::Tip, coins, &meta, now);
            received.external_transaction_id = None;
            sent.counterpart_id = Some(received.id);
            received.counterpart_id = Some(sent.id);
            transactions::insert(conn, &sent)?;
            transactions::insert(conn, &received)?;

            if !balances::try_debit(conn, from_user, amount, now)? {
                transactions::mark_failed(conn, &sent.id, "insufficient funds", now)?;
                transactions::mark_failed(conn, &received.id, "sender had insufficient funds", now)?;
                let available = balances::fetch(conn, from_user)?.map_or(0, |b| b.balance);
                return Ok(TransferOutcome::Rejected { available });
            }
            if !balances::credit(conn, to_user, amount, now)? {
                return Err(LedgerError::overflow(amount));
            }

            transactions::mark_completed(conn, &sent.id, now)?;
            transactions::mark_completed(conn, &received.id, now)?;
            complete(&mut sent, now);
            complete(&mut received, now);
            Ok(TransferOutcome::Posted(TipReceipt { sent, received }))
        })?;

        match outcome {
            TransferOutcome::Posted(receipt) => {
                tracing::info!(
                    from = %from_user,
                    to = %to_user,
                    amount,
                    sent_tx = %receipt.sent.id,
                    received_tx = %receipt.received.id,
                    "tip transferred"
                );
                Ok(receipt)
            }
            TransferOutcome::Replayed(receipt) => {
                tracing::info!(from = %from_user, sent_tx = %receipt.sent.id, "duplicate tip replayed");
                Ok(receipt)
            }
            TransferOutcome::Rejected { available } => {
                tracing::warn!(from = %from_user, to = %to_user, required = amount, available, "tip rejected");
                Err(LedgerError::insufficient(*from_user, amount, available))
            }
        }
    }
}
