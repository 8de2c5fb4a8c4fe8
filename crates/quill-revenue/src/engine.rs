//! Revenue engine: distributes content purchases and licensing payments and
//! keeps writer earnings.

use std::sync::Arc;

use quill_db::queries::{distributions, payouts, splits, transactions};
use quill_db::Db;
use quill_exchange::CurrencyConverter;
use quill_types::ledger::{Transaction, TransactionStatus, TransactionType};
use quill_types::payout::PayoutStatus;
use quill_types::revenue::{RevenueEventType, RevenueSplit, SplitSource, WriterEarnings};
use quill_types::{Clock, TransactionId, UserId, WorkflowId};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::pool::EngagementScorer;
use crate::splits::SplitTable;
use crate::{Result, RevenueError};

/// Outcome of a reconciliation pass over queued content purchases.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub distributed: usize,
    pub still_pending: usize,
}

/// Splits revenue and credits earnings. Cheap to clone.
#[derive(Clone)]
pub struct RevenueEngine {
    pub(crate) db: Db,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) converter: Arc<CurrencyConverter>,
    pub(crate) table: SplitTable,
    pub(crate) scorer: Arc<dyn EngagementScorer>,
}

impl RevenueEngine {
    pub fn new(
        db: Db,
        clock: Arc<dyn Clock>,
        converter: Arc<CurrencyConverter>,
        table: SplitTable,
        scorer: Arc<dyn EngagementScorer>,
    ) -> Self {
        Self {
            db,
            clock,
            converter,
            table,
            scorer,
        }
    }

    pub fn split_table(&self) -> &SplitTable {
        &self.table
    }

    /// Compute, without saving, the split of `gross` USD.
    pub fn calculate_split(&self, event_type: RevenueEventType, gross: Decimal) -> Result<RevenueSplit> {
        self.table.calculate(event_type, gross, self.clock.now())
    }

    /// Split a completed coin spend on `writer_id`'s content.
    ///
    /// Idempotent per transaction: a second call returns the stored split.
    pub fn distribute_content_purchase(
        &self,
        transaction: &Transaction,
        writer_id: &UserId,
    ) -> Result<RevenueSplit> {
        if transaction.tx_type != TransactionType::CoinSpend
            || transaction.status != TransactionStatus::Completed
            || transaction.coin_amount >= 0
        {
            return Err(RevenueError::NotDistributable(transaction.id.to_string()));
        }
        let gross = self.converter.coins_to_usd(transaction.coins())?;
        let mut split = self.calculate_split(RevenueEventType::CoinPurchase, gross)?;
        split.source = SplitSource::Transaction {
            transaction_id: transaction.id,
        };
        split.writer_id = Some(*writer_id);
        let now = split.created_at;

        let (split, replayed) = self.db.with_tx(|conn| -> Result<(RevenueSplit, bool)> {
            let stored = splits::find_by_transaction(conn, &transaction.id)?;
            let replayed = stored.is_some();
            let split = match stored {
                Some(existing) => existing,
                None => {
                    record_split(conn, &split, now)?;
                    split
                }
            };
            distributions::remove_pending(conn, &transaction.id)?;
            Ok((split, replayed))
        })?;

        if replayed {
            tracing::debug!(tx_id = %transaction.id, split_id = %split.id, "content purchase already distributed");
        } else {
            tracing::info!(
                tx_id = %transaction.id,
                writer_id = %writer_id,
                gross = %split.gross_amount,
                writer_share = %split.writer_share,
                platform_share = %split.platform_share,
                "content purchase distributed"
            );
        }
        Ok(split)
    }

    /// Split a licensing payment of `gross_usd`.
    ///
    /// `reference` names the payment within the workflow (a milestone id or a
    /// royalty reference). Idempotent per `(workflow_id, reference)`.
    pub fn distribute_licensing(
        &self,
        workflow_id: &WorkflowId,
        reference: &str,
        writer_id: &UserId,
        studio_id: Option<&UserId>,
        gross_usd: Decimal,
    ) -> Result<RevenueSplit> {
        let mut split = self.calculate_split(RevenueEventType::Licensing, gross_usd)?;
        split.source = SplitSource::Workflow {
            workflow_id: *workflow_id,
            reference: reference.to_string(),
        };
        split.writer_id = Some(*writer_id);
        split.studio_id = studio_id.copied();
        if split.studio_id.is_none() {
            if let Some(orphaned) = split.studio_share.take() {
                split.platform_share += orphaned;
            }
        }
        let now = split.created_at;

        let split = self.db.with_tx(|conn| -> Result<RevenueSplit> {
            if let Some(existing) = splits::find_by_workflow_reference(conn, workflow_id, reference)? {
                return Ok(existing);
            }
            record_split(conn, &split, now)?;
            Ok(split)
        })?;

        tracing::info!(
            workflow_id = %workflow_id,
            reference,
            gross = %split.gross_amount,
            writer_share = %split.writer_share,
            "licensing payment distributed"
        );
        Ok(split)
    }

    /// Earned, paid and reserved USD for a writer.
    pub fn writer_earnings(&self, writer_id: &UserId) -> Result<WriterEarnings> {
        self.db.with_conn(|conn| -> Result<WriterEarnings> {
            Ok(WriterEarnings {
                writer_id: *writer_id,
                total_earned: splits::total_earned(conn, writer_id)?,
                paid_out: payouts::sum_by_status(conn, writer_id, PayoutStatus::Completed)?,
                pending_payout: payouts::sum_by_status(conn, writer_id, PayoutStatus::Pending)?,
            })
        })
    }

    /// A writer's splits, newest first.
    pub fn splits_for_writer(&self, writer_id: &UserId, limit: u32) -> Result<Vec<RevenueSplit>> {
        self.db.with_conn(|conn| {
            splits::list_for_writer(conn, writer_id, limit).map_err(RevenueError::from)
        })
    }

    pub fn splits_for_workflow(&self, workflow_id: &WorkflowId) -> Result<Vec<RevenueSplit>> {
        self.db.with_conn(|conn| {
            splits::list_for_workflow(conn, workflow_id).map_err(RevenueError::from)
        })
    }

    /// Park a committed coin spend whose distribution failed.
    pub fn queue_reconciliation(
        &self,
        transaction_id: &TransactionId,
        writer_id: &UserId,
        reason: &str,
    ) -> Result<()> {
        let now = self.clock.now();
        self.db.with_conn(|conn| {
            distributions::queue_pending(conn, transaction_id, writer_id, reason, now)
                .map_err(RevenueError::from)
        })?;
        tracing::warn!(tx_id = %transaction_id, writer_id = %writer_id, reason, "distribution queued for reconciliation");
        Ok(())
    }

    /// Retry up to `limit` queued content purchase distributions.
    pub fn reconcile_pending(&self, limit: u32) -> Result<ReconcileReport> {
        let queued = self
            .db
            .with_conn(|conn| distributions::list_pending(conn, limit).map_err(RevenueError::from))?;

        let mut report = ReconcileReport::default();
        for entry in queued {
            let outcome = self
                .db
                .with_conn(|conn| transactions::get(conn, &entry.transaction_id).map_err(RevenueError::from))
                .and_then(|tx| {
                    tx.ok_or_else(|| RevenueError::NotDistributable(entry.transaction_id.to_string()))
                })
                .and_then(|tx| self.distribute_content_purchase(&tx, &entry.writer_id));

            match outcome {
                Ok(_) => report.distributed += 1,
                Err(e) => {
                    tracing::warn!(tx_id = %entry.transaction_id, attempts = entry.attempts + 1, error = %e, "reconciliation attempt failed");
                    self.db.with_conn(|conn| {
                        distributions::record_attempt(conn, &entry.transaction_id, &e.to_string())
                            .map_err(RevenueError::from)
                    })?;
                    report.still_pending += 1;
                }
            }
        }
        if report.distributed + report.still_pending > 0 {
            tracing::info!(distributed = report.distributed, still_pending = report.still_pending, "reconciliation pass finished");
        }
        Ok(report)
    }
}

/// Insert a split and credit its writer and studio earnings.
pub(crate) fn record_split(conn: &Connection, split: &RevenueSplit, now: u64) -> Result<()> {
    splits::insert(conn, split)?;
    if let Some(writer_id) = split.writer_id {
        if split.writer_share > Decimal::ZERO {
            splits::add_earnings(conn, &writer_id, split.writer_share, now)?;
        }
    }
    if let (Some(studio_id), Some(studio_share)) = (split.studio_id, split.studio_share) {
        if studio_share > Decimal::ZERO {
            splits::add_earnings(conn, &studio_id, studio_share, now)?;
        }
    }
    Ok(())
}
