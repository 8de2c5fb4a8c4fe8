//! Payout request lifecycle: `pending → completed | failed`.

use std::sync::Arc;

use quill_db::queries::{payouts, splits};
use quill_db::Db;
use quill_ledger::Ledger;
use quill_types::payout::{PayoutRequest, PayoutStatus};
use quill_types::{Clock, Decimal, PayoutId, UserId, BASE_CURRENCY};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{PayoutError, Result};

fn default_minimum_payout() -> Decimal {
    Decimal::new(10_00, 2)
}

/// Payout settings (`[payout]` in the daemon config).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PayoutConfig {
    /// Smallest amount a writer may request, in USD.
    #[serde(default = "default_minimum_payout")]
    pub minimum_payout: Decimal,
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            minimum_payout: default_minimum_payout(),
        }
    }
}

/// The disbursement provider (bank transfer, PayPal, ...).
pub trait Disburser: Send + Sync {
    /// Send `amount` to `destination`. Returns the provider's payout id.
    fn disburse(
        &self,
        amount: Decimal,
        currency: &str,
        destination: &serde_json::Value,
    ) -> std::result::Result<String, String>;
}

/// Creates and settles payout requests.
#[derive(Clone)]
pub struct PayoutProcessor {
    db: Db,
    ledger: Ledger,
    clock: Arc<dyn Clock>,
    config: PayoutConfig,
}

impl PayoutProcessor {
    pub fn new(db: Db, ledger: Ledger, clock: Arc<dyn Clock>, config: PayoutConfig) -> Self {
        Self {
            db,
            ledger,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &PayoutConfig {
        &self.config
    }

    /// Earned minus paid out minus reserved by pending requests, never negative.
    pub fn available_for_payout(&self, writer_id: &UserId) -> Result<Decimal> {
        self.db
            .with_conn(|conn| available_in(conn, writer_id))
    }

    /// File a payout request.
    ///
    /// The solvency check and the insert share one storage transaction, so
    /// concurrent requests cannot reserve more than was earned. A replayed
    /// idempotency key returns the original request.
    pub fn request_payout(
        &self,
        writer_id: &UserId,
        amount: Decimal,
        currency: &str,
        payment_details: serde_json::Value,
        idempotency_key: Option<String>,
    ) -> Result<PayoutRequest> {
        if amount <= Decimal::ZERO {
            return Err(PayoutError::InvalidAmount(amount));
        }
        if amount < self.config.minimum_payout {
            return Err(PayoutError::BelowMinimum {
                amount,
                minimum: self.config.minimum_payout,
            });
        }
        let currency = currency.trim().to_ascii_uppercase();
        if currency != BASE_CURRENCY {
            return Err(PayoutError::UnsupportedCurrency(currency));
        }
        let now = self.clock.now();

        let (request, replayed) = self.db.with_tx(|conn| -> Result<(PayoutRequest, bool)> {
            if let Some(key) = idempotency_key.as_deref() {
                if let Some(existing) = payouts::find_by_idempotency_key(conn, writer_id, key)? {
                    return Ok((existing, true));
                }
            }
            let available = available_in(conn, writer_id)?;
            if amount > available {
                return Err(PayoutError::InsufficientEarnings {
                    requested: amount,
                    available,
                });
            }
            let request = PayoutRequest {
                id: Uuid::new_v4(),
                writer_id: *writer_id,
                amount,
                currency,
                payment_details,
                status: PayoutStatus::Pending,
                external_payout_id: None,
                idempotency_key: idempotency_key.clone(),
                failure_reason: None,
                created_at: now,
                processed_at: None,
            };
            payouts::insert(conn, &request)?;
            Ok((request, false))
        })
        .inspect_err(|e| {
            if let PayoutError::InsufficientEarnings { requested, available } = e {
                tracing::warn!(writer_id = %writer_id, %requested, %available, "payout request rejected");
            }
        })?;

        if replayed {
            tracing::info!(payout_id = %request.id, "duplicate payout request replayed");
        } else {
            tracing::info!(payout_id = %request.id, writer_id = %writer_id, %amount, "payout requested");
        }
        Ok(request)
    }

    /// Mark a pending payout as paid and record it in the ledger.
    ///
    /// Re-processing a completed payout with the same external id succeeds
    /// without changes.
    pub fn process(&self, payout_id: &PayoutId, external_payout_id: &str) -> Result<PayoutRequest> {
        let now = self.clock.now();
        let request = self.db.with_tx(|conn| -> Result<PayoutRequest> {
            let request = payouts::get(conn, payout_id)?.ok_or(PayoutError::NotFound(*payout_id))?;
            match request.status {
                PayoutStatus::Pending => {
                    payouts::mark_completed(conn, payout_id, Some(external_payout_id), now)?;
                    Ok(PayoutRequest {
                        status: PayoutStatus::Completed,
                        external_payout_id: Some(external_payout_id.to_string()),
                        processed_at: Some(now),
                        ..request
                    })
                }
                PayoutStatus::Completed
                    if request.external_payout_id.as_deref() == Some(external_payout_id) =>
                {
                    Ok(request)
                }
                status => Err(PayoutError::InvalidState {
                    id: *payout_id,
                    status,
                }),
            }
        })?;

        // Keyed by payout id: re-processing records it once.
        self.ledger.record_payout(
            &request.writer_id,
            request.amount,
            &request.currency,
            Some(format!("payout:{}", request.id)),
        )?;
        tracing::info!(payout_id = %payout_id, external_payout_id, amount = %request.amount, "payout completed");
        Ok(request)
    }

    /// Mark a pending payout as failed, releasing its reservation.
    pub fn fail(&self, payout_id: &PayoutId, reason: &str) -> Result<PayoutRequest> {
        let now = self.clock.now();
        let request = self.db.with_tx(|conn| -> Result<PayoutRequest> {
            let request = payouts::get(conn, payout_id)?.ok_or(PayoutError::NotFound(*payout_id))?;
            if request.status != PayoutStatus::Pending {
                return Err(PayoutError::InvalidState {
                    id: *payout_id,
                    status: request.status,
                });
            }
            payouts::mark_failed(conn, payout_id, reason, now)?;
            Ok(PayoutRequest {
                status: PayoutStatus::Failed,
                failure_reason: Some(reason.to_string()),
                processed_at: Some(now),
                ..request
            })
        })?;
        tracing::warn!(payout_id = %payout_id, reason, "payout failed");
        Ok(request)
    }

    /// Send a pending payout through `disburser` and settle it.
    pub fn disburse(&self, payout_id: &PayoutId, disburser: &dyn Disburser) -> Result<PayoutRequest> {
        let request = self.get(payout_id)?.ok_or(PayoutError::NotFound(*payout_id))?;
        if request.status != PayoutStatus::Pending {
            return Err(PayoutError::InvalidState {
                id: *payout_id,
                status: request.status,
            });
        }

        match disburser.disburse(request.amount, &request.currency, &request.payment_details) {
            Ok(external_id) => self.process(payout_id, &external_id),
            Err(reason) => {
                self.fail(payout_id, &reason)?;
                Err(PayoutError::Disbursement(reason))
            }
        }
    }

    pub fn get(&self, payout_id: &PayoutId) -> Result<Option<PayoutRequest>> {
        self.db
            .with_conn(|conn| payouts::get(conn, payout_id).map_err(PayoutError::from))
    }

    /// A writer's requests, newest first.
    pub fn list_for_writer(&self, writer_id: &UserId, limit: u32) -> Result<Vec<PayoutRequest>> {
        self.db.with_conn(|conn| {
            payouts::list_for_writer(conn, writer_id, limit).map_err(PayoutError::from)
        })
    }

    /// Requests awaiting disbursement, oldest first.
    pub fn list_pending(&self, limit: u32) -> Result<Vec<PayoutRequest>> {
        self.db
            .with_conn(|conn| payouts::list_pending(conn, limit).map_err(PayoutError::from))
    }
}

fn available_in(conn: &Connection, writer_id: &UserId) -> Result<Decimal> {
    let earned = splits::total_earned(conn, writer_id)?;
    let paid = payouts::sum_by_status(conn, writer_id, PayoutStatus::Completed)?;
    let reserved = payouts::sum_by_status(conn, writer_id, PayoutStatus::Pending)?;
    Ok((earned - paid - reserved).max(Decimal::ZERO))
}
