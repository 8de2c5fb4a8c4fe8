//! Revenue and payout command handlers.

use std::sync::Arc;

use quill_types::{Decimal, PayoutId, UserId, BASE_CURRENCY};
use serde::Deserialize;
use serde_json::Value;

use super::{blocking, default_limit, parse, Result};
use crate::rpc::RpcError;
use crate::DaemonState;

#[derive(Deserialize)]
struct PeriodParams {
    period_start: u64,
    period_end: u64,
}

#[derive(Deserialize)]
struct ReconcileParams {
    #[serde(default = "default_limit")]
    limit: u32,
}

#[derive(Deserialize)]
struct WriterParams {
    writer_id: UserId,
    #[serde(default = "default_limit")]
    limit: u32,
}

#[derive(Deserialize)]
struct RequestParams {
    writer_id: UserId,
    amount: Decimal,
    #[serde(default = "default_currency")]
    currency: String,
    payment_details: Value,
    #[serde(default)]
    idempotency_key: Option<String>,
}

fn default_currency() -> String {
    BASE_CURRENCY.to_string()
}

#[derive(Deserialize)]
struct ProcessParams {
    payout_id: PayoutId,
    external_payout_id: String,
}

#[derive(Deserialize)]
struct FailParams {
    payout_id: PayoutId,
    reason: String,
}

/// Run the pool for an explicit period. The scheduler does the same for
/// each elapsed period.
pub async fn distribute_subscription_pool(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: PeriodParams = parse(params)?;
    let Some(_flight) = state.pool_job.try_start() else {
        return Err(RpcError::conflict("a pool distribution is already running", true));
    };
    let state = state.clone();
    blocking(move || {
        Ok(state
            .revenue
            .distribute_subscription_pool(p.period_start, p.period_end)?)
    })
    .await
}

pub async fn reconcile_distributions(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: ReconcileParams = parse(params)?;
    let state = state.clone();
    blocking(move || Ok(state.revenue.reconcile_pending(p.limit)?)).await
}

/// Earnings summary plus the latest splits.
pub async fn get_earnings(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: WriterParams = parse(params)?;
    let state = state.clone();
    blocking(move || {
        let earnings = state.revenue.writer_earnings(&p.writer_id)?;
        let splits = state.revenue.splits_for_writer(&p.writer_id, p.limit)?;
        Ok(serde_json::json!({
            "earnings": earnings,
            "available_for_payout": earnings.available_for_payout(),
            "recent_splits": splits,
        }))
    })
    .await
}

pub async fn request_payout(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: RequestParams = parse(params)?;
    let state = state.clone();
    blocking(move || {
        Ok(state.payouts.request_payout(
            &p.writer_id,
            p.amount,
            &p.currency,
            p.payment_details,
            p.idempotency_key,
        )?)
    })
    .await
}

/// The disbursement provider reported success.
pub async fn process_payout(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: ProcessParams = parse(params)?;
    let state = state.clone();
    blocking(move || Ok(state.payouts.process(&p.payout_id, &p.external_payout_id)?)).await
}

pub async fn fail_payout(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: FailParams = parse(params)?;
    let state = state.clone();
    blocking(move || Ok(state.payouts.fail(&p.payout_id, &p.reason)?)).await
}

pub async fn list_payouts(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: WriterParams = parse(params)?;
    let state = state.clone();
    blocking(move || Ok(state.payouts.list_for_writer(&p.writer_id, p.limit)?)).await
}
