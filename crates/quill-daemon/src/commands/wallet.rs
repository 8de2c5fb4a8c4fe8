//! Wallet command handlers: balances, history, coin packages, spends, tips
//! and fiat records.

use std::sync::Arc;

use quill_exchange::ExchangeRate;
use quill_ledger::TransactionMeta;
use quill_types::ledger::{CoinPackage, TransactionType};
use quill_types::{ContentId, Decimal, UserId};
use serde::Deserialize;
use serde_json::Value;

use super::{blocking, default_limit, parse, Result};
use crate::rpc::RpcError;
use crate::DaemonState;

#[derive(Deserialize)]
struct UserParams {
    user_id: UserId,
}

#[derive(Deserialize)]
struct HistoryParams {
    user_id: UserId,
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    offset: u32,
}

#[derive(Deserialize)]
struct PackageListParams {
    #[serde(default = "default_active_only")]
    active_only: bool,
}

fn default_active_only() -> bool {
    true
}

#[derive(Deserialize)]
struct CoinPurchaseParams {
    user_id: UserId,
    package_id: String,
    /// Payment gateway charge id.
    external_transaction_id: String,
}

#[derive(Deserialize)]
struct SpendParams {
    user_id: UserId,
    amount: u64,
    #[serde(default)]
    content_id: Option<ContentId>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    idempotency_key: Option<String>,
}

#[derive(Deserialize)]
struct TipParams {
    from_user_id: UserId,
    to_user_id: UserId,
    amount: u64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    idempotency_key: Option<String>,
}

#[derive(Deserialize)]
struct FindParams {
    user_id: UserId,
    idempotency_key: String,
}

#[derive(Deserialize)]
struct SubscriptionPaymentParams {
    user_id: UserId,
    amount: Decimal,
    currency: String,
    #[serde(default)]
    external_transaction_id: Option<String>,
}

pub async fn get_balance(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: UserParams = parse(params)?;
    let state = state.clone();
    blocking(move || Ok(state.ledger.get_balance(&p.user_id)?)).await
}

/// Newest first; page with `limit` and `offset`.
pub async fn get_history(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: HistoryParams = parse(params)?;
    let state = state.clone();
    blocking(move || Ok(state.ledger.history(&p.user_id, p.limit, p.offset)?)).await
}

pub async fn list_coin_packages(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: PackageListParams = parse(params)?;
    let state = state.clone();
    blocking(move || Ok(state.ledger.list_packages(p.active_only)?)).await
}

pub async fn upsert_coin_package(state: &Arc<DaemonState>, params: Value) -> Result {
    let package: CoinPackage = parse(params)?;
    let state = state.clone();
    blocking(move || {
        state.ledger.upsert_package(&package)?;
        Ok(package)
    })
    .await
}

/// Credit a coin package after the gateway confirmed the charge.
pub async fn complete_coin_purchase(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: CoinPurchaseParams = parse(params)?;
    let state = state.clone();
    blocking(move || {
        Ok(state
            .ledger
            .purchase_package(&p.user_id, &p.package_id, &p.external_transaction_id)?)
    })
    .await
}

/// A generic coin spend. Content unlocks go through `purchase_content`, so a
/// spend naming a content id is refused.
pub async fn spend_coins(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: SpendParams = parse(params)?;
    if let Some(content_id) = p.content_id {
        return Err(RpcError::invalid_params(&format!(
            "content {content_id} must be unlocked with purchase_content"
        )));
    }
    let state = state.clone();
    blocking(move || {
        let mut meta = TransactionMeta::default();
        if let Some(description) = p.description {
            meta = meta.with_description(description);
        }
        if let Some(key) = p.idempotency_key {
            meta = meta.with_idempotency_key(key);
        }
        Ok(state
            .ledger
            .debit(&p.user_id, p.amount, TransactionType::CoinSpend, meta)?)
    })
    .await
}

pub async fn send_tip(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: TipParams = parse(params)?;
    let state = state.clone();
    blocking(move || {
        Ok(state.ledger.transfer(
            &p.from_user_id,
            &p.to_user_id,
            p.amount,
            p.message,
            p.idempotency_key,
        )?)
    })
    .await
}

/// Status check after a client timeout. Returns `null` when nothing was posted.
pub async fn find_transaction(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: FindParams = parse(params)?;
    let state = state.clone();
    blocking(move || {
        Ok(state
            .ledger
            .find_by_idempotency_key(&p.user_id, &p.idempotency_key)?)
    })
    .await
}

pub async fn record_subscription_payment(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: SubscriptionPaymentParams = parse(params)?;
    let state = state.clone();
    blocking(move || {
        Ok(state.ledger.record_subscription_payment(
            &p.user_id,
            p.amount,
            &p.currency,
            p.external_transaction_id,
        )?)
    })
    .await
}

/// Accept a quote from the external rate feed.
pub async fn update_exchange_rate(state: &Arc<DaemonState>, params: Value) -> Result {
    let mut rate: ExchangeRate = parse(params)?;
    rate.currency = quill_exchange::normalize_currency(&rate.currency);
    if rate.currency.is_empty() {
        return Err(RpcError::invalid_params("currency required"));
    }
    let state = state.clone();
    blocking(move || {
        state.rates.publish(&rate)?;
        state.converter.invalidate(Some(rate.currency.as_str()));
        Ok(rate)
    })
    .await
}
