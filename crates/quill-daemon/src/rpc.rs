//! JSON-RPC server over Unix socket.
//!
//! Listens on a Unix domain socket, accepts connections, and dispatches
//! newline-delimited JSON-RPC 2.0 calls to the command handlers. Domain
//! errors are mapped to error objects here, so handlers can use `?`.

use std::path::PathBuf;
use std::sync::Arc;

use quill_access::AccessError;
use quill_db::DbError;
use quill_exchange::ExchangeError;
use quill_ledger::LedgerError;
use quill_licensing::LicensingError;
use quill_payout::PayoutError;
use quill_revenue::RevenueError;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tracing::{debug, error, info, warn};

use crate::commands;
use crate::DaemonState;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    pub id: serde_json::Value,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcError {
    pub code: i32,
    /// Error name.
    pub message: String,
    /// Structured remediation data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcError {
    fn new(code: i32, message: &str, data: Option<serde_json::Value>) -> Self {
        Self {
            code,
            message: message.to_string(),
            data,
        }
    }

    // Standard JSON-RPC errors

    /// Parse error (-32700).
    pub fn parse_error() -> Self {
        Self::new(-32700, "PARSE_ERROR", None)
    }

    /// Invalid request (-32600).
    pub fn invalid_request() -> Self {
        Self::new(-32600, "INVALID_REQUEST", None)
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self::new(-32601, "METHOD_NOT_FOUND", Some(serde_json::json!({"method": method})))
    }

    /// Invalid params (-32602).
    pub fn invalid_params(detail: &str) -> Self {
        Self::new(-32602, "INVALID_PARAMS", Some(serde_json::json!({"detail": detail})))
    }

    /// Internal error (-32603).
    pub fn internal_error(detail: &str) -> Self {
        Self::new(-32603, "INTERNAL_ERROR", Some(serde_json::json!({"detail": detail})))
    }

    // Domain errors

    /// Not found (-32004).
    pub fn not_found(detail: &str) -> Self {
        Self::new(-32004, "NOT_FOUND", Some(serde_json::json!({"detail": detail})))
    }

    /// The operation conflicts with the current state (-32009).
    pub fn conflict(detail: &str, retryable: bool) -> Self {
        Self::new(
            -32009,
            "CONFLICT",
            Some(serde_json::json!({"detail": detail, "retryable": retryable})),
        )
    }

    /// Insufficient coins (-32040).
    pub fn insufficient_coins(required: u64, available: u64, shortfall: u64) -> Self {
        Self::new(
            -32040,
            "INSUFFICIENT_COINS",
            Some(serde_json::json!({
                "required_coins": required,
                "user_balance": available,
                "coins_needed": shortfall,
            })),
        )
    }

    /// Insufficient earnings for a payout (-32041).
    pub fn insufficient_earnings(requested: &str, available: &str) -> Self {
        Self::new(
            -32041,
            "INSUFFICIENT_EARNINGS",
            Some(serde_json::json!({"requested": requested, "available": available})),
        )
    }

    /// No usable exchange rate (-32050).
    pub fn rate_unavailable(currency: &str, reason: &str) -> Self {
        Self::new(
            -32050,
            "RATE_UNAVAILABLE",
            Some(serde_json::json!({"currency": currency, "reason": reason, "retryable": true})),
        )
    }

    /// Storage failure (-32051).
    pub fn storage(detail: &str, retryable: bool) -> Self {
        Self::new(
            -32051,
            "STORAGE_ERROR",
            Some(serde_json::json!({"detail": detail, "retryable": retryable})),
        )
    }
}

impl From<DbError> for RpcError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what) => RpcError::not_found(&what),
            other => RpcError::storage(&other.to_string(), other.is_retryable()),
        }
    }
}

impl From<ExchangeError> for RpcError {
    fn from(e: ExchangeError) -> Self {
        match e {
            ExchangeError::RateUnavailable { currency, reason } => {
                RpcError::rate_unavailable(&currency, &reason)
            }
            ExchangeError::Storage(db) => db.into(),
            other => RpcError::invalid_params(&other.to_string()),
        }
    }
}

impl From<LedgerError> for RpcError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds {
                required,
                available,
                shortfall,
                ..
            } => RpcError::insufficient_coins(required, available, shortfall),
            LedgerError::PackageNotFound(id) => RpcError::not_found(&format!("coin package {id}")),
            LedgerError::InFlight(_) => RpcError::conflict(&e.to_string(), true),
            LedgerError::IdempotencyConflict(_) => RpcError::conflict(&e.to_string(), false),
            LedgerError::Storage(db) => db.into(),
            other => RpcError::invalid_params(&other.to_string()),
        }
    }
}

impl From<RevenueError> for RpcError {
    fn from(e: RevenueError) -> Self {
        match e {
            RevenueError::Exchange(x) => x.into(),
            RevenueError::Storage(db) => db.into(),
            RevenueError::PoolRunInProgress { .. } => RpcError::conflict(&e.to_string(), true),
            RevenueError::NotDistributable(_) => RpcError::conflict(&e.to_string(), false),
            RevenueError::InvalidSplitConfiguration(_) | RevenueError::Overflow => {
                RpcError::internal_error(&e.to_string())
            }
            other => RpcError::invalid_params(&other.to_string()),
        }
    }
}

impl From<PayoutError> for RpcError {
    fn from(e: PayoutError) -> Self {
        match e {
            PayoutError::InsufficientEarnings {
                requested,
                available,
            } => RpcError::insufficient_earnings(&requested.to_string(), &available.to_string()),
            PayoutError::NotFound(id) => RpcError::not_found(&format!("payout {id}")),
            PayoutError::InvalidState { .. } => RpcError::conflict(&e.to_string(), false),
            PayoutError::Disbursement(_) => RpcError::conflict(&e.to_string(), true),
            PayoutError::Ledger(l) => l.into(),
            PayoutError::Storage(db) => db.into(),
            other => RpcError::invalid_params(&other.to_string()),
        }
    }
}

impl From<AccessError> for RpcError {
    fn from(e: AccessError) -> Self {
        match e {
            AccessError::InsufficientFunds {
                required,
                available,
                shortfall,
                ..
            } => RpcError::insufficient_coins(required, available, shortfall),
            AccessError::UnknownContent(id) => RpcError::not_found(&format!("content {id}")),
            AccessError::Ledger(l) => l.into(),
            AccessError::Storage(db) => db.into(),
            other => RpcError::invalid_params(&other.to_string()),
        }
    }
}

impl From<LicensingError> for RpcError {
    fn from(e: LicensingError) -> Self {
        match e {
            LicensingError::NotFound(_)
            | LicensingError::UnknownMilestone { .. }
            | LicensingError::UnknownDispute { .. } => RpcError::not_found(&e.to_string()),
            LicensingError::AgreementExists(_) | LicensingError::InvalidTransition { .. } => {
                RpcError::conflict(&e.to_string(), false)
            }
            LicensingError::Revenue(r) => r.into(),
            LicensingError::Exchange(x) => x.into(),
            LicensingError::Payout(p) => p.into(),
            LicensingError::Storage(db) => db.into(),
            LicensingError::Document(_) => RpcError::internal_error(&e.to_string()),
            other => RpcError::invalid_params(&other.to_string()),
        }
    }
}

/// The RPC server.
pub struct RpcServer {
    state: Arc<DaemonState>,
    socket_path: PathBuf,
}

impl RpcServer {
    pub fn new(state: Arc<DaemonState>, socket_path: PathBuf) -> Self {
        Self { state, socket_path }
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) -> anyhow::Result<()> {
        // Remove stale socket file
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        info!(path = ?self.socket_path, "IPC server listening");

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            warn!(error = %e, "connection error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept error");
                }
            }
        }
    }
}

/// Handle a single client connection.
async fn handle_connection(
    state: Arc<DaemonState>,
    stream: tokio::net::UnixStream,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break; // EOF
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => dispatch_request(state.clone(), request).await,
            Err(_) => RpcResponse::error(serde_json::Value::Null, RpcError::parse_error()),
        };

        let mut response_json = serde_json::to_string(&response)?;
        response_json.push('\n');
        writer.write_all(response_json.as_bytes()).await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Dispatch a JSON-RPC request to the appropriate command handler.
pub async fn dispatch_request(state: Arc<DaemonState>, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    if request.jsonrpc != "2.0" {
        return RpcResponse::error(id, RpcError::invalid_request());
    }
    let method = request.method.as_str();
    let params = request.params;

    debug!(method, "dispatching RPC method");

    let result = match method {
        // Wallet
        "get_balance" => commands::wallet::get_balance(&state, params).await,
        "get_history" => commands::wallet::get_history(&state, params).await,
        "list_coin_packages" => commands::wallet::list_coin_packages(&state, params).await,
        "upsert_coin_package" => commands::wallet::upsert_coin_package(&state, params).await,
        "complete_coin_purchase" => commands::wallet::complete_coin_purchase(&state, params).await,
        "spend_coins" => commands::wallet::spend_coins(&state, params).await,
        "send_tip" => commands::wallet::send_tip(&state, params).await,
        "find_transaction" => commands::wallet::find_transaction(&state, params).await,
        "record_subscription_payment" => {
            commands::wallet::record_subscription_payment(&state, params).await
        }
        "update_exchange_rate" => commands::wallet::update_exchange_rate(&state, params).await,

        // Access
        "check_access" => commands::access::check_access(&state, params).await,
        "purchase_content" => commands::access::purchase_content(&state, params).await,
        "set_subscription" => commands::access::set_subscription(&state, params).await,
        "register_content" => commands::access::register_content(&state, params).await,

        // Licensing workflows
        "create_workflow" => commands::workflow::create_workflow(&state, params).await,
        "activate_workflow" => commands::workflow::activate_workflow(&state, params).await,
        "update_workflow_step" => commands::workflow::update_workflow_step(&state, params).await,
        "update_milestone" => commands::workflow::update_milestone(&state, params).await,
        "distribute_royalties" => commands::workflow::distribute_royalties(&state, params).await,
        "raise_dispute" => commands::workflow::raise_dispute(&state, params).await,
        "resolve_dispute" => commands::workflow::resolve_dispute(&state, params).await,
        "workflow_status" => commands::workflow::workflow_status(&state, params).await,

        // Revenue and payouts
        "distribute_subscription_pool" => {
            commands::payout::distribute_subscription_pool(&state, params).await
        }
        "reconcile_distributions" => {
            commands::payout::reconcile_distributions(&state, params).await
        }
        "get_earnings" => commands::payout::get_earnings(&state, params).await,
        "request_payout" => commands::payout::request_payout(&state, params).await,
        "process_payout" => commands::payout::process_payout(&state, params).await,
        "fail_payout" => commands::payout::fail_payout(&state, params).await,
        "list_payouts" => commands::payout::list_payouts(&state, params).await,

        _ => Err(RpcError::method_not_found(method)),
    };

    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(err) => {
            debug!(method, code = err.code, message = %err.message, "RPC method failed");
            RpcResponse::error(id, err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_rpc_error_codes() {
        let err = RpcError::insufficient_coins(100, 40, 60);
        assert_eq!(err.code, -32040);
        let data = err.data.expect("data");
        assert_eq!(data["required_coins"], 100);
        assert_eq!(data["user_balance"], 40);
        assert_eq!(data["coins_needed"], 60);

        let err = RpcError::method_not_found("unknown");
        assert_eq!(err.code, -32601);
    }

    #[test]
    fn test_domain_error_mapping() {
        let err: RpcError = AccessError::InsufficientFunds {
            user_id: Uuid::nil(),
            required: 10,
            available: 3,
            shortfall: 7,
        }
        .into();
        assert_eq!(err.message, "INSUFFICIENT_COINS");

        let err: RpcError = DbError::Unavailable("busy".into()).into();
        assert_eq!(err.code, -32051);
        assert_eq!(err.data.expect("data")["retryable"], true);

        let err: RpcError = RevenueError::Exchange(ExchangeError::RateUnavailable {
            currency: "EUR".into(),
            reason: "no quote".into(),
        })
        .into();
        assert_eq!(err.message, "RATE_UNAVAILABLE");
    }

    #[test]
    fn test_rpc_response_success() {
        let resp = RpcResponse::success(serde_json::json!(1), serde_json::json!({"balance": 1000}));
        assert!(resp.result.is_some());
        assert!(resp.error.is_none());
    }

    fn test_state() -> Arc<DaemonState> {
        let db = quill_db::Db::open_memory().expect("open test db");
        let clock = Arc::new(quill_types::ManualClock::new(1_700_000_000));
        Arc::new(DaemonState::new(crate::config::DaemonConfig::default(), db, clock))
    }

    async fn call(state: &Arc<DaemonState>, method: &str, params: serde_json::Value) -> RpcResponse {
        let request = RpcRequest {
            jsonrpc: "2.0".into(),
            id: serde_json::json!(1),
            method: method.into(),
            params,
        };
        dispatch_request(state.clone(), request).await
    }

    #[tokio::test]
    async fn test_dispatch_rejects_bad_envelope() {
        let state = test_state();
        let resp = call(&state, "no_such_method", serde_json::Value::Null).await;
        assert_eq!(resp.error.expect("error").code, -32601);

        let request = RpcRequest {
            jsonrpc: "1.0".into(),
            id: serde_json::json!(7),
            method: "get_balance".into(),
            params: serde_json::Value::Null,
        };
        let resp = dispatch_request(state, request).await;
        assert_eq!(resp.error.expect("error").code, -32600);
    }

    #[tokio::test]
    async fn test_dispatch_purchase_flow() {
        let state = test_state();
        let reader = Uuid::new_v4();
        let writer = Uuid::new_v4();
        let chapter = Uuid::new_v4();
        let story = Uuid::new_v4();

        let resp = call(
            &state,
            "upsert_coin_package",
            serde_json::json!({
                "id": "starter",
                "name": "Starter",
                "coin_amount": 100,
                "bonus_percentage": 0,
                "base_price_usd": "0.99",
                "is_active": true,
            }),
        )
        .await;
        assert!(resp.error.is_none());

        let resp = call(
            &state,
            "complete_coin_purchase",
            serde_json::json!({
                "user_id": reader,
                "package_id": "starter",
                "external_transaction_id": "ch_1",
            }),
        )
        .await;
        assert!(resp.error.is_none());

        for (content, kind) in [(chapter, "chapter"), (story, "story")] {
            let resp = call(
                &state,
                "register_content",
                serde_json::json!({ "content_id": content, "writer_id": writer, "content_type": kind }),
            )
            .await;
            assert!(resp.error.is_none());
        }

        let resp = call(
            &state,
            "purchase_content",
            serde_json::json!({ "user_id": reader, "content_id": chapter, "content_type": "chapter" }),
        )
        .await;
        let result = resp.result.expect("purchase result");
        assert_eq!(result["success"], true);
        assert_eq!(result["new_balance"], 90);

        // 90 coins left; a story costs 100.
        let resp = call(
            &state,
            "purchase_content",
            serde_json::json!({ "user_id": reader, "content_id": story, "content_type": "story" }),
        )
        .await;
        let err = resp.error.expect("insufficient coins");
        assert_eq!(err.code, -32040);
        assert_eq!(err.data.expect("data")["coins_needed"], 10);

        // Neither a cheaper type nor a raw spend can unlock the story.
        let resp = call(
            &state,
            "purchase_content",
            serde_json::json!({ "user_id": reader, "content_id": story, "content_type": "chapter" }),
        )
        .await;
        assert_eq!(resp.error.expect("type mismatch").code, -32602);

        let resp = call(
            &state,
            "spend_coins",
            serde_json::json!({ "user_id": reader, "amount": 1, "content_id": story }),
        )
        .await;
        assert_eq!(resp.error.expect("content spend refused").code, -32602);

        let resp = call(&state, "get_balance", serde_json::json!({ "user_id": reader })).await;
        assert_eq!(resp.result.expect("balance")["balance"], 90);
    }
}
