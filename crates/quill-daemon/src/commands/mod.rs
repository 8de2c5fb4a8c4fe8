//! IPC command handlers.
//!
//! Each submodule implements the commands for one IPC category. Component
//! calls do blocking SQLite work, so handlers run them on the blocking pool.

pub mod access;
pub mod payout;
pub mod wallet;
pub mod workflow;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::rpc::RpcError;

pub type Result = std::result::Result<Value, RpcError>;

/// Deserialize a method's params object.
pub fn parse<T: DeserializeOwned>(params: Value) -> std::result::Result<T, RpcError> {
    serde_json::from_value(params).map_err(|e| RpcError::invalid_params(&e.to_string()))
}

/// Run blocking component work and serialize its result.
pub async fn blocking<T, F>(f: F) -> Result
where
    T: Serialize + Send + 'static,
    F: FnOnce() -> std::result::Result<T, RpcError> + Send + 'static,
{
    let value = tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RpcError::internal_error(&format!("worker task failed: {e}")))??;
    serde_json::to_value(value).map_err(|e| RpcError::internal_error(&e.to_string()))
}

fn default_limit() -> u32 {
    50
}
