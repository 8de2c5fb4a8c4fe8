//! Access command handlers: access checks, content purchases, and the
//! subscription and content mirrors.

use std::sync::Arc;

use quill_types::content::{ContentType, Subscription};
use quill_types::{ContentId, UserId};
use serde::Deserialize;
use serde_json::Value;

use super::{blocking, parse, Result};
use crate::DaemonState;

#[derive(Deserialize)]
struct ContentParams {
    user_id: UserId,
    content_id: ContentId,
    content_type: ContentType,
}

#[derive(Deserialize)]
struct SubscriptionParams {
    user_id: UserId,
    #[serde(flatten)]
    subscription: Subscription,
}

#[derive(Deserialize)]
struct RegisterParams {
    content_id: ContentId,
    writer_id: UserId,
    content_type: ContentType,
}

pub async fn check_access(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: ContentParams = parse(params)?;
    let state = state.clone();
    blocking(move || Ok(state.access.check_access(&p.user_id, &p.content_id, p.content_type)?)).await
}

pub async fn purchase_content(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: ContentParams = parse(params)?;
    let state = state.clone();
    blocking(move || Ok(state.access.purchase(&p.user_id, &p.content_id, p.content_type)?)).await
}

/// Mirror a subscription change pushed by the user service.
pub async fn set_subscription(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: SubscriptionParams = parse(params)?;
    let state = state.clone();
    blocking(move || {
        state.subscriptions.set(&p.user_id, &p.subscription)?;
        Ok(p.subscription)
    })
    .await
}

/// Mirror content ownership pushed by the content service.
pub async fn register_content(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: RegisterParams = parse(params)?;
    let state = state.clone();
    blocking(move || {
        state
            .directory
            .register(&p.content_id, &p.writer_id, p.content_type)?;
        Ok(serde_json::json!({ "registered": true }))
    })
    .await
}
