//! Licensing workflow command handlers.

use std::sync::Arc;

use quill_licensing::{
    DisputeResolution, DisputeType, LicensingTerms, ProgressStatus, StepKind,
};
use quill_types::{AgreementId, Decimal, UserId, WorkflowId};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use super::{blocking, parse, Result};
use crate::DaemonState;

#[derive(Deserialize)]
struct CreateParams {
    agreement_id: AgreementId,
    studio_id: UserId,
    writer_id: UserId,
    terms: LicensingTerms,
}

#[derive(Deserialize)]
struct WorkflowParams {
    workflow_id: WorkflowId,
}

#[derive(Deserialize)]
struct StepParams {
    workflow_id: WorkflowId,
    step: StepKind,
    status: ProgressStatus,
}

#[derive(Deserialize)]
struct MilestoneParams {
    workflow_id: WorkflowId,
    milestone_id: String,
    status: ProgressStatus,
    #[serde(default)]
    performance_data: Option<Value>,
}

#[derive(Deserialize)]
struct RoyaltyParams {
    workflow_id: WorkflowId,
    reference: String,
    /// In the deal currency.
    amount: Decimal,
}

#[derive(Deserialize)]
struct DisputeParams {
    workflow_id: WorkflowId,
    dispute_type: DisputeType,
    description: String,
    raised_by: UserId,
}

#[derive(Deserialize)]
struct ResolveParams {
    workflow_id: WorkflowId,
    dispute_id: Uuid,
    resolution: DisputeResolution,
    #[serde(default)]
    notes: Option<String>,
}

pub async fn create_workflow(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: CreateParams = parse(params)?;
    let state = state.clone();
    blocking(move || {
        Ok(state
            .licensing
            .create_workflow(p.agreement_id, p.studio_id, p.writer_id, p.terms)?)
    })
    .await
}

pub async fn activate_workflow(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: WorkflowParams = parse(params)?;
    let state = state.clone();
    blocking(move || Ok(state.licensing.activate(&p.workflow_id)?)).await
}

pub async fn update_workflow_step(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: StepParams = parse(params)?;
    let state = state.clone();
    blocking(move || Ok(state.licensing.advance_step(&p.workflow_id, p.step, p.status)?)).await
}

pub async fn update_milestone(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: MilestoneParams = parse(params)?;
    let state = state.clone();
    blocking(move || {
        Ok(state.licensing.advance_milestone(
            &p.workflow_id,
            &p.milestone_id,
            p.status,
            p.performance_data,
        )?)
    })
    .await
}

pub async fn distribute_royalties(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: RoyaltyParams = parse(params)?;
    let state = state.clone();
    blocking(move || {
        Ok(state
            .licensing
            .distribute_royalties(&p.workflow_id, &p.reference, p.amount)?)
    })
    .await
}

pub async fn raise_dispute(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: DisputeParams = parse(params)?;
    let state = state.clone();
    blocking(move || {
        Ok(state
            .licensing
            .raise_dispute(&p.workflow_id, p.dispute_type, p.description, p.raised_by)?)
    })
    .await
}

pub async fn resolve_dispute(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: ResolveParams = parse(params)?;
    let state = state.clone();
    blocking(move || {
        Ok(state
            .licensing
            .resolve_dispute(&p.workflow_id, &p.dispute_id, p.resolution, p.notes)?)
    })
    .await
}

pub async fn workflow_status(state: &Arc<DaemonState>, params: Value) -> Result {
    let p: WorkflowParams = parse(params)?;
    let state = state.clone();
    blocking(move || Ok(state.licensing.status(&p.workflow_id)?)).await
}
