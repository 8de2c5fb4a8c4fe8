//! The licensing workflow document and its state transitions.
//!
//! Everything here is pure: transitions mutate an in-memory workflow and
//! never touch storage or money. The engine loads a workflow, applies a
//! transition, performs any payment, then persists the result.

use std::collections::HashSet;
use std::fmt;

use quill_types::{AgreementId, UserId, WorkflowId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{LicensingError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    Active,
    Completed,
    Disputed,
    Terminated,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Draft => "draft",
            WorkflowStatus::Active => "active",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Disputed => "disputed",
            WorkflowStatus::Terminated => "terminated",
        }
    }

    /// `draft → active → completed`, `active → disputed`,
    /// `disputed → active | terminated`.
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (*self, next),
            (Draft, Active)
                | (Active, Completed)
                | (Active, Disputed)
                | (Disputed, Active)
                | (Disputed, Terminated)
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a step or a milestone. Only ever moves forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Pending,
    InProgress,
    Completed,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Pending => "pending",
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contract steps, in the order they must complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    ContractSigning,
    InitialPayment,
    DevelopmentApproval,
    RevenueDistribution,
}

impl StepKind {
    pub const ALL: [StepKind; 4] = [
        StepKind::ContractSigning,
        StepKind::InitialPayment,
        StepKind::DevelopmentApproval,
        StepKind::RevenueDistribution,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::ContractSigning => "contract_signing",
            StepKind::InitialPayment => "initial_payment",
            StepKind::DevelopmentApproval => "development_approval",
            StepKind::RevenueDistribution => "revenue_distribution",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub kind: StepKind,
    pub status: ProgressStatus,
    pub completed_at: Option<u64>,
}

/// A milestone as written in the deal terms.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneTerms {
    pub id: String,
    pub name: String,
    /// Share of the total deal value paid on completion, 0 to 100.
    pub payment_percentage: Decimal,
    /// Free-text condition agreed by the parties.
    #[serde(default)]
    pub completion_condition: String,
}

/// Deal terms supplied when the agreement is signed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicensingTerms {
    pub total_deal_value: Decimal,
    pub currency: String,
    pub milestones: Vec<MilestoneTerms>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub name: String,
    pub payment_percentage: Decimal,
    pub completion_condition: String,
    pub status: ProgressStatus,
    /// Metrics reported with the latest status change.
    pub performance_data: Option<serde_json::Value>,
    pub completed_at: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeType {
    PaymentDispute,
    MilestoneDispute,
    ContractBreach,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputePriority {
    Normal,
    High,
}

impl DisputeType {
    pub fn priority(&self) -> DisputePriority {
        match self {
            DisputeType::PaymentDispute => DisputePriority::High,
            _ => DisputePriority::Normal,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeResolution {
    /// Return the workflow to `active`.
    Resume,
    /// End the workflow.
    Terminate,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    pub id: Uuid,
    pub dispute_type: DisputeType,
    pub description: String,
    pub raised_by: UserId,
    pub priority: DisputePriority,
    pub raised_at: u64,
    pub resolution: Option<DisputeResolution>,
    pub resolution_notes: Option<String>,
    pub resolved_at: Option<u64>,
}

impl Dispute {
    pub fn is_open(&self) -> bool {
        self.resolution.is_none()
    }
}

/// A licensing deal in progress. Stored as a JSON document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LicensingWorkflow {
    pub workflow_id: WorkflowId,
    pub agreement_id: AgreementId,
    pub studio_id: UserId,
    pub writer_id: UserId,
    pub status: WorkflowStatus,
    pub total_deal_value: Decimal,
    pub currency: String,
    pub steps: Vec<WorkflowStep>,
    pub milestones: Vec<Milestone>,
    pub disputes: Vec<Dispute>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Progress summary returned by the status endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatusReport {
    pub workflow_id: WorkflowId,
    pub status: WorkflowStatus,
    pub steps_completed: usize,
    pub total_steps: usize,
    pub milestones_completed: usize,
    pub total_milestones: usize,
    /// Sum of the percentages of completed milestones.
    pub paid_percentage: Decimal,
    /// `paid_percentage` of the deal value, in the deal currency.
    pub paid_amount: Decimal,
    pub next_milestone: Option<String>,
    pub open_disputes: usize,
}

impl LicensingWorkflow {
    /// Build a `draft` workflow from validated terms.
    ///
    /// # Errors
    ///
    /// - [`LicensingError::InvalidTerms`] if the parties coincide, the deal
    ///   value is not positive, a percentage is outside 0..=100, the
    ///   percentages sum past 100, or milestone ids repeat
    pub fn new(
        agreement_id: AgreementId,
        studio_id: UserId,
        writer_id: UserId,
        terms: LicensingTerms,
        now: u64,
    ) -> Result<Self> {
        validate_terms(&studio_id, &writer_id, &terms)?;

        let steps = StepKind::ALL
            .into_iter()
            .map(|kind| WorkflowStep {
                kind,
                status: ProgressStatus::Pending,
                completed_at: None,
            })
            .collect();
        let milestones = terms
            .milestones
            .into_iter()
            .map(|m| Milestone {
                id: m.id,
                name: m.name,
                payment_percentage: m.payment_percentage,
                completion_condition: m.completion_condition,
                status: ProgressStatus::Pending,
                performance_data: None,
                completed_at: None,
            })
            .collect();

        Ok(Self {
            workflow_id: Uuid::new_v4(),
            agreement_id,
            studio_id,
            writer_id,
            status: WorkflowStatus::Draft,
            total_deal_value: terms.total_deal_value,
            currency: terms.currency.trim().to_uppercase(),
            steps,
            milestones,
            disputes: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_party(&self, user_id: &UserId) -> bool {
        *user_id == self.writer_id || *user_id == self.studio_id
    }

    pub fn milestone(&self, milestone_id: &str) -> Option<&Milestone> {
        self.milestones.iter().find(|m| m.id == milestone_id)
    }

    fn transition(&mut self, next: WorkflowStatus, now: u64) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(LicensingError::transition("workflow", self.status, next));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Complete contract signing and move `draft → active`.
    pub fn activate(&mut self, now: u64) -> Result<()> {
        self.transition(WorkflowStatus::Active, now)?;
        self.set_step(StepKind::ContractSigning, ProgressStatus::Completed, now);
        Ok(())
    }

    /// Move a step forward.
    ///
    /// A step may only start once every earlier step has completed.
    pub fn advance_step(&mut self, kind: StepKind, status: ProgressStatus, now: u64) -> Result<()> {
        if self.status != WorkflowStatus::Active {
            return Err(LicensingError::transition("workflow", self.status, format!("{kind} step")));
        }
        let index = self
            .steps
            .iter()
            .position(|s| s.kind == kind)
            .ok_or_else(|| LicensingError::transition(kind.as_str(), "missing", status))?;
        let current = self.steps[index].status;
        if status <= current {
            return Err(LicensingError::transition(kind.as_str(), current, status));
        }
        if let Some(blocking) = self.steps[..index]
            .iter()
            .find(|s| s.status != ProgressStatus::Completed)
        {
            return Err(LicensingError::transition(
                kind.as_str(),
                current,
                format!("{status} (waiting on {})", blocking.kind),
            ));
        }
        self.set_step(kind, status, now);
        self.complete_if_done(now);
        Ok(())
    }

    /// Move a milestone forward.
    ///
    /// Returns the milestone's payment percentage when this call completed
    /// it. Milestones start and complete in order, and only while the
    /// workflow is active.
    pub fn advance_milestone(
        &mut self,
        milestone_id: &str,
        status: ProgressStatus,
        performance_data: Option<serde_json::Value>,
        now: u64,
    ) -> Result<Option<Decimal>> {
        if self.status != WorkflowStatus::Active {
            return Err(LicensingError::transition(
                "workflow",
                self.status,
                format!("milestone {milestone_id}"),
            ));
        }
        let index = self
            .milestones
            .iter()
            .position(|m| m.id == milestone_id)
            .ok_or_else(|| LicensingError::UnknownMilestone {
                workflow_id: self.workflow_id,
                milestone_id: milestone_id.to_string(),
            })?;
        let current = self.milestones[index].status;
        let subject = format!("milestone {milestone_id}");
        if status <= current {
            return Err(LicensingError::transition(subject, current, status));
        }
        if let Some(blocking) = self.milestones[..index]
            .iter()
            .find(|m| m.status != ProgressStatus::Completed)
        {
            return Err(LicensingError::transition(
                subject,
                current,
                format!("{status} (waiting on {})", blocking.id),
            ));
        }

        let milestone = &mut self.milestones[index];
        milestone.status = status;
        if performance_data.is_some() {
            milestone.performance_data = performance_data;
        }
        let completed = status == ProgressStatus::Completed;
        if completed {
            milestone.completed_at = Some(now);
        }
        let percentage = milestone.payment_percentage;
        self.updated_at = now;

        if completed && self.milestones.iter().all(|m| m.status == ProgressStatus::Completed) {
            for kind in StepKind::ALL {
                self.set_step(kind, ProgressStatus::Completed, now);
            }
            self.complete_if_done(now);
        }
        Ok(completed.then_some(percentage))
    }

    /// Open a dispute. Moves an active workflow to `disputed`; a workflow
    /// that is already disputed collects further disputes.
    pub fn raise_dispute(
        &mut self,
        dispute_type: DisputeType,
        description: String,
        raised_by: UserId,
        now: u64,
    ) -> Result<Dispute> {
        if !self.is_party(&raised_by) {
            return Err(LicensingError::NotAParty(raised_by));
        }
        if self.status != WorkflowStatus::Disputed {
            self.transition(WorkflowStatus::Disputed, now)?;
        }
        let dispute = Dispute {
            id: Uuid::new_v4(),
            dispute_type,
            description,
            raised_by,
            priority: dispute_type.priority(),
            raised_at: now,
            resolution: None,
            resolution_notes: None,
            resolved_at: None,
        };
        self.disputes.push(dispute.clone());
        self.updated_at = now;
        Ok(dispute)
    }

    /// Close a dispute. `Resume` returns the workflow to `active` once no
    /// other dispute is open; `Terminate` ends it.
    pub fn resolve_dispute(
        &mut self,
        dispute_id: &Uuid,
        resolution: DisputeResolution,
        notes: Option<String>,
        now: u64,
    ) -> Result<Dispute> {
        let workflow_id = self.workflow_id;
        let dispute = self
            .disputes
            .iter_mut()
            .find(|d| d.id == *dispute_id)
            .ok_or(LicensingError::UnknownDispute {
                workflow_id,
                dispute_id: *dispute_id,
            })?;
        if !dispute.is_open() {
            return Err(LicensingError::transition(
                format!("dispute {dispute_id}"),
                "resolved",
                "resolved",
            ));
        }
        dispute.resolution = Some(resolution);
        dispute.resolution_notes = notes;
        dispute.resolved_at = Some(now);
        let resolved = dispute.clone();

        match resolution {
            DisputeResolution::Terminate => self.transition(WorkflowStatus::Terminated, now)?,
            DisputeResolution::Resume => {
                if self.disputes.iter().all(|d| !d.is_open()) {
                    self.transition(WorkflowStatus::Active, now)?;
                }
            }
        }
        self.updated_at = now;
        Ok(resolved)
    }

    pub fn status_report(&self) -> WorkflowStatusReport {
        let completed: Vec<&Milestone> = self
            .milestones
            .iter()
            .filter(|m| m.status == ProgressStatus::Completed)
            .collect();
        let paid_percentage: Decimal = completed.iter().map(|m| m.payment_percentage).sum();
        WorkflowStatusReport {
            workflow_id: self.workflow_id,
            status: self.status,
            steps_completed: self
                .steps
                .iter()
                .filter(|s| s.status == ProgressStatus::Completed)
                .count(),
            total_steps: self.steps.len(),
            milestones_completed: completed.len(),
            total_milestones: self.milestones.len(),
            paid_percentage,
            paid_amount: self.total_deal_value * paid_percentage / Decimal::ONE_HUNDRED,
            next_milestone: self
                .milestones
                .iter()
                .find(|m| m.status != ProgressStatus::Completed)
                .map(|m| m.id.clone()),
            open_disputes: self.disputes.iter().filter(|d| d.is_open()).count(),
        }
    }

    fn set_step(&mut self, kind: StepKind, status: ProgressStatus, now: u64) {
        if let Some(step) = self.steps.iter_mut().find(|s| s.kind == kind) {
            if step.status < status {
                step.status = status;
                if status == ProgressStatus::Completed {
                    step.completed_at = Some(now);
                }
            }
        }
    }

    fn complete_if_done(&mut self, now: u64) {
        let done = self.status == WorkflowStatus::Active
            && self.steps.iter().all(|s| s.status == ProgressStatus::Completed)
            && self.milestones.iter().all(|m| m.status == ProgressStatus::Completed);
        if done {
            self.status = WorkflowStatus::Completed;
            self.updated_at = now;
        }
    }
}

fn validate_terms(studio_id: &UserId, writer_id: &UserId, terms: &LicensingTerms) -> Result<()> {
    if studio_id == writer_id {
        return Err(LicensingError::InvalidTerms(
            "studio and writer must be different parties".into(),
        ));
    }
    if terms.total_deal_value <= Decimal::ZERO {
        return Err(LicensingError::InvalidTerms(format!(
            "deal value must be positive, got {}",
            terms.total_deal_value
        )));
    }
    if terms.currency.trim().is_empty() {
        return Err(LicensingError::InvalidTerms("deal currency is required".into()));
    }

    let mut seen = HashSet::new();
    let mut total = Decimal::ZERO;
    for milestone in &terms.milestones {
        if milestone.id.is_empty() {
            return Err(LicensingError::InvalidTerms("milestone id is required".into()));
        }
        if !seen.insert(milestone.id.as_str()) {
            return Err(LicensingError::InvalidTerms(format!(
                "duplicate milestone id {}",
                milestone.id
            )));
        }
        if milestone.payment_percentage < Decimal::ZERO
            || milestone.payment_percentage > Decimal::ONE_HUNDRED
        {
            return Err(LicensingError::InvalidTerms(format!(
                "milestone {} percentage {} is outside 0..=100",
                milestone.id, milestone.payment_percentage
            )));
        }
        total += milestone.payment_percentage;
    }
    if total > Decimal::ONE_HUNDRED {
        return Err(LicensingError::InvalidTerms(format!(
            "milestone percentages sum to {total}, more than 100"
        )));
    }
    Ok(())
}
