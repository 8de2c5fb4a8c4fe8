//! # quill-licensing
//!
//! Milestone-driven licensing deals between a writer and a studio.
//!
//! ## Workflow Lifecycle
//!
//! 1. A signed agreement creates a `draft` workflow
//! 2. Activation completes contract signing and moves it to `active`
//! 3. Steps and milestones advance forward, in order
//! 4. Each completed milestone pays its share of the deal value through the
//!    revenue engine
//! 5. Completing the last milestone completes the workflow
//!
//! A dispute moves an active workflow to `disputed` and freezes milestone
//! payments until it is resolved back to `active` or to `terminated`.
//!
//! ## Modules
//!
//! - [`workflow`]: the workflow document and its state transitions
//! - [`engine`]: persistence, payments and auto-payouts

pub mod engine;
pub mod workflow;

use quill_db::DbError;
use quill_exchange::ExchangeError;
use quill_payout::PayoutError;
use quill_revenue::RevenueError;
use quill_types::{AgreementId, UserId, WorkflowId};
use uuid::Uuid;

pub use engine::{LicensingConfig, LicensingEngine, PaymentOutcome};
pub use workflow::{
    Dispute, DisputePriority, DisputeResolution, DisputeType, LicensingTerms, LicensingWorkflow,
    Milestone, MilestoneTerms, ProgressStatus, StepKind, WorkflowStatus, WorkflowStatusReport,
};

/// Error types for licensing operations.
#[derive(Debug, thiserror::Error)]
pub enum LicensingError {
    /// The deal terms failed validation.
    #[error("invalid licensing terms: {0}")]
    InvalidTerms(String),

    /// A workflow already exists for this agreement.
    #[error("agreement {0} already has a workflow")]
    AgreementExists(AgreementId),

    #[error("workflow not found: {0}")]
    NotFound(WorkflowId),

    #[error("milestone {milestone_id} not found in workflow {workflow_id}")]
    UnknownMilestone {
        /// The workflow searched.
        workflow_id: WorkflowId,
        /// The missing milestone.
        milestone_id: String,
    },

    #[error("dispute {dispute_id} not found in workflow {workflow_id}")]
    UnknownDispute {
        /// The workflow searched.
        workflow_id: WorkflowId,
        /// The missing dispute.
        dispute_id: Uuid,
    },

    /// The requested change is not allowed from the current state.
    #[error("invalid transition for {subject}: {from} -> {to}")]
    InvalidTransition {
        /// What was being changed (the workflow, a step, a milestone).
        subject: String,
        /// Current state.
        from: String,
        /// Requested state.
        to: String,
    },

    /// Only the writer or the studio may act on a workflow.
    #[error("{0} is not a party to the workflow")]
    NotAParty(UserId),

    /// Distribution failed.
    #[error(transparent)]
    Revenue(#[from] RevenueError),

    /// The deal currency could not be converted.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// Payout creation failed.
    #[error(transparent)]
    Payout(#[from] PayoutError),

    /// The stored workflow document could not be (de)serialized.
    #[error("workflow document error: {0}")]
    Document(#[from] serde_json::Error),

    /// Storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

impl LicensingError {
    pub(crate) fn transition(subject: impl Into<String>, from: impl ToString, to: impl ToString) -> Self {
        LicensingError::InvalidTransition {
            subject: subject.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            LicensingError::Revenue(e) => e.is_retryable(),
            LicensingError::Exchange(e) => e.is_retryable(),
            LicensingError::Payout(e) => e.is_retryable(),
            LicensingError::Storage(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Convenience result type for licensing operations.
pub type Result<T> = std::result::Result<T, LicensingError>;
