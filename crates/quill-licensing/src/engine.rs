//! Licensing engine: stores workflows and turns milestone completions and
//! royalty reports into licensing revenue splits.

use std::sync::{Arc, Mutex, MutexGuard};

use quill_db::queries::workflows::{self, WorkflowRow};
use quill_db::{Db, DbError};
use quill_exchange::CurrencyConverter;
use quill_payout::PayoutProcessor;
use quill_revenue::splits::floor_cents;
use quill_revenue::RevenueEngine;
use quill_types::payout::PayoutRequest;
use quill_types::revenue::RevenueSplit;
use quill_types::{AgreementId, Clock, UserId, WorkflowId, BASE_CURRENCY};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::{
    Dispute, DisputeResolution, DisputeType, LicensingTerms, LicensingWorkflow, ProgressStatus,
    StepKind, WorkflowStatus, WorkflowStatusReport,
};
use crate::{LicensingError, Result};

fn default_auto_payout_threshold() -> Option<Decimal> {
    Some(Decimal::new(100_00, 2))
}

fn default_auto_payout_details() -> serde_json::Value {
    serde_json::json!({ "method": "account_default" })
}

/// Licensing settings (`[licensing]` in the daemon config).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LicensingConfig {
    /// Request a payout once a writer's available earnings reach this many
    /// USD after a licensing payment. `None` disables automatic payouts.
    #[serde(default = "default_auto_payout_threshold")]
    pub auto_payout_threshold: Option<Decimal>,
    /// Payment details attached to automatic payout requests.
    #[serde(default = "default_auto_payout_details")]
    pub auto_payout_details: serde_json::Value,
}

impl Default for LicensingConfig {
    fn default() -> Self {
        Self {
            auto_payout_threshold: default_auto_payout_threshold(),
            auto_payout_details: default_auto_payout_details(),
        }
    }
}

/// Result of an operation that may pay the writer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentOutcome {
    pub workflow: LicensingWorkflow,
    /// The licensing split, when the operation moved money.
    pub split: Option<RevenueSplit>,
    /// An automatic payout requested afterwards.
    pub payout: Option<PayoutRequest>,
}

/// Owns licensing workflows.
///
/// Workflow mutations are serialized by an engine-wide lock, taken before
/// the storage lock and never while holding it.
#[derive(Clone)]
pub struct LicensingEngine {
    db: Db,
    clock: Arc<dyn Clock>,
    converter: Arc<CurrencyConverter>,
    revenue: RevenueEngine,
    payouts: PayoutProcessor,
    config: LicensingConfig,
    writes: Arc<Mutex<()>>,
}

impl LicensingEngine {
    pub fn new(
        db: Db,
        clock: Arc<dyn Clock>,
        converter: Arc<CurrencyConverter>,
        revenue: RevenueEngine,
        payouts: PayoutProcessor,
        config: LicensingConfig,
    ) -> Self {
        Self {
            db,
            clock,
            converter,
            revenue,
            payouts,
            config,
            writes: Arc::new(Mutex::new(())),
        }
    }

    /// Create a `draft` workflow for a signed agreement.
    ///
    /// # Errors
    ///
    /// - [`LicensingError::InvalidTerms`] if the terms fail validation
    /// - [`LicensingError::AgreementExists`] if the agreement already has one
    pub fn create_workflow(
        &self,
        agreement_id: AgreementId,
        studio_id: UserId,
        writer_id: UserId,
        terms: LicensingTerms,
    ) -> Result<LicensingWorkflow> {
        let now = self.clock.now();
        let workflow = LicensingWorkflow::new(agreement_id, studio_id, writer_id, terms, now)?;
        let row = to_row(&workflow)?;

        let _guard = self.lock_writes()?;
        self.db.with_tx(|conn| -> Result<()> {
            if workflows::get_by_agreement(conn, &agreement_id)?.is_some() {
                return Err(LicensingError::AgreementExists(agreement_id));
            }
            workflows::insert(conn, &row)?;
            Ok(())
        })?;

        tracing::info!(
            workflow_id = %workflow.workflow_id,
            agreement_id = %agreement_id,
            deal_value = %workflow.total_deal_value,
            currency = %workflow.currency,
            milestones = workflow.milestones.len(),
            "licensing workflow created"
        );
        Ok(workflow)
    }

    pub fn get(&self, workflow_id: &WorkflowId) -> Result<Option<LicensingWorkflow>> {
        let row = self
            .db
            .with_conn(|conn| workflows::get(conn, workflow_id).map_err(LicensingError::from))?;
        row.map(from_row).transpose()
    }

    /// Workflows where `party` is the writer or the studio, newest first.
    pub fn list_for_party(&self, party: &UserId) -> Result<Vec<LicensingWorkflow>> {
        let rows = self
            .db
            .with_conn(|conn| workflows::list_for_party(conn, party).map_err(LicensingError::from))?;
        rows.into_iter().map(from_row).collect()
    }

    pub fn status(&self, workflow_id: &WorkflowId) -> Result<WorkflowStatusReport> {
        Ok(self.load(workflow_id)?.status_report())
    }

    /// Record the signed contract and start the workflow.
    pub fn activate(&self, workflow_id: &WorkflowId) -> Result<LicensingWorkflow> {
        let workflow = self.mutate(workflow_id, |wf, now| wf.activate(now))?.0;
        tracing::info!(workflow_id = %workflow_id, "licensing workflow activated");
        Ok(workflow)
    }

    pub fn advance_step(
        &self,
        workflow_id: &WorkflowId,
        step: StepKind,
        status: ProgressStatus,
    ) -> Result<LicensingWorkflow> {
        let workflow = self
            .mutate(workflow_id, |wf, now| wf.advance_step(step, status, now))?
            .0;
        tracing::info!(workflow_id = %workflow_id, %step, %status, workflow_status = %workflow.status, "workflow step advanced");
        Ok(workflow)
    }

    /// Move a milestone forward, paying its share of the deal on completion.
    ///
    /// The payment is made before the new milestone status is stored. A
    /// failed payment leaves the milestone unchanged; a retry after a failed
    /// store finds the split already recorded.
    pub fn advance_milestone(
        &self,
        workflow_id: &WorkflowId,
        milestone_id: &str,
        status: ProgressStatus,
        performance_data: Option<serde_json::Value>,
    ) -> Result<PaymentOutcome> {
        let guard = self.lock_writes()?;
        let now = self.clock.now();
        let mut workflow = self.load(workflow_id)?;
        let completed_pct = workflow.advance_milestone(milestone_id, status, performance_data, now)?;

        let split = match completed_pct {
            Some(pct) if pct > Decimal::ZERO => {
                let gross = workflow.total_deal_value * pct / Decimal::ONE_HUNDRED;
                self.pay(&workflow, milestone_id, gross)?
            }
            _ => None,
        };
        self.store(&workflow, now)?;
        drop(guard);

        tracing::info!(
            workflow_id = %workflow_id,
            milestone_id,
            %status,
            workflow_status = %workflow.status,
            paid = split.is_some(),
            "milestone advanced"
        );

        let payout = match split {
            Some(_) => self.auto_payout(&workflow.writer_id, &format!("licensing:{workflow_id}:{milestone_id}")),
            None => None,
        };
        Ok(PaymentOutcome {
            workflow,
            split,
            payout,
        })
    }

    /// Distribute ongoing licensing revenue, `gross` in the deal currency.
    ///
    /// Idempotent per `reference`. Allowed while the workflow is active or
    /// completed.
    pub fn distribute_royalties(
        &self,
        workflow_id: &WorkflowId,
        reference: &str,
        gross: Decimal,
    ) -> Result<PaymentOutcome> {
        if reference.trim().is_empty() {
            return Err(LicensingError::InvalidTerms("royalty reference is required".into()));
        }
        if gross <= Decimal::ZERO {
            return Err(LicensingError::InvalidTerms(format!(
                "royalty amount must be positive, got {gross}"
            )));
        }
        // Held across the status check and the payment so a dispute cannot
        // land in between.
        let guard = self.lock_writes()?;
        let workflow = self.load(workflow_id)?;
        if !matches!(workflow.status, WorkflowStatus::Active | WorkflowStatus::Completed) {
            return Err(LicensingError::transition(
                "workflow",
                workflow.status,
                "royalty distribution",
            ));
        }

        let reference = format!("royalty:{reference}");
        let split = self.pay(&workflow, &reference, gross)?;
        drop(guard);
        let payout = match split {
            Some(_) => self.auto_payout(&workflow.writer_id, &format!("licensing:{workflow_id}:{reference}")),
            None => None,
        };
        Ok(PaymentOutcome {
            workflow,
            split,
            payout,
        })
    }

    /// Open a dispute, freezing milestone payments.
    pub fn raise_dispute(
        &self,
        workflow_id: &WorkflowId,
        dispute_type: DisputeType,
        description: String,
        raised_by: UserId,
    ) -> Result<Dispute> {
        let (_, dispute) = self.mutate(workflow_id, |wf, now| {
            wf.raise_dispute(dispute_type, description, raised_by, now)
        })?;
        tracing::warn!(
            workflow_id = %workflow_id,
            dispute_id = %dispute.id,
            raised_by = %raised_by,
            priority = ?dispute.priority,
            "licensing dispute raised"
        );
        Ok(dispute)
    }

    pub fn resolve_dispute(
        &self,
        workflow_id: &WorkflowId,
        dispute_id: &Uuid,
        resolution: DisputeResolution,
        notes: Option<String>,
    ) -> Result<LicensingWorkflow> {
        let (workflow, _) = self.mutate(workflow_id, |wf, now| {
            wf.resolve_dispute(dispute_id, resolution, notes, now)
        })?;
        tracing::info!(
            workflow_id = %workflow_id,
            dispute_id = %dispute_id,
            ?resolution,
            workflow_status = %workflow.status,
            "licensing dispute resolved"
        );
        Ok(workflow)
    }

    /// Convert a deal-currency amount to whole USD cents and split it.
    fn pay(&self, workflow: &LicensingWorkflow, reference: &str, gross: Decimal) -> Result<Option<RevenueSplit>> {
        let gross_usd = floor_cents(self.converter.to_usd(gross, &workflow.currency)?);
        if gross_usd <= Decimal::ZERO {
            tracing::warn!(workflow_id = %workflow.workflow_id, reference, %gross, "licensing payment rounds to zero");
            return Ok(None);
        }
        let split = self.revenue.distribute_licensing(
            &workflow.workflow_id,
            reference,
            &workflow.writer_id,
            Some(&workflow.studio_id),
            gross_usd,
        )?;
        Ok(Some(split))
    }

    /// Request a payout of everything available once it reaches the
    /// threshold. Failures are logged; the payment that triggered the check
    /// has already been recorded.
    fn auto_payout(&self, writer_id: &UserId, key: &str) -> Option<PayoutRequest> {
        let threshold = self.config.auto_payout_threshold?;
        let available = match self.payouts.available_for_payout(writer_id) {
            Ok(available) => available,
            Err(e) => {
                tracing::warn!(writer_id = %writer_id, error = %e, "auto payout check failed");
                return None;
            }
        };
        if available < threshold {
            return None;
        }
        match self.payouts.request_payout(
            writer_id,
            available,
            BASE_CURRENCY,
            self.config.auto_payout_details.clone(),
            Some(key.to_string()),
        ) {
            Ok(request) => {
                tracing::info!(writer_id = %writer_id, payout_id = %request.id, amount = %request.amount, "auto payout requested");
                Some(request)
            }
            Err(e) => {
                tracing::warn!(writer_id = %writer_id, error = %e, "auto payout request failed");
                None
            }
        }
    }

    fn lock_writes(&self) -> Result<MutexGuard<'_, ()>> {
        self.writes
            .lock()
            .map_err(|_| DbError::Unavailable("workflow lock poisoned".into()).into())
    }

    fn load(&self, workflow_id: &WorkflowId) -> Result<LicensingWorkflow> {
        self.get(workflow_id)?
            .ok_or(LicensingError::NotFound(*workflow_id))
    }

    fn store(&self, workflow: &LicensingWorkflow, now: u64) -> Result<()> {
        let body = serde_json::to_value(workflow)?;
        self.db.with_conn(|conn| {
            workflows::update(conn, &workflow.workflow_id, workflow.status.as_str(), &body, now)
                .map_err(LicensingError::from)
        })
    }

    /// Load, apply `f`, store. Nothing is stored when `f` fails.
    fn mutate<T, F>(&self, workflow_id: &WorkflowId, f: F) -> Result<(LicensingWorkflow, T)>
    where
        F: FnOnce(&mut LicensingWorkflow, u64) -> Result<T>,
    {
        let _guard = self.lock_writes()?;
        let now = self.clock.now();
        let mut workflow = self.load(workflow_id)?;
        let value = f(&mut workflow, now)?;
        self.store(&workflow, now)?;
        Ok((workflow, value))
    }
}

fn to_row(workflow: &LicensingWorkflow) -> Result<WorkflowRow> {
    Ok(WorkflowRow {
        workflow_id: workflow.workflow_id,
        agreement_id: workflow.agreement_id,
        studio_id: workflow.studio_id,
        writer_id: workflow.writer_id,
        status: workflow.status.as_str().to_string(),
        body: serde_json::to_value(workflow)?,
        created_at: workflow.created_at,
        updated_at: workflow.updated_at,
    })
}

fn from_row(row: WorkflowRow) -> Result<LicensingWorkflow> {
    Ok(serde_json::from_value(row.body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::MilestoneTerms;
    use quill_exchange::{ConverterConfig, ExchangeError, StaticRateFeed};
    use quill_ledger::Ledger;
    use quill_payout::PayoutConfig;
    use quill_revenue::{FixedEngagement, SplitTable};
    use quill_types::payout::PayoutStatus;
    use quill_types::ManualClock;

    fn engine_with(config: LicensingConfig) -> LicensingEngine {
        let db = Db::open_memory().expect("db");
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_000));
        let feed = StaticRateFeed::new().with_rate("EUR", Decimal::new(110, 2));
        let converter = Arc::new(CurrencyConverter::new(
            Arc::new(feed),
            clock.clone(),
            ConverterConfig::default(),
        ));
        let revenue = RevenueEngine::new(
            db.clone(),
            clock.clone(),
            converter.clone(),
            SplitTable::default(),
            Arc::new(FixedEngagement::default()),
        );
        let ledger = Ledger::new(db.clone(), clock.clone());
        let payouts = PayoutProcessor::new(db.clone(), ledger, clock.clone(), PayoutConfig::default());
        LicensingEngine::new(db, clock, converter, revenue, payouts, config)
    }

    fn terms(value: i64, currency: &str, percentages: &[i64]) -> LicensingTerms {
        LicensingTerms {
            total_deal_value: Decimal::new(value, 0),
            currency: currency.into(),
            milestones: percentages
                .iter()
                .enumerate()
                .map(|(i, pct)| MilestoneTerms {
                    id: format!("m{}", i + 1),
                    name: format!("Milestone {}", i + 1),
                    payment_percentage: Decimal::new(*pct, 0),
                    completion_condition: "delivered".into(),
                })
                .collect(),
        }
    }

    fn started(engine: &LicensingEngine, terms: LicensingTerms) -> LicensingWorkflow {
        let wf = engine
            .create_workflow(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), terms)
            .expect("create");
        engine.activate(&wf.workflow_id).expect("activate")
    }

    #[test]
    fn test_first_milestone_pays_licensing_split() {
        let engine = engine_with(LicensingConfig::default());
        let wf = started(&engine, terms(10_000, "USD", &[20, 30, 50]));

        let outcome = engine
            .advance_milestone(&wf.workflow_id, "m1", ProgressStatus::Completed, None)
            .expect("m1");
        let split = outcome.split.expect("split");
        assert_eq!(split.gross_amount, Decimal::new(2_000, 0));
        assert_eq!(split.writer_share, Decimal::new(1_700, 0));
        assert_eq!(split.platform_share, Decimal::new(300, 0));

        let payout = outcome.payout.expect("auto payout");
        assert_eq!(payout.amount, Decimal::new(1_700, 0));
        assert_eq!(payout.status, PayoutStatus::Pending);

        let report = engine.status(&wf.workflow_id).expect("status");
        assert_eq!(report.milestones_completed, 1);
        assert_eq!(report.next_milestone.as_deref(), Some("m2"));
    }

    #[test]
    fn test_deal_currency_converted() {
        let engine = engine_with(LicensingConfig {
            auto_payout_threshold: None,
            ..LicensingConfig::default()
        });
        let wf = started(&engine, terms(1_000, "eur", &[50]));
        let outcome = engine
            .advance_milestone(&wf.workflow_id, "m1", ProgressStatus::Completed, None)
            .expect("m1");
        let split = outcome.split.expect("split");
        assert_eq!(split.gross_amount, Decimal::new(550, 0));
        assert_eq!(split.writer_share, Decimal::new(467_50, 2));
        assert!(outcome.payout.is_none());
        assert_eq!(outcome.workflow.status, WorkflowStatus::Completed);
    }

    #[test]
    fn test_missing_rate_leaves_milestone_pending() {
        let engine = engine_with(LicensingConfig::default());
        let wf = started(&engine, terms(1_000, "GBP", &[100]));
        let err = engine
            .advance_milestone(&wf.workflow_id, "m1", ProgressStatus::Completed, None)
            .expect_err("no rate");
        assert!(matches!(
            err,
            LicensingError::Exchange(ExchangeError::RateUnavailable { .. })
        ));
        let stored = engine.get(&wf.workflow_id).expect("get").expect("row");
        assert_eq!(
            stored.milestone("m1").map(|m| m.status),
            Some(ProgressStatus::Pending)
        );
    }

    #[test]
    fn test_one_workflow_per_agreement() {
        let engine = engine_with(LicensingConfig::default());
        let agreement = Uuid::new_v4();
        engine
            .create_workflow(agreement, Uuid::new_v4(), Uuid::new_v4(), terms(100, "USD", &[100]))
            .expect("create");
        assert!(matches!(
            engine.create_workflow(agreement, Uuid::new_v4(), Uuid::new_v4(), terms(100, "USD", &[100])),
            Err(LicensingError::AgreementExists(_))
        ));
    }

    #[test]
    fn test_dispute_blocks_payment_until_resumed() {
        let engine = engine_with(LicensingConfig::default());
        let wf = started(&engine, terms(10_000, "USD", &[20, 80]));
        let dispute = engine
            .raise_dispute(&wf.workflow_id, DisputeType::PaymentDispute, "late".into(), wf.writer_id)
            .expect("raise");

        assert!(engine
            .advance_milestone(&wf.workflow_id, "m1", ProgressStatus::Completed, None)
            .is_err());
        assert!(engine
            .distribute_royalties(&wf.workflow_id, "q1", Decimal::new(500, 0))
            .is_err());

        engine
            .resolve_dispute(&wf.workflow_id, &dispute.id, DisputeResolution::Resume, None)
            .expect("resume");
        engine
            .advance_milestone(&wf.workflow_id, "m1", ProgressStatus::Completed, None)
            .expect("m1");
    }

    #[test]
    fn test_royalties_wait_for_concurrent_dispute() {
        let engine = engine_with(LicensingConfig::default());
        let wf = started(&engine, terms(10_000, "USD", &[100]));

        let result = std::thread::scope(|s| {
            let guard = engine.lock_writes().expect("lock");
            let royalty = s.spawn(|| engine.distribute_royalties(&wf.workflow_id, "q1", Decimal::new(500, 0)));

            let mut disputed = engine.load(&wf.workflow_id).expect("load");
            disputed
                .raise_dispute(DisputeType::PaymentDispute, "audit".into(), wf.studio_id, 1_000)
                .expect("dispute");
            engine.store(&disputed, 1_000).expect("store");
            drop(guard);

            royalty.join().expect("join")
        });

        assert!(matches!(result, Err(LicensingError::InvalidTransition { .. })));
        assert_eq!(
            engine.revenue.writer_earnings(&wf.writer_id).expect("earnings").total_earned,
            Decimal::ZERO
        );
    }

    #[test]
    fn test_royalties_idempotent_per_reference() {
        let engine = engine_with(LicensingConfig {
            auto_payout_threshold: None,
            ..LicensingConfig::default()
        });
        let wf = started(&engine, terms(10_000, "USD", &[100]));
        let first = engine
            .distribute_royalties(&wf.workflow_id, "2026-q1", Decimal::new(1_000, 0))
            .expect("first")
            .split
            .expect("split");
        let again = engine
            .distribute_royalties(&wf.workflow_id, "2026-q1", Decimal::new(1_000, 0))
            .expect("again")
            .split
            .expect("split");
        assert_eq!(first.id, again.id);
        assert_eq!(
            engine.revenue.writer_earnings(&wf.writer_id).expect("earnings").total_earned,
            Decimal::new(850, 0)
        );
    }

    #[test]
    fn test_draft_cannot_pay() {
        let engine = engine_with(LicensingConfig::default());
        let wf = engine
            .create_workflow(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), terms(100, "USD", &[100]))
            .expect("create");
        assert!(matches!(
            engine.distribute_royalties(&wf.workflow_id, "r", Decimal::ONE),
            Err(LicensingError::InvalidTransition { .. })
        ));
        assert!(engine
            .advance_step(&wf.workflow_id, StepKind::InitialPayment, ProgressStatus::InProgress)
            .is_err());
    }

    #[test]
    fn test_list_for_party() {
        let engine = engine_with(LicensingConfig::default());
        let wf = started(&engine, terms(100, "USD", &[100]));
        assert_eq!(engine.list_for_party(&wf.studio_id).expect("list").len(), 1);
        assert!(engine.list_for_party(&Uuid::new_v4()).expect("list").is_empty());
    }
}
