//! Integration test: a licensing deal from signature to settled payouts.
//!
//! A studio licenses a story for $10,000 paid over three milestones. Each
//! completed milestone is split 85/15, the writer's share triggers an
//! automatic payout request, and the payouts settle through a disburser.

use quill_integration_tests::Platform;
use quill_licensing::{
    DisputeResolution, DisputeType, LicensingConfig, LicensingError, LicensingTerms,
    MilestoneTerms, ProgressStatus, StepKind, WorkflowStatus,
};
use quill_payout::{Disburser, PayoutError};
use quill_types::payout::PayoutStatus;
use quill_types::Decimal;
use uuid::Uuid;

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
                completion_condition: "studio sign-off".into(),
            })
            .collect(),
    }
}

struct Bank;

impl Disburser for Bank {
    fn disburse(
        &self,
        _amount: Decimal,
        _currency: &str,
        _destination: &serde_json::Value,
    ) -> Result<String, String> {
        Ok(format!("wire-{}", Uuid::new_v4()))
    }
}

struct Bounced;

impl Disburser for Bounced {
    fn disburse(
        &self,
        _amount: Decimal,
        _currency: &str,
        _destination: &serde_json::Value,
    ) -> Result<String, String> {
        Err("account closed".into())
    }
}

#[test]
fn milestones_pay_out_the_whole_deal() {
    let platform = Platform::new();
    let (studio, writer) = (Uuid::new_v4(), Uuid::new_v4());
    let wf = platform
        .licensing
        .create_workflow(Uuid::new_v4(), studio, writer, terms(10_000, "USD", &[20, 30, 50]))
        .expect("create");
    assert_eq!(wf.status, WorkflowStatus::Draft);
    platform.licensing.activate(&wf.workflow_id).expect("activate");
    platform
        .licensing
        .advance_step(&wf.workflow_id, StepKind::InitialPayment, ProgressStatus::Completed)
        .expect("initial payment step");

    let first = platform
        .licensing
        .advance_milestone(&wf.workflow_id, "m1", ProgressStatus::Completed, None)
        .expect("m1");
    let split = first.split.expect("m1 split");
    assert_eq!(split.writer_share, Decimal::new(1_700, 0));
    assert_eq!(split.platform_share, Decimal::new(300, 0));
    assert_eq!(first.payout.expect("auto payout").amount, Decimal::new(1_700, 0));

    for milestone in ["m2", "m3"] {
        platform
            .licensing
            .advance_milestone(&wf.workflow_id, milestone, ProgressStatus::InProgress, None)
            .expect("start");
        let outcome = platform
            .licensing
            .advance_milestone(&wf.workflow_id, milestone, ProgressStatus::Completed, None)
            .expect("complete");
        assert!(outcome.payout.is_some());
    }

    let report = platform.licensing.status(&wf.workflow_id).expect("status");
    assert_eq!(report.status, WorkflowStatus::Completed);
    assert_eq!(report.paid_amount, Decimal::new(10_000, 0));
    assert_eq!(report.steps_completed, report.total_steps);

    let splits = platform
        .revenue
        .splits_for_workflow(&wf.workflow_id)
        .expect("splits");
    assert_eq!(splits.len(), 3);
    let writer_total: Decimal = splits.iter().map(|s| s.writer_share).sum();
    assert_eq!(writer_total, Decimal::new(8_500, 0));

    // Everything earned is reserved by pending requests; settle them.
    assert_eq!(
        platform.payouts.available_for_payout(&writer).expect("available"),
        Decimal::ZERO
    );
    let pending = platform.payouts.list_pending(10).expect("pending");
    assert_eq!(pending.len(), 3);
    for request in &pending {
        let settled = platform.payouts.disburse(&request.id, &Bank).expect("disburse");
        assert_eq!(settled.status, PayoutStatus::Completed);
    }

    let earnings = platform.revenue.writer_earnings(&writer).expect("earnings");
    assert_eq!(earnings.total_earned, Decimal::new(8_500, 0));
    assert_eq!(earnings.paid_out, Decimal::new(8_500, 0));
    assert_eq!(earnings.pending_payout, Decimal::ZERO);
}

#[test]
fn bounced_payout_frees_the_earnings() {
    let platform = Platform::with_licensing(LicensingConfig {
        auto_payout_threshold: None,
        ..LicensingConfig::default()
    });
    let (studio, writer) = (Uuid::new_v4(), Uuid::new_v4());
    let wf = platform
        .licensing
        .create_workflow(Uuid::new_v4(), studio, writer, terms(1_000, "USD", &[100]))
        .expect("create");
    platform.licensing.activate(&wf.workflow_id).expect("activate");
    let outcome = platform
        .licensing
        .advance_milestone(&wf.workflow_id, "m1", ProgressStatus::Completed, None)
        .expect("m1");
    assert!(outcome.payout.is_none());

    let request = platform
        .payouts
        .request_payout(&writer, Decimal::new(850, 0), "usd", serde_json::json!({}), None)
        .expect("request");
    let err = platform
        .payouts
        .disburse(&request.id, &Bounced)
        .expect_err("bounced");
    assert!(matches!(err, PayoutError::Disbursement(_)));

    let failed = platform.payouts.get(&request.id).expect("get").expect("row");
    assert_eq!(failed.status, PayoutStatus::Failed);
    assert_eq!(
        platform.payouts.available_for_payout(&writer).expect("available"),
        Decimal::new(850, 0)
    );
}

#[test]
fn terminated_deal_stops_paying() {
    let platform = Platform::new();
    let (studio, writer) = (Uuid::new_v4(), Uuid::new_v4());
    let wf = platform
        .licensing
        .create_workflow(Uuid::new_v4(), studio, writer, terms(5_000, "USD", &[40, 60]))
        .expect("create");
    platform.licensing.activate(&wf.workflow_id).expect("activate");
    platform
        .licensing
        .distribute_royalties(&wf.workflow_id, "q1", Decimal::new(200, 0))
        .expect("royalties");

    let dispute = platform
        .licensing
        .raise_dispute(
            &wf.workflow_id,
            DisputeType::ContractBreach,
            "adaptation rights exceeded".into(),
            writer,
        )
        .expect("dispute");
    let err = platform
        .licensing
        .advance_milestone(&wf.workflow_id, "m1", ProgressStatus::Completed, None)
        .expect_err("frozen");
    assert!(matches!(err, LicensingError::InvalidTransition { .. }));

    let outsider = platform.licensing.raise_dispute(
        &wf.workflow_id,
        DisputeType::Other,
        "not my deal".into(),
        Uuid::new_v4(),
    );
    assert!(matches!(outsider, Err(LicensingError::NotAParty(_))));

    let closed = platform
        .licensing
        .resolve_dispute(
            &wf.workflow_id,
            &dispute.id,
            DisputeResolution::Terminate,
            Some("contract rescinded".into()),
        )
        .expect("terminate");
    assert_eq!(closed.status, WorkflowStatus::Terminated);

    let err = platform
        .licensing
        .distribute_royalties(&wf.workflow_id, "q2", Decimal::new(200, 0))
        .expect_err("terminated");
    assert!(matches!(err, LicensingError::InvalidTransition { .. }));

    let earnings = platform.revenue.writer_earnings(&writer).expect("earnings");
    assert_eq!(earnings.total_earned, Decimal::new(170, 0));
}

#[test]
fn foreign_deal_pays_at_the_current_rate() {
    let platform = Platform::with_licensing(LicensingConfig {
        auto_payout_threshold: None,
        ..LicensingConfig::default()
    });
    platform.quote("EUR", Decimal::new(110, 2));
    let (studio, writer) = (Uuid::new_v4(), Uuid::new_v4());
    let wf = platform
        .licensing
        .create_workflow(Uuid::new_v4(), studio, writer, terms(1_000, "eur", &[50, 50]))
        .expect("create");
    assert_eq!(wf.currency, "EUR");
    platform.licensing.activate(&wf.workflow_id).expect("activate");

    let outcome = platform
        .licensing
        .advance_milestone(&wf.workflow_id, "m1", ProgressStatus::Completed, None)
        .expect("m1");
    let split = outcome.split.expect("split");
    assert_eq!(split.gross_amount, Decimal::new(550, 0));
    assert_eq!(split.currency, "USD");
    assert_eq!(split.writer_share, Decimal::new(467_50, 2));
}
