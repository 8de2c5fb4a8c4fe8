//! Integration test: the reader-to-writer money path.
//!
//! Readers buy coins, unlock content through the access gate, and writers
//! are credited their share. Subscription revenue is pooled per period and
//! apportioned by the coins readers spent on each writer's content.

use std::collections::HashSet;

use quill_access::{AccessError, AccessMethod};
use quill_integration_tests::{Platform, BASE_TIME};
use quill_ledger::TransactionMeta;
use quill_types::content::{ContentType, Subscription, SubscriptionTier};
use quill_types::ledger::TransactionType;
use quill_types::Decimal;
use uuid::Uuid;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_purchases_of_one_item_charge_once() {
    let platform = Platform::new();
    let (reader, writer) = (Uuid::new_v4(), Uuid::new_v4());
    let story = platform.publish(&writer, ContentType::Story);
    platform.fund(&reader, 100);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let access = platform.access.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            access.purchase(&reader, &story, ContentType::Story)
        }));
    }

    let mut charges = HashSet::new();
    for handle in handles {
        let result = handle.await.expect("join").expect("purchase");
        assert!(result.success);
        if let Some(tx) = result.transaction {
            charges.insert(tx.id);
        }
    }
    assert_eq!(charges.len(), 1);
    assert_eq!(platform.balance(&reader), 0);

    // 100 coins at $0.01 is $1.00; the writer keeps 70%.
    let earnings = platform.revenue.writer_earnings(&writer).expect("earnings");
    assert_eq!(earnings.total_earned, Decimal::new(70, 2));
}

#[test]
fn previous_purchase_outlives_the_balance() {
    let platform = Platform::new();
    let (reader, writer) = (Uuid::new_v4(), Uuid::new_v4());
    let chapter = platform.publish(&writer, ContentType::Chapter);
    let exclusive = platform.publish(&writer, ContentType::ExclusiveContent);
    platform.fund(&reader, 10);

    let bought = platform
        .access
        .purchase(&reader, &chapter, ContentType::Chapter)
        .expect("purchase");
    assert_eq!(bought.new_balance, 0);

    let decision = platform
        .access
        .check_access(&reader, &chapter, ContentType::Chapter)
        .expect("check");
    assert!(decision.has_access);
    assert_eq!(decision.access_method, Some(AccessMethod::PreviousPurchase));

    let again = platform
        .access
        .purchase(&reader, &chapter, ContentType::Chapter)
        .expect("repeat purchase");
    assert!(again.already_owned);
    assert_eq!(again.coins_spent, 0);

    let locked = platform
        .access
        .check_access(&reader, &exclusive, ContentType::ExclusiveContent)
        .expect("check");
    assert!(!locked.has_access);
    assert_eq!(locked.coins_needed, 250);
}

#[test]
fn subscription_unlocks_until_expiry() {
    let platform = Platform::new();
    let (reader, writer) = (Uuid::new_v4(), Uuid::new_v4());
    let story = platform.publish(&writer, ContentType::Story);
    platform
        .subscriptions
        .set(
            &reader,
            &Subscription {
                tier: SubscriptionTier::Premium,
                expires_at: BASE_TIME + 3_600,
            },
        )
        .expect("subscribe");

    let decision = platform
        .access
        .check_access(&reader, &story, ContentType::Story)
        .expect("check");
    assert_eq!(decision.access_method, Some(AccessMethod::Subscription));

    platform.clock.advance(3_600);
    let decision = platform
        .access
        .check_access(&reader, &story, ContentType::Story)
        .expect("check");
    assert!(!decision.has_access);
    assert!(!decision.purchasable);
}

#[test]
fn subscription_pool_follows_reader_spending() {
    let platform = Platform::new();
    let (popular, niche) = (Uuid::new_v4(), Uuid::new_v4());
    let reader = Uuid::new_v4();
    platform.fund(&reader, 100);

    // 30 coins on one writer, 70 on the other.
    for (writer, chapters) in [(niche, 3), (popular, 7)] {
        for _ in 0..chapters {
            let chapter = platform.publish(&writer, ContentType::Chapter);
            platform
                .access
                .purchase(&reader, &chapter, ContentType::Chapter)
                .expect("purchase");
        }
    }
    for _ in 0..4 {
        platform
            .ledger
            .record_subscription_payment(&Uuid::new_v4(), Decimal::new(250, 0), "USD", None)
            .expect("subscription payment");
    }

    let period = (BASE_TIME - 60, BASE_TIME + 60);
    platform.clock.advance(120);
    let result = platform
        .revenue
        .distribute_subscription_pool(period.0, period.1)
        .expect("pool");
    assert_eq!(result.gross_pool, Decimal::new(1_000, 0));
    assert_eq!(result.writer_pool, Decimal::new(650, 0));

    let share = |writer| {
        result
            .splits
            .iter()
            .find(|s| s.writer_id == Some(writer))
            .map(|s| s.writer_share)
    };
    assert_eq!(share(niche), Some(Decimal::new(195, 0)));
    assert_eq!(share(popular), Some(Decimal::new(455, 0)));

    let replay = platform
        .revenue
        .distribute_subscription_pool(period.0, period.1)
        .expect("replay");
    assert!(replay.replayed);
    assert_eq!(replay.splits.len(), 2);
}

#[test]
fn foreign_subscription_payments_are_converted() {
    let platform = Platform::new();
    let (writer, reader) = (Uuid::new_v4(), Uuid::new_v4());
    platform.fund(&reader, 10);
    let chapter = platform.publish(&writer, ContentType::Chapter);
    platform
        .access
        .purchase(&reader, &chapter, ContentType::Chapter)
        .expect("purchase");

    platform.quote("EUR", Decimal::new(110, 2));
    platform
        .ledger
        .record_subscription_payment(&Uuid::new_v4(), Decimal::new(100, 0), "EUR", None)
        .expect("payment");

    let result = platform
        .revenue
        .distribute_subscription_pool(BASE_TIME - 60, BASE_TIME + 60)
        .expect("pool");
    assert_eq!(result.gross_pool, Decimal::new(110, 0));
    assert_eq!(result.splits.len(), 1);
    assert_eq!(result.splits[0].writer_share, Decimal::new(7_150, 2));
}

#[tokio::test]
async fn mislabelled_purchase_is_neither_cheap_nor_unlocking() {
    let platform = Platform::new();
    let (reader, writer) = (Uuid::new_v4(), Uuid::new_v4());
    let story = platform.publish(&writer, ContentType::Story);
    platform.fund(&reader, 10);

    let err = platform
        .access
        .purchase(&reader, &story, ContentType::Chapter)
        .expect_err("story sold as a chapter");
    assert!(matches!(
        err,
        AccessError::ContentTypeMismatch {
            registered: ContentType::Story,
            requested: ContentType::Chapter,
            ..
        }
    ));
    assert_eq!(platform.balance(&reader), 10);

    let decision = platform
        .access
        .check_access(&reader, &story, ContentType::Story)
        .expect("check");
    assert!(!decision.has_access);
    assert_eq!(decision.coins_needed, 90);
    assert_eq!(
        platform.revenue.writer_earnings(&writer).expect("earnings").total_earned,
        Decimal::ZERO
    );
}

#[tokio::test]
async fn bare_content_spend_does_not_buy_access() {
    let platform = Platform::new();
    let (reader, writer) = (Uuid::new_v4(), Uuid::new_v4());
    let exclusive = platform.publish(&writer, ContentType::ExclusiveContent);
    platform.fund(&reader, 251);

    platform
        .ledger
        .debit(
            &reader,
            1,
            TransactionType::CoinSpend,
            TransactionMeta::default().with_content(exclusive),
        )
        .expect("spend");
    let decision = platform
        .access
        .check_access(&reader, &exclusive, ContentType::ExclusiveContent)
        .expect("check");
    assert!(!decision.has_access);
    assert!(decision.purchasable);

    // The real purchase is charged in full and pays the writer.
    let bought = platform
        .access
        .purchase(&reader, &exclusive, ContentType::ExclusiveContent)
        .expect("purchase");
    assert_eq!(bought.coins_spent, 250);
    assert_eq!(platform.balance(&reader), 0);
    assert_eq!(
        platform.revenue.writer_earnings(&writer).expect("earnings").total_earned,
        Decimal::new(175, 2)
    );
    let decision = platform
        .access
        .check_access(&reader, &exclusive, ContentType::ExclusiveContent)
        .expect("check");
    assert_eq!(decision.access_method, Some(AccessMethod::PreviousPurchase));
}
