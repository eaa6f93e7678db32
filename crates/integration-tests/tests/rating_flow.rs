use domains::{AuditLog, DenialReason, ErrorKind, LedgerStore, OperationType, RatingType};
use integration_tests::Harness;
use serde_json::json;
use storage_adapters::FailPoint;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn like_from_higher_level_moves_balance_by_weighted_delta() {
    let h = Harness::new().await;
    let rater = h.player_at(1, 3, 0).await;
    let rated = h.player_at(2, 1, 0).await;

    let outcome = h.ledger.ratings.submit_rating(rater.id, rated.id, RatingType::Like, &h.config).await.unwrap();

    assert_eq!(outcome.delta, 3);
    assert_eq!(h.balance(rated.id).await, 3);
    assert_eq!(h.balance(rater.id).await, 0);
}

#[tokio::test]
async fn weak_dislike_is_clamped_to_minus_one() {
    let h = Harness::new().await;
    let rater = h.player_at(1, 1, 0).await;
    let rated = h.player_at(2, 5, 40).await;

    let outcome = h.ledger.ratings.submit_rating(rater.id, rated.id, RatingType::Dislike, &h.config).await.unwrap();

    assert_eq!(outcome.delta, -1);
    assert_eq!(h.balance(rated.id).await, 39);
}

#[tokio::test]
async fn balance_equals_sum_of_ledger_rows() {
    let h = Harness::new().await;
    let target = h.player_at(100, 2, 10).await;
    let mut expected = 10;
    for (external_id, level, kind) in
        [(1, 1, RatingType::Like), (2, 4, RatingType::Like), (3, 5, RatingType::Dislike), (4, 2, RatingType::Like)]
    {
        let rater = h.player_at(external_id, level, 0).await;
        let outcome = h.ledger.ratings.submit_rating(rater.id, target.id, kind, &h.config).await.unwrap();
        expected += outcome.delta;
    }

    let rows = h.store.ratings_received(target.id).await.unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows.iter().map(|r| r.delta).sum::<i64>() + 10, expected);
    assert_eq!(h.balance(target.id).await, expected);
}

#[tokio::test]
async fn cooldown_blocks_repeat_until_window_passes() {
    let h = Harness::new().await;
    let a = h.player(1).await;
    let b = h.player(2).await;

    assert_ok!(h.ledger.ratings.submit_rating(a.id, b.id, RatingType::Like, &h.config).await);

    h.advance(9);
    let err = h.ledger.ratings.submit_rating(a.id, b.id, RatingType::Dislike, &h.config).await.unwrap_err();
    assert_eq!(err.denial(), Some(DenialReason::TooFrequent));

    // Direction matters: B may still rate A.
    assert_ok!(h.ledger.ratings.submit_rating(b.id, a.id, RatingType::Like, &h.config).await);

    h.advance(1);
    assert_ok!(h.ledger.ratings.submit_rating(a.id, b.id, RatingType::Dislike, &h.config).await);
    assert_eq!(h.store.ratings_received(b.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn cooldown_is_frozen_at_cycle_creation() {
    let mut h = Harness::new().await;
    let a = h.player(1).await;
    let b = h.player(2).await;
    assert_ok!(h.ledger.ratings.submit_rating(a.id, b.id, RatingType::Like, &h.config).await);

    h.ledger.admin.update_rating_timeout(None, 1).await.unwrap();
    h.reload_config().await;
    h.advance(2);

    let err = h.ledger.ratings.submit_rating(a.id, b.id, RatingType::Like, &h.config).await.unwrap_err();
    assert_eq!(err.denial(), Some(DenialReason::TooFrequent));
}

#[tokio::test]
async fn quota_is_per_level_and_per_cycle() {
    let h = Harness::new().await;
    h.set_limit(1, 2).await;
    let rater = h.player(1).await;
    let targets = [h.player(2).await, h.player(3).await, h.player(4).await];

    for target in &targets[..2] {
        assert_ok!(h.ledger.ratings.submit_rating(rater.id, target.id, RatingType::Like, &h.config).await);
    }
    let err = h.ledger.ratings.submit_rating(rater.id, targets[2].id, RatingType::Like, &h.config).await.unwrap_err();
    assert_eq!(err.denial(), Some(DenialReason::QuotaExhausted));

    // A fresh cycle resets the count.
    h.advance(i64::from(h.config.default_cycle_duration_minutes));
    assert_ok!(h.ledger.ratings.submit_rating(rater.id, targets[2].id, RatingType::Like, &h.config).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_never_exceed_quota() {
    let h = Harness::new().await;
    h.set_limit(1, 3).await;
    let rater = h.player(1).await;
    let mut targets = Vec::new();
    for external_id in 2..22 {
        targets.push(h.player(external_id).await);
    }
    // Open the cycle up front so every task races only on the quota.
    h.ledger.cycles.ensure_active_cycle(&h.config).await.unwrap();

    let ledger = h.ledger.clone();
    let tasks: Vec<_> = targets
        .iter()
        .map(|target| {
            let ledger = ledger.clone();
            let config = h.config;
            let (rater_id, rated_id) = (rater.id, target.id);
            tokio::spawn(async move { ledger.ratings.submit_rating(rater_id, rated_id, RatingType::Like, &config).await })
        })
        .collect();

    let mut accepted = 0;
    let mut exhausted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(err) if err.denial() == Some(DenialReason::QuotaExhausted) => exhausted += 1,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
    assert_eq!(accepted, 3);
    assert_eq!(exhausted, 17);
    assert_eq!(h.store.rating_count().await, 3);
}

#[tokio::test]
async fn self_rating_is_denied_without_side_effects() {
    let h = Harness::new().await;
    let a = h.player(1).await;

    let err = h.ledger.ratings.submit_rating(a.id, a.id, RatingType::Like, &h.config).await.unwrap_err();

    assert_eq!(err.denial(), Some(DenialReason::SelfAction));
    assert_eq!(h.store.rating_count().await, 0);
    assert_eq!(h.balance(a.id).await, 0);
}

#[tokio::test]
async fn unknown_target_is_not_found() {
    let h = Harness::new().await;
    let a = h.player(1).await;

    let err = assert_err!(h.ledger.ratings.submit_rating(a.id, 9_999, RatingType::Like, &h.config).await);
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(h.store.rating_count().await, 0);
}

#[tokio::test]
async fn storage_failure_rolls_back_the_ledger_row() {
    let h = Harness::new().await;
    let a = h.player(1).await;
    let b = h.player(2).await;
    h.ledger.cycles.ensure_active_cycle(&h.config).await.unwrap();

    h.store.fail_once(FailPoint::AdjustBalance);
    let err = h.ledger.ratings.submit_rating(a.id, b.id, RatingType::Like, &h.config).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Persistence);
    assert_eq!(h.store.rating_count().await, 0);
    assert_eq!(h.balance(b.id).await, 0);
    // The failed attempt must not start a cooldown.
    assert_ok!(h.ledger.ratings.submit_rating(a.id, b.id, RatingType::Like, &h.config).await);
}

#[tokio::test]
async fn accepted_rating_is_audited() {
    let h = Harness::new().await;
    let a = h.player_at(1, 2, 0).await;
    let b = h.player_at(2, 1, 0).await;

    h.ledger.ratings.submit_rating(a.id, b.id, RatingType::Dislike, &h.config).await.unwrap();

    let ops = h.store.recent_operations(1).await.unwrap();
    assert_eq!(ops[0].operation_type, OperationType::RatingDislike);
    assert_eq!(ops[0].initiator_id, Some(a.id));
    assert_eq!(ops[0].target_id, Some(b.id));
    assert_eq!(ops[0].details, json!({ "rating_change": -2, "rater_level": 2, "rated_level": 1 }));
}

#[tokio::test]
async fn audit_failure_does_not_undo_the_rating() {
    let h = Harness::new().await;
    let a = h.player(1).await;
    let b = h.player(2).await;

    h.store.fail_once(FailPoint::LogOperation);
    assert_ok!(h.ledger.ratings.submit_rating(a.id, b.id, RatingType::Like, &h.config).await);

    assert_eq!(h.balance(b.id).await, 1);
    assert!(h.store.recent_operations(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn cancelled_submission_leaves_no_trace() {
    let h = Harness::new().await;
    let a = h.player(1).await;
    let b = h.player(2).await;
    h.ledger.cycles.ensure_active_cycle(&h.config).await.unwrap();

    // Hold the store so the submission parks before it can write anything.
    let blocker = h.store.begin().await.unwrap();
    let ledger = h.ledger.clone();
    let config = h.config;
    let (rater_id, rated_id) = (a.id, b.id);
    let task =
        tokio::spawn(async move { ledger.ratings.submit_rating(rater_id, rated_id, RatingType::Like, &config).await });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    task.abort();
    drop(blocker);

    assert!(task.await.unwrap_err().is_cancelled());
    assert_eq!(h.store.rating_count().await, 0);
    assert_eq!(h.balance(b.id).await, 0);
}
