use axum::http::StatusCode;
use integration_tests::http::{get, post_json, send};
use integration_tests::Harness;
use serde_json::json;

#[tokio::test]
async fn rating_is_created_then_rate_limited() {
    let h = Harness::new().await;
    let a = h.player(1).await;
    let b = h.player(2).await;
    let app = h.app(None);

    let rating = json!({ "rater_id": a.id, "rated_id": b.id, "kind": "like" });
    let (status, body) = send(&app, post_json("/ratings", rating.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["delta"], 1);

    let (status, body) = send(&app, post_json("/ratings", rating)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "denied_by_policy");
    assert_eq!(body["reason"], "too_frequent");

    let (status, body) = send(&app, get(&format!("/players/{}", b.id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance"], 1);
}

#[tokio::test]
async fn exhausted_quota_is_too_many_requests() {
    let h = Harness::new().await;
    h.set_limit(1, 1).await;
    let rater = h.player(1).await;
    let first = h.player(2).await;
    let second = h.player(3).await;
    let app = h.app(None);

    let (status, _) =
        send(&app, post_json("/ratings", json!({ "rater_id": rater.id, "rated_id": first.id, "kind": "dislike" }))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) =
        send(&app, post_json("/ratings", json!({ "rater_id": rater.id, "rated_id": second.id, "kind": "like" }))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["reason"], "quota_exhausted");
}

#[tokio::test]
async fn unknown_rating_kind_is_rejected_by_the_extractor() {
    let h = Harness::new().await;
    let app = h.app(None);

    let (status, _) = send(&app, post_json("/ratings", json!({ "rater_id": 1, "rated_id": 2, "kind": "meh" }))).await;

    assert!(status.is_client_error());
    assert_eq!(h.store.rating_count().await, 0);
}

#[tokio::test]
async fn transfer_endpoint_reports_balances_and_history() {
    let h = Harness::new().await;
    let sender = h.player_at(1, 1, 20).await;
    let receiver = h.player(2).await;
    let app = h.app(None);

    let (status, body) = send(
        &app,
        post_json(
            "/transfers",
            json!({ "sender_id": sender.id, "receiver_id": receiver.id, "amount": 6, "description": "bread" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["sender_balance"], 14);
    assert_eq!(body["receiver_balance"], 6);

    let (status, body) = send(&app, get(&format!("/players/{}/transfers", receiver.id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["description"], "bread");
}

#[tokio::test]
async fn transfer_errors_map_to_status_codes() {
    let h = Harness::new().await;
    let sender = h.player_at(1, 1, 3).await;
    let receiver = h.player(2).await;
    let app = h.app(None);

    let (status, body) =
        send(&app, post_json("/transfers", json!({ "sender_id": sender.id, "receiver_id": receiver.id, "amount": 0 })))
            .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, body) =
        send(&app, post_json("/transfers", json!({ "sender_id": sender.id, "receiver_id": receiver.id, "amount": 4 })))
            .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["reason"], "insufficient_balance");

    let (status, body) =
        send(&app, post_json("/transfers", json!({ "sender_id": sender.id, "receiver_id": 9_999, "amount": 1 }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn unknown_player_is_not_found() {
    let h = Harness::new().await;
    let (status, body) = send(&h.app(None), get("/players/12345")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn active_cycle_appears_after_first_ledger_action() {
    let h = Harness::new().await;
    let app = h.app(None);

    let (status, _) = send(&app, get("/cycles/active")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let cycle = h.ledger.cycles.ensure_active_cycle(&h.config).await.unwrap();
    let (status, body) = send(&app, get("/cycles/active")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cycle_number"], 1);
    assert_eq!(body["id"], cycle.id);
}

#[tokio::test]
async fn last_rating_lookup_reflects_direction() {
    let h = Harness::new().await;
    let a = h.player(1).await;
    let b = h.player(2).await;
    let app = h.app(None);
    send(&app, post_json("/ratings", json!({ "rater_id": a.id, "rated_id": b.id, "kind": "like" }))).await;

    let (status, body) = send(&app, get(&format!("/ratings/last?rater={}&rated={}", a.id, b.id))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["last_rated_at"].is_string());

    let (_, body) = send(&app, get(&format!("/ratings/last?rater={}&rated={}", b.id, a.id))).await;
    assert!(body["last_rated_at"].is_null());
}

#[tokio::test]
async fn profile_link_resolves_to_player() {
    let h = Harness::new().await;
    let player = h.player(5).await;
    let link = h.ledger.players.player_link(player.id).await.unwrap();
    let app = h.app(None);

    let (status, body) = send(&app, get(&format!("/links/{link}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], player.id);

    let (status, _) = send(&app, get("/links/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_and_metrics_are_served() {
    let h = Harness::new().await;
    let a = h.player(1).await;
    let b = h.player(2).await;
    let app = h.app(None);

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    send(&app, post_json("/ratings", json!({ "rater_id": a.id, "rated_id": b.id, "kind": "like" }))).await;
    send(&app, post_json("/ratings", json!({ "rater_id": a.id, "rated_id": a.id, "kind": "like" }))).await;

    let (status, body) = send(&app, get("/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().unwrap();
    assert!(text.contains(r#"ledger_operations_total{operation="rating",outcome="ok"} 1"#));
    assert!(text.contains(r#"ledger_operations_total{operation="rating",outcome="self_action"} 1"#));
}
