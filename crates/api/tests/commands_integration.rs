//! Command surface against a SQLite queue and a WireMock remote.
//!
//! **Coverage:**
//! - Submit validation and the optimistic dashboard
//! - Drain reports and confirmation of pending rows
//! - Dead letters: listing, skip and retry
//! - Cached view reads and sync status
//! - Entity listings replacing the confirmed base

#![allow(dead_code)]

mod support;

use serde_json::json;
use support::{echo_commit, eventually, TestApp};
use tallysync_app::{
    dashboard_view, drain_now, list_dead_letters, read_view, retry_dead_letter, skip_dead_letter,
    submit_mutation, sync_status,
};
use tallysync_core::RecordStatus;
use tallysync_domain::{ConnectionState, OperationKind, TallySyncError};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test(flavor = "multi_thread")]
async fn submit_validates_kind_and_payload() {
    let app = TestApp::new().await;

    let err = submit_mutation(&app.ctx, "lottery", json!({"amount": 1})).await.unwrap_err();
    assert!(matches!(err, TallySyncError::InvalidInput(_)), "got {err:?}");

    let err = submit_mutation(&app.ctx, "expense", json!([1, 2])).await.unwrap_err();
    assert!(matches!(err, TallySyncError::InvalidInput(_)), "got {err:?}");

    assert_eq!(sync_status(&app.ctx).await.unwrap().pending_count, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn submitted_mutations_show_as_pending_then_confirmed() {
    let app = TestApp::new().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/mutations/[a-z-]+$"))
        .respond_with(echo_commit)
        .expect(2)
        .mount(&app.server)
        .await;
    app.ctx.start().await.unwrap();

    let vehicle =
        submit_mutation(&app.ctx, "vehicle-transaction", json!({"amount": 1200.0, "plate": "KA-01"}))
            .await
            .unwrap();
    submit_mutation(&app.ctx, "expense", json!({"amount": 80.0})).await.unwrap();

    let ctx = &app.ctx;
    eventually("both overlays visible", || ctx.overlay.view().pending_count == 2).await;
    let view = dashboard_view(ctx).await.unwrap();
    assert_eq!(view.records[0].local_id, Some(vehicle.id));
    assert_eq!(view.records[0].status, RecordStatus::Pending);
    assert_eq!(view.totals[&OperationKind::VehicleTransaction], 1200.0);

    let report = drain_now(ctx).await.unwrap();
    assert_eq!(report.committed, 2);
    assert_eq!(report.outcome, "completed");

    eventually("overlays confirmed", || ctx.overlay.view().pending_count == 0).await;
    let view = dashboard_view(ctx).await.unwrap();
    let expected_id = format!("srv-{}", vehicle.idempotency_token);
    assert_eq!(view.records[0].server_id.as_deref(), Some(expected_id.as_str()));
    assert_eq!(view.records[0].status, RecordStatus::Confirmed);
    assert_eq!(view.totals[&OperationKind::Expense], 80.0);
    assert_eq!(sync_status(ctx).await.unwrap().pending_count, 0);

    ctx.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_mutation_is_retried_from_the_dead_letters() {
    let app = TestApp::new().await;
    Mock::given(method("POST"))
        .and(path("/mutations/expense"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"error": "missing receipt"})))
        .up_to_n_times(1)
        .mount(&app.server)
        .await;
    Mock::given(method("POST")).respond_with(echo_commit).mount(&app.server).await;
    app.ctx.start().await.unwrap();

    let expense = submit_mutation(&app.ctx, "expense", json!({"amount": 80.0})).await.unwrap();
    let report = drain_now(&app.ctx).await.unwrap();
    assert_eq!(report.dead_lettered, 1);

    let dead = list_dead_letters(&app.ctx).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, expense.id);
    assert!(dead[0].last_error.as_deref().unwrap_or_default().contains("missing receipt"));
    let status = sync_status(&app.ctx).await.unwrap();
    assert_eq!((status.pending_count, status.dead_letter_count), (0, 1));

    let ctx = &app.ctx;
    eventually("row marked rejected", || {
        matches!(ctx.overlay.view().records.first().map(|r| &r.status), Some(RecordStatus::Rejected { .. }))
    })
    .await;

    let requeued = retry_dead_letter(ctx, expense.id.0).await.unwrap();
    assert!(!requeued.terminal);
    assert_eq!(requeued.idempotency_token, expense.idempotency_token);

    let report = drain_now(ctx).await.unwrap();
    assert_eq!(report.committed, 1);
    assert!(list_dead_letters(ctx).await.unwrap().is_empty());

    ctx.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn skipped_dead_letter_unblocks_its_kind() {
    let app = TestApp::new().await;
    Mock::given(method("POST"))
        .and(path("/mutations/payment"))
        .respond_with(ResponseTemplate::new(400).set_body_string("unknown customer"))
        .up_to_n_times(1)
        .mount(&app.server)
        .await;
    Mock::given(method("POST")).respond_with(echo_commit).mount(&app.server).await;
    app.ctx.start().await.unwrap();

    let bad = submit_mutation(&app.ctx, "payment", json!({"amount": 5.0})).await.unwrap();
    drain_now(&app.ctx).await.unwrap();
    submit_mutation(&app.ctx, "payment", json!({"amount": 7.0})).await.unwrap();

    let report = drain_now(&app.ctx).await.unwrap();
    assert_eq!(report.committed, 0);
    assert_eq!(report.blocked, 1);

    let err = skip_dead_letter(&app.ctx, 9_999).await.unwrap_err();
    assert!(matches!(err, TallySyncError::NotFound(_)), "got {err:?}");

    let skipped = skip_dead_letter(&app.ctx, bad.id.0).await.unwrap();
    assert_eq!(skipped.id, bad.id);
    let report = drain_now(&app.ctx).await.unwrap();
    assert_eq!(report.committed, 1);

    let ctx = &app.ctx;
    eventually("only the later payment remains", || {
        let view = ctx.overlay.view();
        view.pending_count == 0 && view.records.len() == 1
    })
    .await;
    assert_eq!(ctx.overlay.view().totals[&OperationKind::Payment], 7.0);

    ctx.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn read_view_serves_fresh_entries_from_the_cache() {
    let app = TestApp::new().await;
    Mock::given(method("GET"))
        .and(path("/views/summary"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 4})))
        .expect(1)
        .mount(&app.server)
        .await;
    app.ctx.start().await.unwrap();

    assert_eq!(read_view(&app.ctx, "summary").await.unwrap(), json!({"count": 4}));
    assert_eq!(read_view(&app.ctx, " summary ").await.unwrap(), json!({"count": 4}));

    let err = read_view(&app.ctx, "  ").await.unwrap_err();
    assert!(matches!(err, TallySyncError::InvalidInput(_)), "got {err:?}");

    app.ctx.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn entity_listing_becomes_the_confirmed_dashboard_base() {
    let app = TestApp::new().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/views/entity(:|%3A)expense$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"serverId": "srv-1", "kind": "expense", "payload": {"amount": 30.0}, "idempotencyToken": "t1"},
            {"serverId": "srv-2", "kind": "expense", "payload": {"amount": 12.5}, "idempotencyToken": "t2"},
        ])))
        .mount(&app.server)
        .await;
    app.ctx.start().await.unwrap();

    read_view(&app.ctx, "entity:expense").await.unwrap();

    let ctx = &app.ctx;
    eventually("listing folded into base", || ctx.overlay.view().records.len() == 2).await;
    let view = dashboard_view(ctx).await.unwrap();
    assert!(view.records.iter().all(|record| record.status == RecordStatus::Confirmed));
    assert_eq!(view.totals[&OperationKind::Expense], 42.5);

    ctx.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_status_reports_offline_realtime() {
    let app = TestApp::new().await;
    app.ctx.start().await.unwrap();
    submit_mutation(&app.ctx, "scrap-transaction", json!({"amount": 40.0, "weightKg": 120}))
        .await
        .unwrap();

    let status = sync_status(&app.ctx).await.unwrap();
    assert_eq!(status.connection.state, ConnectionState::Disconnected);
    assert_eq!(status.pending_count, 1);
    assert_eq!(status.dead_letter_count, 0);

    app.ctx.shutdown().await.unwrap();
}
