//! Realtime push driving cache invalidation and queue draining.
//!
//! The WebSocket is replaced by a scripted transport so the test decides
//! which frames the server pushes; reads and commits still go over HTTP.

#![allow(dead_code)]

mod support;

use std::time::Duration;

use serde_json::{json, Value};
use support::{echo_commit, eventually, scripted_adapters, test_config, ScriptedTransport};
use tallysync_app::{read_view, submit_mutation, sync_status, AppContext};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedSender;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn connected_app(
    server: &MockServer,
    sync_enabled: bool,
) -> (AppContext, UnboundedSender<String>, TempDir) {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path(), &server.uri());
    config.realtime.enabled = true;
    config.sync.enabled = sync_enabled;

    let (transport, push) = ScriptedTransport::new();
    let adapters = scripted_adapters(&config, transport.clone());
    let ctx = AppContext::with_adapters(config, adapters).await.expect("context should build");
    ctx.start().await.unwrap();

    let channel = ctx.channel.clone();
    eventually("channel connected", || channel.status().is_connected()).await;
    let sent = transport.sent.lock().clone();
    let join: Value = serde_json::from_str(&sent[0]).unwrap();
    assert_eq!(join["type"], "join");
    assert_eq!(join["topic"], ctx.config.realtime.topic.as_str());

    (ctx, push, dir)
}

#[tokio::test(flavor = "multi_thread")]
async fn notification_refreshes_a_cached_view() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/views/summary"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 1})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/views/summary"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 2})))
        .mount(&server)
        .await;
    let (ctx, push, _dir) = connected_app(&server, false).await;

    assert_eq!(read_view(&ctx, "summary").await.unwrap(), json!({"count": 1}));

    let frame = json!({
        "type": "event",
        "event": "created",
        "topic": ctx.config.realtime.topic,
        "payload": {"entity": "expense"},
    });
    push.send(frame.to_string()).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if read_view(&ctx, "summary").await.unwrap() == json!({"count": 2}) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "summary was never refreshed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    ctx.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_sends_submissions_while_connected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mutations/payment"))
        .respond_with(echo_commit)
        .expect(1)
        .mount(&server)
        .await;
    let (ctx, _push, _dir) = connected_app(&server, true).await;

    submit_mutation(&ctx, "payment", json!({"amount": 250.0})).await.unwrap();

    let overlay = ctx.overlay.clone();
    eventually("payment confirmed", || {
        let view = overlay.view();
        view.pending_count == 0 && view.records.len() == 1
    })
    .await;
    let status = sync_status(&ctx).await.unwrap();
    assert!(status.connection.is_connected());
    assert_eq!(status.pending_count, 0);

    ctx.shutdown().await.unwrap();
}
