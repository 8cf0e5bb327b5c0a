//! Shared test helpers for `tallysync-core` integration tests.
//!
//! A fake remote that honours idempotency tokens and a scripted realtime
//! transport whose connections are driven from the test body.

#![allow(dead_code)]

pub mod remote;
pub mod transport;

use std::time::Duration;

use tallysync_common::BackoffPolicy;
use tallysync_core::RealtimeChannelConfig;
use tallysync_domain::ConnectionStatus;
use tokio::sync::watch;

pub use remote::FakeRemote;
pub use transport::{ScriptedTransport, ServerHandle};

/// Channel config with deterministic delays.
pub fn channel_config(threshold: u32) -> RealtimeChannelConfig {
    RealtimeChannelConfig {
        topic: "tally:updates".into(),
        handshake_timeout: Duration::from_secs(1),
        malformed_threshold: threshold,
        backoff: BackoffPolicy::custom(Duration::from_millis(100), 2.0, Duration::from_secs(2), 0.0)
            .unwrap(),
        join_timeout: Duration::from_secs(1),
        stable_after: Duration::from_secs(1),
    }
}

/// Wait until the channel status satisfies `predicate`.
pub async fn wait_for_status(
    status: &mut watch::Receiver<ConnectionStatus>,
    predicate: impl FnMut(&ConnectionStatus) -> bool,
) -> ConnectionStatus {
    tokio::time::timeout(Duration::from_secs(30), status.wait_for(predicate))
        .await
        .expect("timed out waiting for connection status")
        .expect("status publisher dropped")
        .clone()
}

/// Poll `condition` until it holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
