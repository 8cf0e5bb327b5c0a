use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tallysync_app::{Adapters, AppContext};
use tallysync_common::SystemClock;
use tallysync_core::{RealtimeConnection, RealtimeTransport};
use tallysync_domain::{Config, Result, TallySyncError};
use tallysync_infra::HttpRemoteApi;
use tempfile::TempDir;
use tokio::sync::mpsc;
use wiremock::{MockServer, Request, ResponseTemplate};

/// Config for a context on `dir` talking to `remote`, with every background
/// loop switched off so tests drive the engine explicitly.
pub fn test_config(dir: &Path, remote: &str) -> Config {
    let mut config = Config::default();
    config.database.path = dir.join("tallysync.db");
    config.database.pool_size = 4;
    config.sync.enabled = false;
    config.realtime.enabled = false;
    config.remote.base_url = remote.to_owned();
    config.remote.bearer_token = None;
    config.remote.request_timeout_ms = 2_000;
    config.cache.refresh_debounce_ms = 10;
    config
}

/// A context, its database directory and the remote it talks to.
pub struct TestApp {
    pub ctx: AppContext,
    pub server: MockServer,
    pub dir: TempDir,
}

impl TestApp {
    /// Context with production adapters against a fresh WireMock server.
    pub async fn new() -> Self {
        let server = MockServer::start().await;
        let dir = TempDir::new().expect("temp dir should be created");
        let ctx = AppContext::new(test_config(dir.path(), &server.uri()))
            .await
            .expect("context should build");
        Self { ctx, server, dir }
    }

    /// Shut the context down and build a new one on the same database.
    pub async fn restart(self) -> Self {
        let Self { ctx, server, dir } = self;
        ctx.shutdown().await.expect("shutdown should succeed");
        drop(ctx);
        let ctx = AppContext::new(test_config(dir.path(), &server.uri()))
            .await
            .expect("context should rebuild");
        Self { ctx, server, dir }
    }
}

/// Echo the committed mutation back with a server id derived from its token.
pub fn echo_commit(req: &Request) -> ResponseTemplate {
    let body: Value = serde_json::from_slice(&req.body).unwrap_or_default();
    let token = body["idempotencyToken"].as_str().unwrap_or_default();
    ResponseTemplate::new(201).set_body_json(json!({
        "committed": {
            "serverId": format!("srv-{token}"),
            "kind": body["kind"],
            "payload": body["payload"],
            "idempotencyToken": token,
        }
    }))
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Realtime transport whose single connection is fed by the test.
pub struct ScriptedTransport {
    inbound: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    pub sent: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport =
            Arc::new(Self { inbound: Mutex::new(Some(rx)), sent: Arc::new(Mutex::new(Vec::new())) });
        (transport, tx)
    }
}

#[async_trait]
impl RealtimeTransport for ScriptedTransport {
    async fn connect(&self) -> Result<Box<dyn RealtimeConnection>> {
        let inbound = self
            .inbound
            .lock()
            .take()
            .ok_or_else(|| TallySyncError::Network("scripted transport already used".into()))?;
        Ok(Box::new(ScriptedConnection { inbound, sent: Arc::clone(&self.sent) }))
    }
}

struct ScriptedConnection {
    inbound: mpsc::UnboundedReceiver<String>,
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl RealtimeConnection for ScriptedConnection {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.sent.lock().push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// HTTP remote at `server` plus a scripted realtime transport.
pub fn scripted_adapters(config: &Config, transport: Arc<ScriptedTransport>) -> Adapters {
    let remote = Arc::new(HttpRemoteApi::new(&config.remote).expect("remote api should build"));
    Adapters { commit: remote.clone(), read: remote, transport, clock: Arc::new(SystemClock) }
}
