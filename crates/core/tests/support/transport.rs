use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tallysync_core::{RealtimeConnection, RealtimeTransport};
use tallysync_domain::{Result, TallySyncError};
use tokio::sync::mpsc;
use tokio::time::Instant;

enum Plan {
    Refuse(String),
    Accept(Accepted),
}

struct Accepted {
    frames: mpsc::UnboundedReceiver<String>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

/// Transport whose connect outcomes are queued by the test.
///
/// With nothing queued, connects are refused.
#[derive(Default)]
pub struct ScriptedTransport {
    plans: Mutex<VecDeque<Plan>>,
    attempts: Mutex<Vec<Instant>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Refuse the next connect.
    pub fn refuse_next(&self, reason: &str) {
        self.plans.lock().push_back(Plan::Refuse(reason.to_owned()));
    }

    /// Accept the next connect; the handle plays the server side.
    pub fn accept_next(&self) -> ServerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        self.plans.lock().push_back(Plan::Accept(Accepted {
            frames: rx,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        }));
        ServerHandle { frames: Some(tx), sent, closed }
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl RealtimeTransport for ScriptedTransport {
    async fn connect(&self) -> Result<Box<dyn RealtimeConnection>> {
        self.attempts.lock().push(Instant::now());
        match self.plans.lock().pop_front() {
            Some(Plan::Accept(accepted)) => Ok(Box::new(ScriptedConnection {
                frames: accepted.frames,
                sent: accepted.sent,
                closed: accepted.closed,
            })),
            Some(Plan::Refuse(reason)) => Err(TallySyncError::ConnectionLost(reason)),
            None => Err(TallySyncError::ConnectionLost("connection refused".into())),
        }
    }
}

struct ScriptedConnection {
    frames: mpsc::UnboundedReceiver<String>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl RealtimeConnection for ScriptedConnection {
    async fn send(&mut self, text: String) -> Result<()> {
        self.sent.lock().push(text);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        self.frames.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Server side of one accepted connection.
pub struct ServerHandle {
    frames: Option<mpsc::UnboundedSender<String>>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl ServerHandle {
    pub fn push(&self, frame: impl Into<String>) {
        if let Some(frames) = &self.frames {
            let _ = frames.send(frame.into());
        }
    }

    pub fn notify(&self, event: &str, payload: Value) {
        self.push(
            json!({"type": "event", "event": event, "topic": "tally:updates", "payload": payload})
                .to_string(),
        );
    }

    /// Drop the connection from the server side.
    pub fn hang_up(&mut self) {
        self.frames = None;
    }

    /// Frames the client sent on this connection.
    pub fn received(&self) -> Vec<Value> {
        self.sent.lock().iter().filter_map(|text| serde_json::from_str(text).ok()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
