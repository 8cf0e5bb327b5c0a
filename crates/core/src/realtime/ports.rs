//! Port interfaces for the realtime transport

use async_trait::async_trait;
use tallysync_domain::Result;

/// Opens push connections. The WebSocket adapter lives in `tallysync-infra`.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RealtimeConnection>>;
}

/// One open connection exchanging text frames.
#[async_trait]
pub trait RealtimeConnection: Send {
    async fn send(&mut self, frame: String) -> Result<()>;

    /// Next inbound text frame. `None` once the peer closed the connection.
    async fn recv(&mut self) -> Option<Result<String>>;

    async fn close(&mut self) -> Result<()>;
}
