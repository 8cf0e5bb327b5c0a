//! WebSocket transport over `tokio-tungstenite`.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tallysync_core::{RealtimeConnection, RealtimeTransport};
use tallysync_domain::{Result, TallySyncError};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

use crate::errors::InfraError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens a fresh WebSocket to a fixed URL on every connect.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: Url,
}

impl WebSocketTransport {
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| TallySyncError::Config(format!("invalid realtime url {url}: {e}")))?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self { url }),
            other => Err(TallySyncError::Config(format!(
                "realtime url must use ws or wss, got {other}"
            ))),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl RealtimeTransport for WebSocketTransport {
    async fn connect(&self) -> Result<Box<dyn RealtimeConnection>> {
        let (socket, response) = connect_async(self.url.as_str()).await.map_err(ws_error)?;
        info!(url = %self.url, status = response.status().as_u16(), "WebSocket connected");
        Ok(Box::new(WebSocketConnection { socket }))
    }
}

/// One open socket. Only text frames reach the caller.
pub struct WebSocketConnection {
    socket: Socket,
}

#[async_trait]
impl RealtimeConnection for WebSocketConnection {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.socket.send(Message::Text(frame)).await.map_err(ws_error)
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.socket.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => {
                    return Some(String::from_utf8(bytes).map_err(|_| {
                        TallySyncError::Protocol("binary frame is not valid UTF-8".into())
                    }));
                }
                // pongs are queued by tungstenite and flushed on the next read or write
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Peer closed the WebSocket");
                    return None;
                }
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return None,
                Err(e) => return Some(Err(ws_error(e))),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self.socket.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(ws_error(e)),
        }
    }
}

fn ws_error(err: WsError) -> TallySyncError {
    TallySyncError::from(InfraError::from(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_only_websocket_schemes() {
        assert!(WebSocketTransport::new("ws://localhost:4000/socket/websocket").is_ok());
        assert!(WebSocketTransport::new("wss://tally.example.com/socket").is_ok());
        assert!(matches!(
            WebSocketTransport::new("http://localhost:4000"),
            Err(TallySyncError::Config(_))
        ));
        assert!(matches!(WebSocketTransport::new("not a url"), Err(TallySyncError::Config(_))));
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = WebSocketTransport::new(&format!("ws://{addr}/socket")).unwrap();
        let result = transport.connect().await;
        assert!(result.is_err());
    }
}
