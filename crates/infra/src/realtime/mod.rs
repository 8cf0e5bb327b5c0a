//! Realtime transport adapters

mod websocket;

pub use websocket::{WebSocketConnection, WebSocketTransport};
