//! Reconnecting push channel
//!
//! [`RealtimeChannel`] drives the `Disconnected -> Connecting -> Connected`
//! cycle over a [`RealtimeTransport`], rejoins its topic on every connect and
//! republishes decoded notifications on a typed bus.

pub mod channel;
pub mod ports;
pub mod protocol;

pub use channel::{RealtimeChannel, RealtimeChannelConfig};
pub use ports::{RealtimeConnection, RealtimeTransport};
pub use protocol::{Inbound, ProtocolError};
