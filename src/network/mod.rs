//! Network subsystem: one duplex WebSocket channel per session

pub mod connection;
pub mod transport;
pub mod websocket;

pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState};
pub use transport::{Channel, ChannelEvent, Outbound, Transport};
pub use websocket::WebSocketTransport;
