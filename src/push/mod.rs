mod client;
mod transport;

pub use client::{ConnectionState, EventHandler, PushCallbacks, PushClient};
pub use transport::{ConnectFuture, Transport, TransportLink, WebSocketTransport};
