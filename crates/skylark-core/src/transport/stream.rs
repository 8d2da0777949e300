//! Streaming connection ports.
//!
//! A connector opens one WebSocket-like connection carrying JSON text
//! frames. Channel (un)subscription is expressed as frames sent over the
//! connection, see [`crate::stream::frame`].

use std::future::Future;

use skylark_types::error::TransportError;

/// Opens streaming connections to the remote instance.
pub trait StreamConnector: Send + Sync + 'static {
    type Connection: StreamConnection;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// One live connection. Text frames only; transport-level pings are handled
/// by the implementation.
pub trait StreamConnection: Send + 'static {
    fn send_text(&mut self, text: String)
    -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Next inbound text frame. `None` means the remote closed the connection.
    fn recv_text(&mut self) -> impl Future<Output = Option<Result<String, TransportError>>> + Send;

    /// Close the connection politely. Errors are ignored.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
