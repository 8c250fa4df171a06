//! Transport adapters for Lumen.
//!
//! One logical session can be carried by four very different transports.
//! Each adapter maps its transport's lifecycle onto the common contract
//! of [`TransportAdapter`]: bind a session, deliver its queued packets,
//! feed the client's packets into the shared [`Inbound`] processor, and
//! release the session when the exchange ends.
//!
//! | Adapter              | Delivery                                   |
//! |----------------------|--------------------------------------------|
//! | [`PollAdapter`]      | returns whatever is queued, immediately    |
//! | [`LongPollAdapter`]  | holds the request until a packet or timeout|
//! | [`StreamAdapter`]    | one long response, frames as they queue    |
//! | [`SocketAdapter`]    | bidirectional frames over a [`Connection`] |
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket connections via `tokio-tungstenite`

mod delivery;
mod error;
mod handler;
mod inbound;
mod long_poll;
mod poll;
mod socket;
mod stream;
#[cfg(feature = "websocket")]
mod websocket;

pub use delivery::Delivery;
pub use error::TransportError;
pub use handler::{Outbox, PacketHandler};
pub use inbound::{Flow, Inbound};
pub use long_poll::LongPollAdapter;
pub use poll::PollAdapter;
pub use socket::SocketAdapter;
pub use stream::{PacketStream, StreamAdapter};
#[cfg(feature = "websocket")]
pub use websocket::{PendingSocket, Refusal, WebSocketConnection, WebSocketListener};

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use lumen_protocol::{Packet, PacketType, TransportKind};
use lumen_session::{Binding, SessionId, SessionStore};

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A single bidirectional connection that sends and receives whole
/// messages.
///
/// The socket adapter reads and writes concurrently, so `send` must not
/// wait for an in-flight `recv` to finish.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends one message to the remote peer.
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next message from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

/// The contract every transport adapter fulfils.
///
/// `open` and `close` bracket one exchange (a request, or a socket's
/// lifetime). Between them the adapter is the only party draining the
/// session's queue.
pub trait TransportAdapter: Send + Sync + 'static {
    /// Which transport this adapter serves.
    fn kind(&self) -> TransportKind;

    /// The store holding the sessions.
    fn store(&self) -> &Arc<SessionStore>;

    /// Binds the session to this transport.
    ///
    /// # Errors
    /// Unknown or expired sessions, and sessions bound elsewhere.
    fn open(&self, session: SessionId) -> Result<Binding, TransportError> {
        Ok(self.store().bind(session, self.kind())?)
    }

    /// Queues a `Data` packet for the session. Push-capable transports
    /// holding the session deliver it as soon as they wake.
    ///
    /// # Errors
    /// Unknown session or full queue.
    fn send(&self, session: SessionId, payload: Vec<u8>) -> Result<u32, TransportError> {
        Ok(self.store().enqueue(session, PacketType::DATA, payload)?)
    }

    /// Ends the exchange. The session stays alive, Idle.
    fn close(&self, binding: Binding) {
        tracing::trace!(session_id = %binding.session_id(), transport = %self.kind(), "adapter closed");
        binding.release();
    }
}

/// Adapters where each HTTP request is one exchange that returns a
/// finite batch of packets.
pub trait PullTransport: TransportAdapter {
    /// The application handler.
    type Handler: PacketHandler;

    /// Shared inbound processing.
    fn inbound(&self) -> &Inbound<Self::Handler>;

    /// Collects the packets this exchange will return.
    fn collect(
        &self,
        binding: &Binding,
    ) -> impl Future<Output = Result<Vec<Packet>, TransportError>> + Send;

    /// Serves one request: bind, process the body's packets, collect the
    /// outbound batch.
    ///
    /// The session stays bound until the returned [`Delivery`] is
    /// acknowledged or dropped. If the body closes the session, the batch
    /// is empty.
    ///
    /// # Errors
    /// Binding failures, and framing or protocol errors in the body
    /// (which close the session).
    fn request(
        &self,
        session: SessionId,
        body: &[u8],
    ) -> impl Future<Output = Result<Delivery, TransportError>> + Send {
        async move {
            let binding = self.open(session)?;
            self.inbound().on_bound(&binding).await;
            if self.inbound().ingest(&binding, body).await? == Flow::Closed {
                return Ok(Delivery::new(binding, Vec::new()));
            }
            let packets = self.collect(&binding).await?;
            tracing::trace!(session_id = %session, transport = %self.kind(), count = packets.len(), "batch collected");
            Ok(Delivery::new(binding, packets))
        }
    }
}
