//! Full-duplex sockets: frames flow both ways on one connection.

use std::sync::Arc;
use std::time::Duration;

use lumen_protocol::{Packet, PacketType, TransportKind, frame};
use lumen_session::{Binding, SessionStore};

use crate::{Connection, Flow, Inbound, PacketHandler, TransportAdapter, TransportError};

/// Serves a session over a persistent bidirectional [`Connection`].
///
/// The binding is held for the connection's whole life. Each received
/// message is processed as inbound frames; each queued packet is sent
/// as its own message the moment it is queued.
pub struct SocketAdapter<H> {
    inbound: Inbound<H>,
    keepalive: Duration,
}

impl<H: PacketHandler> SocketAdapter<H> {
    /// Creates the adapter. The keepalive interval is the store's
    /// `poll_timeout`.
    pub fn new(inbound: Inbound<H>) -> Self {
        let keepalive = inbound.store().config().poll_timeout;
        Self { inbound, keepalive }
    }

    /// Overrides the keepalive interval.
    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Runs the connection until either side ends it.
    ///
    /// A peer disconnect or I/O failure is not an error: the session is
    /// released and stays resumable. Packets that could not be written
    /// are put back in the queue.
    ///
    /// # Errors
    /// Framing or protocol errors from the client, which close the
    /// session.
    pub async fn serve<C: Connection>(
        &self,
        binding: Binding,
        conn: C,
    ) -> Result<(), TransportError> {
        let id = binding.session_id();
        tracing::debug!(session_id = %id, conn = %conn.id(), "socket serving session");
        self.inbound.on_bound(&binding).await;

        let result = loop {
            tokio::select! {
                received = conn.recv() => match received {
                    Ok(Some(bytes)) => match self.inbound.ingest(&binding, &bytes).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Closed) => break Ok(()),
                        Err(e) if e.is_session_fatal() => break Err(e),
                        Err(e) => {
                            tracing::warn!(session_id = %id, error = %e, "inbound packet dropped");
                        }
                    },
                    Ok(None) => {
                        tracing::debug!(session_id = %id, "peer closed socket");
                        break Ok(());
                    }
                    Err(e) => {
                        tracing::debug!(session_id = %id, error = %e, "socket receive failed");
                        break Ok(());
                    }
                },
                outbound = binding.wait_outbound(self.keepalive) => match outbound {
                    Ok(packets) if packets.is_empty() => {
                        if let Err(e) = binding.store().enqueue(id, PacketType::PING, Vec::new()) {
                            tracing::debug!(session_id = %id, error = %e, "keepalive not queued");
                        }
                    }
                    Ok(packets) => {
                        if !deliver(&conn, &binding, packets).await {
                            break Ok(());
                        }
                    }
                    Err(_) => {
                        tracing::debug!(session_id = %id, "session closed under socket");
                        break Ok(());
                    }
                },
            }
        };

        if let Err(e) = conn.close().await {
            tracing::trace!(session_id = %id, error = %e, "socket close failed");
        }
        self.close(binding);
        result
    }
}

impl<H: PacketHandler> TransportAdapter for SocketAdapter<H> {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    fn store(&self) -> &Arc<SessionStore> {
        self.inbound.store()
    }
}

/// Writes packets one message each. On a write failure the unsent rest
/// goes back to the front of the queue and `false` is returned.
async fn deliver<C: Connection>(conn: &C, binding: &Binding, packets: Vec<Packet>) -> bool {
    let mut packets = packets.into_iter();
    while let Some(packet) = packets.next() {
        let bytes = match frame::encode(&packet) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(session_id = %binding.session_id(), error = %e, "dropping unencodable packet");
                continue;
            }
        };
        if let Err(e) = conn.send(&bytes).await {
            tracing::debug!(session_id = %binding.session_id(), error = %e, "socket send failed");
            let mut unsent = vec![packet];
            unsent.extend(packets);
            binding.requeue(unsent);
            return false;
        }
    }
    true
}
