//! Outbound batches of pull requests, held until the response is written.

use std::mem;

use lumen_protocol::{Packet, TransportKind};
use lumen_session::{Binding, SessionId};

/// The packets one poll or long-poll request collected.
///
/// The session stays bound to the request until the batch is
/// [acknowledged](Self::acknowledge), which the HTTP layer does once the
/// response body has been written. Dropping an unacknowledged batch (the
/// write failed, or the peer went away first) puts its packets back at
/// the front of the session's queue for the next request.
#[derive(Debug)]
pub struct Delivery {
    binding: Binding,
    packets: Vec<Packet>,
}

impl Delivery {
    pub(crate) fn new(binding: Binding, packets: Vec<Packet>) -> Self {
        Self { binding, packets }
    }

    /// The session the batch belongs to.
    pub fn session_id(&self) -> SessionId {
        self.binding.session_id()
    }

    /// The transport that collected the batch.
    pub fn kind(&self) -> TransportKind {
        self.binding.kind()
    }

    /// The packets, in queue order.
    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    /// `true` if nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Marks the batch delivered and releases the session.
    ///
    /// Returns the packets.
    pub fn acknowledge(mut self) -> Vec<Packet> {
        mem::take(&mut self.packets)
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.packets.is_empty() {
            tracing::debug!(
                session_id = %self.binding.session_id(),
                count = self.packets.len(),
                "unacknowledged batch requeued"
            );
            self.binding.requeue(mem::take(&mut self.packets));
        }
    }
}
