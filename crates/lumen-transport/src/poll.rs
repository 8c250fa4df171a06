//! Short polling: every request returns immediately.

use std::sync::Arc;

use lumen_protocol::{Packet, TransportKind};
use lumen_session::{Binding, SessionStore};

use crate::{Inbound, PacketHandler, PullTransport, TransportAdapter, TransportError};

/// Returns whatever is queued at request time, possibly nothing.
pub struct PollAdapter<H> {
    inbound: Inbound<H>,
}

impl<H: PacketHandler> PollAdapter<H> {
    /// Creates the adapter.
    pub fn new(inbound: Inbound<H>) -> Self {
        Self { inbound }
    }
}

impl<H: PacketHandler> TransportAdapter for PollAdapter<H> {
    fn kind(&self) -> TransportKind {
        TransportKind::Poll
    }

    fn store(&self) -> &Arc<SessionStore> {
        self.inbound.store()
    }
}

impl<H: PacketHandler> PullTransport for PollAdapter<H> {
    type Handler = H;

    fn inbound(&self) -> &Inbound<H> {
        &self.inbound
    }

    async fn collect(&self, binding: &Binding) -> Result<Vec<Packet>, TransportError> {
        Ok(binding.drain()?)
    }
}
