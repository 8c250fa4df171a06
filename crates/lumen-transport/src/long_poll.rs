//! Long polling: the request is held until something is queued.

use std::sync::Arc;
use std::time::Duration;

use lumen_protocol::{Packet, TransportKind};
use lumen_session::{Binding, SessionStore};

use crate::{Inbound, PacketHandler, PullTransport, TransportAdapter, TransportError};

/// Holds each request open until at least one packet is queued, or
/// until the hold timeout elapses (then the response is empty).
///
/// The wait parks the request's task on the session's notifier. No
/// worker thread is blocked, so thousands of held requests cost only
/// their futures.
pub struct LongPollAdapter<H> {
    inbound: Inbound<H>,
    hold: Duration,
}

impl<H: PacketHandler> LongPollAdapter<H> {
    /// Creates the adapter, holding requests for the store's
    /// `poll_timeout`.
    pub fn new(inbound: Inbound<H>) -> Self {
        let hold = inbound.store().config().poll_timeout;
        Self { inbound, hold }
    }

    /// Overrides how long a request is held.
    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    /// How long a request is held.
    pub fn hold(&self) -> Duration {
        self.hold
    }
}

impl<H: PacketHandler> TransportAdapter for LongPollAdapter<H> {
    fn kind(&self) -> TransportKind {
        TransportKind::LongPoll
    }

    fn store(&self) -> &Arc<SessionStore> {
        self.inbound.store()
    }
}

impl<H: PacketHandler> PullTransport for LongPollAdapter<H> {
    type Handler = H;

    fn inbound(&self) -> &Inbound<H> {
        &self.inbound
    }

    async fn collect(&self, binding: &Binding) -> Result<Vec<Packet>, TransportError> {
        Ok(binding.wait_outbound(self.hold).await?)
    }
}
