//! Application hook for packets arriving from clients.
//!
//! Lumen does not interpret payloads. The embedding application
//! implements [`PacketHandler`] and receives every `Data` payload along
//! with an [`Outbox`] it can use to answer, now or later.

use std::future::Future;
use std::sync::Arc;

use lumen_protocol::PacketType;
use lumen_session::{SessionError, SessionId, SessionStore};

/// Receives session events from every transport.
///
/// Methods return `Send` futures because they run inside request tasks
/// that Tokio may move between worker threads. Implementors can still
/// write them as `async fn`.
///
/// # Example
///
/// ```rust
/// use lumen_session::SessionId;
/// use lumen_transport::{Outbox, PacketHandler};
///
/// /// Sends every payload straight back to its sender.
/// struct Echo;
///
/// impl PacketHandler for Echo {
///     async fn on_data(&self, session: SessionId, payload: Vec<u8>, outbox: &Outbox) {
///         let _ = outbox.send(session, payload);
///     }
/// }
/// ```
pub trait PacketHandler: Send + Sync + 'static {
    /// A session was bound for the first time.
    fn on_open(
        &self,
        _session: SessionId,
        _outbox: &Outbox,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// A client delivered a `Data` packet.
    fn on_data(
        &self,
        session: SessionId,
        payload: Vec<u8>,
        outbox: &Outbox,
    ) -> impl Future<Output = ()> + Send;

    /// The session was closed by the client or by a protocol error.
    ///
    /// Not called for sessions that simply expire.
    fn on_close(&self, _session: SessionId) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Handle for pushing packets to any session.
///
/// Cheap to clone; an application can keep one and send from anywhere.
#[derive(Debug, Clone)]
pub struct Outbox {
    store: Arc<SessionStore>,
}

impl Outbox {
    /// Wraps a store.
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    /// Queues a `Data` packet for the session and wakes its transport.
    ///
    /// Returns the packet's sequence number.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] if the session is gone,
    /// [`SessionError::QueueFull`] if the client is not keeping up.
    pub fn send(&self, session: SessionId, payload: Vec<u8>) -> Result<u32, SessionError> {
        self.store.enqueue(session, PacketType::DATA, payload)
    }

    /// Closes the session from the server side.
    ///
    /// Returns `false` if it was already gone.
    pub fn close(&self, session: SessionId) -> bool {
        self.store.remove(session).is_some()
    }
}
