//! Exclusive delivery rights to one session.
//!
//! Only the holder of a [`Binding`] can take packets out of a session's
//! outbound queue, and the store hands out at most one binding per
//! session at a time. Two adapters can therefore never drain the same
//! queue concurrently.

use std::sync::Arc;
use std::time::Duration;

use lumen_protocol::{Packet, TransportKind};

use crate::{SessionError, SessionId, SessionStore};

/// Delivery rights held by one transport request or connection.
///
/// Dropping the binding releases it and leaves the session Idle. That
/// drop also runs when an async request handler is cancelled because its
/// peer disconnected, so a vanished client never strands the session.
#[derive(Debug)]
pub struct Binding {
    store: Arc<SessionStore>,
    id: SessionId,
    kind: TransportKind,
    epoch: u64,
    established: bool,
}

impl Binding {
    pub(crate) fn new(
        store: Arc<SessionStore>,
        id: SessionId,
        kind: TransportKind,
        epoch: u64,
        established: bool,
    ) -> Self {
        Self {
            store,
            id,
            kind,
            epoch,
            established,
        }
    }

    /// The bound session.
    pub fn session_id(&self) -> SessionId {
        self.id
    }

    /// The transport holding the rights.
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// `true` if this bind moved the session out of Handshaking.
    pub fn established(&self) -> bool {
        self.established
    }

    /// The store the session lives in.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Takes every queued packet without waiting.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] if the session was closed meanwhile.
    pub fn drain(&self) -> Result<Vec<Packet>, SessionError> {
        self.store
            .take_outbound(self.id, self.kind)
            .map(|(packets, _)| packets)
    }

    /// Takes queued packets, waiting up to `timeout` for the first one.
    ///
    /// Returns as soon as the queue is non-empty, with everything queued
    /// at that moment, or with an empty vector when the timeout elapses.
    /// The wait parks on the session's notifier; no lock is held and no
    /// worker thread is blocked.
    ///
    /// Cancel-safe: if the future is dropped while waiting, nothing has
    /// been taken from the queue.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] if the session is closed before or
    /// during the wait.
    pub async fn wait_outbound(&self, timeout: Duration) -> Result<Vec<Packet>, SessionError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let (packets, notify) = self.store.take_outbound(self.id, self.kind)?;
            if !packets.is_empty() {
                return Ok(packets);
            }
            // A send between `take_outbound` and this point leaves a
            // permit in the notifier, so the wakeup is not lost.
            if tokio::time::timeout_at(deadline, notify.notified())
                .await
                .is_err()
            {
                return Ok(Vec::new());
            }
        }
    }

    /// Returns packets the transport failed to deliver to the front of
    /// the queue, so the next request sees them first and in order.
    pub fn requeue(&self, packets: Vec<Packet>) {
        if !packets.is_empty() {
            self.store.requeue_front(self.id, packets);
        }
    }

    /// Releases the rights now. Same as dropping the binding.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.store.release(self.id, self.epoch);
    }
}

#[cfg(test)]
mod tests {
    use lumen_protocol::PacketType;

    use super::*;
    use crate::{IdGenerator, SessionConfig};

    fn bound(kind: TransportKind) -> (Arc<SessionStore>, Binding) {
        let store = Arc::new(SessionStore::new(
            SessionConfig::default(),
            IdGenerator::seeded(1),
        ));
        let id = store.create().id;
        let binding = store.bind(id, kind).unwrap();
        (store, binding)
    }

    #[test]
    fn test_drain_returns_open_ack_first() {
        let (_store, binding) = bound(TransportKind::Poll);

        let packets = binding.drain().unwrap();

        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].kind, PacketType::OPEN_ACK);
        assert_eq!(packets[0].payload, 1u64.to_be_bytes());
        assert_eq!(packets[0].transport, TransportKind::Poll.code());
    }

    #[test]
    fn test_drain_preserves_fifo_order() {
        let (store, binding) = bound(TransportKind::Poll);
        binding.drain().unwrap();
        for i in 0..5u8 {
            store
                .enqueue(binding.session_id(), PacketType::DATA, vec![i])
                .unwrap();
        }

        let payloads: Vec<Vec<u8>> = binding
            .drain()
            .unwrap()
            .into_iter()
            .map(|p| p.payload)
            .collect();

        assert_eq!(payloads, vec![vec![0], vec![1], vec![2], vec![3], vec![4]]);
        assert!(binding.drain().unwrap().is_empty());
    }

    #[test]
    fn test_requeue_puts_packets_back_in_front() {
        let (store, binding) = bound(TransportKind::Socket);
        let id = binding.session_id();
        let first = binding.drain().unwrap();
        store.enqueue(id, PacketType::DATA, b"later".to_vec()).unwrap();

        binding.requeue(first.clone());

        let again = binding.drain().unwrap();
        assert_eq!(again[0], first[0]);
        assert_eq!(again[1].payload, b"later");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_outbound_times_out_empty() {
        let (_store, binding) = bound(TransportKind::LongPoll);
        binding.drain().unwrap();

        let start = tokio::time::Instant::now();
        let packets = binding.wait_outbound(Duration::from_secs(10)).await.unwrap();

        assert!(packets.is_empty());
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_outbound_wakes_on_enqueue() {
        let (store, binding) = bound(TransportKind::LongPoll);
        binding.drain().unwrap();
        let id = binding.session_id();

        let sender = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            store.enqueue(id, PacketType::DATA, b"wake".to_vec()).unwrap();
        });

        let start = tokio::time::Instant::now();
        let packets = binding.wait_outbound(Duration::from_secs(10)).await.unwrap();

        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload, b"wake");
        assert!(start.elapsed() < Duration::from_secs(10));
        sender.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_outbound_reports_removed_session() {
        let (store, binding) = bound(TransportKind::Stream);
        binding.drain().unwrap();
        let id = binding.session_id();

        let closer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            store.remove(id);
        });

        let result = binding.wait_outbound(Duration::from_secs(10)).await;

        assert!(matches!(result, Err(SessionError::NotFound(_))));
        closer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_releases_binding_and_keeps_queue() {
        let (store, binding) = bound(TransportKind::LongPoll);
        let id = binding.session_id();
        binding.drain().unwrap();

        // The peer goes away half-way through the hold: the request
        // future (and with it the binding) is dropped.
        let held = async move { binding.wait_outbound(Duration::from_secs(30)).await };
        let _ = tokio::time::timeout(Duration::from_secs(1), held).await;

        store.enqueue(id, PacketType::DATA, b"kept".to_vec()).unwrap();
        let info = store.get(id).unwrap();
        assert_eq!(info.bound_transport, None);
        assert_eq!(info.queued, 1);

        let next = store.bind(id, TransportKind::LongPoll).unwrap();
        assert_eq!(next.drain().unwrap()[0].payload, b"kept");
    }
}
