//! Streaming: one long-lived response, frames written as they queue.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use lumen_protocol::{Packet, PacketType, TransportKind, frame};
use lumen_session::{Binding, SessionId, SessionStore};

use crate::{Flow, Inbound, PacketHandler, TransportAdapter, TransportError};

/// The body of a streaming response: one encoded frame per item.
///
/// The stream owns the session's binding. It ends when the session is
/// closed; dropping it early (the client disconnected) releases the
/// session and puts undelivered packets back in the queue.
pub type PacketStream = BoxStream<'static, Vec<u8>>;

/// Serves the session as a single response that stays open, writing each
/// packet as soon as it is queued.
///
/// When nothing has been queued for a keepalive interval, a `Ping` is
/// sent so intermediaries do not time the response out.
pub struct StreamAdapter<H> {
    inbound: Inbound<H>,
    keepalive: Duration,
}

impl<H: PacketHandler> StreamAdapter<H> {
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

    /// Opens the stream for a session.
    ///
    /// The request body (if any) is processed first. If it closes the
    /// session, the returned stream is empty.
    ///
    /// # Errors
    /// Binding failures, and framing or protocol errors in the body.
    pub async fn open_stream(
        &self,
        session: SessionId,
        body: &[u8],
    ) -> Result<PacketStream, TransportError> {
        let binding = self.open(session)?;
        self.inbound.on_bound(&binding).await;
        if self.inbound.ingest(&binding, body).await? == Flow::Closed {
            return Ok(stream::empty().boxed());
        }
        Ok(frames(binding, self.keepalive))
    }
}

impl<H: PacketHandler> TransportAdapter for StreamAdapter<H> {
    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    fn store(&self) -> &Arc<SessionStore> {
        self.inbound.store()
    }
}

/// Binding plus packets taken from the queue but not yet yielded.
struct Pending {
    binding: Binding,
    packets: VecDeque<Packet>,
}

impl Drop for Pending {
    fn drop(&mut self) {
        let rest: Vec<Packet> = self.packets.drain(..).collect();
        self.binding.requeue(rest);
    }
}

fn frames(binding: Binding, keepalive: Duration) -> PacketStream {
    let pending = Pending {
        binding,
        packets: VecDeque::new(),
    };
    stream::unfold(pending, move |mut pending| async move {
        loop {
            if let Some(packet) = pending.packets.pop_front() {
                match frame::encode(&packet) {
                    Ok(bytes) => return Some((bytes, pending)),
                    Err(e) => {
                        tracing::warn!(
                            session_id = %pending.binding.session_id(),
                            seq = packet.seq,
                            error = %e,
                            "dropping unencodable packet"
                        );
                        continue;
                    }
                }
            }

            let id = pending.binding.session_id();
            match pending.binding.wait_outbound(keepalive).await {
                Ok(packets) if packets.is_empty() => {
                    if pending.binding.store().enqueue(id, PacketType::PING, Vec::new()).is_err() {
                        return None;
                    }
                }
                Ok(packets) => pending.packets.extend(packets),
                Err(_) => {
                    tracing::debug!(session_id = %id, "stream ended with session");
                    return None;
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use lumen_session::{IdGenerator, SessionConfig, SessionState};

    use super::*;
    use crate::Outbox;

    struct Echo;

    impl PacketHandler for Echo {
        async fn on_data(&self, session: SessionId, payload: Vec<u8>, outbox: &Outbox) {
            outbox.send(session, payload).unwrap();
        }
    }

    fn adapter() -> StreamAdapter<Echo> {
        let store = Arc::new(SessionStore::new(
            SessionConfig::default(),
            IdGenerator::seeded(0x300),
        ));
        StreamAdapter::new(Inbound::new(store, Arc::new(Echo)))
            .with_keepalive(Duration::from_secs(15))
    }

    fn next_packet(bytes: Vec<u8>) -> Packet {
        frame::decode(&bytes).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_starts_with_open_ack() {
        let adapter = adapter();
        let id = adapter.store().create().id;

        let mut body = adapter.open_stream(id, &[]).await.unwrap();

        let first = next_packet(body.next().await.unwrap());
        assert_eq!(first.kind, PacketType::OPEN_ACK);
        assert_eq!(first.transport, TransportKind::Stream.code());
    }

    #[tokio::test(start_paused = true)]
    async fn test_packets_stream_as_they_are_sent() {
        let adapter = adapter();
        let id = adapter.store().create().id;
        let mut body = adapter.open_stream(id, &[]).await.unwrap();
        body.next().await.unwrap();

        adapter.send(id, b"one".to_vec()).unwrap();
        adapter.send(id, b"two".to_vec()).unwrap();

        assert_eq!(next_packet(body.next().await.unwrap()).payload, b"one");
        assert_eq!(next_packet(body.next().await.unwrap()).payload, b"two");
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_stream_emits_keepalive_ping() {
        let adapter = adapter();
        let id = adapter.store().create().id;
        let mut body = adapter.open_stream(id, &[]).await.unwrap();
        body.next().await.unwrap();

        let start = tokio::time::Instant::now();
        let ping = next_packet(body.next().await.unwrap());

        assert_eq!(ping.kind, PacketType::PING);
        assert!(start.elapsed() >= Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_ends_when_session_closes() {
        let adapter = adapter();
        let id = adapter.store().create().id;
        let mut body = adapter.open_stream(id, &[]).await.unwrap();
        body.next().await.unwrap();

        adapter.store().remove(id);

        assert!(body.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_stream_releases_and_keeps_undelivered() {
        let adapter = adapter();
        let id = adapter.store().create().id;
        let mut body = adapter.open_stream(id, &[]).await.unwrap();
        body.next().await.unwrap();
        adapter.send(id, b"a".to_vec()).unwrap();
        adapter.send(id, b"b".to_vec()).unwrap();

        // Only `a` reaches the client before it disconnects.
        assert_eq!(next_packet(body.next().await.unwrap()).payload, b"a");
        drop(body);

        let info = adapter.store().get(id).unwrap();
        assert_eq!(info.state, SessionState::Idle);
        assert_eq!(info.queued, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_in_request_body_gives_empty_stream() {
        let adapter = adapter();
        let id = adapter.store().create().id;
        let close = Packet::new(PacketType::CLOSE, TransportKind::Stream, 0, Vec::new());
        let body_bytes = frame::encode(&close).unwrap();

        let mut body = adapter.open_stream(id, &body_bytes).await.unwrap();

        assert!(body.next().await.is_none());
        assert!(!adapter.store().contains(id));
    }
}
