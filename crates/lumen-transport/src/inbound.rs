//! Client-to-server packet processing shared by every adapter.
//!
//! Whatever carried the bytes (a POST body, a WebSocket message), they
//! go through the same steps:
//!
//! 1. split into frames (`decode_all`)
//! 2. check each frame is tagged with the transport it arrived on
//! 3. track the receive sequence
//! 4. act on the packet type
//!
//! Framing and protocol errors close the session. The client has to
//! handshake again.

use std::sync::Arc;

use lumen_protocol::{Packet, PacketType, ProtocolError, frame};
use lumen_session::{Binding, SeqCheck, SessionId, SessionStore};

use crate::{Outbox, PacketHandler, TransportError};

/// What the adapter should do after inbound bytes were processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep serving the session.
    Continue,
    /// The session was closed by the client. Stop.
    Closed,
}

/// Inbound processing state shared by the adapters of one server.
pub struct Inbound<H> {
    store: Arc<SessionStore>,
    handler: Arc<H>,
    outbox: Outbox,
}

impl<H> Clone for Inbound<H> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            handler: Arc::clone(&self.handler),
            outbox: self.outbox.clone(),
        }
    }
}

impl<H: PacketHandler> Inbound<H> {
    /// Creates the processor for a store and an application handler.
    pub fn new(store: Arc<SessionStore>, handler: Arc<H>) -> Self {
        let outbox = Outbox::new(Arc::clone(&store));
        Self {
            store,
            handler,
            outbox,
        }
    }

    /// The session store.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// The outbox handed to the application handler.
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Runs the application's open hook if this binding established the
    /// session.
    pub async fn on_bound(&self, binding: &Binding) {
        if binding.established() {
            self.handler
                .on_open(binding.session_id(), &self.outbox)
                .await;
        }
    }

    /// Processes a body holding zero or more concatenated frames.
    ///
    /// # Errors
    /// On malformed bytes or an invalid packet the session is closed
    /// and the cause is returned.
    pub async fn ingest(&self, binding: &Binding, body: &[u8]) -> Result<Flow, TransportError> {
        let packets = match frame::decode_all(body) {
            Ok(packets) => packets,
            Err(e) => return Err(self.abort(binding, e.into()).await),
        };
        for packet in packets {
            if self.ingest_packet(binding, packet).await? == Flow::Closed {
                return Ok(Flow::Closed);
            }
        }
        Ok(Flow::Continue)
    }

    /// Processes one decoded packet.
    ///
    /// # Errors
    /// See [`ingest`](Self::ingest). Session-layer errors (such as a full
    /// queue when answering a ping) are returned without closing.
    pub async fn ingest_packet(
        &self,
        binding: &Binding,
        packet: Packet,
    ) -> Result<Flow, TransportError> {
        let id = binding.session_id();
        if packet.transport != binding.kind().code() {
            let err = TransportError::TransportMismatch {
                expected: binding.kind(),
                actual: packet.transport,
            };
            return Err(self.abort(binding, err).await);
        }

        if let SeqCheck::Gap { expected, received } = self.store.record_inbound(id, packet.seq)? {
            tracing::warn!(session_id = %id, expected, received, "inbound sequence gap");
        }

        match packet.kind {
            PacketType::DATA => {
                self.handler.on_data(id, packet.payload, &self.outbox).await;
            }
            PacketType::PING => {
                self.store.enqueue(id, PacketType::PONG, packet.payload)?;
            }
            PacketType::PONG => {}
            PacketType::CLOSE => {
                tracing::debug!(session_id = %id, "client closed session");
                self.close_session(id).await;
                return Ok(Flow::Closed);
            }
            other => {
                let err = ProtocolError::InvalidPacket(format!(
                    "client may not send packet type {other}"
                ));
                return Err(self.abort(binding, err.into()).await);
            }
        }
        Ok(Flow::Continue)
    }

    async fn abort(&self, binding: &Binding, err: TransportError) -> TransportError {
        let id = binding.session_id();
        tracing::warn!(session_id = %id, transport = %binding.kind(), error = %err, "closing session");
        self.close_session(id).await;
        err
    }

    async fn close_session(&self, id: SessionId) {
        if self.store.remove(id).is_some() {
            self.handler.on_close(id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use lumen_protocol::TransportKind;
    use lumen_session::{IdGenerator, SessionConfig, SessionError};

    use super::*;

    /// Records every callback it receives.
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl PacketHandler for Recorder {
        async fn on_open(&self, session: SessionId, _outbox: &Outbox) {
            self.events.lock().unwrap().push(format!("open {session}"));
        }

        async fn on_data(&self, _session: SessionId, payload: Vec<u8>, _outbox: &Outbox) {
            let text = String::from_utf8_lossy(&payload).into_owned();
            self.events.lock().unwrap().push(format!("data {text}"));
        }

        async fn on_close(&self, session: SessionId) {
            self.events.lock().unwrap().push(format!("close {session}"));
        }
    }

    fn setup(kind: TransportKind) -> (Inbound<Recorder>, Arc<Recorder>, Binding) {
        let store = Arc::new(SessionStore::new(
            SessionConfig::default(),
            IdGenerator::seeded(0x10),
        ));
        let handler = Arc::new(Recorder::default());
        let inbound = Inbound::new(Arc::clone(&store), Arc::clone(&handler));
        let id = store.create().id;
        let binding = store.bind(id, kind).unwrap();
        binding.drain().unwrap();
        (inbound, handler, binding)
    }

    fn body(packets: &[Packet]) -> Vec<u8> {
        frame::encode_all(packets).unwrap()
    }

    #[tokio::test]
    async fn test_on_bound_fires_open_once() {
        let (inbound, handler, binding) = setup(TransportKind::Poll);
        let id = binding.session_id();

        inbound.on_bound(&binding).await;
        drop(binding);
        let again = inbound.store().bind(id, TransportKind::Poll).unwrap();
        inbound.on_bound(&again).await;

        assert_eq!(handler.events(), vec![format!("open {id}")]);
    }

    #[tokio::test]
    async fn test_ingest_delivers_data_in_order() {
        let (inbound, handler, binding) = setup(TransportKind::Poll);
        let packets = [
            Packet::data(TransportKind::Poll, 0, b"a".to_vec()),
            Packet::data(TransportKind::Poll, 1, b"b".to_vec()),
        ];

        let flow = inbound.ingest(&binding, &body(&packets)).await.unwrap();

        assert_eq!(flow, Flow::Continue);
        assert_eq!(handler.events(), vec!["data a", "data b"]);
    }

    #[tokio::test]
    async fn test_ingest_empty_body_is_noop() {
        let (inbound, handler, binding) = setup(TransportKind::LongPoll);

        let flow = inbound.ingest(&binding, &[]).await.unwrap();

        assert_eq!(flow, Flow::Continue);
        assert!(handler.events().is_empty());
    }

    #[tokio::test]
    async fn test_ping_is_answered_with_pong_echo() {
        let (inbound, _handler, binding) = setup(TransportKind::Poll);
        let ping = Packet::new(PacketType::PING, TransportKind::Poll, 0, b"t1".to_vec());

        inbound.ingest(&binding, &body(&[ping])).await.unwrap();

        let out = binding.drain().unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, PacketType::PONG);
        assert_eq!(out[0].payload, b"t1");
    }

    #[tokio::test]
    async fn test_close_packet_removes_session() {
        let (inbound, handler, binding) = setup(TransportKind::Socket);
        let id = binding.session_id();
        let close = Packet::new(PacketType::CLOSE, TransportKind::Socket, 0, Vec::new());

        let flow = inbound.ingest(&binding, &body(&[close])).await.unwrap();

        assert_eq!(flow, Flow::Closed);
        assert!(!inbound.store().contains(id));
        assert_eq!(handler.events(), vec![format!("close {id}")]);
    }

    #[tokio::test]
    async fn test_truncated_body_closes_session() {
        let (inbound, handler, binding) = setup(TransportKind::Poll);
        let id = binding.session_id();
        let mut bytes = body(&[Packet::data(TransportKind::Poll, 0, b"hello".to_vec())]);
        bytes.truncate(bytes.len() - 2);

        let err = inbound.ingest(&binding, &bytes).await.unwrap_err();

        assert!(matches!(err, TransportError::Framing(_)));
        assert!(!inbound.store().contains(id));
        assert_eq!(handler.events(), vec![format!("close {id}")]);
    }

    #[tokio::test]
    async fn test_wrong_transport_code_closes_session() {
        let (inbound, _handler, binding) = setup(TransportKind::LongPoll);
        let id = binding.session_id();
        let packet = Packet::data(TransportKind::Poll, 0, b"x".to_vec());

        let err = inbound.ingest(&binding, &body(&[packet])).await.unwrap_err();

        assert!(matches!(
            err,
            TransportError::TransportMismatch { expected: TransportKind::LongPoll, actual: 1 }
        ));
        assert!(!inbound.store().contains(id));
    }

    #[tokio::test]
    async fn test_client_open_ack_is_protocol_error() {
        let (inbound, _handler, binding) = setup(TransportKind::Poll);
        let packet = Packet::new(PacketType::OPEN_ACK, TransportKind::Poll, 0, Vec::new());

        let err = inbound.ingest(&binding, &body(&[packet])).await.unwrap_err();

        assert!(matches!(err, TransportError::Protocol(_)));
        assert!(err.is_session_fatal());
    }

    #[tokio::test]
    async fn test_sequence_gap_is_tolerated() {
        let (inbound, handler, binding) = setup(TransportKind::Poll);
        let packets = [
            Packet::data(TransportKind::Poll, 0, b"a".to_vec()),
            Packet::data(TransportKind::Poll, 5, b"b".to_vec()),
            Packet::data(TransportKind::Poll, 6, b"c".to_vec()),
        ];

        inbound.ingest(&binding, &body(&packets)).await.unwrap();

        assert_eq!(handler.events(), vec!["data a", "data b", "data c"]);
        let info = inbound.store().get(binding.session_id()).unwrap();
        assert_eq!(info.expected_recv_seq, 7);
    }

    #[tokio::test]
    async fn test_ingest_on_removed_session_is_not_found() {
        let (inbound, _handler, binding) = setup(TransportKind::Poll);
        inbound.store().remove(binding.session_id());
        let packet = Packet::data(TransportKind::Poll, 0, b"late".to_vec());

        let err = inbound.ingest(&binding, &body(&[packet])).await.unwrap_err();

        assert!(matches!(err, TransportError::Session(SessionError::NotFound(_))));
    }
}
