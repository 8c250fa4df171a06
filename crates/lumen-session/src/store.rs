//! The session store: a sharded table of every live session.
//!
//! # Concurrency
//!
//! The workload is many short, concurrent requests, each doing one or two
//! lookups. A single lock over one map would serialize all of them, so
//! the table is split into `N` shards (a power of two), each a `HashMap`
//! behind its own `RwLock`. A session lives in shard `id & (N - 1)`:
//! picking a shard is one mask, and two requests contend only when their
//! ids share the low bits. Because ids come from a sequential counter,
//! consecutive sessions land in consecutive shards.
//!
//! Shard locks are `std::sync::RwLock` and are never held across an
//! `.await`. Waiting for packets happens on the session's
//! [`Notify`](tokio::sync::Notify) after the lock is dropped.
//!
//! Id generation is separate: one shared [`IdGenerator`], lock-free.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use lumen_protocol::{Packet, PacketType, TransportKind};
use tokio::sync::Notify;

use crate::session::{BindingSlot, Session};
use crate::{
    Binding, IdGenerator, SessionConfig, SessionError, SessionId, SessionInfo,
    SessionState,
};

type Shard = RwLock<HashMap<SessionId, Session>>;

/// Result of checking an inbound sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqCheck {
    /// The packet carried exactly the expected number.
    InOrder,
    /// Packets were lost or reordered. The expectation has been moved to
    /// `received + 1`; nothing is retransmitted.
    Gap {
        /// What the store expected.
        expected: u32,
        /// What the packet carried.
        received: u32,
    },
}

/// What one [`SessionStore::sweep_expired`] pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Handshaking sessions whose establishment window ran out.
    pub unestablished: Vec<SessionId>,
    /// Unbound Active sessions moved to Idle.
    pub idled: Vec<SessionId>,
    /// Idle sessions closed and removed.
    pub closed: Vec<SessionId>,
}

impl SweepReport {
    /// Number of sessions removed by the pass.
    pub fn removed(&self) -> usize {
        self.unestablished.len() + self.closed.len()
    }
}

/// Concurrent map from [`SessionId`] to session state.
///
/// Shared as `Arc<SessionStore>` between the negotiator, every transport
/// adapter, and the sweeper task.
///
/// ## Lifecycle
///
/// ```text
/// create() ──→ bind() ──→ Binding dropped ──→ sweep_expired() ──→ removed
///   [Handshaking]  [Active]      [Idle]          (close timeout)
///                     ↑             │
///                     └── bind() ───┘
/// ```
#[derive(Debug)]
pub struct SessionStore {
    shards: Box<[Shard]>,
    mask: u64,
    ids: IdGenerator,
    config: SessionConfig,
}

impl SessionStore {
    /// Creates an empty store with the given config and id generator.
    pub fn new(config: SessionConfig, ids: IdGenerator) -> Self {
        let config = config.validated();
        let shards = (0..config.shards)
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        Self {
            shards,
            mask: (config.shards - 1) as u64,
            ids,
            config,
        }
    }

    /// Creates an empty store whose ids are seeded from the OS RNG.
    ///
    /// # Errors
    /// [`SessionError::RandomnessUnavailable`]; fatal for startup.
    pub fn with_os_rng(config: SessionConfig) -> Result<Self, SessionError> {
        Ok(Self::new(config, IdGenerator::from_os_rng()?))
    }

    /// The validated configuration in effect.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    fn shard(&self, id: SessionId) -> &Shard {
        &self.shards[(id.0 & self.mask) as usize]
    }

    // A panic while a shard lock is held cannot leave a half-applied
    // change visible (every mutation is a single assignment or a
    // map insert/remove), so a poisoned lock is still usable.
    fn read(&self, id: SessionId) -> RwLockReadGuard<'_, HashMap<SessionId, Session>> {
        self.shard(id).read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, id: SessionId) -> RwLockWriteGuard<'_, HashMap<SessionId, Session>> {
        self.shard(id).write().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_session<T>(
        &self,
        id: SessionId,
        f: impl FnOnce(&mut Session) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        let mut shard = self.write(id);
        let session = shard.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        f(session)
    }

    /// Registers a new Handshaking session under a fresh id.
    pub fn create(&self) -> SessionInfo {
        let now = Instant::now();
        loop {
            let id = self.ids.next_id();
            let mut shard = self.write(id);
            // Occupied only if the 64-bit counter has wrapped onto a
            // session that is still alive; skip to the next id.
            let inserted = match shard.entry(id) {
                Entry::Vacant(slot) => Some(slot.insert(Session::new(id, now)).info()),
                Entry::Occupied(_) => None,
            };
            drop(shard);
            if let Some(info) = inserted {
                tracing::info!(session_id = %id, "session created");
                return info;
            }
        }
    }

    /// Read-only lookup.
    ///
    /// `None` for ids that never existed, expired, or were closed.
    pub fn get(&self, id: SessionId) -> Option<SessionInfo> {
        self.read(id).get(&id).map(Session::info)
    }

    /// Returns `true` if the session exists.
    pub fn contains(&self, id: SessionId) -> bool {
        self.read(id).contains_key(&id)
    }

    /// Records activity. An Idle session becomes Active again.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] if the session is gone.
    pub fn touch(&self, id: SessionId) -> Result<(), SessionError> {
        let now = Instant::now();
        self.with_session(id, |session| {
            session.touch(now);
            Ok(())
        })
    }

    /// Removes a session and marks it Closed.
    ///
    /// Any request suspended on the session is woken and will see it
    /// gone. Returns the final snapshot, or `None` if it was absent.
    pub fn remove(&self, id: SessionId) -> Option<SessionInfo> {
        let mut session = self.write(id).remove(&id)?;
        session.state = SessionState::Closed;
        session.notify.notify_one();
        tracing::info!(session_id = %id, "session closed");
        Some(session.info())
    }

    /// Grants `kind` exclusive delivery rights to the session.
    ///
    /// The first bind of a Handshaking session establishes it: the
    /// session becomes Active and an `OpenAck` carrying the id is queued.
    /// A session that missed its establishment window is removed.
    ///
    /// The returned [`Binding`] releases the rights when dropped, which
    /// is what turns a cancelled request (peer went away mid long-poll)
    /// back into an Idle session rather than a leaked lock.
    ///
    /// # Errors
    /// - [`SessionError::NotFound`] if the session does not exist
    /// - [`SessionError::Expired`] if it was never established in time
    /// - [`SessionError::BindingConflict`] if any transport holds it
    pub fn bind(
        self: &Arc<Self>,
        id: SessionId,
        kind: TransportKind,
    ) -> Result<Binding, SessionError> {
        let now = Instant::now();
        let mut shard = self.write(id);
        let session = shard.get_mut(&id).ok_or(SessionError::NotFound(id))?;

        if let Some(slot) = session.binding {
            return Err(SessionError::BindingConflict {
                session: id,
                bound: slot.kind,
                requested: kind,
            });
        }

        let mut established = false;
        if session.state == SessionState::Handshaking {
            let age = now.saturating_duration_since(session.created_at);
            if age > self.config.establish_timeout {
                shard.remove(&id);
                drop(shard);
                tracing::info!(session_id = %id, ?age, "session expired before establishment");
                return Err(SessionError::Expired(id));
            }
            session.push(PacketType::OPEN_ACK, id.0.to_be_bytes().to_vec());
            established = true;
        }

        session.bind_epoch = session.bind_epoch.wrapping_add(1);
        let epoch = session.bind_epoch;
        session.binding = Some(BindingSlot { kind, epoch });
        session.state = SessionState::Active;
        session.last_activity = now;
        drop(shard);

        tracing::debug!(session_id = %id, %kind, established, "transport bound");
        Ok(Binding::new(Arc::clone(self), id, kind, epoch, established))
    }

    /// Drops the binding with this epoch, leaving the session Idle.
    ///
    /// A stale epoch (the session has since been rebound) is ignored.
    pub(crate) fn release(&self, id: SessionId, epoch: u64) {
        let now = Instant::now();
        let mut shard = self.write(id);
        let Some(session) = shard.get_mut(&id) else {
            return;
        };
        if session.binding.is_some_and(|slot| slot.epoch == epoch) {
            session.binding = None;
            session.last_activity = now;
            if session.state == SessionState::Active {
                session.state = SessionState::Idle;
            }
            tracing::debug!(session_id = %id, "transport released");
        }
    }

    /// Queues a packet for delivery and wakes any waiting transport.
    ///
    /// Returns the sequence number assigned.
    ///
    /// # Errors
    /// - [`SessionError::NotFound`] for absent or closed sessions
    /// - [`SessionError::QueueFull`] when `max_queue` packets are waiting
    pub fn enqueue(
        &self,
        id: SessionId,
        kind: PacketType,
        payload: Vec<u8>,
    ) -> Result<u32, SessionError> {
        let max_queue = self.config.max_queue;
        self.with_session(id, |session| {
            if session.outbound.len() >= max_queue {
                return Err(SessionError::QueueFull(id));
            }
            Ok(session.push(kind, payload))
        })
    }

    /// Takes every queued packet, stamped with `kind`'s code.
    ///
    /// Also hands back the session's notifier so the caller can wait on
    /// it after the lock is gone.
    pub(crate) fn take_outbound(
        &self,
        id: SessionId,
        kind: TransportKind,
    ) -> Result<(Vec<Packet>, Arc<Notify>), SessionError> {
        let now = Instant::now();
        self.with_session(id, |session| {
            let mut packets: Vec<Packet> = session.outbound.drain(..).collect();
            for packet in &mut packets {
                packet.transport = kind.code();
            }
            if !packets.is_empty() {
                session.touch(now);
            }
            Ok((packets, Arc::clone(&session.notify)))
        })
    }

    /// Puts undelivered packets back at the front of the queue, in order.
    pub(crate) fn requeue_front(&self, id: SessionId, packets: Vec<Packet>) {
        let mut shard = self.write(id);
        if let Some(session) = shard.get_mut(&id) {
            for packet in packets.into_iter().rev() {
                session.outbound.push_front(packet);
            }
            session.notify.notify_one();
        }
    }

    /// Checks an inbound sequence number and advances the expectation.
    ///
    /// Counts as activity.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] if the session is gone.
    pub fn record_inbound(&self, id: SessionId, seq: u32) -> Result<SeqCheck, SessionError> {
        let now = Instant::now();
        self.with_session(id, |session| {
            let expected = session.expected_recv_seq;
            session.expected_recv_seq = seq.wrapping_add(1);
            session.touch(now);
            if seq == expected {
                Ok(SeqCheck::InOrder)
            } else {
                Ok(SeqCheck::Gap {
                    expected,
                    received: seq,
                })
            }
        })
    }

    /// Expires sessions by inactivity, as of `now`.
    ///
    /// In one pass over every shard:
    /// - Handshaking sessions older than `establish_timeout` are removed;
    /// - unbound Active sessions idle past `idle_timeout` become Idle;
    /// - Idle sessions idle past `close_timeout` are closed and removed.
    ///
    /// Bound sessions are left alone: the adapter holding them is live
    /// and will release them when its request ends. Meant to be called
    /// periodically, not per request.
    pub fn sweep_expired(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        for shard in self.shards.iter() {
            let mut shard = shard.write().unwrap_or_else(PoisonError::into_inner);
            shard.retain(|id, session| {
                let inactive = now.saturating_duration_since(session.last_activity);
                match session.state {
                    SessionState::Handshaking => {
                        let age = now.saturating_duration_since(session.created_at);
                        if age > self.config.establish_timeout {
                            report.unestablished.push(*id);
                            return false;
                        }
                    }
                    SessionState::Active if session.binding.is_none() => {
                        if inactive > self.config.idle_timeout {
                            session.state = SessionState::Idle;
                            report.idled.push(*id);
                        }
                    }
                    _ => {}
                }
                if session.state == SessionState::Idle && inactive > self.config.close_timeout {
                    session.state = SessionState::Closed;
                    session.notify.notify_one();
                    report.closed.push(*id);
                    return false;
                }
                true
            });
        }

        if report.removed() > 0 || !report.idled.is_empty() {
            tracing::info!(
                unestablished = report.unestablished.len(),
                idled = report.idled.len(),
                closed = report.closed.len(),
                "session sweep"
            );
        }
        report
    }

    /// Total sessions across all shards.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    /// Returns `true` if there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Unit tests for `SessionStore`.
    //!
    //! Time-dependent behavior is tested by passing a future `now` to
    //! `sweep_expired` instead of sleeping, and by zero-length timeouts
    //! where `bind` reads the clock itself.

    use std::time::Duration;

    use super::*;

    fn store() -> Arc<SessionStore> {
        Arc::new(SessionStore::new(
            SessionConfig::default(),
            IdGenerator::seeded(1000),
        ))
    }

    fn store_with(config: SessionConfig) -> Arc<SessionStore> {
        Arc::new(SessionStore::new(config, IdGenerator::seeded(1000)))
    }

    // =====================================================================
    // create() / get()
    // =====================================================================

    #[test]
    fn test_create_returns_handshaking_session() {
        let store = store();

        let info = store.create();

        assert_eq!(info.id, SessionId(1000));
        assert_eq!(info.state, SessionState::Handshaking);
        assert_eq!(info.bound_transport, None);
        assert_eq!(info.queued, 0);
    }

    #[test]
    fn test_get_returns_session_with_matching_id() {
        let store = store();
        let a = store.create().id;
        let b = store.create().id;

        assert_eq!(store.get(a).map(|s| s.id), Some(a));
        assert_eq!(store.get(b).map(|s| s.id), Some(b));
    }

    #[test]
    fn test_get_unknown_returns_none() {
        let store = store();
        store.create();
        assert!(store.get(SessionId(1)).is_none());
    }

    #[test]
    fn test_ids_on_same_shard_do_not_collide() {
        // With a single shard every session shares one map.
        let store = store_with(SessionConfig {
            shards: 1,
            ..SessionConfig::default()
        });
        let a = store.create().id;
        let b = store.create().id;

        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_create_continues_after_counter_wraps() {
        let store = Arc::new(SessionStore::new(
            SessionConfig::default(),
            IdGenerator::seeded(u64::MAX),
        ));
        let first = store.create().id;
        assert_eq!(first, SessionId(u64::MAX));
        assert_eq!(store.create().id, SessionId(0));
    }

    // =====================================================================
    // remove() / touch()
    // =====================================================================

    #[test]
    fn test_remove_marks_closed_and_deletes() {
        let store = store();
        let id = store.create().id;

        let last = store.remove(id).expect("was present");

        assert_eq!(last.state, SessionState::Closed);
        assert!(store.get(id).is_none());
        assert!(store.remove(id).is_none());
    }

    #[test]
    fn test_touch_unknown_returns_not_found() {
        let store = store();
        assert!(matches!(
            store.touch(SessionId(5)),
            Err(SessionError::NotFound(SessionId(5)))
        ));
    }

    // =====================================================================
    // bind() / release
    // =====================================================================

    #[test]
    fn test_bind_establishes_handshaking_session() {
        let store = store();
        let id = store.create().id;

        let binding = store.bind(id, TransportKind::LongPoll).unwrap();

        assert!(binding.established());
        let info = store.get(id).unwrap();
        assert_eq!(info.state, SessionState::Active);
        assert_eq!(info.bound_transport, Some(TransportKind::LongPoll));
        // The OpenAck is waiting for pickup.
        assert_eq!(info.queued, 1);
    }

    #[test]
    fn test_bind_second_transport_returns_conflict() {
        let store = store();
        let id = store.create().id;
        let _held = store.bind(id, TransportKind::Stream).unwrap();

        let result = store.bind(id, TransportKind::Poll);

        assert!(matches!(
            result,
            Err(SessionError::BindingConflict {
                bound: TransportKind::Stream,
                requested: TransportKind::Poll,
                ..
            })
        ));
        // The existing binding is untouched.
        assert_eq!(
            store.get(id).unwrap().bound_transport,
            Some(TransportKind::Stream)
        );
    }

    #[test]
    fn test_bind_same_transport_twice_returns_conflict() {
        let store = store();
        let id = store.create().id;
        let _held = store.bind(id, TransportKind::LongPoll).unwrap();

        assert!(matches!(
            store.bind(id, TransportKind::LongPoll),
            Err(SessionError::BindingConflict { .. })
        ));
    }

    #[test]
    fn test_drop_binding_leaves_session_idle() {
        let store = store();
        let id = store.create().id;
        let binding = store.bind(id, TransportKind::Poll).unwrap();

        drop(binding);

        let info = store.get(id).unwrap();
        assert_eq!(info.state, SessionState::Idle);
        assert_eq!(info.bound_transport, None);
    }

    #[test]
    fn test_rebind_after_release_is_not_established_again() {
        let store = store();
        let id = store.create().id;
        store.bind(id, TransportKind::Poll).unwrap().release();

        let again = store.bind(id, TransportKind::Socket).unwrap();

        assert!(!again.established());
        assert_eq!(store.get(id).unwrap().state, SessionState::Active);
    }

    #[test]
    fn test_bind_after_establish_timeout_returns_expired_and_removes() {
        let store = store_with(SessionConfig {
            establish_timeout: Duration::ZERO,
            ..SessionConfig::default()
        });
        let id = store.create().id;
        std::thread::sleep(Duration::from_millis(2));

        let result = store.bind(id, TransportKind::Poll);

        assert!(matches!(result, Err(SessionError::Expired(_))));
        assert!(store.get(id).is_none());
    }

    #[test]
    fn test_bind_unknown_returns_not_found() {
        let store = store();
        assert!(matches!(
            store.bind(SessionId(7), TransportKind::Poll),
            Err(SessionError::NotFound(SessionId(7)))
        ));
    }

    // =====================================================================
    // enqueue() / sequence numbers
    // =====================================================================

    #[test]
    fn test_enqueue_assigns_increasing_sequence_numbers() {
        let store = store();
        let id = store.create().id;

        let a = store.enqueue(id, PacketType::DATA, b"a".to_vec()).unwrap();
        let b = store.enqueue(id, PacketType::DATA, b"b".to_vec()).unwrap();

        assert_eq!(b, a.wrapping_add(1));
        assert_eq!(store.get(id).unwrap().next_send_seq, b.wrapping_add(1));
    }

    #[test]
    fn test_enqueue_full_queue_returns_queue_full() {
        let store = store_with(SessionConfig {
            max_queue: 2,
            ..SessionConfig::default()
        });
        let id = store.create().id;
        store.enqueue(id, PacketType::DATA, vec![]).unwrap();
        store.enqueue(id, PacketType::DATA, vec![]).unwrap();

        assert!(matches!(
            store.enqueue(id, PacketType::DATA, vec![]),
            Err(SessionError::QueueFull(_))
        ));
    }

    #[test]
    fn test_enqueue_removed_session_returns_not_found() {
        let store = store();
        let id = store.create().id;
        store.remove(id);

        assert!(matches!(
            store.enqueue(id, PacketType::DATA, vec![]),
            Err(SessionError::NotFound(_))
        ));
    }

    #[test]
    fn test_record_inbound_detects_gap_and_resyncs() {
        let store = store();
        let id = store.create().id;

        assert_eq!(store.record_inbound(id, 0).unwrap(), SeqCheck::InOrder);
        assert_eq!(
            store.record_inbound(id, 5).unwrap(),
            SeqCheck::Gap {
                expected: 1,
                received: 5
            }
        );
        assert_eq!(store.record_inbound(id, 6).unwrap(), SeqCheck::InOrder);
    }

    #[test]
    fn test_record_inbound_wraps() {
        let store = store();
        let id = store.create().id;
        store.record_inbound(id, u32::MAX).unwrap();
        assert_eq!(store.record_inbound(id, 0).unwrap(), SeqCheck::InOrder);
    }

    // =====================================================================
    // sweep_expired()
    // =====================================================================

    #[test]
    fn test_sweep_removes_unestablished_handshakes() {
        let store = store();
        let id = store.create().id;
        let later = Instant::now() + store.config().establish_timeout + Duration::from_secs(1);

        let report = store.sweep_expired(later);

        assert_eq!(report.unestablished, vec![id]);
        assert!(store.get(id).is_none());
    }

    #[test]
    fn test_sweep_idles_then_closes() {
        let store = store_with(SessionConfig {
            idle_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(120),
            ..SessionConfig::default()
        });
        let id = store.create().id;
        store.bind(id, TransportKind::Poll).unwrap().release();
        store.touch(id).unwrap(); // Idle → Active
        assert_eq!(store.get(id).unwrap().state, SessionState::Active);

        let config = store.config().clone();
        let after_idle = Instant::now() + config.idle_timeout + Duration::from_secs(1);
        let report = store.sweep_expired(after_idle);
        assert_eq!(report.idled, vec![id]);
        assert_eq!(store.get(id).unwrap().state, SessionState::Idle);

        let after_close = Instant::now() + config.close_timeout + Duration::from_secs(1);
        let report = store.sweep_expired(after_close);
        assert_eq!(report.closed, vec![id]);
        assert!(store.get(id).is_none());
    }

    #[test]
    fn test_sweep_untouched_past_timeouts_is_gone_after_one_pass() {
        let store = store_with(SessionConfig {
            idle_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(30),
            ..SessionConfig::default()
        });
        let id = store.create().id;
        drop(store.bind(id, TransportKind::LongPoll).unwrap());

        store.sweep_expired(Instant::now() + Duration::from_secs(31));

        assert!(store.get(id).is_none());
    }

    #[test]
    fn test_sweep_default_config_removes_released_session_after_idle_timeout() {
        let store = store_with(SessionConfig::default());
        let id = store.create().id;
        store.bind(id, TransportKind::Poll).unwrap().release();
        assert_eq!(store.get(id).unwrap().state, SessionState::Idle);

        let later = Instant::now() + store.config().idle_timeout + Duration::from_secs(1);
        let report = store.sweep_expired(later);

        assert_eq!(report.closed, vec![id]);
        assert!(store.get(id).is_none());
    }

    #[test]
    fn test_sweep_keeps_recent_sessions() {
        let store = store();
        let id = store.create().id;
        drop(store.bind(id, TransportKind::Poll).unwrap());

        let report = store.sweep_expired(Instant::now());

        assert_eq!(report, SweepReport::default());
        assert!(store.get(id).is_some());
    }

    #[test]
    fn test_sweep_never_removes_bound_sessions() {
        let store = store();
        let id = store.create().id;
        let _binding = store.bind(id, TransportKind::Socket).unwrap();

        let far = Instant::now() + Duration::from_secs(24 * 3600);
        let report = store.sweep_expired(far);

        assert!(report.closed.is_empty());
        assert_eq!(store.get(id).unwrap().state, SessionState::Active);
    }

    #[test]
    fn test_len_counts_across_shards() {
        let store = store();
        assert!(store.is_empty());
        for _ in 0..10 {
            store.create();
        }
        assert_eq!(store.len(), 10);
    }
}
