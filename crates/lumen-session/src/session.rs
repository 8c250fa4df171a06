//! Session types: the server's record of one logical client connection.
//!
//! A session outlives any single transport request. A long-poll request
//! finishing and the next one starting, or a client falling back from a
//! socket to polling, all land on the same session as long as the client
//! presents the same id before the session expires.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lumen_protocol::{PROTOCOL_VERSION, Packet, PacketType, TransportKind};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::SessionId;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Timeouts and limits for the session store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a freshly handshaken session may wait for its first
    /// transport request before it is discarded.
    pub establish_timeout: Duration,

    /// How long one long-poll request is held open waiting for a packet.
    /// Stream and socket adapters use it as their keepalive interval.
    pub poll_timeout: Duration,

    /// Inactivity after which an unbound Active session becomes Idle.
    pub idle_timeout: Duration,

    /// Inactivity after which an Idle session is closed and removed.
    /// Never shorter than `idle_timeout`. Defaults to `idle_timeout`, so
    /// a session nobody touches for that long is gone after one sweep;
    /// raise it to give released sessions a longer grace period.
    pub close_timeout: Duration,

    /// Number of independently locked partitions. Rounded up to a power
    /// of two so the shard index is a mask of the id.
    pub shards: usize,

    /// Maximum undelivered packets per session.
    pub max_queue: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            establish_timeout: Duration::from_secs(10),
            poll_timeout: Duration::from_secs(25),
            idle_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(30),
            shards: 256,
            max_queue: 1024,
        }
    }
}

impl SessionConfig {
    /// Largest shard count accepted.
    pub const MAX_SHARDS: usize = 1 << 16;

    /// Clamps out-of-range values so the config is safe to use.
    ///
    /// Called by [`SessionStore::new`](crate::SessionStore::new). Rules:
    /// - `shards` rounded up to a power of two in `1..=MAX_SHARDS`.
    /// - `close_timeout` raised to at least `idle_timeout`.
    /// - `max_queue` at least 1.
    pub fn validated(mut self) -> Self {
        let shards = self.shards.clamp(1, Self::MAX_SHARDS).next_power_of_two();
        if shards != self.shards {
            tracing::warn!(
                requested = self.shards,
                using = shards,
                "shard count must be a power of two, adjusting"
            );
            self.shards = shards;
        }
        if self.close_timeout < self.idle_timeout {
            tracing::warn!(
                close_timeout = ?self.close_timeout,
                idle_timeout = ?self.idle_timeout,
                "close_timeout shorter than idle_timeout, raising it"
            );
            self.close_timeout = self.idle_timeout;
        }
        self.max_queue = self.max_queue.max(1);
        self
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Lifecycle state of a session.
///
/// ```text
///   Handshaking ──(first open)──→ Active ⇄ Idle ──(close timeout)──→ Closed
///        │                           │                                 ↑
///        └──(establish timeout)──────┴──────(client Close packet)──────┘
/// ```
///
/// `Closed` is terminal. A closed session is removed from the store in
/// the same critical section that closes it, so lookups never observe it;
/// the state exists for the snapshot returned by
/// [`SessionStore::remove`](crate::SessionStore::remove).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Minted by the handshake, no transport request seen yet.
    Handshaking,
    /// A transport is bound, or was recently.
    Active,
    /// No transport bound; waiting for the client to come back.
    Idle,
    /// Gone. The client must re-handshake.
    Closed,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Mutable per-session record. Lives inside a store shard and is only
/// touched with that shard's write lock held.
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) id: SessionId,
    pub(crate) state: SessionState,
    pub(crate) binding: Option<BindingSlot>,
    pub(crate) next_send_seq: u32,
    pub(crate) expected_recv_seq: u32,
    pub(crate) outbound: VecDeque<Packet>,
    pub(crate) created_at: Instant,
    pub(crate) last_activity: Instant,
    /// Signalled whenever `outbound` gains a packet or the session goes
    /// away, so a suspended long-poll or stream can wake without polling.
    pub(crate) notify: Arc<Notify>,
    /// Bumped on every bind so a stale binding cannot release a newer one.
    pub(crate) bind_epoch: u64,
}

/// Which transport holds delivery rights, and under which epoch.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BindingSlot {
    pub(crate) kind: TransportKind,
    pub(crate) epoch: u64,
}

impl Session {
    pub(crate) fn new(id: SessionId, now: Instant) -> Self {
        Self {
            id,
            state: SessionState::Handshaking,
            binding: None,
            next_send_seq: 0,
            expected_recv_seq: 0,
            outbound: VecDeque::new(),
            created_at: now,
            last_activity: now,
            notify: Arc::new(Notify::new()),
            bind_epoch: 0,
        }
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_activity = now;
        if self.state == SessionState::Idle {
            self.state = SessionState::Active;
        }
    }

    /// Queues a packet, assigning it the next outbound sequence number.
    ///
    /// The transport code is left at 0; the binding that delivers the
    /// packet stamps its own.
    pub(crate) fn push(&mut self, kind: PacketType, payload: Vec<u8>) -> u32 {
        let seq = self.next_send_seq;
        self.next_send_seq = seq.wrapping_add(1);
        self.outbound.push_back(Packet {
            version: PROTOCOL_VERSION,
            kind,
            transport: 0,
            seq,
            payload,
        });
        self.notify.notify_one();
        seq
    }

    pub(crate) fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            state: self.state,
            bound_transport: self.binding.map(|slot| slot.kind),
            next_send_seq: self.next_send_seq,
            expected_recv_seq: self.expected_recv_seq,
            queued: self.outbound.len(),
            created_at: self.created_at,
            last_activity: self.last_activity,
        }
    }
}

/// A point-in-time copy of a session's observable fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// The session's id.
    pub id: SessionId,
    /// Lifecycle state at snapshot time.
    pub state: SessionState,
    /// Transport currently holding delivery rights, if any.
    pub bound_transport: Option<TransportKind>,
    /// Sequence number the next outbound packet will carry.
    pub next_send_seq: u32,
    /// Sequence number expected on the next inbound packet.
    pub expected_recv_seq: u32,
    /// Packets waiting for pickup.
    pub queued: usize,
    /// When the handshake minted the session.
    pub created_at: Instant,
    /// Last successful read or write.
    pub last_activity: Instant,
}
