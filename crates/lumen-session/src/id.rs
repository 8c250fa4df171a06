//! Session identifiers and the generator that mints them.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::TryRngCore;
use rand::rngs::OsRng;

use crate::SessionError;

/// A 64-bit session identifier.
///
/// Rendered as 16 lowercase hex digits on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Returned when a string is not a valid hex session id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid session id {0:?}")]
pub struct ParseSessionIdError(String);

impl FromStr for SessionId {
    type Err = ParseSessionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // `from_str_radix` alone would also accept a leading `+`.
        if s.is_empty() || s.len() > 16 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseSessionIdError(s.to_string()));
        }
        u64::from_str_radix(s, 16)
            .map(SessionId)
            .map_err(|_| ParseSessionIdError(s.to_string()))
    }
}

/// Mints process-unique session ids.
///
/// A single atomic counter: every call to [`next_id`](Self::next_id) is
/// one `fetch_add`, no lock, and no two calls ever see the same value
/// until the 64-bit space wraps. The starting point comes from the OS
/// random source, so an observer who sees one id cannot tell where the
/// sequence began or predict ids issued after a restart.
///
/// The generator is an ordinary owned value handed to the store, which
/// lets tests substitute a fixed seed.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Seeds the counter from the operating system's secure RNG.
    ///
    /// # Errors
    /// [`SessionError::RandomnessUnavailable`] if the OS source fails.
    /// Callers treat this as fatal for startup.
    pub fn from_os_rng() -> Result<Self, SessionError> {
        let seed = OsRng
            .try_next_u64()
            .map_err(|e| SessionError::RandomnessUnavailable(e.to_string()))?;
        Ok(Self::seeded(seed))
    }

    /// Starts the counter at a fixed value. Deterministic; for tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            next: AtomicU64::new(seed),
        }
    }

    /// Returns the next id and advances the counter (wrapping).
    pub fn next_id(&self) -> SessionId {
        SessionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
