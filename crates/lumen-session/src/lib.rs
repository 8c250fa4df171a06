//! Session management for Lumen.
//!
//! This crate keeps the server-side state of every logical client
//! connection, independent of which transport currently carries it:
//!
//! 1. **Identity**: unguessable, collision-free ids ([`IdGenerator`])
//! 2. **Storage**: a sharded concurrent table ([`SessionStore`])
//! 3. **Delivery rights**: at most one transport per session at a time
//!    ([`Binding`]), with a per-session wakeup for held-open requests
//! 4. **Expiry**: establishment, idle, and close timeouts applied by a
//!    periodic sweep
//!
//! # How it fits in the stack
//!
//! ```text
//! Transport adapters (above)  ← bind sessions, drain and fill their queues
//!     ↕
//! Session layer (this crate)  ← owns ids, state, queues, sequence numbers
//!     ↕
//! Protocol layer (below)      ← provides Packet, TransportKind
//! ```

mod binding;
mod error;
mod id;
mod session;
mod store;

pub use binding::Binding;
pub use error::SessionError;
pub use id::{IdGenerator, ParseSessionIdError, SessionId};
pub use session::{SessionConfig, SessionInfo, SessionState};
pub use store::{SeqCheck, SessionStore, SweepReport};
