//! # Lumen
//!
//! A transport-agnostic real-time channel.
//!
//! A client first asks for the *directory*: the server mints a session
//! and answers with the transports it currently permits (short poll,
//! long poll, server-push stream, WebSocket), each with its routing key.
//! The client picks one and exchanges length-framed binary packets over
//! it. The session survives transport reconnects, so a long-poll ending
//! and the next one starting, or a fallback from socket to polling, keep
//! the same queue and sequence numbers.
//!
//! The application implements one trait, [`PacketHandler`], and Lumen
//! handles handshake, framing, sessions and delivery.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lumen::prelude::*;
//!
//! struct Echo;
//!
//! impl PacketHandler for Echo {
//!     async fn on_data(&self, session: SessionId, payload: Vec<u8>, outbox: &Outbox) {
//!         let _ = outbox.send(session, payload);
//!     }
//! }
//!
//! # async fn run() -> Result<(), LumenError> {
//! let server = LumenServer::<Echo>::builder()
//!     .config(LumenConfig::default().with_long_poll(true))
//!     .build(Echo)?;
//! let response = server.dispatch(Request::get("lumen=directory")).await;
//! assert_eq!(response.status, 200);
//! # Ok(())
//! # }
//! ```

mod config;
mod directory;
mod dispatcher;
mod error;
mod server;

pub use config::{LumenConfig, TransportKeys};
pub use directory::DirectoryNegotiator;
pub use dispatcher::{
    Body, Dispatcher, FRAMES_CONTENT_TYPE, NOT_FOUND_BODY, NotFoundHandler, Request, Response,
    Route, not_found,
};
pub use error::LumenError;
pub use server::{LumenServer, LumenServerBuilder};

pub use lumen_protocol as protocol;
pub use lumen_session as session;
pub use lumen_transport as transport;

/// Everything needed to embed a server.
pub mod prelude {
    pub use crate::{LumenConfig, LumenError, LumenServer, Request, Response};
    pub use lumen_protocol::{Packet, PacketType, TransportKind};
    pub use lumen_session::{SessionConfig, SessionId};
    pub use lumen_transport::{Outbox, PacketHandler};
}
