//! `LumenServer` builder, sweeper, and WebSocket accept loop.
//!
//! This is the entry point for embedding Lumen. It ties together all the
//! layers: session store → transport adapters → negotiator → dispatcher.

use std::sync::Arc;
use std::time::{Duration, Instant};

use lumen_session::{IdGenerator, SessionStore};
use lumen_transport::{Inbound, Outbox, PacketHandler, WebSocketListener};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::dispatcher::NotFoundHandler;
use crate::{DirectoryNegotiator, Dispatcher, LumenConfig, LumenError, Request, Response};

/// Builder for configuring and starting a Lumen server.
///
/// # Example
///
/// ```rust,ignore
/// use lumen::prelude::*;
///
/// let server = LumenServer::<MyHandler>::builder()
///     .config(LumenConfig::default().with_long_poll(true).with_socket(true))
///     .build(MyHandler)?;
/// tokio::spawn(async move { server.serve_sockets("0.0.0.0:9001").await });
/// // hand `Request`s from your HTTP stack to `server.dispatch(..)`
/// ```
#[derive(Default)]
pub struct LumenServerBuilder {
    config: LumenConfig,
    not_found: Option<NotFoundHandler>,
    ids: Option<IdGenerator>,
    server_token: Option<String>,
}

impl LumenServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration.
    pub fn config(mut self, config: LumenConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the default nginx-style not-found handler.
    pub fn not_found(mut self, handler: NotFoundHandler) -> Self {
        self.not_found = Some(handler);
        self
    }

    /// Uses a specific id generator instead of one seeded from the OS
    /// RNG. Deterministic ids are for tests only.
    pub fn id_generator(mut self, ids: IdGenerator) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Uses a fixed server token instead of a random one.
    pub fn server_token(mut self, token: &str) -> Self {
        self.server_token = Some(token.to_string());
        self
    }

    /// Builds the server and starts its sweeper task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// - [`LumenError::InvalidConfig`] for ambiguous routing keys
    /// - [`LumenError::Session`] if the OS random source is unavailable;
    ///   the server cannot run without unguessable ids
    pub fn build<H: PacketHandler>(self, handler: H) -> Result<LumenServer<H>, LumenError> {
        let config = self.config.validated();
        config.check()?;

        let ids = match self.ids {
            Some(ids) => ids,
            None => IdGenerator::from_os_rng()?,
        };
        let store = Arc::new(SessionStore::new(config.session.clone(), ids));
        let negotiator = match self.server_token {
            Some(token) => DirectoryNegotiator::with_token(&config, Arc::clone(&store), token),
            None => DirectoryNegotiator::new(&config, Arc::clone(&store))?,
        };
        let inbound = Inbound::new(Arc::clone(&store), Arc::new(handler));
        let outbox = inbound.outbox().clone();

        let mut dispatcher = Dispatcher::new(config.clone(), negotiator, inbound);
        if let Some(handler) = self.not_found {
            dispatcher = dispatcher.with_not_found(handler);
        }

        let sweeper = tokio::spawn(sweep_loop(Arc::clone(&store), config.sweep_interval));

        tracing::info!(
            transports = ?config.enabled(),
            preferred = ?config.preferred_kind(),
            shards = store.shard_count(),
            "Lumen server ready"
        );

        Ok(LumenServer {
            dispatcher: Arc::new(dispatcher),
            store,
            outbox,
            sweeper,
        })
    }
}

/// A running Lumen server.
///
/// HTTP requests are served by [`dispatch`](Self::dispatch); WebSocket
/// connections by [`serve_sockets`](Self::serve_sockets). Dropping the
/// server stops the sweeper.
pub struct LumenServer<H> {
    dispatcher: Arc<Dispatcher<H>>,
    store: Arc<SessionStore>,
    outbox: Outbox,
    sweeper: JoinHandle<()>,
}

impl<H: PacketHandler> LumenServer<H> {
    /// Creates a new builder.
    pub fn builder() -> LumenServerBuilder {
        LumenServerBuilder::new()
    }

    /// Serves one HTTP request.
    pub async fn dispatch(&self, request: Request) -> Response {
        self.dispatcher.dispatch(request).await
    }

    /// The dispatcher, shareable with HTTP handler tasks.
    pub fn dispatcher(&self) -> &Arc<Dispatcher<H>> {
        &self.dispatcher
    }

    /// The session store.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// A handle for pushing packets to sessions.
    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    /// This instance's identity token.
    pub fn server_token(&self) -> &str {
        self.dispatcher.negotiator().server_token()
    }

    /// Binds a WebSocket listener and serves sockets until the process
    /// ends.
    ///
    /// # Errors
    /// [`LumenError::Transport`] if the address cannot be bound.
    pub async fn serve_sockets(&self, addr: &str) -> Result<(), LumenError> {
        let listener = WebSocketListener::bind(addr).await?;
        self.serve_sockets_on(listener).await
    }

    /// Serves sockets from an already bound listener.
    ///
    /// Each connection is upgraded and run in its own task. The upgrade
    /// is refused (with the status a plain request would get) unless the
    /// query names the socket transport, this server's token, and a
    /// session that can be bound.
    pub async fn serve_sockets_on(&self, listener: WebSocketListener) -> Result<(), LumenError> {
        tracing::info!("Lumen socket listener running");

        loop {
            let pending = match listener.accept().await {
                Ok(pending) => pending,
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                    continue;
                }
            };
            let dispatcher = Arc::clone(&self.dispatcher);
            tokio::spawn(async move {
                let peer = pending.peer_addr();
                let admit = {
                    let dispatcher = Arc::clone(&dispatcher);
                    move |query: &str| dispatcher.admit_socket(query)
                };
                let (conn, binding) = match pending.upgrade(admit).await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::debug!(%peer, error = %e, "socket upgrade failed");
                        return;
                    }
                };
                if let Err(e) = dispatcher.socket().serve(binding, conn).await {
                    tracing::debug!(%peer, error = %e, "socket ended with error");
                }
            });
        }
    }
}

impl<H> Drop for LumenServer<H> {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

/// Expires sessions every `every` until aborted.
async fn sweep_loop(store: Arc<SessionStore>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let report = store.sweep_expired(Instant::now());
        if report.removed() > 0 || !report.idled.is_empty() {
            tracing::debug!(
                unestablished = report.unestablished.len(),
                idled = report.idled.len(),
                closed = report.closed.len(),
                live = store.len(),
                "sweep"
            );
        }
    }
}
