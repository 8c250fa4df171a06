//! Request routing.
//!
//! The dispatcher is the library surface an HTTP stack calls. It does not
//! accept connections itself: the embedding server hands it the request's
//! query string and body as a [`Request`] and writes back the
//! [`Response`]. One query parameter (the discriminator, `lumen` by
//! default) selects the handshake, one of the transport adapters, or the
//! not-found handler. Transport requests also carry:
//!
//! | parameter | meaning                                    |
//! |-----------|--------------------------------------------|
//! | `sid`     | session id, 16 hex digits from the handshake |
//! | `token`   | the server token from the handshake        |

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use lumen_protocol::{Packet, TransportKind, frame};
use lumen_session::{Binding, SessionId};
use lumen_transport::{
    Delivery, Inbound, LongPollAdapter, PacketHandler, PacketStream, PollAdapter, PullTransport,
    Refusal, SocketAdapter, StreamAdapter, TransportAdapter,
};
use url::form_urlencoded;

use crate::{DirectoryNegotiator, LumenConfig, LumenError};

/// The body every response to an unknown discriminator carries by
/// default.
pub const NOT_FOUND_BODY: &str = "<html>\r\n\
    <head><title>404 Not Found</title></head>\r\n\
    <body>\r\n\
    <center><h1>404 Not Found</h1></center>\r\n\
    <hr><center>nginx</center>\r\n\
    </body>\r\n\
    </html>\r\n";

/// Content type of packet bodies.
pub const FRAMES_CONTENT_TYPE: &str = "application/octet-stream";

/// Handler for requests whose discriminator matches nothing.
pub type NotFoundHandler = Arc<dyn Fn(&Request) -> Response + Send + Sync>;

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

/// What the dispatcher needs from an HTTP request.
#[derive(Debug, Clone, Default)]
pub struct Request {
    query: String,
    body: Vec<u8>,
}

impl Request {
    /// A request with a query string (with or without the leading `?`)
    /// and a body.
    pub fn new(query: impl Into<String>, body: Vec<u8>) -> Self {
        let mut query = query.into();
        if query.starts_with('?') {
            query.remove(0);
        }
        Self { query, body }
    }

    /// A request with an empty body.
    pub fn get(query: impl Into<String>) -> Self {
        Self::new(query, Vec::new())
    }

    /// The query string, without `?`.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// The request body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The first value of a query parameter, percent-decoded.
    pub fn param(&self, name: &str) -> Option<Cow<'_, str>> {
        query_param(&self.query, name)
    }
}

/// Finds the first `name=value` pair in a form-encoded query string.
pub(crate) fn query_param<'a>(query: &'a str, name: &str) -> Option<Cow<'a, str>> {
    form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value)
}

/// A response body.
pub enum Body {
    /// Fully buffered.
    Full(Vec<u8>),
    /// Written incrementally; each item is one frame. Ends when the
    /// session closes.
    Stream(PacketStream),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// What the embedding HTTP stack writes back.
#[derive(Debug)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Header name/value pairs.
    pub headers: Vec<(&'static str, String)>,
    /// The body.
    pub body: Body,
    delivery: Option<Delivery>,
}

impl Response {
    /// A buffered response with an exact `Content-Length`.
    pub fn full(status: u16, content_type: &str, body: Vec<u8>) -> Self {
        let mut headers = base_headers(content_type);
        headers.push(("Content-Length", body.len().to_string()));
        Self {
            status,
            headers,
            body: Body::Full(body),
            delivery: None,
        }
    }

    /// A 200 response whose body is written as frames are produced.
    pub fn streaming(frames: PacketStream) -> Self {
        Self {
            status: 200,
            headers: base_headers(FRAMES_CONTENT_TYPE),
            body: Body::Stream(frames),
            delivery: None,
        }
    }

    /// The response for a failed request.
    pub fn from_error(error: &LumenError) -> Self {
        let mut response = Self::full(
            error.status(),
            "text/plain; charset=utf-8",
            error.to_string().into_bytes(),
        );
        if matches!(error, LumenError::UpgradeRequired) {
            response.headers.push(("Upgrade", "websocket".to_string()));
        }
        response
    }

    /// Confirms the body was written to the client.
    ///
    /// Poll and long-poll responses carry the batch of packets they were
    /// built from, and keep the session bound until then. Dropping such
    /// a response unacknowledged puts the batch back at the front of the
    /// session's queue. For every other response this is a no-op.
    pub fn acknowledge(&mut self) {
        if let Some(delivery) = self.delivery.take() {
            delivery.acknowledge();
        }
    }

    /// Detaches the batch this response carries, for HTTP stacks that
    /// learn the write succeeded only after handing the body off.
    pub fn take_delivery(&mut self) -> Option<Delivery> {
        self.delivery.take()
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The body bytes, if buffered.
    pub fn full_body(&self) -> Option<&[u8]> {
        match &self.body {
            Body::Full(bytes) => Some(bytes),
            Body::Stream(_) => None,
        }
    }
}

fn base_headers(content_type: &str) -> Vec<(&'static str, String)> {
    vec![
        ("Server", "nginx".to_string()),
        ("Connection", "keep-alive".to_string()),
        ("Content-Type", content_type.to_string()),
    ]
}

/// The default not-found handler: a fixed nginx-style 404 page.
pub fn not_found(_request: &Request) -> Response {
    Response::full(404, "text/html", NOT_FOUND_BODY.as_bytes().to_vec())
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Where a discriminator leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The handshake.
    Directory,
    /// An enabled transport.
    Transport(TransportKind),
    /// Anything else, including keys of disabled transports.
    NotFound,
}

/// Routes requests to the negotiator and the transport adapters.
pub struct Dispatcher<H> {
    config: LumenConfig,
    negotiator: DirectoryNegotiator,
    poll: PollAdapter<H>,
    long_poll: LongPollAdapter<H>,
    stream: StreamAdapter<H>,
    socket: SocketAdapter<H>,
    not_found: NotFoundHandler,
}

impl<H: PacketHandler> Dispatcher<H> {
    /// Creates a dispatcher whose adapters all share `inbound`.
    pub fn new(config: LumenConfig, negotiator: DirectoryNegotiator, inbound: Inbound<H>) -> Self {
        Self {
            config,
            negotiator,
            poll: PollAdapter::new(inbound.clone()),
            long_poll: LongPollAdapter::new(inbound.clone()),
            stream: StreamAdapter::new(inbound.clone()),
            socket: SocketAdapter::new(inbound),
            not_found: Arc::new(not_found),
        }
    }

    /// Replaces the not-found handler.
    pub fn with_not_found(mut self, handler: NotFoundHandler) -> Self {
        self.not_found = handler;
        self
    }

    /// The configuration in effect.
    pub fn config(&self) -> &LumenConfig {
        &self.config
    }

    /// The handshake negotiator.
    pub fn negotiator(&self) -> &DirectoryNegotiator {
        &self.negotiator
    }

    /// The socket adapter, for connections accepted outside `dispatch`.
    pub fn socket(&self) -> &SocketAdapter<H> {
        &self.socket
    }

    /// Resolves a query string's discriminator.
    pub fn route(&self, query: &str) -> Route {
        let Some(key) = query_param(query, &self.config.query_key) else {
            return Route::NotFound;
        };
        if key == self.config.directory_key {
            return Route::Directory;
        }
        match self.config.keys.kind_of(&key) {
            Some(kind) if self.config.is_enabled(kind) => Route::Transport(kind),
            _ => Route::NotFound,
        }
    }

    /// Serves one request.
    pub async fn dispatch(&self, request: Request) -> Response {
        match self.route(request.query()) {
            Route::Directory => match self.negotiator.handshake() {
                Ok((body, content_type)) => {
                    tracing::debug!("directory served");
                    Response::full(200, content_type, body)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "directory encoding failed");
                    Response::from_error(&e)
                }
            },
            Route::Transport(kind) => match self.transport(kind, &request).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!(%kind, error = %e, status = e.status(), "transport request failed");
                    Response::from_error(&e)
                }
            },
            Route::NotFound => (self.not_found)(&request),
        }
    }

    async fn transport(&self, kind: TransportKind, request: &Request) -> Result<Response, LumenError> {
        let session = match kind {
            TransportKind::Socket => return Err(LumenError::UpgradeRequired),
            _ => self.authorize(request.query())?,
        };
        let body = request.body();
        let response = match kind {
            TransportKind::Poll => frames_response(self.poll.request(session, body).await?),
            TransportKind::LongPoll => frames_response(self.long_poll.request(session, body).await?),
            TransportKind::Stream => {
                Response::streaming(self.stream.open_stream(session, body).await?)
            }
            TransportKind::Socket => return Err(LumenError::UpgradeRequired),
        };
        Ok(response)
    }

    /// Checks the server token and extracts the session id.
    fn authorize(&self, query: &str) -> Result<SessionId, LumenError> {
        self.negotiator
            .check_token(query_param(query, "token").as_deref())?;
        let sid = query_param(query, "sid")
            .ok_or_else(|| LumenError::BadRequest("missing sid".into()))?;
        sid.parse()
            .map_err(|e| LumenError::BadRequest(format!("{e}")))
    }

    /// Decides a WebSocket upgrade request from its query string.
    ///
    /// On success the session is already bound to the socket transport.
    ///
    /// # Errors
    /// A [`Refusal`] carrying the status a plain request with the same
    /// problem would get: 404 unless the discriminator is the (enabled)
    /// socket key, then 421, 400, 410 or 409.
    pub fn admit_socket(&self, query: &str) -> Result<Binding, Refusal> {
        if self.route(query) != Route::Transport(TransportKind::Socket) {
            return Err(Refusal {
                status: 404,
                reason: NOT_FOUND_BODY.to_string(),
            });
        }
        let admitted = self
            .authorize(query)
            .and_then(|session| Ok(self.socket.open(session)?));
        admitted.map_err(|e| {
            tracing::debug!(error = %e, "socket upgrade refused");
            Refusal {
                status: e.status(),
                reason: e.to_string(),
            }
        })
    }
}

/// Concatenates a batch into one body. A packet too large for the size
/// field is dropped with a warning.
fn frames_response(delivery: Delivery) -> Response {
    let packets = delivery.packets();
    let mut body = Vec::with_capacity(packets.iter().map(Packet::encoded_len).sum());
    for packet in packets {
        if let Err(e) = frame::encode_into(packet, &mut body) {
            tracing::warn!(
                session_id = %delivery.session_id(),
                seq = packet.seq,
                error = %e,
                "dropping unencodable packet"
            );
        }
    }
    let mut response = Response::full(200, FRAMES_CONTENT_TYPE, body);
    response.delivery = Some(delivery);
    response
}
