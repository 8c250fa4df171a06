use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body as HttpBody, Bytes};
use axum::extract::{DefaultBodyLimit, RawQuery, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::Response as HttpResponse;
use futures_util::stream::{self, Stream};
use futures_util::StreamExt;
use lumen::prelude::*;
use lumen::transport::Delivery;
use lumen::Body;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// Echoes every payload back to the session that sent it.
struct Echo;

impl PacketHandler for Echo {
    async fn on_open(&self, session: SessionId, outbox: &Outbox) {
        tracing::info!(%session, "client connected");
        let _ = outbox.send(session, b"welcome".to_vec());
    }

    async fn on_data(&self, session: SessionId, payload: Vec<u8>, outbox: &Outbox) {
        if let Err(e) = outbox.send(session, payload) {
            tracing::warn!(%session, error = %e, "echo dropped");
        }
    }

    async fn on_close(&self, session: SessionId) {
        tracing::info!(%session, "client left");
    }
}

// ---------------------------------------------------------------------------
// HTTP front end
// ---------------------------------------------------------------------------

/// Largest request body accepted. Larger bodies get 413 before the
/// session sees any of it.
const MAX_BODY: usize = 1 << 20;

type Shared = Arc<LumenServer<Echo>>;

/// Every path and method goes to the dispatcher; routing is by query.
fn router(server: Shared) -> Router {
    Router::new()
        .fallback(handle)
        .layer(DefaultBodyLimit::max(MAX_BODY))
        .with_state(server)
}

async fn handle(
    State(server): State<Shared>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> HttpResponse {
    let mut response = server
        .dispatch(Request::new(query.unwrap_or_default(), body.to_vec()))
        .await;
    let delivery = response.take_delivery();

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut http = axum::http::Response::builder().status(status);
    for (name, value) in &response.headers {
        // A batch is acknowledged when hyper polls past its last chunk,
        // which it only does for bodies without a fixed length.
        if delivery.is_some() && name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        match (HeaderName::try_from(*name), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => http = http.header(name, value),
            _ => tracing::warn!(name, "skipping unrepresentable header"),
        }
    }

    let body = match response.body {
        Body::Full(bytes) => match delivery {
            Some(delivery) => HttpBody::from_stream(acknowledged(bytes, delivery)),
            None => HttpBody::from(bytes),
        },
        Body::Stream(frames) => HttpBody::from_stream(frames.map(Ok::<_, Infallible>)),
    };
    http.body(body).unwrap_or_else(|e| {
        tracing::error!(error = %e, "response build failed");
        let mut fallback = HttpResponse::new(HttpBody::empty());
        *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        fallback
    })
}

/// Yields the batch body, then acknowledges the batch once the body has
/// been handed off in full. A connection dropped before that requeues it.
fn acknowledged(
    bytes: Vec<u8>,
    delivery: Delivery,
) -> impl Stream<Item = Result<Vec<u8>, Infallible>> + Send + 'static {
    stream::unfold((Some(bytes), Some(delivery)), |(bytes, delivery)| async move {
        match bytes {
            Some(bytes) => Some((Ok::<_, Infallible>(bytes), (None, delivery))),
            None => {
                if let Some(delivery) = delivery {
                    delivery.acknowledge();
                }
                None
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = LumenConfig::default()
        .with_poll(true)
        .with_long_poll(true)
        .with_stream(true)
        .with_socket(true)
        .preferred("webs01")
        .poll_timeout(Duration::from_secs(20));
    let server = Arc::new(LumenServer::<Echo>::builder().config(config).build(Echo)?);

    let sockets = Arc::clone(&server);
    tokio::spawn(async move {
        if let Err(e) = sockets.serve_sockets("0.0.0.0:9001").await {
            tracing::error!(error = %e, "socket listener stopped");
        }
    });

    let listener = TcpListener::bind("0.0.0.0:9000").await?;
    tracing::info!("HTTP on 0.0.0.0:9000, WebSocket on 0.0.0.0:9001");
    axum::serve(listener, router(server)).await?;
    Ok(())
}
