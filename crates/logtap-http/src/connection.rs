//! Per-connection request handling.
//!
//! Each accepted socket walks `Accepted → Reading → Dispatched → Responding → Closed`
//! exactly once. There is no keep-alive.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use logtap_logs::LogStore;
use logtap_types::{LogsResponse, StatusResponse};

use crate::response::HttpResponse;

/// Upper bound on request bytes read before dispatching
const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Size of a single socket read
const READ_CHUNK: usize = 4096;

/// How long a client may take to send its request line
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle of a single connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    Reading,
    Dispatched,
    Responding,
    Closed,
}

/// What a request asks for, decided by substring match on the raw request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Logs,
    Clear,
    Preflight,
    NotFound,
}

impl Route {
    pub fn classify(request: &str) -> Self {
        if request.contains("GET /logs") {
            Self::Logs
        } else if request.contains("GET /clear") {
            Self::Clear
        } else if request.contains("OPTIONS") {
            Self::Preflight
        } else {
            Self::NotFound
        }
    }

    /// Build the response for this route against the store
    pub fn respond(&self, store: &LogStore) -> HttpResponse {
        match self {
            Self::Logs => {
                let now = Utc::now().timestamp_micros() as f64 / 1_000_000.0;
                HttpResponse::json_pretty(&LogsResponse::new(store.snapshot(), now))
            }
            Self::Clear => {
                store.clear();
                HttpResponse::json(&StatusResponse::cleared())
            }
            Self::Preflight => HttpResponse::preflight(),
            Self::NotFound => HttpResponse::not_found(),
        }
    }
}

/// Serves one request on one accepted socket
pub struct ConnectionHandler {
    id: ConnectionId,
    peer: SocketAddr,
    store: LogStore,
    state: ConnectionState,
    read_timeout: Duration,
}

impl ConnectionHandler {
    pub fn new(id: ConnectionId, peer: SocketAddr, store: LogStore) -> Self {
        Self {
            id,
            peer,
            store,
            state: ConnectionState::Accepted,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Override how long to wait for the request before closing
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Serve the connection until it completes or `cancel` fires
    ///
    /// Cancellation drops the stream immediately; an in-flight write is lost.
    pub async fn run<S>(mut self, stream: S, cancel: CancellationToken) -> ConnectionState
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(conn = %self.id, state = ?self.state, "connection cancelled");
            }
            _ = self.serve(stream) => {}
        }
        self.transition(ConnectionState::Closed);
        self.state
    }

    async fn serve<S>(&mut self, mut stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.transition(ConnectionState::Reading);
        let read = tokio::time::timeout(self.read_timeout, read_request(&mut stream)).await;
        let request = match read {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => {
                debug!(conn = %self.id, peer = %self.peer, "peer closed without a request");
                return;
            }
            Ok(Err(e)) => {
                debug!(conn = %self.id, peer = %self.peer, error = %e, "read failed");
                return;
            }
            Err(_) => {
                debug!(
                    conn = %self.id,
                    peer = %self.peer,
                    timeout = ?self.read_timeout,
                    "request timed out"
                );
                return;
            }
        };

        let route = Route::classify(&String::from_utf8_lossy(&request));
        self.transition(ConnectionState::Dispatched);
        debug!(conn = %self.id, peer = %self.peer, ?route, "request dispatched");
        let response = route.respond(&self.store);

        self.transition(ConnectionState::Responding);
        if let Err(e) = stream.write_all(&response.to_bytes()).await {
            warn!(conn = %self.id, peer = %self.peer, error = %e, "failed to write response");
            return;
        }
        if let Err(e) = stream.flush().await {
            debug!(conn = %self.id, peer = %self.peer, error = %e, "failed to flush response");
        }
        if let Err(e) = stream.shutdown().await {
            debug!(conn = %self.id, peer = %self.peer, error = %e, "failed to shut down connection");
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        trace!(conn = %self.id, from = ?self.state, to = ?next, "connection state");
        self.state = next;
    }
}

/// Read until the request line is complete
///
/// Returns `None` when the peer closes before sending anything.
async fn read_request<R>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut request = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        request.extend_from_slice(&chunk[..n]);
        if request.contains(&b'\n') || request.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }

    Ok((!request.is_empty()).then_some(request))
}
