//! Listener lifecycle and connection registry.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use logtap_logs::{DEFAULT_CAPACITY, LogEntry, LogStore};

use crate::connection::{ConnectionHandler, ConnectionId};
use crate::error::ServerError;
use crate::netinfo::describe_local_address;

/// Default listen port
pub const DEFAULT_PORT: u16 = 8080;

/// Default bind address (all interfaces)
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Pause after a failed accept so a persistent error does not spin
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Server settings as read from configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Number of entries the log store retains
    pub capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

type ConnectionRegistry = Arc<Mutex<HashMap<ConnectionId, CancellationToken>>>;

/// State held while the listener is up
struct Running {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    connections: ConnectionRegistry,
}

/// HTTP log server owning its listener, connection registry and log store
pub struct LogServer {
    host: String,
    store: LogStore,
    running: Mutex<Option<Running>>,
}

impl LogServer {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            host: config.host.clone(),
            store: LogStore::new(config.capacity),
            running: Mutex::new(None),
        }
    }

    /// Bind the listener and start accepting connections
    ///
    /// Port 0 binds an ephemeral port; the bound address is returned.
    pub async fn start(&self, port: u16) -> Result<SocketAddr, ServerError> {
        if self.running.lock().is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let addr = format!("{}:{}", self.host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let cancel = CancellationToken::new();
        let connections: ConnectionRegistry = Arc::new(Mutex::new(HashMap::new()));
        {
            let mut running = self.running.lock();
            if running.is_some() {
                return Err(ServerError::AlreadyRunning);
            }
            *running = Some(Running {
                local_addr,
                cancel: cancel.clone(),
                connections: Arc::clone(&connections),
            });
        }

        info!(
            port = local_addr.port(),
            address = %describe_local_address(),
            "log server ready"
        );

        tokio::spawn(accept_loop(listener, self.store.clone(), cancel, connections));

        Ok(local_addr)
    }

    /// Cancel every connection and the listener. No-op when not running.
    pub fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };

        let cancelled = {
            let mut connections = running.connections.lock();
            let count = connections.len();
            for (_, token) in connections.drain() {
                token.cancel();
            }
            count
        };
        running.cancel.cancel();

        info!(
            port = running.local_addr.port(),
            connections = cancelled,
            "log server stopped"
        );
    }

    /// Append a message to the owned store
    pub fn ingest(&self, message: impl Into<String>, level: impl Into<String>) -> LogEntry {
        self.store.ingest(message, level)
    }

    pub fn store(&self) -> &LogStore {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.local_addr)
    }

    /// Number of connections currently being served
    pub fn connection_count(&self) -> usize {
        self.running
            .lock()
            .as_ref()
            .map(|r| r.connections.lock().len())
            .unwrap_or(0)
    }
}

impl Drop for LogServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: TcpListener,
    store: LogStore,
    cancel: CancellationToken,
    connections: ConnectionRegistry,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let id = ConnectionId::next();
                    let token = cancel.child_token();
                    connections.lock().insert(id, token.clone());
                    debug!(conn = %id, %peer, "connection accepted");

                    let handler = ConnectionHandler::new(id, peer, store.clone());
                    let registry = Arc::clone(&connections);
                    tokio::spawn(async move {
                        handler.run(stream, token).await;
                        registry.lock().remove(&id);
                    });
                }
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }
    debug!("accept loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use logtap_types::LogsResponse;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn test_server(capacity: usize) -> LogServer {
        LogServer::new(&ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            capacity,
        })
    }

    async fn request(addr: SocketAddr, raw: &str) -> (String, String) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        let (head, body) = response.split_once("\r\n\r\n").unwrap();
        (head.to_string(), body.to_string())
    }

    #[tokio::test]
    async fn test_logs_then_clear_round_trip() {
        let server = test_server(2);
        let addr = server.start(0).await.unwrap();
        for m in ["A", "B", "C"] {
            server.ingest(m, "INFO");
        }

        let (head, body) = request(addr, "GET /logs HTTP/1.1\r\nHost: test\r\n\r\n").await;
        assert!(head.starts_with("HTTP/1.1 200 OK"));
        assert!(head.contains(&format!("Content-Length: {}", body.len())));
        let logs: LogsResponse = serde_json::from_str(&body).unwrap();
        let messages: Vec<_> = logs.logs.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["B", "C"]);
        assert_eq!(logs.count, 2);

        let (_, body) = request(addr, "GET /clear HTTP/1.1\r\n\r\n").await;
        assert_eq!(body, r#"{"status":"cleared"}"#);

        let (_, body) = request(addr, "GET /logs HTTP/1.1\r\n\r\n").await;
        let logs: LogsResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(logs.count, 0);
        assert!(logs.logs.is_empty());

        server.stop();
    }

    #[tokio::test]
    async fn test_options_preflight() {
        let server = test_server(10);
        let addr = server.start(0).await.unwrap();

        let (head, body) = request(addr, "OPTIONS /whatever HTTP/1.1\r\n\r\n").await;
        assert!(head.starts_with("HTTP/1.1 200 OK"));
        assert!(head.contains("Content-Length: 0"));
        assert!(head.contains("Access-Control-Allow-Origin: *"));
        assert!(head.contains("Access-Control-Allow-Methods: GET, POST, OPTIONS"));
        assert!(head.contains("Access-Control-Allow-Headers: Content-Type, Authorization"));
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let server = test_server(10);
        let addr = server.start(0).await.unwrap();

        let (head, body) = request(addr, "GET /metrics HTTP/1.1\r\n\r\n").await;
        assert!(head.starts_with("HTTP/1.1 404 Not Found"));
        assert!(head.contains("Connection: close"));
        assert_eq!(body, "Not Found");
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let server = test_server(10);
        server.start(0).await.unwrap();
        assert!(matches!(
            server.start(0).await,
            Err(ServerError::AlreadyRunning)
        ));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_closes_listener() {
        let server = test_server(10);
        let addr = server.start(0).await.unwrap();
        assert!(server.is_running());
        assert_eq!(server.local_addr(), Some(addr));

        server.stop();
        server.stop();
        assert!(!server.is_running());
        assert_eq!(server.connection_count(), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_cancels_open_connections() {
        let server = test_server(10);
        let addr = server.start(0).await.unwrap();

        // Connected but never sends a request
        let mut idle = TcpStream::connect(addr).await.unwrap();
        for _ in 0..50 {
            if server.connection_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.connection_count(), 1);

        server.stop();
        let mut buf = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(2), idle.read_to_end(&mut buf)).await;
        assert!(read.is_ok(), "cancelled connection should be closed");
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let server = test_server(10);
        server.start(0).await.unwrap();
        server.stop();
        let addr = server.start(0).await.unwrap();
        let (head, _) = request(addr, "GET /logs HTTP/1.1\r\n\r\n").await;
        assert!(head.starts_with("HTTP/1.1 200 OK"));
    }

    #[tokio::test]
    async fn test_bind_error() {
        let first = test_server(1);
        let addr = first.start(0).await.unwrap();
        let second = test_server(1);
        assert!(matches!(
            second.start(addr.port()).await,
            Err(ServerError::Bind { .. })
        ));
    }
}
