//! Capture session lifecycle.
//!
//! `Idle → Capturing → Idle`. A session owns one processing thread that reads
//! the intercepted stream, echoes it to the original output, and pushes
//! accepted lines into the server's store in the order they were written.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use logtap_http::{LogServer, ServerConfig};
use logtap_logs::{
    DEFAULT_MAX_PENDING_BYTES, LineReassembler, LogFilter, LogParser, LogStore, ReassembledLine,
    evaluate,
};

use crate::error::CaptureError;
use crate::redirect::{Interception, OutputRedirect};

/// Capture settings as read from configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Pause between binding the server and redirecting output
    pub startup_delay_ms: u64,
    /// Bytes requested per read from the capture pipe
    pub chunk_size: usize,
    /// Unterminated bytes held before a line is force-split
    pub max_pending_bytes: usize,
}

impl CaptureConfig {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            startup_delay_ms: 100,
            chunk_size: 4096,
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
        }
    }
}

/// Counters reported when a session ends
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub bytes: u64,
    pub lines: u64,
    pub ingested: u64,
    pub filtered: u64,
    /// Lines dropped because they were not valid UTF-8
    pub undecodable: u64,
}

struct Session<R> {
    redirect: R,
    pump: Option<JoinHandle<CaptureStats>>,
}

/// Orchestrates output redirection, filtering and the log server
pub struct CaptureController<R: OutputRedirect> {
    server: LogServer,
    port: u16,
    filter: LogFilter,
    config: CaptureConfig,
    capturing: AtomicBool,
    session: Mutex<Session<R>>,
}

impl<R: OutputRedirect> CaptureController<R> {
    pub fn new(
        redirect: R,
        server_config: &ServerConfig,
        filter: LogFilter,
        config: CaptureConfig,
    ) -> Self {
        Self {
            server: LogServer::new(server_config),
            port: server_config.port,
            filter,
            config,
            capturing: AtomicBool::new(false),
            session: Mutex::new(Session {
                redirect,
                pump: None,
            }),
        }
    }

    /// Start the server and begin intercepting output. No-op if already capturing.
    pub async fn start(&self) -> Result<(), CaptureError> {
        let mut session = self.session.lock().await;
        if session.pump.is_some() {
            debug!("capture already running");
            return Ok(());
        }

        let addr = self.server.start(self.port).await?;
        // Give the listener a moment so its startup messages reach the console
        tokio::time::sleep(self.config.startup_delay()).await;

        let interception = match session.redirect.acquire() {
            Ok(interception) => interception,
            Err(e) => {
                self.server.stop();
                return Err(CaptureError::Redirect(e));
            }
        };

        let pipeline = Pipeline {
            reassembler: LineReassembler::with_max_pending(self.config.max_pending_bytes),
            filter: self.filter.clone(),
            store: self.server.store().clone(),
            stats: CaptureStats::default(),
        };
        let chunk_size = self.config.chunk_size.max(1);
        let spawned = std::thread::Builder::new()
            .name("logtap-capture".to_string())
            .spawn(move || pipeline.run(interception, chunk_size));

        match spawned {
            Ok(handle) => session.pump = Some(handle),
            Err(e) => {
                if let Err(restore_err) = session.redirect.restore() {
                    error!(error = %restore_err, "failed to restore output");
                }
                self.server.stop();
                return Err(CaptureError::Thread(e));
            }
        }

        self.capturing.store(true, Ordering::SeqCst);
        info!(%addr, "capture started");
        Ok(())
    }

    /// Restore the original output, drain pending bytes, and stop the server
    ///
    /// Returns once every captured byte has been processed, including a final
    /// unterminated line. Idempotent.
    pub async fn stop(&self) -> Option<CaptureStats> {
        let mut session = self.session.lock().await;
        let pump = session.pump.take()?;
        self.capturing.store(false, Ordering::SeqCst);

        let stats = match session.redirect.restore() {
            // The source now drains what is buffered and ends, so the join is bounded
            Ok(()) => match tokio::task::spawn_blocking(move || pump.join()).await {
                Ok(Ok(stats)) => Some(stats),
                Ok(Err(_)) => {
                    error!("capture thread panicked");
                    None
                }
                Err(e) => {
                    error!(error = %e, "failed to join capture thread");
                    None
                }
            },
            Err(e) => {
                error!(error = %e, "failed to restore output, capture thread detached");
                None
            }
        };

        self.server.stop();
        if let Some(stats) = &stats {
            info!(
                bytes = stats.bytes,
                lines = stats.lines,
                ingested = stats.ingested,
                filtered = stats.filtered,
                "capture stopped"
            );
        }
        stats
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    /// Exclude lines containing `pattern` (case-insensitive)
    pub fn add_filter_pattern(&self, pattern: &str) -> bool {
        self.filter.add_pattern(pattern)
    }

    pub fn remove_filter_pattern(&self, pattern: &str) -> bool {
        self.filter.remove_pattern(pattern)
    }

    pub fn list_filter_patterns(&self) -> Vec<String> {
        self.filter.list_patterns()
    }

    pub fn filter(&self) -> &LogFilter {
        &self.filter
    }

    pub fn server(&self) -> &LogServer {
        &self.server
    }

    pub fn store(&self) -> &LogStore {
        self.server.store()
    }
}

impl<R: OutputRedirect> Drop for CaptureController<R> {
    fn drop(&mut self) {
        // Without a runtime to join on, at least hand the output back
        let session = self.session.get_mut();
        if session.pump.take().is_some() {
            if let Err(e) = session.redirect.restore() {
                error!(error = %e, "failed to restore output on drop");
            }
        }
    }
}

/// Reassembly → filter → store, run on the capture thread
struct Pipeline {
    reassembler: LineReassembler,
    filter: LogFilter,
    store: LogStore,
    stats: CaptureStats,
}

impl Pipeline {
    fn run(mut self, interception: Interception, chunk_size: usize) -> CaptureStats {
        let Interception {
            mut source,
            mut passthrough,
        } = interception;
        let mut buf = vec![0u8; chunk_size];
        let mut echo = true;

        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "capture read failed");
                    break;
                }
            };
            let chunk = &buf[..n];
            self.stats.bytes += n as u64;

            if echo {
                if let Err(e) = passthrough.write_all(chunk).and_then(|()| passthrough.flush()) {
                    // Keep capturing even if the console went away
                    warn!(error = %e, "failed to echo captured output");
                    echo = false;
                }
            }

            for line in self.reassembler.feed(chunk) {
                self.deliver(line);
            }
        }

        if let Some(line) = self.reassembler.flush() {
            self.deliver(line);
        }
        self.stats
    }

    fn deliver(&mut self, line: ReassembledLine) {
        self.stats.lines += 1;
        let marker = line.kind.marker();
        let Ok(text) = String::from_utf8(line.bytes) else {
            self.stats.undecodable += 1;
            return;
        };
        let text = text.trim();

        let level = {
            let rules = self.filter.read();
            let verdict = evaluate(text, &rules);
            if !verdict.is_accepted() {
                trace!(rule = ?verdict.rule(), "line filtered");
                self.stats.filtered += 1;
                return;
            }
            LogParser::detect_level(text, &rules)
        };

        self.store.ingest(format!("{text}{marker}"), level);
        self.stats.ingested += 1;
    }
}
