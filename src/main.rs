mod config;

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use logtap_capture::{CaptureController, FdRedirect};
use logtap_logs::LogFilter;

use crate::config::Config;

/// logtap - capture stdout and serve recent log lines over HTTP
#[derive(Parser, Debug)]
#[command(name = "logtap")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Port for the log server (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Address to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Number of log entries to retain (overrides config)
    #[arg(long)]
    capacity: Option<usize>,

    /// Extra noise pattern to filter out, may be repeated
    #[arg(long = "filter", value_name = "PATTERN")]
    filters: Vec<String>,

    /// Print a heartbeat line to stdout every N seconds
    #[arg(long, value_name = "SECS")]
    heartbeat: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Diagnostics go to stderr; stdout is what gets captured
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(capacity) = args.capacity {
        config.server.capacity = capacity;
    }
    config.filter.noise_patterns.extend(args.filters);

    let controller = CaptureController::new(
        FdRedirect::stdout(),
        &config.server,
        LogFilter::from_config(&config.filter),
        config.capture.clone(),
    );
    controller
        .start()
        .await
        .context("Failed to start capture")?;

    let input = spawn_line_reader(BufReader::new(std::io::stdin()))?;
    let tee = tokio::spawn(tee_stdin(input));
    let heartbeat = args
        .heartbeat
        .filter(|secs| *secs > 0)
        .map(|secs| tokio::spawn(heartbeat(Duration::from_secs(secs))));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("shutting down");

    tee.abort();
    if let Some(handle) = heartbeat {
        handle.abort();
    }
    controller.stop().await;

    Ok(())
}

/// Read lines on a detached thread
///
/// A blocking stdin read cannot be cancelled, so the thread is never joined
/// and simply dies with the process.
fn spawn_line_reader<R>(reader: R) -> Result<mpsc::Receiver<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(256);
    std::thread::Builder::new()
        .name("logtap-stdin".to_string())
        .spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to read input");
                        break;
                    }
                }
            }
            debug!("input closed");
        })
        .context("Failed to spawn stdin reader")?;
    Ok(rx)
}

/// Copy stdin lines to stdout so piped output flows through the capture
async fn tee_stdin(mut lines: mpsc::Receiver<String>) {
    while let Some(line) = lines.recv().await {
        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{line}") {
            warn!(error = %e, "failed to write to stdout");
            break;
        }
    }
}

/// Periodic self-test line, handy for checking the pipeline end to end
async fn heartbeat(period: Duration) {
    let mut interval = tokio::time::interval(period);
    let mut beat: u64 = 0;
    loop {
        interval.tick().await;
        beat += 1;
        let now = chrono::Local::now().format("%H:%M:%S");
        let mut out = std::io::stdout().lock();
        if writeln!(out, "logtap heartbeat #{beat} at {now}").is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    /// A reader whose first read never returns, like an idle terminal
    struct Stalled;

    impl Read for Stalled {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            loop {
                std::thread::park();
            }
        }
    }

    #[tokio::test]
    async fn test_line_reader_forwards_in_order() {
        let mut rx = spawn_line_reader(Cursor::new("one\ntwo\n")).unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("one"));
        assert_eq!(rx.recv().await.as_deref(), Some("two"));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_blocked_input_does_not_hold_shutdown() {
        let rx = spawn_line_reader(BufReader::new(Stalled)).unwrap();
        let tee = tokio::spawn(tee_stdin(rx));

        tokio::time::sleep(Duration::from_millis(20)).await;
        tee.abort();
        let joined = tokio::time::timeout(Duration::from_secs(1), tee).await;
        assert!(joined.expect("tee task should stop promptly").unwrap_err().is_cancelled());
    }
}
