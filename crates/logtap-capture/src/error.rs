//! Error types for output capture.

use logtap_http::ServerError;

/// Errors produced while starting a capture session.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to redirect output: {0}")]
    Redirect(#[source] std::io::Error),

    #[error("log server error: {0}")]
    Server(#[from] ServerError),

    #[error("failed to spawn capture thread: {0}")]
    Thread(#[source] std::io::Error),
}
