//! Standard output capture for logtap
//!
//! Redirects a process's output descriptor into a pipe, keeps echoing every
//! byte to the original destination, and feeds the stream through line
//! reassembly and filtering into the log server's store.

mod controller;
mod error;
mod redirect;

pub use controller::{CaptureConfig, CaptureController, CaptureStats};
pub use error::CaptureError;
pub use redirect::{Interception, OutputRedirect};

#[cfg(unix)]
pub use redirect::FdRedirect;
