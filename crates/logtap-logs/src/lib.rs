//! Log processing for logtap
//!
//! This crate turns raw captured bytes into log entries: line reassembly,
//! noise filtering, level detection and the bounded entry store.

mod filter;
mod parser;
mod reassembler;
mod store;

pub use filter::{
    DEFAULT_LEVEL_BLACKLIST, DEFAULT_NOISE_PATTERNS, DEFAULT_STRUCTURED_TAG, FilterConfig,
    FilterRules, LogFilter, Rule, Verdict, evaluate,
};
pub use parser::LogParser;
pub use reassembler::{DEFAULT_MAX_PENDING_BYTES, LineKind, LineReassembler, ReassembledLine};
pub use store::{DEFAULT_CAPACITY, LogStore};

// Re-export types used in our public API
pub use logtap_types::{DEFAULT_LEVEL, FINAL_MARKER, LogEntry, PARTIAL_MARKER};
