//! Ledger Replay Bench Library
//!
//! Replays a token transfer log against a versioned ledger and records how
//! the ledger's object store grows. Used by the `replay-bench` binary and
//! the integration tests.

pub mod config;
pub mod measure;
pub mod process;
pub mod replay;

pub use config::{ConfigError, ReplayConfig, Variant};
pub use replay::{ReplayError, ReplayRun, RunSummary};
