//! Storage Measurement
//!
//! Captures the on-disk footprint of the ledger's versioned object store at
//! fixed operation counts.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │              SnapshotPipeline (SnapshotTrigger)              │
//! │   full bundle → clone/unpack → incremental → marker advance  │
//! │   → structure stats → naive tree walk → append table rows    │
//! └──────────────────────────────────────────────────────────────┘
//!            │                         │                    │
//!            ▼                         ▼                    ▼
//!     ┌─────────────┐          ┌──────────────┐     ┌──────────────┐
//!     │ ObjectStore │          │ CsvTable<R>  │     │  SyncProbe   │
//!     │ (git CLI)   │          │ append-only  │     │  (optional)  │
//!     └─────────────┘          └──────────────┘     └──────────────┘
//! ```
//!
//! Every error here is fatal for the run: a missing or corrupt data point
//! breaks the growth curve.

pub mod git;
pub mod naive;
pub mod sink;
pub mod sizer;
pub mod snapshot;
pub mod store;
pub mod sync_timing;


pub use git::{GitRepo, ObjectKind, TreeEntry};
pub use naive::{bundle_naive_sizes, list_bundles, naive_sizes, naive_tree_size, NaiveRow, NaiveSizes};
pub use sink::{CsvRow, CsvTable};
pub use sizer::{parse_sizer_report, StructureStats};
pub use snapshot::{
    MeasurementTables, SizeMeasurement, Snapshot, SnapshotPipeline, SnapshotSettings,
    StructureMeasurement,
};
pub use store::{parse_pack_totals, CloneSizes, FullBundle, GitStore, ObjectStore};
pub use sync_timing::{SyncCommands, SyncProbe, SyncTiming};

use crate::process::CommandFailure;
use std::fmt;
use std::path::PathBuf;

/// Failure anywhere in the snapshot pipeline.
#[derive(Debug)]
pub enum MeasurementError {
    /// A store or tool command failed.
    Command(CommandFailure),
    /// A tool produced output in an unexpected format.
    UnparseableOutput { tool: &'static str, output: String },
    /// File I/O on bundles, scratch directories or tables.
    Io { path: PathBuf, source: std::io::Error },
}

impl MeasurementError {
    pub fn unparseable(tool: &'static str, output: impl Into<String>) -> Self {
        Self::UnparseableOutput {
            tool,
            output: output.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl fmt::Display for MeasurementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(e) => write!(f, "measurement command failed: {}", e),
            Self::UnparseableOutput { tool, output } => {
                write!(f, "could not parse {} output: {}", tool, output)
            }
            Self::Io { path, source } => write!(f, "I/O error on {:?}: {}", path, source),
        }
    }
}

impl std::error::Error for MeasurementError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Command(e) => Some(e),
            Self::Io { source, .. } => Some(source),
            Self::UnparseableOutput { .. } => None,
        }
    }
}

impl From<CommandFailure> for MeasurementError {
    fn from(e: CommandFailure) -> Self {
        Self::Command(e)
    }
}
