//! Storage Snapshot Pipeline
//!
//! One snapshot, in order:
//!
//! ```text
//! 1. full bundle of all branches        → objects / deltas from progress
//! 2. persist bundles/<count>.bundle; scratch copy → clone → pack out → unpack → du
//! 3. incremental bundle (branches minus marker namespace)
//! 4. advance markers to current heads
//! 5. structure stats (git-sizer)
//! 6. naive tree size
//! 7. append one row per table
//! 8. drop scratch dir (also on error)
//! ```

use crate::measure::sink::{CsvRow, CsvTable};
use crate::measure::sizer::StructureStats;
use crate::measure::store::ObjectStore;
use crate::measure::sync_timing::{SyncProbe, SyncTiming};
use crate::measure::MeasurementError;
use crate::replay::measurement::{MeasurementContext, SnapshotTrigger};
use crate::replay::scheduler::OpCounters;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const SIZE_TABLE: &str = "size_measurements.csv";
pub const STRUCTURE_TABLE: &str = "git_sizer_measurements.csv";
pub const SYNC_TABLE: &str = "time_measurements.csv";
pub const BUNDLES_DIR: &str = "bundles";
pub const DELTA_BUNDLES_DIR: &str = "delta_bundles";

/// Row of `size_measurements.csv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeMeasurement {
    pub num_of_operations: u64,
    pub size_bundle_file: u64,
    pub num_objects: u64,
    pub num_deltas: u64,
    pub size_pack_file: u64,
    pub size_unpacked_repo: u64,
    pub counters: OpCounters,
    pub delta_bundle_size: u64,
}

impl CsvRow for SizeMeasurement {
    const HEADER: &'static [&'static str] = &[
        "num_of_operations",
        "size_bundle_file",
        "num_objects",
        "num_deltas",
        "size_pack_file",
        "size_unpacked_repo",
        "#account_init",
        "#init",
        "#create",
        "#burn",
        "#giveTo",
        "#ackFrom",
        "delta_bundle_size",
    ];

    fn fields(&self) -> Vec<String> {
        let c = &self.counters;
        [
            self.num_of_operations,
            self.size_bundle_file,
            self.num_objects,
            self.num_deltas,
            self.size_pack_file,
            self.size_unpacked_repo,
            c.account_init,
            c.token_init,
            c.create,
            c.burn,
            c.give,
            c.ack,
            self.delta_bundle_size,
        ]
        .iter()
        .map(u64::to_string)
        .collect()
    }
}

/// Row of `git_sizer_measurements.csv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureMeasurement {
    pub num_of_operations: u64,
    pub stats: StructureStats,
    pub naive_tree_size: u64,
}

impl CsvRow for StructureMeasurement {
    const HEADER: &'static [&'static str] = &[
        "num_of_operations",
        "uniqueBlobCount",
        "uniqueBlobSize",
        "uniqueTreeCount",
        "uniqueTreeEntries",
        "uniqueTreeSize",
        "uniqueCommitCount",
        "uniqueCommitSize",
        "naiveTreeSize",
    ];

    fn fields(&self) -> Vec<String> {
        let s = &self.stats;
        [
            self.num_of_operations,
            s.unique_blob_count,
            s.unique_blob_size,
            s.unique_tree_count,
            s.unique_tree_entries,
            s.unique_tree_size,
            s.unique_commit_count,
            s.unique_commit_size,
            self.naive_tree_size,
        ]
        .iter()
        .map(u64::to_string)
        .collect()
    }
}

/// Everything captured at one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub size: SizeMeasurement,
    pub structure: StructureMeasurement,
    pub sync: Option<SyncTiming>,
}

#[derive(Debug, Clone)]
pub struct SnapshotSettings {
    /// Per-variant results directory; tables and bundle dirs live here.
    pub results_dir: PathBuf,
    /// Parent for the per-snapshot scratch directory.
    pub scratch_root: PathBuf,
    pub keep_incremental_bundles: bool,
}

impl SnapshotSettings {
    pub fn bundles_dir(&self) -> PathBuf {
        self.results_dir.join(BUNDLES_DIR)
    }

    pub fn delta_bundles_dir(&self) -> PathBuf {
        self.results_dir.join(DELTA_BUNDLES_DIR)
    }
}

#[derive(Debug)]
pub struct MeasurementTables {
    pub size: CsvTable<SizeMeasurement>,
    pub structure: CsvTable<StructureMeasurement>,
    pub sync: Option<CsvTable<SyncTiming>>,
}

impl MeasurementTables {
    pub fn open(results_dir: &Path, with_sync: bool) -> Result<Self, MeasurementError> {
        Ok(Self {
            size: CsvTable::open(results_dir.join(SIZE_TABLE))?,
            structure: CsvTable::open(results_dir.join(STRUCTURE_TABLE))?,
            sync: if with_sync {
                Some(CsvTable::open(results_dir.join(SYNC_TABLE))?)
            } else {
                None
            },
        })
    }
}

/// The snapshot trigger wired into the measurement scheduler.
#[derive(Debug)]
pub struct SnapshotPipeline<S: ObjectStore> {
    store: S,
    settings: SnapshotSettings,
    tables: MeasurementTables,
    sync: Option<SyncProbe>,
    taken: u64,
    last: Option<Snapshot>,
}

impl<S: ObjectStore> SnapshotPipeline<S> {
    /// Create the bundle directories and open the tables.
    pub fn create(
        store: S,
        settings: SnapshotSettings,
        sync: Option<SyncProbe>,
    ) -> Result<Self, MeasurementError> {
        for dir in [settings.results_dir.clone(), settings.bundles_dir()] {
            fs::create_dir_all(&dir).map_err(|e| MeasurementError::io(&dir, e))?;
        }
        if settings.keep_incremental_bundles {
            let dir = settings.delta_bundles_dir();
            fs::create_dir_all(&dir).map_err(|e| MeasurementError::io(&dir, e))?;
        }
        fs::create_dir_all(&settings.scratch_root)
            .map_err(|e| MeasurementError::io(&settings.scratch_root, e))?;

        let tables = MeasurementTables::open(&settings.results_dir, sync.is_some())?;
        Ok(Self {
            store,
            settings,
            tables,
            sync,
            taken: 0,
            last: None,
        })
    }

    pub fn taken(&self) -> u64 {
        self.taken
    }

    pub fn last(&self) -> Option<&Snapshot> {
        self.last.as_ref()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &SnapshotSettings {
        &self.settings
    }

    /// Run the pipeline for the state reached after `ctx.counters.total` calls.
    pub fn take(&mut self, ctx: &MeasurementContext<'_>) -> Result<Snapshot, MeasurementError> {
        let count = ctx.counters.total;
        info!("start measurements ({} ops)", count);

        debug!("create bundle");
        let full = self.store.full_bundle()?;
        let bundle_path = self.settings.bundles_dir().join(format!("{}.bundle", count));
        write_file(&bundle_path, &full.bytes)?;

        let scratch = tempfile::Builder::new()
            .prefix("snapshot-")
            .tempdir_in(&self.settings.scratch_root)
            .map_err(|e| MeasurementError::io(&self.settings.scratch_root, e))?;
        let scratch_bundle = scratch.path().join("measure.bundle");
        write_file(&scratch_bundle, &full.bytes)?;

        debug!("clone and unpack");
        let sizes = self.store.clone_sizes(&scratch_bundle, scratch.path())?;

        let incremental = self.store.incremental_bundle()?;
        if self.settings.keep_incremental_bundles && !incremental.is_empty() {
            let path = self
                .settings
                .delta_bundles_dir()
                .join(format!("{}.bundle", count));
            write_file(&path, &incremental)?;
        }

        debug!("advance markers");
        self.store.advance_marker()?;

        let stats = self.store.structure()?;
        let naive_tree_size = self.store.naive_tree_size()?;

        let snapshot = Snapshot {
            size: SizeMeasurement {
                num_of_operations: count,
                size_bundle_file: full.bytes.len() as u64,
                num_objects: full.num_objects,
                num_deltas: full.num_deltas,
                size_pack_file: sizes.pack_size,
                size_unpacked_repo: sizes.unpacked_size,
                counters: *ctx.counters,
                delta_bundle_size: incremental.len() as u64,
            },
            structure: StructureMeasurement {
                num_of_operations: count,
                stats,
                naive_tree_size,
            },
            sync: match &self.sync {
                Some(probe) => probe.measure(count, ctx.first_account)?,
                None => None,
            },
        };

        self.tables.size.append(&snapshot.size)?;
        self.tables.structure.append(&snapshot.structure)?;
        if let (Some(timing), Some(table)) = (&snapshot.sync, self.tables.sync.as_mut()) {
            table.append(timing)?;
        }

        let scratch_path = scratch.path().to_path_buf();
        scratch
            .close()
            .map_err(|e| MeasurementError::io(scratch_path, e))?;

        self.taken += 1;
        self.last = Some(snapshot.clone());
        info!(
            "measurement finished ({} ops, bundle {} B, delta {} B)",
            count, snapshot.size.size_bundle_file, snapshot.size.delta_bundle_size
        );
        Ok(snapshot)
    }
}

impl<S: ObjectStore> SnapshotTrigger for SnapshotPipeline<S> {
    fn capture(&mut self, ctx: &MeasurementContext<'_>) -> Result<(), MeasurementError> {
        self.take(ctx).map(|_| ())
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), MeasurementError> {
    fs::write(path, bytes).map_err(|e| MeasurementError::io(path, e))
}
