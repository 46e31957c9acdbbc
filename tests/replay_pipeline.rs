//! End-to-end replay tests
//!
//! Drives the full engine (simulator, scheduler, measurement, snapshot
//! pipeline, reconciliation) against the in-memory ledger and a scripted
//! object store, so no external executables are needed.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use replay_bench::measure::sizer::StructureStats;
use replay_bench::measure::snapshot::{SnapshotPipeline, SnapshotSettings};
use replay_bench::measure::store::{CloneSizes, FullBundle, ObjectStore};
use replay_bench::measure::MeasurementError;
use replay_bench::replay::{
    CallKind, LedgerClient, MeasurementScheduler, MemoryLedger, NoMeasurement, Normalizer,
    RawRecord, RecordBatch, ReplayError, ReplayRun, ReplayTables, VecFeed, NULL_ACCOUNT,
};
use std::fs;
use std::path::Path;

/// Object store whose sizes grow with the number of snapshots taken.
#[derive(Default)]
struct GrowingStore {
    snapshots: u64,
}

impl ObjectStore for GrowingStore {
    fn full_bundle(&mut self) -> Result<FullBundle, MeasurementError> {
        self.snapshots += 1;
        Ok(FullBundle {
            bytes: vec![0u8; (self.snapshots * 100) as usize],
            num_objects: self.snapshots * 10,
            num_deltas: self.snapshots,
        })
    }

    fn incremental_bundle(&mut self) -> Result<Vec<u8>, MeasurementError> {
        Ok(vec![0u8; 100])
    }

    fn advance_marker(&mut self) -> Result<(), MeasurementError> {
        Ok(())
    }

    fn clone_sizes(&mut self, _bundle: &Path, _scratch: &Path) -> Result<CloneSizes, MeasurementError> {
        Ok(CloneSizes {
            pack_size: self.snapshots * 90,
            unpacked_size: self.snapshots * 400,
        })
    }

    fn structure(&mut self) -> Result<StructureStats, MeasurementError> {
        Ok(StructureStats {
            unique_blob_count: self.snapshots,
            ..StructureStats::default()
        })
    }

    fn naive_tree_size(&mut self) -> Result<u64, MeasurementError> {
        Ok(self.snapshots * 1000)
    }
}

fn random_day(rng: &mut ChaCha8Rng, label: &str, rows: usize) -> RecordBatch {
    let accounts = ["a0", "a1", "a2", "a3", "a4", "a5", NULL_ACCOUNT];
    let tokens = ["T1", "T2", "T3"];
    let records = (0..rows)
        .map(|_| {
            let sender = accounts[rng.gen_range(0..accounts.len())];
            let recipient = accounts[rng.gen_range(0..accounts.len())];
            let token = tokens[rng.gen_range(0..tokens.len())];
            let value: u64 = if rng.gen_bool(0.05) { 0 } else { rng.gen_range(1..1_000) };
            RawRecord::new(sender, recipient, token, value)
        })
        .collect();
    RecordBatch::new(label, records)
}

#[test]
fn test_random_days_reconcile_and_snapshot_on_interval() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("results");
    let mut rng = ChaCha8Rng::seed_from_u64(17);
    let days: Vec<RecordBatch> = (0..5)
        .map(|d| random_day(&mut rng, &format!("day-{d}.tsv.gz"), 120))
        .collect();

    let pipeline = SnapshotPipeline::create(
        GrowingStore::default(),
        SnapshotSettings {
            results_dir: results.clone(),
            scratch_root: dir.path().join("tmp"),
            keep_incremental_bundles: false,
        },
        None,
    )
    .unwrap();
    let tables = ReplayTables::open(&results).unwrap();

    let mut run = ReplayRun::new(
        Normalizer::default(),
        MeasurementScheduler::new(50),
        MemoryLedger::new(),
        pipeline,
    )
    .with_tables(tables);
    let summary = run.run(&mut VecFeed::new("random", days)).unwrap();

    assert_eq!(summary.batches, 5);
    assert_eq!(summary.records, 600);
    assert_eq!(summary.snapshots, summary.counters.total / 50);
    assert!(summary.snapshots > 0);

    // Every simulated balance matches the ledger model after the last day.
    let expected: Vec<_> = run
        .simulator()
        .state()
        .balances()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let (mut ledger, pipeline) = run.into_parts();
    for (key, amount) in expected {
        assert_eq!(ledger.balance(&key.account, &key.token).unwrap(), amount);
    }

    let size = fs::read_to_string(results.join("size_measurements.csv")).unwrap();
    let counts: Vec<u64> = size
        .lines()
        .skip(1)
        .map(|l| l.split(',').next().unwrap().parse().unwrap())
        .collect();
    assert_eq!(counts.len() as u64, pipeline.taken());
    assert!(counts.iter().all(|c| c % 50 == 0));
    assert!(counts.windows(2).all(|w| w[0] < w[1]));

    let phases = fs::read_to_string(results.join("simulation_phases.csv")).unwrap();
    assert_eq!(phases.lines().count(), 1 + 5 * 5);
    let overview = fs::read_to_string(results.join("simulation_overview.csv")).unwrap();
    assert_eq!(overview.lines().count(), 1 + 5);
}

#[test]
fn test_ledger_rejection_surfaces_as_mismatch() {
    // Mints are refused, so the give overdraws and the ack has nothing to credit.
    let ledger = MemoryLedger::new().fail_on(CallKind::Create);

    let mut run = ReplayRun::new(
        Normalizer::default(),
        MeasurementScheduler::default(),
        ledger,
        NoMeasurement,
    );
    let day = RecordBatch::new(
        "d1",
        vec![
            RawRecord::new(NULL_ACCOUNT, "alice", "T1", 10u32),
            RawRecord::new("alice", "bob", "T1", 4u32),
        ],
    );
    let err = run.run(&mut VecFeed::new("one", vec![day])).unwrap_err();
    let ReplayError::Reconciliation(failure) = err else {
        panic!("expected reconciliation failure");
    };
    // alice expected 6 (has 0), bob expected 4 (has 0)
    assert_eq!(failure.mismatches.len(), 2);
}

#[test]
fn test_snapshot_failure_is_fatal() {
    struct BrokenStore;

    impl ObjectStore for BrokenStore {
        fn full_bundle(&mut self) -> Result<FullBundle, MeasurementError> {
            Err(MeasurementError::unparseable("git bundle", "no totals"))
        }
        fn incremental_bundle(&mut self) -> Result<Vec<u8>, MeasurementError> {
            unreachable!()
        }
        fn advance_marker(&mut self) -> Result<(), MeasurementError> {
            unreachable!()
        }
        fn clone_sizes(&mut self, _: &Path, _: &Path) -> Result<CloneSizes, MeasurementError> {
            unreachable!()
        }
        fn structure(&mut self) -> Result<StructureStats, MeasurementError> {
            unreachable!()
        }
        fn naive_tree_size(&mut self) -> Result<u64, MeasurementError> {
            unreachable!()
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let pipeline = SnapshotPipeline::create(
        BrokenStore,
        SnapshotSettings {
            results_dir: dir.path().join("results"),
            scratch_root: dir.path().join("tmp"),
            keep_incremental_bundles: false,
        },
        None,
    )
    .unwrap();
    let mut run = ReplayRun::new(
        Normalizer::default(),
        MeasurementScheduler::new(2),
        MemoryLedger::new(),
        pipeline,
    );
    let day = RecordBatch::new(
        "d1",
        vec![
            RawRecord::new(NULL_ACCOUNT, "alice", "T1", 1u32),
            RawRecord::new(NULL_ACCOUNT, "bob", "T1", 1u32),
        ],
    );
    let err = run.run(&mut VecFeed::new("one", vec![day])).unwrap_err();
    assert!(matches!(err, ReplayError::Measurement(_)));
    // Stopped right after the second call.
    let (ledger, _) = run.into_parts();
    assert_eq!(ledger.calls().len(), 2);
}
