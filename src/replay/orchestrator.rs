//! Replay Orchestrator
//!
//! Owns one run end to end. Per batch:
//!
//! ```text
//! records ──▶ BalanceSimulator::plan_batch ──▶ overview row
//!                                │
//!                                ▼
//!              OperationScheduler::run_batch ──▶ ledger calls + snapshots
//!                                │
//!                                ▼
//!                 phase rows ──▶ reconcile ──▶ next batch
//! ```
//!
//! A snapshot failure or a reconciliation mismatch ends the run.

use crate::measure::sink::{CsvRow, CsvTable};
use crate::measure::MeasurementError;
use crate::replay::feed::RecordFeed;
use crate::replay::ledger::LedgerClient;
use crate::replay::measurement::{MeasurementScheduler, SnapshotTrigger};
use crate::replay::reconcile::{reconcile, ReconciliationFailure};
use crate::replay::records::Normalizer;
use crate::replay::scheduler::{BatchReport, OpCounters, OperationScheduler, PhaseMark};
use crate::replay::simulator::{BalanceSimulator, BatchPlan};
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::info;

pub const PHASES_TABLE: &str = "simulation_phases.csv";
pub const OVERVIEW_TABLE: &str = "simulation_overview.csv";

/// Row of `simulation_phases.csv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseRow {
    pub f_name: String,
    pub phase: PhaseMark,
    pub num_operations: u64,
}

impl CsvRow for PhaseRow {
    const HEADER: &'static [&'static str] = &["f_name", "phase_name", "num_operations"];

    fn fields(&self) -> Vec<String> {
        vec![
            self.f_name.clone(),
            self.phase.as_str().to_string(),
            self.num_operations.to_string(),
        ]
    }
}

/// Row of `simulation_overview.csv`, written before a batch is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverviewRow {
    pub f_name: String,
    pub num_init_account: usize,
    pub num_init_token: usize,
    pub num_create: usize,
    pub num_transactions: usize,
}

impl OverviewRow {
    pub fn for_plan(label: &str, plan: &BatchPlan) -> Self {
        Self {
            f_name: label.to_string(),
            num_init_account: plan.new_accounts.len(),
            num_init_token: plan.new_tokens.len(),
            num_create: plan.deficit_mints.len(),
            num_transactions: plan.operations.len(),
        }
    }
}

impl CsvRow for OverviewRow {
    const HEADER: &'static [&'static str] = &[
        "f_name",
        "num_init_account",
        "num_init_token",
        "num_create",
        "num_transactions",
    ];

    fn fields(&self) -> Vec<String> {
        vec![
            self.f_name.clone(),
            self.num_init_account.to_string(),
            self.num_init_token.to_string(),
            self.num_create.to_string(),
            self.num_transactions.to_string(),
        ]
    }
}

#[derive(Debug)]
pub struct ReplayTables {
    pub phases: CsvTable<PhaseRow>,
    pub overview: CsvTable<OverviewRow>,
}

impl ReplayTables {
    pub fn open(results_dir: &Path) -> Result<Self, MeasurementError> {
        Ok(Self {
            phases: CsvTable::open(results_dir.join(PHASES_TABLE))?,
            overview: CsvTable::open(results_dir.join(OVERVIEW_TABLE))?,
        })
    }
}

/// Fatal end of a run.
#[derive(Debug)]
pub enum ReplayError {
    Measurement(MeasurementError),
    Reconciliation(ReconciliationFailure),
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Measurement(e) => write!(f, "measurement failed: {}", e),
            Self::Reconciliation(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ReplayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Measurement(e) => Some(e),
            Self::Reconciliation(e) => Some(e),
        }
    }
}

impl From<MeasurementError> for ReplayError {
    fn from(e: MeasurementError) -> Self {
        Self::Measurement(e)
    }
}

impl From<ReconciliationFailure> for ReplayError {
    fn from(e: ReconciliationFailure) -> Self {
        Self::Reconciliation(e)
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub batches: u64,
    /// Source rows read, including skipped and discarded ones.
    pub records: u64,
    pub counters: OpCounters,
    pub snapshots: u64,
    pub balances_checked: usize,
}

pub struct ReplayRun<L: LedgerClient, T: SnapshotTrigger> {
    simulator: BalanceSimulator,
    scheduler: OperationScheduler,
    ledger: L,
    trigger: T,
    tables: Option<ReplayTables>,
    records_seen: u64,
}

impl<L: LedgerClient, T: SnapshotTrigger> ReplayRun<L, T> {
    pub fn new(normalizer: Normalizer, measurement: MeasurementScheduler, ledger: L, trigger: T) -> Self {
        Self {
            simulator: BalanceSimulator::new(normalizer),
            scheduler: OperationScheduler::new(measurement),
            ledger,
            trigger,
            tables: None,
            records_seen: 0,
        }
    }

    /// Also write the phase log and batch overview.
    pub fn with_tables(mut self, tables: ReplayTables) -> Self {
        self.tables = Some(tables);
        self
    }

    pub fn simulator(&self) -> &BalanceSimulator {
        &self.simulator
    }

    pub fn scheduler(&self) -> &OperationScheduler {
        &self.scheduler
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn trigger(&self) -> &T {
        &self.trigger
    }

    pub fn into_parts(self) -> (L, T) {
        (self.ledger, self.trigger)
    }

    /// Apply one batch and reconcile. Returns the number of balances checked.
    pub fn apply_batch(
        &mut self,
        label: &str,
        plan: &BatchPlan,
    ) -> Result<(BatchReport, usize), ReplayError> {
        if let Some(tables) = self.tables.as_mut() {
            tables.overview.append(&OverviewRow::for_plan(label, plan))?;
        }

        let report = self
            .scheduler
            .run_batch(plan, &mut self.ledger, &mut self.trigger)?;

        if let Some(tables) = self.tables.as_mut() {
            for (phase, count) in &report.phases {
                tables.phases.append(&PhaseRow {
                    f_name: label.to_string(),
                    phase: *phase,
                    num_operations: *count,
                })?;
            }
        }

        info!("checking balance");
        let checked = reconcile(label, &mut self.ledger, self.simulator.state().balances())?;
        Ok((report, checked))
    }

    /// Replay every batch `feed` yields.
    pub fn run<F: RecordFeed + ?Sized>(&mut self, feed: &mut F) -> Result<RunSummary, ReplayError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        info!("Start: {}", started_at.to_rfc3339());

        let mut batches = 0u64;
        let mut balances_checked = 0usize;
        while let Some(batch) = feed.next_batch() {
            let plan = self.simulator.plan_batch(&batch.records);
            self.records_seen += batch.rows_total as u64;

            let (report, checked) = self.apply_batch(&batch.label, &plan)?;
            batches += 1;
            balances_checked = checked;

            info!(
                "{}: {} calls ({} failed), {} transfers, {} snapshots",
                batch.label,
                report.calls_issued,
                report.calls_failed,
                report.transfers_applied,
                report.snapshots_fired
            );
            info!("Num op (ledger): {}", self.scheduler.counters().total);
            info!("Num transactions: {}", self.records_seen);
        }

        let duration = clock.elapsed();
        info!("End: {}", Utc::now().to_rfc3339());
        info!("Duration: {:.3}s", duration.as_secs_f64());

        Ok(RunSummary {
            started_at,
            duration,
            batches,
            records: self.records_seen,
            counters: *self.scheduler.counters(),
            snapshots: self.scheduler.measurement().fired(),
            balances_checked,
        })
    }
}
