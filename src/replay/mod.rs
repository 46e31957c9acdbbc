//! Ledger Replay Engine
//!
//! Converts a raw transfer log into a balance-consistent stream of primitive
//! ledger calls and drives it against the ledger under test.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                          ReplayRun                             │
//! │      (one batch at a time, reconciles at every boundary)       │
//! └────────────────────────────────────────────────────────────────┘
//!        │                      │                       │
//!        ▼                      ▼                       ▼
//! ┌─────────────┐      ┌──────────────────┐     ┌──────────────┐
//! │ RecordFeed  │      │ BalanceSimulator │     │ Reconcile    │
//! │ (daily logs)│      │ (pure, in-memory)│     │ (read-back)  │
//! └─────────────┘      └──────────────────┘     └──────────────┘
//!                               │ BatchPlan
//!                               ▼
//!                    ┌─────────────────────┐      ┌──────────────────┐
//!                    │ OperationScheduler  │─────▶│ LedgerClient     │
//!                    │ (4 phases)          │      │ (executables)    │
//!                    └─────────────────────┘      └──────────────────┘
//!                               │ tick after every call
//!                               ▼
//!                    ┌─────────────────────┐
//!                    │ MeasurementScheduler│───▶ SnapshotTrigger
//!                    └─────────────────────┘
//! ```
//!
//! # Determinism
//!
//! - Records are consumed in input order, one batch at a time
//! - Simulator state is ordered (`BTreeMap`), plan lists keep first-seen order
//! - Snapshot timing depends only on the operation counter

pub mod feed;
pub mod ledger;
pub mod measurement;
pub mod memory_ledger;
pub mod orchestrator;
pub mod reconcile;
pub mod records;
pub mod scheduler;
pub mod simulator;


pub use feed::{DailyLogFeed, FeedError, RecordBatch, RecordFeed, VecFeed};
pub use ledger::{CallKind, CommandLedger, LedgerCall, LedgerClient, LedgerCommands, LedgerError};
pub use measurement::{
    MeasurementContext, MeasurementScheduler, NoMeasurement, SnapshotTrigger,
    DEFAULT_MEASUREMENT_INTERVAL,
};
pub use memory_ledger::MemoryLedger;
pub use orchestrator::{ReplayError, ReplayRun, ReplayTables, RunSummary};
pub use reconcile::{reconcile, BalanceMismatch, ReconciliationFailure};
pub use records::{AccountId, Amount, BalanceKey, Normalizer, Operation, RawRecord, TokenId, NULL_ACCOUNT};
pub use scheduler::{BatchReport, OpCounters, OperationScheduler, PhaseMark, SchedulerState};
pub use simulator::{BalanceSimulator, BatchPlan, DeficitMint, SimulatorState};
