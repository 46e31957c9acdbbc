//! Measurement Scheduler
//!
//! Decides, after every external ledger call, whether a storage snapshot is
//! due. Timing is a pure function of the operation counter: a snapshot
//! fires exactly when the counter reaches a nonzero multiple of the interval.

use crate::measure::MeasurementError;
use crate::replay::scheduler::OpCounters;

/// Default number of ledger calls between snapshots.
pub const DEFAULT_MEASUREMENT_INTERVAL: u64 = 200;

/// What a snapshot gets to see about the replay at the moment it fires.
#[derive(Debug, Clone, Copy)]
pub struct MeasurementContext<'a> {
    pub counters: &'a OpCounters,
    /// First account initialized in the run, if any.
    pub first_account: Option<&'a str>,
}

/// A synchronous, blocking snapshot. No ledger call is issued until it returns.
pub trait SnapshotTrigger {
    fn capture(&mut self, ctx: &MeasurementContext<'_>) -> Result<(), MeasurementError>;
}

/// Never measures. Useful for dry runs and tests that only care about the ledger.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMeasurement;

impl SnapshotTrigger for NoMeasurement {
    fn capture(&mut self, _ctx: &MeasurementContext<'_>) -> Result<(), MeasurementError> {
        Ok(())
    }
}

/// Fixed-interval tick over the global operation counter.
#[derive(Debug, Clone)]
pub struct MeasurementScheduler {
    interval: u64,
    fired: u64,
    last_fired_at: Option<u64>,
}

impl Default for MeasurementScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MEASUREMENT_INTERVAL)
    }
}

impl MeasurementScheduler {
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            fired: 0,
            last_fired_at: None,
        }
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Number of snapshots fired so far.
    pub fn fired(&self) -> u64 {
        self.fired
    }

    pub fn last_fired_at(&self) -> Option<u64> {
        self.last_fired_at
    }

    pub fn is_due(&self, operation_count: u64) -> bool {
        operation_count > 0
            && operation_count % self.interval == 0
            && self.last_fired_at != Some(operation_count)
    }

    /// Tick after one external call; runs `trigger` when due.
    pub fn observe<T: SnapshotTrigger + ?Sized>(
        &mut self,
        ctx: &MeasurementContext<'_>,
        trigger: &mut T,
    ) -> Result<bool, MeasurementError> {
        let count = ctx.counters.total;
        if !self.is_due(count) {
            return Ok(false);
        }
        // A count fires at most once, even when capture fails.
        self.last_fired_at = Some(count);
        self.fired += 1;
        trigger.capture(ctx)?;
        Ok(true)
    }
}
