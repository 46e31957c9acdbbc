//! Operation Scheduler
//!
//! Turns a [`BatchPlan`] into primitive ledger calls and issues them in four
//! phases that never interleave:
//!
//! ```text
//! 1. account init   - every account first seen in the batch
//! 2. token init     - every (account, token) first seen in the batch
//! 3. supply         - one deficit mint per positive tally
//! 4. transactions   - logged operations in input order
//!                     (transfer = give + ack)
//! ```
//!
//! Every call bumps the global operation counter, failed calls included, and
//! is followed by a measurement tick. A failed call is logged and the batch
//! carries on; the reconciliation check at the batch boundary decides whether
//! the run can continue.

use crate::measure::MeasurementError;
use crate::replay::ledger::{CallKind, LedgerCall, LedgerClient};
use crate::replay::measurement::{MeasurementContext, MeasurementScheduler, SnapshotTrigger};
use crate::replay::records::{AccountId, Operation};
use crate::replay::simulator::BatchPlan;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Running call counters for the whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpCounters {
    /// Every call issued, successful or not.
    pub total: u64,
    pub account_init: u64,
    pub token_init: u64,
    pub create: u64,
    pub burn: u64,
    pub give: u64,
    pub ack: u64,
    /// Calls that exited non-zero or could not be spawned.
    pub failed: u64,
}

impl OpCounters {
    pub fn record(&mut self, kind: CallKind, succeeded: bool) {
        self.total += 1;
        match kind {
            CallKind::AccountInit => self.account_init += 1,
            CallKind::TokenInit => self.token_init += 1,
            CallKind::Create => self.create += 1,
            CallKind::Burn => self.burn += 1,
            CallKind::Give => self.give += 1,
            CallKind::Ack => self.ack += 1,
        }
        if !succeeded {
            self.failed += 1;
        }
    }

    pub fn get(&self, kind: CallKind) -> u64 {
        match kind {
            CallKind::AccountInit => self.account_init,
            CallKind::TokenInit => self.token_init,
            CallKind::Create => self.create,
            CallKind::Burn => self.burn,
            CallKind::Give => self.give,
            CallKind::Ack => self.ack,
        }
    }
}

/// Phase boundaries recorded in the phase log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseMark {
    AccountInit,
    TokenInit,
    Supply,
    TransactionsStart,
    TransactionsEnd,
}

impl PhaseMark {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccountInit => "account_init",
            Self::TokenInit => "token_init",
            Self::Supply => "token_create",
            Self::TransactionsStart => "transactions_start",
            Self::TransactionsEnd => "transactions_end",
        }
    }
}

/// Scheduler state carried across batches.
#[derive(Debug, Clone, Default)]
pub struct SchedulerState {
    pub counters: OpCounters,
    pub first_account: Option<AccountId>,
}

/// What happened while one batch was applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Each phase mark with the operation count at which it was reached.
    pub phases: Vec<(PhaseMark, u64)>,
    pub calls_issued: u64,
    pub calls_failed: u64,
    pub transfers_applied: u64,
    pub transfers_failed: u64,
    pub snapshots_fired: u64,
}

/// Drives batch plans against a ledger, ticking the measurement scheduler after each call.
#[derive(Debug, Clone, Default)]
pub struct OperationScheduler {
    state: SchedulerState,
    measurement: MeasurementScheduler,
}

impl OperationScheduler {
    pub fn new(measurement: MeasurementScheduler) -> Self {
        Self::with_state(measurement, SchedulerState::default())
    }

    pub fn with_state(measurement: MeasurementScheduler, state: SchedulerState) -> Self {
        Self { state, measurement }
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn counters(&self) -> &OpCounters {
        &self.state.counters
    }

    pub fn measurement(&self) -> &MeasurementScheduler {
        &self.measurement
    }

    /// Apply one batch. Only a measurement failure aborts; ledger failures are logged and counted.
    pub fn run_batch<L, T>(
        &mut self,
        plan: &BatchPlan,
        ledger: &mut L,
        trigger: &mut T,
    ) -> Result<BatchReport, MeasurementError>
    where
        L: LedgerClient + ?Sized,
        T: SnapshotTrigger + ?Sized,
    {
        let mut report = BatchReport::default();

        self.mark(&mut report, PhaseMark::AccountInit);
        for account in &plan.new_accounts {
            let call = LedgerCall::AccountInit {
                account: account.clone(),
            };
            self.issue(&call, ledger, trigger, &mut report)?;
        }

        self.mark(&mut report, PhaseMark::TokenInit);
        for key in &plan.new_tokens {
            let call = LedgerCall::TokenInit {
                account: key.account.clone(),
                token: key.token.clone(),
            };
            self.issue(&call, ledger, trigger, &mut report)?;
        }

        self.mark(&mut report, PhaseMark::Supply);
        for deficit in &plan.deficit_mints {
            let call = LedgerCall::TokenCreate {
                account: deficit.key.account.clone(),
                token: deficit.key.token.clone(),
                amount: deficit.amount.clone(),
            };
            self.issue(&call, ledger, trigger, &mut report)?;
        }

        self.mark(&mut report, PhaseMark::TransactionsStart);
        for op in &plan.operations {
            match op {
                Operation::Mint {
                    account,
                    token,
                    amount,
                } => {
                    let call = LedgerCall::TokenCreate {
                        account: account.clone(),
                        token: token.clone(),
                        amount: amount.clone(),
                    };
                    self.issue(&call, ledger, trigger, &mut report)?;
                }
                Operation::Burn {
                    account,
                    token,
                    amount,
                } => {
                    let call = LedgerCall::TokenBurn {
                        account: account.clone(),
                        token: token.clone(),
                        amount: amount.clone(),
                    };
                    self.issue(&call, ledger, trigger, &mut report)?;
                }
                Operation::Transfer {
                    sender,
                    recipient,
                    token,
                    amount,
                } => {
                    let give = LedgerCall::TokenGive {
                        token: token.clone(),
                        sender: sender.clone(),
                        receiver: recipient.clone(),
                        amount: amount.clone(),
                    };
                    let ack = LedgerCall::TokenAck {
                        token: token.clone(),
                        receiver: recipient.clone(),
                        sender: sender.clone(),
                    };
                    let gave = self.issue(&give, ledger, trigger, &mut report)?;
                    let acked = self.issue(&ack, ledger, trigger, &mut report)?;
                    if gave && acked {
                        report.transfers_applied += 1;
                    } else {
                        report.transfers_failed += 1;
                    }
                }
                Operation::AccountInit { .. } | Operation::TokenInit { .. } => {
                    debug!("skipping derived {} in transaction phase", op.name());
                }
            }
        }
        self.mark(&mut report, PhaseMark::TransactionsEnd);

        Ok(report)
    }

    fn mark(&self, report: &mut BatchReport, phase: PhaseMark) {
        report.phases.push((phase, self.state.counters.total));
    }

    /// Issue one call and tick the measurement scheduler. Returns whether the call succeeded.
    fn issue<L, T>(
        &mut self,
        call: &LedgerCall,
        ledger: &mut L,
        trigger: &mut T,
        report: &mut BatchReport,
    ) -> Result<bool, MeasurementError>
    where
        L: LedgerClient + ?Sized,
        T: SnapshotTrigger + ?Sized,
    {
        let succeeded = match ledger.execute(call) {
            Ok(()) => true,
            Err(failure) => {
                error!("Error executing command: {}", failure);
                false
            }
        };

        if let LedgerCall::AccountInit { account } = call {
            if self.state.first_account.is_none() {
                self.state.first_account = Some(account.clone());
            }
        }

        self.state.counters.record(call.kind(), succeeded);
        report.calls_issued += 1;
        if !succeeded {
            report.calls_failed += 1;
        }

        let ctx = MeasurementContext {
            counters: &self.state.counters,
            first_account: self.state.first_account.as_deref(),
        };
        if self.measurement.observe(&ctx, trigger)? {
            report.snapshots_fired += 1;
        }

        Ok(succeeded)
    }
}
