//! Reconciliation Check
//!
//! At each batch boundary every balance the simulator knows is read back from
//! the ledger. All mismatches of a pass are collected and reported together;
//! any mismatch makes the run invalid.

use crate::replay::ledger::LedgerClient;
use crate::replay::records::{Amount, BalanceKey};
use std::fmt;
use tracing::warn;

/// One diverging balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceMismatch {
    pub key: BalanceKey,
    pub expected: Amount,
    /// `Err` holds the query failure when the ledger could not report a balance.
    pub actual: Result<Amount, String>,
}

impl fmt::Display for BalanceMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.actual {
            Ok(actual) => write!(
                f,
                "Balance mismatch for account {}, expected: {}, actual: {}",
                self.key, self.expected, actual
            ),
            Err(e) => write!(
                f,
                "Balance mismatch for account {}, expected: {}, query failed: {}",
                self.key, self.expected, e
            ),
        }
    }
}

/// Divergence between simulated and ledger state. Fatal for the run.
#[derive(Debug, Clone)]
pub struct ReconciliationFailure {
    pub batch: String,
    pub checked: usize,
    pub mismatches: Vec<BalanceMismatch>,
}

impl fmt::Display for ReconciliationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mismatch between simulated and actual balance after {}: {} of {} balances differ",
            self.batch,
            self.mismatches.len(),
            self.checked
        )
    }
}

impl std::error::Error for ReconciliationFailure {}

/// Compare every `(key, expected)` against the ledger.
pub fn reconcile<'a, L, I>(
    batch: &str,
    ledger: &mut L,
    expected: I,
) -> Result<usize, ReconciliationFailure>
where
    L: LedgerClient + ?Sized,
    I: IntoIterator<Item = (&'a BalanceKey, &'a Amount)>,
{
    let mut checked = 0usize;
    let mut mismatches = Vec::new();

    for (key, want) in expected {
        checked += 1;
        let actual = ledger
            .balance(&key.account, &key.token)
            .map_err(|e| e.to_string());
        if actual.as_ref() != Ok(want) {
            let mismatch = BalanceMismatch {
                key: key.clone(),
                expected: want.clone(),
                actual,
            };
            warn!("{}", mismatch);
            mismatches.push(mismatch);
        }
    }

    if mismatches.is_empty() {
        Ok(checked)
    } else {
        Err(ReconciliationFailure {
            batch: batch.to_string(),
            checked,
            mismatches,
        })
    }
}
