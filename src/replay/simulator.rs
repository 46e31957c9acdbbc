//! Balance Simulator
//!
//! Replays classified operations against an in-memory balance book and plans
//! the primitive ledger operations a batch needs so that the external ledger,
//! which rejects negative balances, can execute every operation as logged.
//!
//! # Deficit Covering
//!
//! The log is a window onto a longer history, so an account may spend tokens
//! it never received inside the window. Whenever a burn or send would drive a
//! balance below zero, the shortfall is added to a per-(account, token)
//! deficit tally and the balance is clamped to zero. The scheduler issues one
//! deficit mint per tally *before* any of the batch's operations, which
//! guarantees the ledger never sees a negative balance.
//!
//! # Invariants
//!
//! 1. **Non-negative**: no simulated balance is ever negative.
//! 2. **Conservation**: per token, `sum(balances) == sum(mints) + sum(deficits) - sum(burns)`.
//! 3. **Init once**: an account or (account, token) pair is planned for
//!    initialization at most once per simulator lifetime.

use crate::replay::records::{
    AccountId, Amount, BalanceKey, Normalizer, Operation, RawRecord,
};
use num_traits::Zero;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Everything the simulator remembers across batches.
#[derive(Debug, Clone, Default)]
pub struct SimulatorState {
    balances: BTreeMap<BalanceKey, Amount>,
    seen_accounts: HashSet<AccountId>,
    seen_tokens: HashSet<BalanceKey>,
}

impl SimulatorState {
    pub fn balance(&self, key: &BalanceKey) -> Amount {
        self.balances.get(key).cloned().unwrap_or_default()
    }

    /// Every pair touched so far, in key order.
    pub fn balances(&self) -> impl Iterator<Item = (&BalanceKey, &Amount)> {
        self.balances.iter()
    }

    pub fn num_balances(&self) -> usize {
        self.balances.len()
    }

    pub fn is_account_seen(&self, account: &str) -> bool {
        self.seen_accounts.contains(account)
    }

    pub fn is_token_seen(&self, key: &BalanceKey) -> bool {
        self.seen_tokens.contains(key)
    }

    /// Sum of all balances held in `token`.
    pub fn token_supply(&self, token: &str) -> Amount {
        self.balances
            .iter()
            .filter(|(key, _)| key.token == token)
            .map(|(_, v)| v)
            .sum()
    }
}

/// Accumulated shortfall for one (account, token).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeficitMint {
    pub key: BalanceKey,
    pub amount: Amount,
}

/// The primitive work derived from one batch of records.
#[derive(Debug, Clone, Default)]
pub struct BatchPlan {
    /// Accounts first seen in this batch, in first-seen order.
    pub new_accounts: Vec<AccountId>,
    /// (account, token) pairs needing initialization, in first-seen order.
    pub new_tokens: Vec<BalanceKey>,
    /// Deficit tallies, in order of first shortfall.
    pub deficit_mints: Vec<DeficitMint>,
    /// Classified operations in input order.
    pub operations: Vec<Operation>,
    /// Records consumed, including discarded no-ops.
    pub records_seen: usize,
    /// Records discarded by the normalizer.
    pub records_discarded: usize,
}

impl BatchPlan {
    pub fn deficit_for(&self, key: &BalanceKey) -> Option<&Amount> {
        self.deficit_mints
            .iter()
            .find(|d| &d.key == key)
            .map(|d| &d.amount)
    }

    pub fn num_transfers(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Transfer { .. }))
            .count()
    }
}

/// Collects a [`BatchPlan`] while operations are applied.
#[derive(Debug, Default)]
struct PlanBuilder {
    plan: BatchPlan,
    deficit_index: HashMap<BalanceKey, usize>,
}

impl PlanBuilder {
    fn add_deficit(&mut self, key: BalanceKey, shortfall: Amount) {
        match self.deficit_index.get(&key) {
            Some(&idx) => self.plan.deficit_mints[idx].amount += shortfall,
            None => {
                self.deficit_index
                    .insert(key.clone(), self.plan.deficit_mints.len());
                self.plan.deficit_mints.push(DeficitMint {
                    key,
                    amount: shortfall,
                });
            }
        }
    }

    fn finish(self) -> BatchPlan {
        self.plan
    }
}

/// Deterministic balance simulator.
#[derive(Debug, Clone, Default)]
pub struct BalanceSimulator {
    normalizer: Normalizer,
    state: SimulatorState,
}

impl BalanceSimulator {
    pub fn new(normalizer: Normalizer) -> Self {
        Self::with_state(normalizer, SimulatorState::default())
    }

    pub fn with_state(normalizer: Normalizer, state: SimulatorState) -> Self {
        Self { normalizer, state }
    }

    pub fn state(&self) -> &SimulatorState {
        &self.state
    }

    pub fn into_state(self) -> SimulatorState {
        self.state
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn balance(&self, account: &str, token: &str) -> Amount {
        self.state.balance(&BalanceKey::new(account, token))
    }

    /// Simulate one batch of records and return the work it requires.
    pub fn plan_batch<'a, I>(&mut self, records: I) -> BatchPlan
    where
        I: IntoIterator<Item = &'a RawRecord>,
    {
        let mut builder = PlanBuilder::default();

        for record in records {
            builder.plan.records_seen += 1;

            let Some(op) = self.normalizer.classify(record) else {
                builder.plan.records_discarded += 1;
                continue;
            };

            for account in self.normalizer.participants(record) {
                if self.state.seen_accounts.insert(account.to_string()) {
                    builder.plan.new_accounts.push(account.to_string());
                }
            }

            self.apply(&op, &mut builder);
            builder.plan.operations.push(op);
        }

        let plan = builder.finish();
        debug!(
            records = plan.records_seen,
            discarded = plan.records_discarded,
            new_accounts = plan.new_accounts.len(),
            new_tokens = plan.new_tokens.len(),
            deficits = plan.deficit_mints.len(),
            "simulated batch"
        );
        plan
    }

    fn apply(&mut self, op: &Operation, builder: &mut PlanBuilder) {
        match op {
            Operation::Mint {
                account,
                token,
                amount,
            } => {
                let key = BalanceKey::new(account.as_str(), token.as_str());
                let balance = self.state.balance(&key) + amount;
                self.mark_token(&key, builder);
                self.state.balances.insert(key, balance);
            }
            Operation::Burn {
                account,
                token,
                amount,
            } => {
                let key = BalanceKey::new(account.as_str(), token.as_str());
                let balance = self.debit(&key, amount, builder);
                self.state.balances.insert(key, balance);
            }
            Operation::Transfer {
                sender,
                recipient,
                token,
                amount,
            } => {
                let sender_key = BalanceKey::new(sender.as_str(), token.as_str());
                let sender_balance = self.debit(&sender_key, amount, builder);
                self.mark_token(&sender_key, builder);
                self.state.balances.insert(sender_key, sender_balance);

                // Re-read after the debit: sender and recipient may be the same account.
                let recipient_key = BalanceKey::new(recipient.as_str(), token.as_str());
                let recipient_balance = self.state.balance(&recipient_key) + amount;
                self.state.balances.insert(recipient_key, recipient_balance);
            }
            Operation::AccountInit { .. } | Operation::TokenInit { .. } => {}
        }
    }

    /// Balance of `key` after removing `amount`, tallying any shortfall.
    fn debit(&self, key: &BalanceKey, amount: &Amount, builder: &mut PlanBuilder) -> Amount {
        let current = self.state.balance(key);
        if &current >= amount {
            return current - amount;
        }
        let shortfall = amount - &current;
        if !shortfall.is_zero() {
            builder.add_deficit(key.clone(), shortfall);
        }
        Amount::zero()
    }

    fn mark_token(&mut self, key: &BalanceKey, builder: &mut PlanBuilder) {
        if self.state.seen_tokens.insert(key.clone()) {
            builder.plan.new_tokens.push(key.clone());
        }
    }
}

/// Convenience for tests and tools that want the planned init operations as values.
pub fn init_operations(plan: &BatchPlan) -> Vec<Operation> {
    let accounts = plan
        .new_accounts
        .iter()
        .map(|account| Operation::AccountInit {
            account: account.clone(),
        });
    let tokens = plan.new_tokens.iter().map(|key| Operation::TokenInit {
        account: key.account.clone(),
        token: key.token.clone(),
    });
    accounts.chain(tokens).collect()
}
