//! In-Memory Ledger
//!
//! A model of the external ledger's observable balance semantics, used for dry
//! runs (no executables needed) and as the ledger double in tests. Like the
//! real ledger it refuses to overdraw: a burn or give larger than the current
//! balance fails and leaves state untouched. A give parks the amount until the
//! matching ack credits the receiver.

use crate::process::CommandFailure;
use crate::replay::ledger::{CallKind, LedgerCall, LedgerClient, LedgerError};
use crate::replay::records::{AccountId, Amount, BalanceKey, TokenId};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    balances: HashMap<BalanceKey, Amount>,
    in_flight: HashMap<(TokenId, AccountId, AccountId), Amount>,
    accounts: HashSet<AccountId>,
    tokens: HashSet<BalanceKey>,
    calls: Vec<LedgerCall>,
    fail_kinds: HashSet<CallKind>,
    balance_overrides: HashMap<BalanceKey, Amount>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `kind` fail without touching state.
    pub fn fail_on(mut self, kind: CallKind) -> Self {
        self.fail_kinds.insert(kind);
        self
    }

    /// Report `amount` for `key` regardless of the modelled balance.
    pub fn override_balance(&mut self, key: BalanceKey, amount: Amount) {
        self.balance_overrides.insert(key, amount);
    }

    /// Every call received, in order, including failed ones.
    pub fn calls(&self) -> &[LedgerCall] {
        &self.calls
    }

    pub fn is_account_initialized(&self, account: &str) -> bool {
        self.accounts.contains(account)
    }

    pub fn is_token_initialized(&self, key: &BalanceKey) -> bool {
        self.tokens.contains(key)
    }

    fn failure(call: &LedgerCall, reason: &str) -> CommandFailure {
        CommandFailure {
            command: format!("{:?}", call),
            status: Some(1),
            diagnostic: reason.to_string(),
            stdout: Vec::new(),
        }
    }

    fn debit(&mut self, key: &BalanceKey, amount: &Amount) -> Result<(), &'static str> {
        let balance = self.balances.entry(key.clone()).or_default();
        if &*balance < amount {
            return Err("insufficient balance");
        }
        *balance -= amount;
        Ok(())
    }

    fn apply(&mut self, call: &LedgerCall) -> Result<(), &'static str> {
        match call {
            LedgerCall::AccountInit { account } => {
                self.accounts.insert(account.clone());
            }
            LedgerCall::TokenInit { account, token } => {
                self.tokens
                    .insert(BalanceKey::new(account.as_str(), token.as_str()));
            }
            LedgerCall::TokenCreate {
                account,
                token,
                amount,
            } => {
                *self
                    .balances
                    .entry(BalanceKey::new(account.as_str(), token.as_str()))
                    .or_default() += amount;
            }
            LedgerCall::TokenBurn {
                account,
                token,
                amount,
            } => {
                self.debit(&BalanceKey::new(account.as_str(), token.as_str()), amount)?;
            }
            LedgerCall::TokenGive {
                token,
                sender,
                receiver,
                amount,
            } => {
                self.debit(&BalanceKey::new(sender.as_str(), token.as_str()), amount)?;
                *self
                    .in_flight
                    .entry((token.clone(), sender.clone(), receiver.clone()))
                    .or_default() += amount;
            }
            LedgerCall::TokenAck {
                token,
                receiver,
                sender,
            } => {
                let parked = self
                    .in_flight
                    .remove(&(token.clone(), sender.clone(), receiver.clone()))
                    .ok_or("nothing to acknowledge")?;
                *self
                    .balances
                    .entry(BalanceKey::new(receiver.as_str(), token.as_str()))
                    .or_default() += parked;
            }
        }
        Ok(())
    }
}

impl LedgerClient for MemoryLedger {
    fn execute(&mut self, call: &LedgerCall) -> Result<(), CommandFailure> {
        self.calls.push(call.clone());
        if self.fail_kinds.contains(&call.kind()) {
            return Err(Self::failure(call, "injected failure"));
        }
        self.apply(call).map_err(|reason| Self::failure(call, reason))
    }

    fn balance(&mut self, account: &str, token: &str) -> Result<Amount, LedgerError> {
        let key = BalanceKey::new(account, token);
        if let Some(amount) = self.balance_overrides.get(&key) {
            return Ok(amount.clone());
        }
        Ok(self.balances.get(&key).cloned().unwrap_or_default())
    }
}
