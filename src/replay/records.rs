//! Raw Log Records and Typed Ledger Operations
//!
//! A raw record is one row of the token-transfer log: `(sender, recipient,
//! token, amount)`. Mints and burns are encoded against a reserved null
//! address. The [`Normalizer`] turns raw records into typed [`Operation`]s.

use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

/// Token amounts are unbounded: ERC-20 values regularly exceed 64 bits.
pub type Amount = BigUint;

pub type AccountId = String;
pub type TokenId = String;

/// Counterparty address used by the log for mints (as sender) and burns (as recipient).
pub const NULL_ACCOUNT: &str = "0000000000000000000000000000000000000000";

/// One transfer record as it appears in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub sender: AccountId,
    pub recipient: AccountId,
    pub token: TokenId,
    pub amount: Amount,
}

impl RawRecord {
    pub fn new(
        sender: impl Into<AccountId>,
        recipient: impl Into<AccountId>,
        token: impl Into<TokenId>,
        amount: impl Into<Amount>,
    ) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            token: token.into(),
            amount: amount.into(),
        }
    }
}

/// Key of a simulated balance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BalanceKey {
    pub account: AccountId,
    pub token: TokenId,
}

impl BalanceKey {
    pub fn new(account: impl Into<AccountId>, token: impl Into<TokenId>) -> Self {
        Self {
            account: account.into(),
            token: token.into(),
        }
    }
}

impl std::fmt::Display for BalanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}'/'{}'", self.account, self.token)
    }
}

/// A ledger operation.
///
/// The normalizer only produces `Mint`, `Burn` and `Transfer`; the
/// initialization variants are derived by the balance simulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Mint {
        account: AccountId,
        token: TokenId,
        amount: Amount,
    },
    Burn {
        account: AccountId,
        token: TokenId,
        amount: Amount,
    },
    Transfer {
        sender: AccountId,
        recipient: AccountId,
        token: TokenId,
        amount: Amount,
    },
    AccountInit {
        account: AccountId,
    },
    TokenInit {
        account: AccountId,
        token: TokenId,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mint { .. } => "mint",
            Self::Burn { .. } => "burn",
            Self::Transfer { .. } => "transfer",
            Self::AccountInit { .. } => "account_init",
            Self::TokenInit { .. } => "token_init",
        }
    }
}

/// Classifies raw records.
#[derive(Debug, Clone)]
pub struct Normalizer {
    null_account: AccountId,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(NULL_ACCOUNT)
    }
}

impl Normalizer {
    pub fn new(null_account: impl Into<AccountId>) -> Self {
        Self {
            null_account: null_account.into(),
        }
    }

    pub fn null_account(&self) -> &str {
        &self.null_account
    }

    pub fn is_null(&self, account: &str) -> bool {
        account == self.null_account
    }

    /// Classify a record, or `None` for a no-op (zero amount, or null on both sides).
    pub fn classify(&self, record: &RawRecord) -> Option<Operation> {
        if record.amount.is_zero() {
            return None;
        }

        let null_sender = self.is_null(&record.sender);
        let null_recipient = self.is_null(&record.recipient);

        match (null_sender, null_recipient) {
            (true, true) => None,
            (true, false) => Some(Operation::Mint {
                account: record.recipient.clone(),
                token: record.token.clone(),
                amount: record.amount.clone(),
            }),
            (false, true) => Some(Operation::Burn {
                account: record.sender.clone(),
                token: record.token.clone(),
                amount: record.amount.clone(),
            }),
            (false, false) => Some(Operation::Transfer {
                sender: record.sender.clone(),
                recipient: record.recipient.clone(),
                token: record.token.clone(),
                amount: record.amount.clone(),
            }),
        }
    }

    /// Real (non-null) participants of a record, sender first.
    pub fn participants<'a>(&self, record: &'a RawRecord) -> impl Iterator<Item = &'a str> + 'a {
        let sender = (!self.is_null(&record.sender)).then_some(record.sender.as_str());
        let recipient = (!self.is_null(&record.recipient)).then_some(record.recipient.as_str());
        sender.into_iter().chain(recipient)
    }
}
