//! External Ledger Collaborator
//!
//! The ledger under test is a set of executables operating on a state
//! directory. [`LedgerClient`] is the seam the scheduler and reconciliation
//! check talk to; [`CommandLedger`] is the subprocess implementation.

use crate::process::{run_captured, CommandFailure};
use crate::replay::records::{AccountId, Amount, TokenId};
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// One primitive ledger call. Every variant maps to exactly one executable invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    AccountInit {
        account: AccountId,
    },
    TokenInit {
        account: AccountId,
        token: TokenId,
    },
    TokenCreate {
        account: AccountId,
        token: TokenId,
        amount: Amount,
    },
    TokenBurn {
        account: AccountId,
        token: TokenId,
        amount: Amount,
    },
    TokenGive {
        token: TokenId,
        sender: AccountId,
        receiver: AccountId,
        amount: Amount,
    },
    TokenAck {
        token: TokenId,
        receiver: AccountId,
        sender: AccountId,
    },
}

/// Call categories, used for per-type counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallKind {
    AccountInit,
    TokenInit,
    Create,
    Burn,
    Give,
    Ack,
}

impl LedgerCall {
    pub fn kind(&self) -> CallKind {
        match self {
            Self::AccountInit { .. } => CallKind::AccountInit,
            Self::TokenInit { .. } => CallKind::TokenInit,
            Self::TokenCreate { .. } => CallKind::Create,
            Self::TokenBurn { .. } => CallKind::Burn,
            Self::TokenGive { .. } => CallKind::Give,
            Self::TokenAck { .. } => CallKind::Ack,
        }
    }
}

/// Executable names for each ledger operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCommands {
    #[serde(default = "default_account_init")]
    pub account_init: String,
    #[serde(default = "default_token_init")]
    pub token_init: String,
    #[serde(default = "default_token_create")]
    pub token_create: String,
    #[serde(default = "default_token_burn")]
    pub token_burn: String,
    #[serde(default = "default_token_give")]
    pub token_give: String,
    #[serde(default = "default_token_ack")]
    pub token_ack: String,
    #[serde(default = "default_account_balance")]
    pub account_balance: String,
}

fn default_account_init() -> String {
    "initialize-author".to_string()
}
fn default_token_init() -> String {
    "token-initialize".to_string()
}
fn default_token_create() -> String {
    "token-create".to_string()
}
fn default_token_burn() -> String {
    "token-burn".to_string()
}
fn default_token_give() -> String {
    "token-giveTo".to_string()
}
fn default_token_ack() -> String {
    "token-ackFrom".to_string()
}
fn default_account_balance() -> String {
    "account-balance".to_string()
}

impl Default for LedgerCommands {
    fn default() -> Self {
        Self {
            account_init: default_account_init(),
            token_init: default_token_init(),
            token_create: default_token_create(),
            token_burn: default_token_burn(),
            token_give: default_token_give(),
            token_ack: default_token_ack(),
            account_balance: default_account_balance(),
        }
    }
}

/// Failure of a balance query.
#[derive(Debug, Clone)]
pub enum LedgerError {
    Command(CommandFailure),
    UnparseableBalance { output: String },
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(e) => write!(f, "balance query failed: {}", e),
            Self::UnparseableBalance { output } => {
                write!(f, "balance query returned non-integer output: {:?}", output)
            }
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<CommandFailure> for LedgerError {
    fn from(e: CommandFailure) -> Self {
        Self::Command(e)
    }
}

/// The ledger implementation under test.
pub trait LedgerClient {
    /// Issue one primitive call.
    fn execute(&mut self, call: &LedgerCall) -> Result<(), CommandFailure>;

    /// Current balance of `account` in `token`. Uninitialized pairs report zero.
    fn balance(&mut self, account: &str, token: &str) -> Result<Amount, LedgerError>;
}

/// Parse the balance executable's stdout. Empty output means the pair has no balance yet.
pub fn parse_balance(stdout: &str) -> Result<Amount, LedgerError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Amount::zero());
    }
    trimmed
        .parse::<Amount>()
        .map_err(|_| LedgerError::UnparseableBalance {
            output: trimmed.to_string(),
        })
}

/// Ledger driven through its command-line executables.
#[derive(Debug, Clone)]
pub struct CommandLedger {
    bin_dir: PathBuf,
    state_dir: PathBuf,
    commands: LedgerCommands,
}

impl CommandLedger {
    pub fn new(
        bin_dir: impl Into<PathBuf>,
        state_dir: impl Into<PathBuf>,
        commands: LedgerCommands,
    ) -> Self {
        Self {
            bin_dir: bin_dir.into(),
            state_dir: state_dir.into(),
            commands,
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    fn command(&self, program: &str) -> Command {
        let mut cmd = Command::new(self.bin_dir.join(program));
        cmd.arg(&self.state_dir);
        cmd
    }

    /// Build the command line for `call` without running it.
    pub fn command_for(&self, call: &LedgerCall) -> Command {
        let c = &self.commands;
        match call {
            LedgerCall::AccountInit { account } => {
                let mut cmd = self.command(&c.account_init);
                cmd.arg(account);
                cmd
            }
            LedgerCall::TokenInit { account, token } => {
                let mut cmd = self.command(&c.token_init);
                cmd.args([account, token]);
                cmd
            }
            LedgerCall::TokenCreate {
                account,
                token,
                amount,
            } => {
                let mut cmd = self.command(&c.token_create);
                cmd.args([token, account]).arg(amount.to_string());
                cmd
            }
            LedgerCall::TokenBurn {
                account,
                token,
                amount,
            } => {
                let mut cmd = self.command(&c.token_burn);
                cmd.args([token, account]).arg(amount.to_string());
                cmd
            }
            LedgerCall::TokenGive {
                token,
                sender,
                receiver,
                amount,
            } => {
                let mut cmd = self.command(&c.token_give);
                cmd.args([token, sender, receiver]).arg(amount.to_string());
                cmd
            }
            LedgerCall::TokenAck {
                token,
                receiver,
                sender,
            } => {
                let mut cmd = self.command(&c.token_ack);
                cmd.args([token, receiver, sender]);
                cmd
            }
        }
    }
}

impl LedgerClient for CommandLedger {
    fn execute(&mut self, call: &LedgerCall) -> Result<(), CommandFailure> {
        let out = run_captured(&mut self.command_for(call))?;
        let stdout = out.stdout_str();
        if !stdout.trim().is_empty() {
            debug!("{}", stdout.trim_end());
        }
        Ok(())
    }

    fn balance(&mut self, account: &str, token: &str) -> Result<Amount, LedgerError> {
        let mut cmd = self.command(&self.commands.account_balance);
        cmd.args([token, account]);
        let stdout = match run_captured(&mut cmd) {
            Ok(out) => out.stdout,
            // The exit status of the query is ignored; only its stdout counts.
            Err(failure) if failure.status.is_some() => {
                debug!("{}", failure);
                failure.stdout
            }
            Err(failure) => return Err(failure.into()),
        };
        parse_balance(&String::from_utf8_lossy(&stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_parse_balance_empty_is_zero() {
        assert_eq!(parse_balance("").unwrap(), Amount::zero());
        assert_eq!(parse_balance("  \n").unwrap(), Amount::zero());
    }

    #[test]
    fn test_parse_balance_integer() {
        assert_eq!(parse_balance("1200\n").unwrap(), Amount::from(1200u32));
    }

    #[test]
    fn test_parse_balance_garbage_is_error() {
        assert!(matches!(
            parse_balance("error: no such account"),
            Err(LedgerError::UnparseableBalance { .. })
        ));
    }

    #[test]
    fn test_argument_order_matches_ledger_cli() {
        let ledger = CommandLedger::new("/opt/goc", "/tmp/accounts", LedgerCommands::default());

        let give = ledger.command_for(&LedgerCall::TokenGive {
            token: "T1".into(),
            sender: "alice".into(),
            receiver: "bob".into(),
            amount: Amount::from(40u32),
        });
        assert_eq!(Path::new(give.get_program()), Path::new("/opt/goc/token-giveTo"));
        assert_eq!(args_of(&give), vec!["/tmp/accounts", "T1", "alice", "bob", "40"]);

        let ack = ledger.command_for(&LedgerCall::TokenAck {
            token: "T1".into(),
            receiver: "bob".into(),
            sender: "alice".into(),
        });
        assert_eq!(args_of(&ack), vec!["/tmp/accounts", "T1", "bob", "alice"]);

        let init = ledger.command_for(&LedgerCall::TokenInit {
            account: "alice".into(),
            token: "T1".into(),
        });
        assert_eq!(args_of(&init), vec!["/tmp/accounts", "alice", "T1"]);

        let create = ledger.command_for(&LedgerCall::TokenCreate {
            account: "alice".into(),
            token: "T1".into(),
            amount: Amount::from(7u32),
        });
        assert_eq!(args_of(&create), vec!["/tmp/accounts", "T1", "alice", "7"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_balance_of_uninitialized_pair_is_zero() {
        use std::os::unix::fs::PermissionsExt;

        let bin = tempfile::tempdir().unwrap();
        let script = bin.path().join("account-balance");
        // Mirrors the ledger: nothing printed for an unknown account/token.
        std::fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut ledger = CommandLedger::new(bin.path(), "/tmp/accounts", LedgerCommands::default());
        assert_eq!(ledger.balance("nobody", "T9").unwrap(), Amount::zero());
    }

    #[cfg(unix)]
    fn balance_script(body: &str) -> tempfile::TempDir {
        use std::os::unix::fs::PermissionsExt;

        let bin = tempfile::tempdir().unwrap();
        let script = bin.path().join("account-balance");
        std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        bin
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_balance_query_with_no_output_is_zero() {
        let bin = balance_script("echo 'fatal: ref not found' >&2\nexit 1");
        let mut ledger = CommandLedger::new(bin.path(), "/tmp/accounts", LedgerCommands::default());
        assert_eq!(ledger.balance("nobody", "T9").unwrap(), Amount::zero());
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_balance_query_still_reads_stdout() {
        let bin = balance_script("echo 42\nexit 3");
        let mut ledger = CommandLedger::new(bin.path(), "/tmp/accounts", LedgerCommands::default());
        assert_eq!(ledger.balance("alice", "T1").unwrap(), Amount::from(42u32));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_balance_query_with_garbage_is_error() {
        let bin = balance_script("echo 'no such token'\nexit 1");
        let mut ledger = CommandLedger::new(bin.path(), "/tmp/accounts", LedgerCommands::default());
        assert!(matches!(
            ledger.balance("alice", "T1"),
            Err(LedgerError::UnparseableBalance { .. })
        ));
    }

    #[test]
    fn test_missing_balance_executable_is_error() {
        let mut ledger =
            CommandLedger::new("/nonexistent/bin", "/tmp/accounts", LedgerCommands::default());
        assert!(matches!(ledger.balance("alice", "T1"), Err(LedgerError::Command(_))));
    }
}
