//! Replica Sync Timing
//!
//! Optional add-on to each snapshot: how long it takes to bring a second
//! replica up to date with the ledger. Three stages are timed separately:
//!
//! ```text
//! push        repo-push <ledger_dir> <first_account> sync
//! merge       repo-merge <sync_repo>
//! checkpoint  account-checkpoint <sync_repo> <token> <author>
//!             for every refs/heads/frontier/<token>/<author>
//! ```
//!
//! The timed executables report their own failures on stderr; a failing stage
//! is logged and its elapsed time still recorded.

use crate::measure::git::GitRepo;
use crate::measure::sink::CsvRow;
use crate::measure::MeasurementError;
use crate::process::run_captured;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;
use tracing::{debug, info, warn};

pub const SYNC_REMOTE: &str = "sync";
const FRONTIER_PREFIX: &str = "refs/heads/frontier";

/// Executable names used by the sync probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCommands {
    #[serde(default = "default_author_initialize")]
    pub author_initialize: String,
    #[serde(default = "default_repo_push")]
    pub repo_push: String,
    #[serde(default = "default_repo_merge")]
    pub repo_merge: String,
    #[serde(default = "default_account_checkpoint")]
    pub account_checkpoint: String,
}

fn default_author_initialize() -> String {
    "author-initialize".to_string()
}
fn default_repo_push() -> String {
    "repo-push".to_string()
}
fn default_repo_merge() -> String {
    "repo-merge".to_string()
}
fn default_account_checkpoint() -> String {
    "account-checkpoint".to_string()
}

impl Default for SyncCommands {
    fn default() -> Self {
        Self {
            author_initialize: default_author_initialize(),
            repo_push: default_repo_push(),
            repo_merge: default_repo_merge(),
            account_checkpoint: default_account_checkpoint(),
        }
    }
}

/// One row of `time_measurements.csv`. Times are in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncTiming {
    pub num_of_operations: u64,
    pub push_time: f64,
    pub merge_time: f64,
    pub checkpoint_time: f64,
}

impl CsvRow for SyncTiming {
    const HEADER: &'static [&'static str] =
        &["num_of_operations", "push_time", "merge_time", "checkpoint_time"];

    fn fields(&self) -> Vec<String> {
        vec![
            self.num_of_operations.to_string(),
            self.push_time.to_string(),
            self.merge_time.to_string(),
            self.checkpoint_time.to_string(),
        ]
    }
}

/// Parse `(token, author)` out of `refs/heads/frontier/<token>/<author>`.
pub fn parse_frontier_ref(reference: &str) -> Option<(String, String)> {
    let rest = reference.strip_prefix(FRONTIER_PREFIX)?.strip_prefix('/')?;
    let (token, author) = rest.rsplit_once('/')?;
    if token.is_empty() || author.is_empty() {
        return None;
    }
    Some((token.to_string(), author.to_string()))
}

#[derive(Debug, Clone)]
pub struct SyncProbe {
    /// Executables of the single-repo ledger variant (provides `repo-push`).
    bin_dir: PathBuf,
    /// Executables of the full, one-author-per-repo ledger.
    full_bin_dir: PathBuf,
    ledger: GitRepo,
    sync_repo: PathBuf,
    commands: SyncCommands,
}

impl SyncProbe {
    pub fn new(
        git: impl Into<PathBuf>,
        bin_dir: impl Into<PathBuf>,
        full_bin_dir: impl Into<PathBuf>,
        ledger_dir: impl Into<PathBuf>,
        sync_repo: impl Into<PathBuf>,
        commands: SyncCommands,
    ) -> Self {
        Self {
            bin_dir: bin_dir.into(),
            full_bin_dir: full_bin_dir.into(),
            ledger: GitRepo::new(git, ledger_dir),
            sync_repo: sync_repo.into(),
            commands,
        }
    }

    pub fn sync_repo(&self) -> &Path {
        &self.sync_repo
    }

    /// Create the sync replica. Run once before the replay starts.
    pub fn initialize(&self) -> Result<(), MeasurementError> {
        let mut cmd = Command::new(self.full_bin_dir.join(&self.commands.author_initialize));
        cmd.arg(&self.sync_repo).arg(SYNC_REMOTE);
        run_captured(&mut cmd)?;
        info!("sync replica initialised at {}", self.sync_repo.display());
        Ok(())
    }

    /// Time one full sync round. Returns `None` before any account exists.
    pub fn measure(
        &self,
        operation_count: u64,
        first_account: Option<&str>,
    ) -> Result<Option<SyncTiming>, MeasurementError> {
        let Some(account) = first_account else {
            debug!("no account yet, skipping sync timing");
            return Ok(None);
        };
        self.ensure_remote()?;

        debug!("measure push time");
        let mut push = Command::new(self.bin_dir.join(&self.commands.repo_push));
        push.arg(self.ledger.dir()).arg(account).arg(SYNC_REMOTE);
        let push_time = timed(&mut push);

        debug!("measure merge time");
        let mut merge = Command::new(self.full_bin_dir.join(&self.commands.repo_merge));
        merge.arg(&self.sync_repo);
        let merge_time = timed(&mut merge);

        debug!("measure checkpoint time");
        let replica = GitRepo::new(self.ledger.git(), &self.sync_repo);
        let accounts: Vec<(String, String)> = replica
            .refs(FRONTIER_PREFIX)?
            .iter()
            .filter_map(|r| parse_frontier_ref(r))
            .collect();
        let started = Instant::now();
        for (token, author) in &accounts {
            let mut checkpoint =
                Command::new(self.full_bin_dir.join(&self.commands.account_checkpoint));
            checkpoint.arg(&self.sync_repo).arg(token).arg(author);
            timed(&mut checkpoint);
        }
        let checkpoint_time = started.elapsed().as_secs_f64();

        Ok(Some(SyncTiming {
            num_of_operations: operation_count,
            push_time,
            merge_time,
            checkpoint_time,
        }))
    }

    fn ensure_remote(&self) -> Result<(), MeasurementError> {
        let remotes = self.ledger.run(["remote"])?.stdout_str();
        if remotes.lines().any(|r| r.trim() == SYNC_REMOTE) {
            return Ok(());
        }
        let target = self.sync_repo.to_string_lossy().into_owned();
        self.ledger.run(["remote", "add", SYNC_REMOTE, target.as_str()])?;
        Ok(())
    }
}

/// Seconds spent running `cmd`. Failures are logged, not propagated.
fn timed(cmd: &mut Command) -> f64 {
    let started = Instant::now();
    if let Err(failure) = run_captured(cmd) {
        warn!("sync stage failed: {}", failure);
    }
    started.elapsed().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frontier_ref() {
        assert_eq!(
            parse_frontier_ref("refs/heads/frontier/0xdac17f/0xabc"),
            Some(("0xdac17f".to_string(), "0xabc".to_string()))
        );
        assert_eq!(parse_frontier_ref("refs/heads/main"), None);
        assert_eq!(parse_frontier_ref("refs/heads/frontier/onlytoken"), None);
    }

    #[test]
    fn test_no_account_skips() {
        let probe = SyncProbe::new(
            "git",
            "/nonexistent/bin",
            "/nonexistent/full",
            "/nonexistent/ledger",
            "/nonexistent/sync",
            SyncCommands::default(),
        );
        assert!(probe.measure(200, None).unwrap().is_none());
    }

    #[test]
    fn test_timing_row_layout() {
        let row = SyncTiming {
            num_of_operations: 400,
            push_time: 0.5,
            merge_time: 1.25,
            checkpoint_time: 2.0,
        };
        assert_eq!(row.fields(), vec!["400", "0.5", "1.25", "2"]);
    }
}
