//! Versioned object store access for snapshots.
//!
//! [`ObjectStore`] is the seam between the snapshot pipeline and the store's
//! native commands; [`GitStore`] drives the `git` and `git-sizer` CLIs
//! against the ledger's state directory.

use crate::measure::git::GitRepo;
use crate::measure::naive::naive_tree_size;
use crate::measure::sizer::{parse_sizer_report, StructureStats};
use crate::measure::MeasurementError;
use crate::process::{run_captured, run_with_stdin_file};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use tracing::debug;

pub const DEFAULT_MARKER_NAMESPACE: &str = "refs/measurement";

static PACK_TOTALS: OnceLock<Option<Regex>> = OnceLock::new();

/// Extract `(objects, deltas)` from bundle progress output.
pub fn parse_pack_totals(progress: &str) -> Option<(u64, u64)> {
    let re = PACK_TOTALS
        .get_or_init(|| Regex::new(r"Total (\d+) \(delta (\d+)\)").ok())
        .as_ref()?;
    let caps = re.captures(progress)?;
    let objects = caps.get(1)?.as_str().parse().ok()?;
    let deltas = caps.get(2)?.as_str().parse().ok()?;
    Some((objects, deltas))
}

/// A full bundle of all branches with the pack totals the store reported.
#[derive(Debug, Clone)]
pub struct FullBundle {
    pub bytes: Vec<u8>,
    pub num_objects: u64,
    pub num_deltas: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloneSizes {
    /// Size of the single pack file the clone received.
    pub pack_size: u64,
    /// Disk usage of the clone's metadata directory after unpacking to loose objects.
    pub unpacked_size: u64,
}

pub trait ObjectStore {
    fn full_bundle(&mut self) -> Result<FullBundle, MeasurementError>;

    /// Objects reachable from branches but not from the measured markers.
    /// An empty increment is returned as an empty buffer.
    fn incremental_bundle(&mut self) -> Result<Vec<u8>, MeasurementError>;

    /// Point the marker namespace at the current branch heads.
    fn advance_marker(&mut self) -> Result<(), MeasurementError>;

    /// Clone `bundle` under `scratch` and measure packed and unpacked sizes.
    fn clone_sizes(&mut self, bundle: &Path, scratch: &Path) -> Result<CloneSizes, MeasurementError>;

    fn structure(&mut self) -> Result<StructureStats, MeasurementError>;

    fn naive_tree_size(&mut self) -> Result<u64, MeasurementError>;
}

#[derive(Debug, Clone)]
pub struct GitStore {
    repo: GitRepo,
    sizer: PathBuf,
    marker_namespace: String,
}

impl GitStore {
    pub fn new(git: impl Into<PathBuf>, sizer: impl Into<PathBuf>, dir: impl Into<PathBuf>) -> Self {
        Self {
            repo: GitRepo::new(git, dir),
            sizer: sizer.into(),
            marker_namespace: DEFAULT_MARKER_NAMESPACE.to_string(),
        }
    }

    pub fn with_marker_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.marker_namespace = namespace.into().trim_end_matches('/').to_string();
        self
    }

    pub fn repo(&self) -> &GitRepo {
        &self.repo
    }

    pub fn marker_namespace(&self) -> &str {
        &self.marker_namespace
    }

    fn is_empty_bundle_refusal(diagnostic: &str) -> bool {
        diagnostic.contains("empty bundle")
    }
}

impl ObjectStore for GitStore {
    fn full_bundle(&mut self) -> Result<FullBundle, MeasurementError> {
        let out = self
            .repo
            .run(["bundle", "create", "--progress", "-", "--branches"])?;
        let progress = out.stderr_str();
        let (num_objects, num_deltas) = parse_pack_totals(&progress)
            .ok_or_else(|| MeasurementError::unparseable("git bundle", progress.trim()))?;
        debug!(
            "full bundle: {} bytes, {} objects, {} deltas",
            out.stdout.len(),
            num_objects,
            num_deltas
        );
        Ok(FullBundle {
            bytes: out.stdout,
            num_objects,
            num_deltas,
        })
    }

    fn incremental_bundle(&mut self) -> Result<Vec<u8>, MeasurementError> {
        let exclude = format!("--glob={}/*", self.marker_namespace);
        match self
            .repo
            .run(["bundle", "create", "-", "--branches", "--not", exclude.as_str()])
        {
            Ok(out) => Ok(out.stdout),
            Err(failure) if Self::is_empty_bundle_refusal(&failure.diagnostic) => {
                debug!("no new objects since the last snapshot");
                Ok(Vec::new())
            }
            Err(failure) => Err(failure.into()),
        }
    }

    fn advance_marker(&mut self) -> Result<(), MeasurementError> {
        let refspec = format!("+refs/heads/*:{}/*", self.marker_namespace);
        self.repo.run([
            "fetch",
            "--no-auto-maintenance",
            "--no-auto-gc",
            ".",
            refspec.as_str(),
        ])?;
        Ok(())
    }

    fn clone_sizes(&mut self, bundle: &Path, scratch: &Path) -> Result<CloneSizes, MeasurementError> {
        let clone_dir = scratch.join("measure_repo");
        let mut clone = Command::new(self.repo.git());
        clone.arg("clone").arg(bundle).arg(&clone_dir);
        run_captured(&mut clone)?;

        // Move every pack artifact out so unpack-objects actually writes loose objects.
        let pack_dir = clone_dir.join(".git").join("objects").join("pack");
        let mut pack_file = None;
        for entry in fs::read_dir(&pack_dir).map_err(|e| MeasurementError::io(&pack_dir, e))? {
            let entry = entry.map_err(|e| MeasurementError::io(&pack_dir, e))?;
            let target = clone_dir.join(entry.file_name());
            fs::rename(entry.path(), &target).map_err(|e| MeasurementError::io(&target, e))?;
            if target.extension().is_some_and(|ext| ext == "pack") {
                pack_file = Some(target);
            }
        }
        let pack_file = pack_file.ok_or_else(|| {
            MeasurementError::unparseable("git clone", format!("no pack file in {:?}", pack_dir))
        })?;
        let pack_size = fs::metadata(&pack_file)
            .map_err(|e| MeasurementError::io(&pack_file, e))?
            .len();

        let unpacked = GitRepo::new(self.repo.git(), &clone_dir);
        let input = fs::File::open(&pack_file).map_err(|e| MeasurementError::io(&pack_file, e))?;
        let mut unpack = unpacked.command();
        unpack.arg("unpack-objects");
        run_with_stdin_file(&mut unpack, input)?;

        let mut du = Command::new("du");
        du.args(["-sb", ".git"]).current_dir(&clone_dir);
        let usage = run_captured(&mut du)?.stdout_str();
        let unpacked_size = usage
            .split('\t')
            .next()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .ok_or_else(|| MeasurementError::unparseable("du", usage.trim()))?;

        Ok(CloneSizes {
            pack_size,
            unpacked_size,
        })
    }

    fn structure(&mut self) -> Result<StructureStats, MeasurementError> {
        let mut cmd = Command::new(&self.sizer);
        cmd.args(["-j", "--json-version=2", "--branches"])
            .current_dir(self.repo.dir());
        let out = run_captured(&mut cmd)?;
        parse_sizer_report(&out.stdout_str())
    }

    fn naive_tree_size(&mut self) -> Result<u64, MeasurementError> {
        naive_tree_size(&self.repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pack_totals_from_progress() {
        let progress = "Enumerating objects: 12, done.\n\
                        Counting objects: 100% (12/12), done.\n\
                        Delta compression using up to 8 threads\n\
                        Compressing objects: 100% (6/6), done.\n\
                        Total 12 (delta 3), reused 0 (delta 0), pack-reused 0\n";
        assert_eq!(parse_pack_totals(progress), Some((12, 3)));
    }

    #[test]
    fn test_parse_pack_totals_missing() {
        assert_eq!(parse_pack_totals("fatal: Refusing to create empty bundle.\n"), None);
    }

    #[test]
    fn test_marker_namespace_strips_trailing_slash() {
        let store = GitStore::new("git", "git-sizer", "/tmp/x").with_marker_namespace("refs/seen/");
        assert_eq!(store.marker_namespace(), "refs/seen");
    }

    #[test]
    fn test_empty_bundle_refusal_detected() {
        assert!(GitStore::is_empty_bundle_refusal(
            "fatal: Refusing to create empty bundle."
        ));
        assert!(!GitStore::is_empty_bundle_refusal("fatal: not a git repository"));
    }
}
