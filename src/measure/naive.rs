//! Naive (non-de-duplicated) size estimates.
//!
//! The naive model charges every commit on a first-parent chain for its full
//! root tree and each direct subtree, as if nothing were shared between
//! versions. Comparing it with the unique sizes shows how much structural
//! sharing the encoding buys.
//!
//! Trees are read in bulk through `git cat-file --batch`, so the number of
//! processes spawned per measurement depends on the branch count only.

use crate::measure::git::{GitRepo, ObjectKind, TreeEntry};
use crate::measure::sink::CsvRow;
use crate::measure::MeasurementError;
use crate::process::run_captured;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

/// Naive tree bytes over every local branch, commits counted once per branch they appear on.
pub fn naive_tree_size(repo: &GitRepo) -> Result<u64, MeasurementError> {
    let mut roots = Vec::new();
    for head in repo.refs("refs/heads")? {
        roots.extend(repo.first_parent_log(&head)?.into_iter().map(|(_, root)| root));
    }
    let listings = repo.read_trees(&roots)?;

    let mut trees = Vec::new();
    for root in roots {
        trees.extend(
            listing(&listings, &root)?
                .iter()
                .filter(|e| e.kind == ObjectKind::Tree)
                .map(|e| e.oid.clone()),
        );
        trees.push(root);
    }
    Ok(repo.object_sizes(&trees)?.into_iter().sum())
}

fn listing<'a>(
    listings: &'a HashMap<String, Vec<TreeEntry>>,
    tree: &str,
) -> Result<&'a [TreeEntry], MeasurementError> {
    listings.get(tree).map(Vec::as_slice).ok_or_else(|| {
        MeasurementError::unparseable("git cat-file --batch", format!("tree {} not read", tree))
    })
}

/// Naive blob and tree totals for one repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NaiveSizes {
    pub blob_count: u64,
    pub blob_size: u64,
    pub tree_count: u64,
    pub tree_size: u64,
}

/// Walk every ref under `prefix`, visiting each commit once across all of them.
pub fn naive_sizes(repo: &GitRepo, prefix: &str) -> Result<NaiveSizes, MeasurementError> {
    let mut visited = HashSet::new();
    let mut roots = Vec::new();
    for reference in repo.refs(prefix)? {
        for (commit, root) in repo.first_parent_log(&reference)? {
            if visited.insert(commit) {
                roots.push(root);
            }
        }
    }

    let mut trees = Vec::new();
    let mut subtrees = Vec::new();
    let mut blobs = Vec::new();
    let root_listings = repo.read_trees(&roots)?;
    for root in &roots {
        trees.push(root.clone());
        for entry in listing(&root_listings, root)? {
            match entry.kind {
                ObjectKind::Blob => blobs.push(entry.oid.clone()),
                ObjectKind::Tree => subtrees.push(entry.oid.clone()),
                ObjectKind::Commit => {}
            }
        }
    }
    let subtree_listings = repo.read_trees(&subtrees)?;
    for subtree in &subtrees {
        blobs.extend(
            listing(&subtree_listings, subtree)?
                .iter()
                .filter(|e| e.kind == ObjectKind::Blob)
                .map(|e| e.oid.clone()),
        );
    }
    trees.extend(subtrees);

    Ok(NaiveSizes {
        blob_count: blobs.len() as u64,
        blob_size: repo.object_sizes(&blobs)?.into_iter().sum(),
        tree_count: trees.len() as u64,
        tree_size: repo.object_sizes(&trees)?.into_iter().sum(),
    })
}

/// One output row of `naive-sizes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NaiveRow {
    pub num_of_operations: u64,
    pub sizes: NaiveSizes,
}

impl CsvRow for NaiveRow {
    const HEADER: &'static [&'static str] = &[
        "num_of_operations",
        "naive_blob_count",
        "naive_blob_size",
        "naive_tree_count",
        "naive_tree_size",
    ];

    fn fields(&self) -> Vec<String> {
        vec![
            self.num_of_operations.to_string(),
            self.sizes.blob_count.to_string(),
            self.sizes.blob_size.to_string(),
            self.sizes.tree_count.to_string(),
            self.sizes.tree_size.to_string(),
        ]
    }
}

/// Persisted bundles named `<count>.bundle`, in numeric order. Other files are ignored.
pub fn list_bundles(dir: &Path) -> Result<Vec<(u64, PathBuf)>, MeasurementError> {
    let mut bundles = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| MeasurementError::io(dir, e))? {
        let path = entry.map_err(|e| MeasurementError::io(dir, e))?.path();
        if path.extension().map_or(true, |ext| ext != "bundle") {
            continue;
        }
        let count = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok());
        if let Some(count) = count {
            bundles.push((count, path));
        }
    }
    bundles.sort();
    Ok(bundles)
}

/// Clone every persisted bundle under `scratch` and measure its naive sizes.
pub fn bundle_naive_sizes(
    git: &Path,
    bundles_dir: &Path,
    scratch: &Path,
) -> Result<Vec<NaiveRow>, MeasurementError> {
    let bundles = list_bundles(bundles_dir)?;
    let total = bundles.len();
    let mut rows = Vec::with_capacity(total);

    for (idx, (count, bundle)) in bundles.into_iter().enumerate() {
        info!("{}/{}: {}", idx, total, bundle.display());
        let clone_dir = scratch.join(count.to_string());
        let mut clone = Command::new(git);
        clone.arg("clone").arg(&bundle).arg(&clone_dir);
        run_captured(&mut clone)?;

        let repo = GitRepo::new(git, &clone_dir);
        let sizes = naive_sizes(&repo, "refs/remotes/origin")?;
        rows.push(NaiveRow {
            num_of_operations: count,
            sizes,
        });

        fs::remove_dir_all(&clone_dir).map_err(|e| MeasurementError::io(&clone_dir, e))?;
    }
    Ok(rows)
}
