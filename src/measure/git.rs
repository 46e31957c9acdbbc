//! Thin wrapper over the `git` CLI for one repository directory.

use crate::measure::MeasurementError;
use crate::process::{run_captured, run_with_input, Captured, CommandFailure};
use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
}

impl ObjectKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "blob" => Some(Self::Blob),
            "tree" => Some(Self::Tree),
            "commit" => Some(Self::Commit),
            _ => None,
        }
    }
}

/// One entry of a tree object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub kind: ObjectKind,
    pub oid: String,
    pub name: String,
}

/// Parse a raw tree object body: `<mode> <name>\0<binary oid>` repeated.
pub fn parse_tree_object(body: &[u8], oid_len: usize) -> Result<Vec<TreeEntry>, MeasurementError> {
    let bad = |at: &[u8]| {
        let text = String::from_utf8_lossy(at).into_owned();
        MeasurementError::unparseable("git cat-file --batch", text)
    };
    let mut entries = Vec::new();
    let mut rest = body;
    while !rest.is_empty() {
        let nul = rest.iter().position(|&b| b == 0).ok_or_else(|| bad(rest))?;
        let header = String::from_utf8_lossy(&rest[..nul]);
        let (mode, name) = header.split_once(' ').ok_or_else(|| bad(rest))?;
        let end = nul + 1 + oid_len;
        let raw = rest.get(nul + 1..end).ok_or_else(|| bad(rest))?;
        let kind = match mode {
            "40000" => ObjectKind::Tree,
            "160000" => ObjectKind::Commit,
            _ => ObjectKind::Blob,
        };
        let mut oid = String::with_capacity(oid_len * 2);
        for byte in raw {
            let _ = write!(oid, "{:02x}", byte);
        }
        entries.push(TreeEntry {
            kind,
            oid,
            name: name.to_string(),
        });
        rest = &rest[end..];
    }
    Ok(entries)
}

#[derive(Debug, Clone)]
pub struct GitRepo {
    git: PathBuf,
    dir: PathBuf,
}

impl GitRepo {
    pub fn new(git: impl Into<PathBuf>, dir: impl Into<PathBuf>) -> Self {
        Self {
            git: git.into(),
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn git(&self) -> &Path {
        &self.git
    }

    /// A `git` command running inside the repository.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.git);
        cmd.current_dir(&self.dir);
        cmd
    }

    pub fn run<I, S>(&self, args: I) -> Result<Captured, CommandFailure>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = self.command();
        cmd.args(args);
        run_captured(&mut cmd)
    }

    /// Full names of refs under `prefix`, e.g. `refs/heads`.
    pub fn refs(&self, prefix: &str) -> Result<Vec<String>, CommandFailure> {
        let out = self.run(["for-each-ref", "--format=%(refname)", prefix])?;
        Ok(out
            .stdout_str()
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// `(commit, root tree)` pairs along the first-parent chain of `reference`, newest first.
    pub fn first_parent_log(&self, reference: &str) -> Result<Vec<(String, String)>, MeasurementError> {
        let out = self.run(["log", "--first-parent", "--format=%H %T", reference])?;
        out.stdout_str()
            .lines()
            .filter(|l| !l.is_empty())
            .map(|line| {
                line.split_once(' ')
                    .map(|(c, t)| (c.to_string(), t.to_string()))
                    .ok_or_else(|| MeasurementError::unparseable("git log", line))
            })
            .collect()
    }

    /// Entries of every named tree, read through a single `cat-file --batch`.
    pub fn read_trees(
        &self,
        trees: &[String],
    ) -> Result<HashMap<String, Vec<TreeEntry>>, MeasurementError> {
        let mut seen = HashSet::new();
        let unique: Vec<&String> = trees.iter().filter(|t| seen.insert(t.as_str())).collect();
        let mut listings = HashMap::with_capacity(unique.len());
        if unique.is_empty() {
            return Ok(listings);
        }
        let mut input = unique.iter().map(|t| t.as_str()).collect::<Vec<_>>().join("\n");
        input.push('\n');

        let mut cmd = self.command();
        cmd.args(["cat-file", "--batch"]);
        let out = run_with_input(&mut cmd, input.into_bytes())?;

        let mut rest = out.stdout.as_slice();
        for tree in unique {
            let truncated = || {
                let msg = format!("no object for {}", tree);
                MeasurementError::unparseable("git cat-file --batch", msg)
            };
            let newline = rest.iter().position(|&b| b == b'\n').ok_or_else(truncated)?;
            let header = String::from_utf8_lossy(&rest[..newline]).into_owned();
            let fields: Vec<&str> = header.split(' ').collect();
            if fields.len() != 3 || fields[1] != "tree" {
                return Err(MeasurementError::unparseable("git cat-file --batch", header));
            }
            let size: usize = fields[2]
                .parse()
                .map_err(|_| MeasurementError::unparseable("git cat-file --batch", header.clone()))?;
            let start = newline + 1;
            let body = rest.get(start..start + size).ok_or_else(truncated)?;
            listings.insert(tree.clone(), parse_tree_object(body, fields[0].len() / 2)?);
            // Each body is followed by a newline.
            rest = rest.get(start + size + 1..).unwrap_or_default();
        }
        Ok(listings)
    }

    /// Sizes of the named objects, in order. Duplicates are answered once per occurrence.
    pub fn object_sizes(&self, names: &[String]) -> Result<Vec<u64>, MeasurementError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let mut input = names.join("\n");
        input.push('\n');

        let mut cmd = self.command();
        cmd.args(["cat-file", "--batch-check=%(objectsize)"]);
        let out = run_with_input(&mut cmd, input.into_bytes())?;

        let sizes = out
            .stdout_str()
            .lines()
            .map(|line| {
                line.trim()
                    .parse::<u64>()
                    .map_err(|_| MeasurementError::unparseable("git cat-file", line))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if sizes.len() != names.len() {
            return Err(MeasurementError::unparseable(
                "git cat-file",
                format!("asked for {} objects, got {} sizes", names.len(), sizes.len()),
            ));
        }
        Ok(sizes)
    }
}
