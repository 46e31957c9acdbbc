//! Integration tests for the git-backed object store
//!
//! These tests build small repositories with the `git` executable and
//! measure them through `GitStore`. If `git` is not on PATH they are skipped;
//! the structure test additionally needs `git-sizer`.

use replay_bench::measure::git::GitRepo;
use replay_bench::measure::naive::{bundle_naive_sizes, naive_sizes};
use replay_bench::measure::store::{GitStore, ObjectStore};
use std::fs;
use std::path::Path;
use std::process::Command;

fn tool_available(tool: &str) -> bool {
    Command::new(tool)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Skip test if git is not installed
fn skip_if_no_git() -> bool {
    if tool_available("git") {
        return false;
    }
    eprintln!("Skipping: git not found on PATH");
    true
}

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("spawn git");
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn init_repo(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    git(dir, &["init", "-q"]);
    git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git(dir, &["config", "user.name", "bench"]);
    git(dir, &["config", "user.email", "bench@localhost"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
}

fn commit(dir: &Path, files: &[(&str, &str)], message: &str) {
    for (name, contents) in files {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-q", "-m", message]);
}

fn store(dir: &Path) -> GitStore {
    GitStore::new("git", "git-sizer", dir)
}

fn sorted_objects(dir: &Path) -> Vec<String> {
    let mut objects: Vec<String> = git(dir, &["rev-list", "--objects", "--branches"])
        .lines()
        .map(|l| l.split(' ').next().unwrap_or_default().to_string())
        .collect();
    objects.sort();
    objects
}

#[test]
fn test_full_bundle_reports_pack_totals() {
    if skip_if_no_git() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("ledger");
    init_repo(&repo);
    commit(&repo, &[("a.txt", "alpha\n"), ("sub/b.txt", "beta\n")], "first");

    let full = store(&repo).full_bundle().unwrap();
    // commit, root tree, sub tree, two blobs
    assert_eq!(full.num_objects, 5);
    assert_eq!(full.num_deltas, 0);
    assert!(full.bytes.starts_with(b"# v2 git bundle"));
}

#[test]
fn test_incremental_bundle_is_empty_after_marker_advance() {
    if skip_if_no_git() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("ledger");
    init_repo(&repo);
    commit(&repo, &[("a.txt", "alpha\n")], "first");
    let mut store = store(&repo);

    // No marker yet: the increment covers everything.
    assert!(!store.incremental_bundle().unwrap().is_empty());
    store.advance_marker().unwrap();
    assert_eq!(
        git(&repo, &["rev-parse", "refs/measurement/main"]),
        git(&repo, &["rev-parse", "refs/heads/main"])
    );

    assert!(store.incremental_bundle().unwrap().is_empty());

    commit(&repo, &[("a.txt", "alpha two\n")], "second");
    assert!(!store.incremental_bundle().unwrap().is_empty());
}

#[test]
fn test_incremental_bundles_rebuild_the_repository() {
    if skip_if_no_git() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("ledger");
    init_repo(&repo);
    let mut store = store(&repo).with_marker_namespace("refs/seen/");

    let mut bundles = Vec::new();
    let mut snapshot = |store: &mut GitStore, n: usize| {
        let bytes = store.incremental_bundle().unwrap();
        store.advance_marker().unwrap();
        if bytes.is_empty() {
            return;
        }
        let path = dir.path().join(format!("{n}.bundle"));
        fs::write(&path, bytes).unwrap();
        bundles.push(path);
    };

    commit(&repo, &[("alice/T1", "10\n")], "mint alice");
    snapshot(&mut store, 1);
    commit(&repo, &[("alice/T1", "6\n"), ("bob/T1", "4\n")], "give bob");
    git(&repo, &["branch", "frontier/T1/bob"]);
    snapshot(&mut store, 2);
    snapshot(&mut store, 3);
    commit(&repo, &[("carol/T2", "1\n")], "mint carol");
    snapshot(&mut store, 4);
    assert_eq!(bundles.len(), 3);

    // Each bundle's prerequisites are satisfied by the ones before it.
    let replica = dir.path().join("replica");
    fs::create_dir_all(&replica).unwrap();
    git(&replica, &["init", "-q", "--bare"]);
    for bundle in &bundles {
        let bundle = bundle.to_string_lossy().into_owned();
        git(&replica, &["fetch", "-q", &bundle, "+refs/heads/*:refs/heads/*"]);
    }

    assert_eq!(
        git(&replica, &["rev-parse", "refs/heads/main", "refs/heads/frontier/T1/bob"]),
        git(&repo, &["rev-parse", "refs/heads/main", "refs/heads/frontier/T1/bob"])
    );
    assert_eq!(sorted_objects(&replica), sorted_objects(&repo));
}

#[test]
fn test_clone_sizes_unpack_every_object() {
    if skip_if_no_git() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("ledger");
    init_repo(&repo);
    commit(&repo, &[("a.txt", "alpha\n"), ("sub/b.txt", "beta\n")], "first");
    commit(&repo, &[("a.txt", "alpha two\n")], "second");

    let mut store = store(&repo);
    let full = store.full_bundle().unwrap();
    let scratch = dir.path().join("scratch");
    fs::create_dir_all(&scratch).unwrap();
    let bundle = scratch.join("full.bundle");
    fs::write(&bundle, &full.bytes).unwrap();

    let sizes = store.clone_sizes(&bundle, &scratch).unwrap();
    assert!(sizes.pack_size > 0);
    assert!(sizes.unpacked_size > sizes.pack_size);

    let clone = scratch.join("measure_repo");
    let counted = git(&clone, &["count-objects"]);
    assert!(
        counted.starts_with(&format!("{} objects", full.num_objects)),
        "unexpected count-objects output: {counted}"
    );
}

#[test]
fn test_naive_tree_size_counts_shared_history_per_branch() {
    if skip_if_no_git() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("ledger");
    init_repo(&repo);
    commit(&repo, &[("a.txt", "alpha\n"), ("sub/b.txt", "beta\n")], "first");
    commit(&repo, &[("sub/c.txt", "gamma\n")], "second");

    let mut store = store(&repo);
    let single = store.naive_tree_size().unwrap();
    assert!(single > 0);

    git(&repo, &["branch", "copy"]);
    assert_eq!(store.naive_tree_size().unwrap(), 2 * single);
}

#[cfg(unix)]
#[test]
fn test_naive_sizes_spawns_do_not_grow_with_history() {
    use std::os::unix::fs::PermissionsExt;

    if skip_if_no_git() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("ledger");
    init_repo(&repo);
    commit(&repo, &[("alice/T1", "1\n"), ("bob/T1", "1\n")], "c0");

    // Wrapper that logs each invocation before handing over to git.
    let spawns = dir.path().join("spawns.log");
    let wrapper = dir.path().join("counting-git");
    fs::write(
        &wrapper,
        format!("#!/bin/sh\necho \"$1\" >> '{}'\nexec git \"$@\"\n", spawns.display()),
    )
    .unwrap();
    fs::set_permissions(&wrapper, fs::Permissions::from_mode(0o755)).unwrap();

    let measure = || {
        let _ = fs::remove_file(&spawns);
        let sizes = naive_sizes(&GitRepo::new(&wrapper, &repo), "refs/heads").unwrap();
        let tree_size = GitStore::new(&wrapper, "git-sizer", &repo)
            .naive_tree_size()
            .unwrap();
        let count = fs::read_to_string(&spawns).unwrap().lines().count();
        (sizes, tree_size, count)
    };

    let (short, short_tree, short_spawns) = measure();
    for i in 1..=20 {
        let balance = format!("{i}\n");
        commit(&repo, &[("alice/T1", balance.as_str())], &format!("c{i}"));
    }
    let (long, long_tree, long_spawns) = measure();

    assert_eq!(short.tree_count, 3);
    assert_eq!(long.tree_count, 3 * 21);
    assert_eq!(long.blob_count, 2 * 21);
    assert!(long_tree > short_tree);
    assert_eq!(short_spawns, long_spawns);
}

#[test]
fn test_bundle_naive_sizes_per_persisted_bundle() {
    if skip_if_no_git() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("ledger");
    let bundles = dir.path().join("bundles");
    let scratch = dir.path().join("scratch");
    init_repo(&repo);
    fs::create_dir_all(&bundles).unwrap();
    fs::create_dir_all(&scratch).unwrap();
    let mut store = store(&repo);

    commit(&repo, &[("a.txt", "alpha\n"), ("sub/b.txt", "beta\n")], "first");
    fs::write(bundles.join("200.bundle"), store.full_bundle().unwrap().bytes).unwrap();
    commit(&repo, &[("a.txt", "alpha two\n")], "second");
    fs::write(bundles.join("400.bundle"), store.full_bundle().unwrap().bytes).unwrap();
    fs::write(bundles.join("notes.txt"), "ignored").unwrap();

    let rows = bundle_naive_sizes(Path::new("git"), &bundles, &scratch).unwrap();
    let counts: Vec<u64> = rows.iter().map(|r| r.num_of_operations).collect();
    assert_eq!(counts, vec![200, 400]);

    assert_eq!(rows[0].sizes.blob_count, 2);
    assert_eq!(rows[0].sizes.tree_count, 2);
    assert_eq!(rows[0].sizes.blob_size, 11);
    // Both commits visited once: two blobs and two trees each.
    assert_eq!(rows[1].sizes.blob_count, 4);
    assert_eq!(rows[1].sizes.tree_count, 4);

    // Clones are cleaned up after measuring.
    assert_eq!(fs::read_dir(&scratch).unwrap().count(), 0);
}

#[test]
fn test_structure_from_sizer() {
    if skip_if_no_git() || !tool_available("git-sizer") {
        eprintln!("Skipping: git-sizer not found on PATH");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("ledger");
    init_repo(&repo);
    commit(&repo, &[("a.txt", "alpha\n"), ("sub/b.txt", "beta\n")], "first");
    commit(&repo, &[("a.txt", "alpha two\n")], "second");

    let stats = store(&repo).structure().unwrap();
    assert_eq!(stats.unique_commit_count, 2);
    assert_eq!(stats.unique_blob_count, 3);
    assert_eq!(stats.unique_tree_count, 3);
}
