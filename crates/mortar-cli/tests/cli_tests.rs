//! End-to-end CLI tests driving the `mortar` binary against a directory
//! repository.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

fn mortar() -> Command {
    Command::cargo_bin("mortar").expect("binary built")
}

/// Create a configuration and a dir repository with the given
/// packages.manifest content, returning their paths.
fn setup(root: &Path, packages_manifest: &str) -> (std::path::PathBuf, std::path::PathBuf) {
    let cfg = root.join("cfg");
    let repo = root.join("repo");
    fs::create_dir_all(&cfg).unwrap();
    fs::create_dir_all(&repo).unwrap();
    fs::write(repo.join("packages.manifest"), packages_manifest).unwrap();

    mortar()
        .args(["cfg-create"])
        .arg("-d")
        .arg(&cfg)
        .assert()
        .success()
        .stdout(predicate::str::contains("created new configuration"));

    mortar()
        .args(["rep-fetch"])
        .arg("-d")
        .arg(&cfg)
        .arg(format!("dir+{}", repo.display()))
        .assert()
        .success()
        .stdout(predicate::str::contains("fetched"));

    (cfg, repo)
}

#[test]
fn test_cfg_create_twice_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = tmp.path().join("cfg");
    fs::create_dir_all(&cfg).unwrap();

    mortar().args(["cfg-create"]).arg("-d").arg(&cfg).assert().success();
    mortar()
        .args(["cfg-create"])
        .arg("-d")
        .arg(&cfg)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already a mortar configuration"));
}

#[test]
fn test_build_and_noop_rebuild() {
    let tmp = tempfile::tempdir().unwrap();
    let (cfg, _repo) = setup(
        tmp.path(),
        ": 1\nname: libfoo\nversion: 1.2.0\n:\nname: app\nversion: 1.0.0\ndepends: libfoo ^1.0.0\n",
    );

    mortar()
        .args(["pkg-build", "--yes", "app"])
        .arg("-d")
        .arg(&cfg)
        .assert()
        .success()
        .stdout(predicate::str::contains("build libfoo/1.2.0"))
        .stdout(predicate::str::contains("build app/1.0.0"));

    // The state records both packages.
    let state = fs::read_to_string(cfg.join(".mortar/state.json")).unwrap();
    assert!(state.contains("libfoo"));
    assert!(state.contains("app"));

    // Rebuilding the same thing changes nothing.
    mortar()
        .args(["pkg-build", "--yes", "app"])
        .arg("-d")
        .arg(&cfg)
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to be done"));
}

#[test]
fn test_drop_request() {
    let tmp = tempfile::tempdir().unwrap();
    let (cfg, _repo) = setup(tmp.path(), ": 1\nname: libfoo\nversion: 1.0.0\n");

    mortar()
        .args(["pkg-build", "--yes", "libfoo"])
        .arg("-d")
        .arg(&cfg)
        .assert()
        .success();

    mortar()
        .args(["pkg-build", "--yes", "?libfoo"])
        .arg("-d")
        .arg(&cfg)
        .assert()
        .success()
        .stdout(predicate::str::contains("drop libfoo/1.0.0"));

    let state = fs::read_to_string(cfg.join(".mortar/state.json")).unwrap();
    assert!(!state.contains("libfoo"));
}

#[test]
fn test_unknown_package_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let (cfg, _repo) = setup(tmp.path(), ": 1\nname: libfoo\nversion: 1.0.0\n");

    mortar()
        .args(["pkg-build", "--yes", "nonexistent"])
        .arg("-d")
        .arg(&cfg)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown package"));
}

#[test]
fn test_no_private_config_exit_code() {
    let tmp = tempfile::tempdir().unwrap();
    let (cfg, _repo) = setup(
        tmp.path(),
        ": 1\nname: gen\nversion: 1.0.0\n:\nname: app\nversion: 1.0.0\ndepends: * gen\n",
    );

    mortar()
        .args(["pkg-build", "--yes", "--no-private-config", "7", "app"])
        .arg("-d")
        .arg(&cfg)
        .assert()
        .code(7)
        .stderr(predicate::str::contains("host configuration"));
}

#[test]
fn test_pkg_checkout_from_dir_repository() {
    let tmp = tempfile::tempdir().unwrap();
    let (cfg, repo) = setup(tmp.path(), ": 1\nname: libfoo\nversion: 1.0.0\n");
    fs::create_dir_all(repo.join("libfoo")).unwrap();
    fs::write(repo.join("libfoo/manifest"), "name: libfoo\nversion: 1.0.0\n").unwrap();

    mortar()
        .args(["pkg-checkout", "libfoo/1.0.0"])
        .arg("-d")
        .arg(&cfg)
        .assert()
        .success()
        .stdout(predicate::str::contains("checked out libfoo/1.0.0"));

    assert!(cfg.join("libfoo-1.0.0/manifest").is_file());
}

#[test]
fn test_outside_configuration_fails() {
    let tmp = tempfile::tempdir().unwrap();
    mortar()
        .args(["pkg-build", "--yes", "libfoo"])
        .arg("-d")
        .arg(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a mortar configuration"));
}
