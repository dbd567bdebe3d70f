use std::fs;
use std::process::Command;

fn zi() -> Command {
    Command::new(env!("CARGO_BIN_EXE_zi"))
}

#[test]
fn store_add_list_verify_remove_round_trip() {
    let store_root = tempfile::tempdir().unwrap();
    let source = tempfile::tempdir().unwrap();
    fs::write(source.path().join("run.sh"), b"#!/bin/sh\necho hi\n").unwrap();

    // Compute the expected digest the same way the store itself would, by
    // reading it back out of a throwaway in-process call rather than
    // re-deriving the manifest format here.
    let digest = zi_core::manifest::manifest_digests(
        source.path(),
        &[zi_core::digest::DigestAlgorithm::Sha256],
    )
    .unwrap();
    let digest_name = digest.preferred_store_name().unwrap();

    let add = zi()
        .args(["--store-root"])
        .arg(store_root.path())
        .args(["store", "add"])
        .arg(source.path())
        .arg(&digest_name)
        .output()
        .unwrap();
    assert!(add.status.success(), "stderr: {}", String::from_utf8_lossy(&add.stderr));

    let list = zi()
        .args(["--store-root"])
        .arg(store_root.path())
        .args(["store", "list"])
        .output()
        .unwrap();
    assert!(list.status.success());
    assert!(String::from_utf8_lossy(&list.stdout).contains(&digest_name));

    let verify = zi()
        .args(["--store-root"])
        .arg(store_root.path())
        .args(["store", "verify", &digest_name])
        .output()
        .unwrap();
    assert!(verify.status.success());

    let remove = zi()
        .args(["--store-root"])
        .arg(store_root.path())
        .args(["store", "remove", &digest_name])
        .output()
        .unwrap();
    assert!(remove.status.success());

    let list_after = zi()
        .args(["--store-root"])
        .arg(store_root.path())
        .args(["store", "list"])
        .output()
        .unwrap();
    assert!(!String::from_utf8_lossy(&list_after.stdout).contains(&digest_name));
}

#[test]
fn store_verify_of_missing_digest_fails() {
    let store_root = tempfile::tempdir().unwrap();

    let verify = zi()
        .args(["--store-root"])
        .arg(store_root.path())
        .args(["store", "verify", "sha256=0000000000000000000000000000000000000000000000000000000000000000"])
        .output()
        .unwrap();
    assert!(!verify.status.success());
}

#[test]
fn invalid_digest_name_is_rejected() {
    let store_root = tempfile::tempdir().unwrap();
    let source = tempfile::tempdir().unwrap();

    let add = zi()
        .args(["--store-root"])
        .arg(store_root.path())
        .args(["store", "add"])
        .arg(source.path())
        .arg("not-a-digest")
        .output()
        .unwrap();
    assert!(!add.status.success());
}

#[test]
fn solve_against_a_local_feed_cache_prints_a_selections_document() {
    let store_root = tempfile::tempdir().unwrap();
    let feed_cache = tempfile::tempdir().unwrap();
    fs::write(
        feed_cache.path().join("https___example.org_app.xml"),
        "interface: https://example.org/app.xml\n\
         impl: app-1\n\
         version: 1.0\n\
         stability: stable\n\
         main: bin/app\n",
    )
    .unwrap();

    let solve = zi()
        .args(["--store-root"])
        .arg(store_root.path())
        .args(["solve", "https://example.org/app.xml", "--feed-cache"])
        .arg(feed_cache.path())
        .output()
        .unwrap();
    assert!(solve.status.success(), "stderr: {}", String::from_utf8_lossy(&solve.stderr));
    let stdout = String::from_utf8_lossy(&solve.stdout);
    assert!(stdout.contains("app-1"));
}

#[test]
fn solve_with_a_testing_only_implementation_needs_help_with_testing() {
    let store_root = tempfile::tempdir().unwrap();
    let feed_cache = tempfile::tempdir().unwrap();
    fs::write(
        feed_cache.path().join("https___example.org_app.xml"),
        "interface: https://example.org/app.xml\n\
         impl: app-1\n\
         version: 1.0\n\
         stability: testing\n\
         main: bin/app\n",
    )
    .unwrap();

    let strict = zi()
        .args(["--store-root"])
        .arg(store_root.path())
        .args(["solve", "https://example.org/app.xml", "--feed-cache"])
        .arg(feed_cache.path())
        .output()
        .unwrap();
    assert!(!strict.status.success());

    let lenient = zi()
        .args(["--store-root"])
        .arg(store_root.path())
        .args(["solve", "https://example.org/app.xml", "--feed-cache"])
        .arg(feed_cache.path())
        .arg("--help-with-testing")
        .output()
        .unwrap();
    assert!(lenient.status.success(), "stderr: {}", String::from_utf8_lossy(&lenient.stderr));
}

#[test]
fn invalid_network_use_value_is_rejected() {
    let store_root = tempfile::tempdir().unwrap();
    let feed_cache = tempfile::tempdir().unwrap();

    let solve = zi()
        .args(["--store-root"])
        .arg(store_root.path())
        .args(["solve", "https://example.org/app.xml", "--feed-cache"])
        .arg(feed_cache.path())
        .args(["--network-use", "bogus"])
        .output()
        .unwrap();
    assert!(!solve.status.success());
    assert!(String::from_utf8_lossy(&solve.stderr).contains("network-use"));
}
