//! The content-addressed implementation store: atomic add, verify, list,
//! remove, and hardlink-dedup.
//!
//! The add protocol stages into a temp dir on the same filesystem, then
//! renames into place: allocate a temp directory under the store root,
//! populate it, manifest it, compare against the expected digest, then
//! rename it to its final `algo=value` name. A losing rename on a
//! concurrent collision is treated as success, since publishing the same
//! content under the same digest twice is a no-op by definition.

mod archive;
mod composite;
mod lock;
mod privileged;

pub use archive::{extract_all, ArchiveFormat, ArchiveSource};
pub use composite::CompositeStore;
pub use privileged::{PrivilegedDaemon, PrivilegedStore};

use crate::digest::{parse_store_name, DigestAlgorithm, ManifestDigest};
use crate::error::{
    DigestMismatchSnafu, ImplementationNotFoundSnafu, IoCreateSnafu, IoDeleteSnafu, IoReadDirSnafu,
    IoRenameSnafu, IoStatSnafu, Result,
};
use crate::interfaces::Handler;
use crate::manifest::{self, MANIFEST_SIDECAR};
use lock::StoreLock;
use rand::Rng;
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const TMP_PREFIX: &str = "tmp";
const LOCK_FILE: &str = ".lock";

/// The operations every implementation store exposes. Implemented by
/// [`DirStore`] (a single on-disk store), [`CompositeStore`]
/// (an ordered list of sub-stores), and [`PrivilegedStore`] (delegates
/// population to a system daemon).
pub trait ImplementationStore {
    fn contains(&self, digest: &ManifestDigest) -> bool;

    fn get_path(&self, digest: &ManifestDigest) -> Result<PathBuf>;

    fn list_all(&self) -> Result<Vec<ManifestDigest>>;

    /// Atomically adopts `source` into the store under the name derived
    /// from `expected_digest`, returning the final directory.
    fn add_directory(
        &self,
        source: &Path,
        expected_digest: &ManifestDigest,
        handler: &dyn Handler,
    ) -> Result<PathBuf>;

    /// Stages `archives` into a temp directory (extracted in order at
    /// their declared offsets/subpaths), then falls through to
    /// [`ImplementationStore::add_directory`].
    fn add_archives(
        &self,
        archives: &[ArchiveSource],
        expected_digest: &ManifestDigest,
        handler: &dyn Handler,
    ) -> Result<PathBuf>;

    fn remove(&self, digest: &ManifestDigest) -> Result<()>;

    /// Hardlink-dedups identical files across entries; returns bytes saved.
    fn optimise(&self) -> Result<u64>;

    /// Re-manifests the entry identified by `digest` and compares against
    /// it, failing with [`crate::error::Error::DigestMismatch`] on drift.
    fn verify(&self, digest: &ManifestDigest, handler: &dyn Handler) -> Result<()>;

    /// Whether this store accepts new entries (a read-only mirror, for
    /// instance, would return `false`). Used by [`CompositeStore`] to pick
    /// the first writable sub-store for `add_directory`/`add_archives`.
    fn is_writable(&self) -> bool {
        true
    }
}

/// A single on-disk content-addressed store rooted at one directory.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn existing_entry_path(&self, digest: &ManifestDigest) -> Option<PathBuf> {
        digest
            .all_store_names()
            .into_iter()
            .map(|name| self.entry_path(&name))
            .find(|path| path.is_dir())
    }

    fn allocate_temp_dir(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.root).context(IoCreateSnafu { path: &self.root })?;
        let nonce: u64 = rand::thread_rng().gen();
        let name = format!("{TMP_PREFIX}-{}-{:016x}", std::process::id(), nonce);
        let path = self.entry_path(&name);
        fs::create_dir(&path).context(IoCreateSnafu { path: &path })?;
        Ok(path)
    }

    /// Runs the add protocol against an already-
    /// populated temp directory `staged`, consuming it either into the
    /// store's final entry or removing it on mismatch/collision.
    fn publish(&self, staged: PathBuf, expected_digest: &ManifestDigest) -> Result<PathBuf> {
        let algorithms: Vec<DigestAlgorithm> =
            expected_digest.entries().iter().map(|(a, _)| *a).collect();

        let computed = match manifest::manifest_digests(&staged, &algorithms) {
            Ok(computed) => computed,
            Err(err) => {
                let _ = fs::remove_dir_all(&staged);
                return Err(err);
            }
        };

        if computed != *expected_digest {
            let _ = fs::remove_dir_all(&staged);
            return DigestMismatchSnafu {
                expected: expected_digest
                    .preferred_store_name()
                    .unwrap_or_default(),
                computed: computed.preferred_store_name().unwrap_or_default(),
            }
            .fail();
        }

        write_manifest_sidecar(&staged, &computed, &algorithms)?;
        lock_down_permissions(&staged)?;

        let final_name = expected_digest
            .preferred_store_name()
            .expect("a digest that passed manifest comparison has at least one entry");
        let final_path = self.entry_path(&final_name);

        match fs::rename(&staged, &final_path) {
            Ok(()) => Ok(final_path),
            Err(e) if e.kind() == ErrorKind::AlreadyExists || final_path.is_dir() => {
                // Another writer published the same digest first; the
                // store is idempotent over (source, digest).
                let _ = fs::remove_dir_all(&staged);
                Ok(final_path)
            }
            Err(e) => {
                let _ = fs::remove_dir_all(&staged);
                Err(e).context(IoRenameSnafu {
                    from: staged,
                    to: final_path,
                })
            }
        }
    }
}

impl ImplementationStore for DirStore {
    fn contains(&self, digest: &ManifestDigest) -> bool {
        self.existing_entry_path(digest).is_some()
    }

    fn get_path(&self, digest: &ManifestDigest) -> Result<PathBuf> {
        self.existing_entry_path(digest)
            .context(ImplementationNotFoundSnafu)
    }

    fn list_all(&self) -> Result<Vec<ManifestDigest>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root).context(IoReadDirSnafu { path: &self.root })? {
            let entry = entry.context(IoReadDirSnafu { path: &self.root })?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Some((algo, value)) = parse_store_name(&name) {
                out.push(ManifestDigest::single(algo, value));
            }
        }
        Ok(out)
    }

    fn add_directory(
        &self,
        source: &Path,
        expected_digest: &ManifestDigest,
        handler: &dyn Handler,
    ) -> Result<PathBuf> {
        handler.run_task(&format!("adding {} to the store", source.display()));

        let staged = self.allocate_temp_dir()?;
        fs::remove_dir(&staged).context(IoCreateSnafu { path: &staged })?;
        adopt(source, &staged)?;

        self.publish(staged, expected_digest)
    }

    fn add_archives(
        &self,
        archives: &[ArchiveSource],
        expected_digest: &ManifestDigest,
        handler: &dyn Handler,
    ) -> Result<PathBuf> {
        handler.run_task("extracting archives into a staging directory");

        let staged = self.allocate_temp_dir()?;
        if let Err(err) = extract_all(archives, &staged) {
            let _ = fs::remove_dir_all(&staged);
            return Err(err);
        }

        self.publish(staged, expected_digest)
    }

    fn remove(&self, digest: &ManifestDigest) -> Result<()> {
        let _lock = StoreLock::acquire(&self.root)?;
        let path = self.existing_entry_path(digest).context(ImplementationNotFoundSnafu)?;
        fs::remove_dir_all(&path).context(IoDeleteSnafu { path })
    }

    fn optimise(&self) -> Result<u64> {
        let _lock = StoreLock::acquire(&self.root)?;
        if !self.root.is_dir() {
            return Ok(0);
        }

        // content-hash -> first path seen carrying that content.
        let mut seen: HashMap<String, PathBuf> = HashMap::new();
        let mut bytes_saved: u64 = 0;

        let mut entries: Vec<PathBuf> = fs::read_dir(&self.root)
            .context(IoReadDirSnafu { path: &self.root })?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_dir()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| parse_store_name(n).is_some())
                        .unwrap_or(false)
            })
            .collect();
        entries.sort();

        for entry_dir in entries {
            for file in WalkDir::new(&entry_dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let path = file.path().to_path_buf();
                let metadata = match file.metadata() {
                    Ok(m) => m,
                    Err(_) => continue,
                };
                let key = content_fingerprint(&path)?;

                match seen.get(&key) {
                    Some(original) if original != &path => {
                        if hardlink_over(original, &path).is_ok() {
                            bytes_saved += metadata.len();
                        }
                    }
                    _ => {
                        seen.insert(key, path);
                    }
                }
            }
        }

        Ok(bytes_saved)
    }

    fn verify(&self, digest: &ManifestDigest, handler: &dyn Handler) -> Result<()> {
        handler.run_task("verifying store entry integrity");
        let path = self.get_path(digest)?;
        let algorithms: Vec<DigestAlgorithm> = digest.entries().iter().map(|(a, _)| *a).collect();
        let computed = manifest::manifest_digests(&path, &algorithms)?;

        ensure!(
            computed.partial_eq(digest),
            DigestMismatchSnafu {
                expected: digest.preferred_store_name().unwrap_or_default(),
                computed: computed.preferred_store_name().unwrap_or_default(),
            }
        );
        Ok(())
    }
}

/// Moves `source` into `dest` (same-filesystem rename), falling back to a
/// recursive copy-then-delete across filesystem boundaries.
fn adopt(source: &Path, dest: &Path) -> Result<()> {
    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc_exdev()) => {
            copy_recursive(source, dest)?;
            fs::remove_dir_all(source).context(IoDeleteSnafu { path: source })
        }
        Err(e) => Err(e).context(IoRenameSnafu {
            from: source,
            to: dest,
        }),
    }
}

#[cfg(unix)]
fn libc_exdev() -> i32 {
    18 // EXDEV on Linux and most other unix targets
}

fn copy_recursive(source: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).context(IoCreateSnafu { path: dest })?;
    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(|_| crate::error::Error::UnsupportedFile {
            path: source.to_path_buf(),
        })?;
        let relative = entry.path().strip_prefix(source).expect("walked under source");
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).context(IoCreateSnafu { path: &target })?;
        } else if entry.file_type().is_symlink() {
            let link = fs::read_link(entry.path()).context(IoStatSnafu { path: entry.path() })?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(link, &target).context(IoCreateSnafu { path: &target })?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).context(IoCreateSnafu { path: parent })?;
            }
            fs::copy(entry.path(), &target).context(IoCreateSnafu { path: &target })?;
        }
    }
    Ok(())
}

/// Recursively sets files read-only (`0444`, or `0555` if the manifest
/// found them executable) and directories `read|execute` (`0555`), so a
/// published store entry can't be mutated in place.
fn lock_down_permissions(dir: &Path) -> Result<()> {
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|_| crate::error::Error::UnsupportedFile {
            path: dir.to_path_buf(),
        })?;
        let path = entry.path();
        let metadata = fs::symlink_metadata(path).context(IoStatSnafu { path })?;
        if metadata.file_type().is_symlink() {
            continue;
        }

        let mode = if metadata.is_dir() {
            0o555
        } else if metadata.mode() & 0o111 != 0 {
            0o555
        } else {
            0o444
        };
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).context(IoStatSnafu { path })?;
    }
    Ok(())
}

fn write_manifest_sidecar(
    staged: &Path,
    digest: &ManifestDigest,
    algorithms: &[DigestAlgorithm],
) -> Result<()> {
    let Some(algorithm) = algorithms.first() else {
        return Ok(());
    };
    let text = manifest::render_manifest_text(staged, *algorithm)?;
    let sidecar = staged.join(MANIFEST_SIDECAR);
    fs::write(&sidecar, text).context(IoCreateSnafu { path: &sidecar })?;
    let _ = digest;
    Ok(())
}

fn content_fingerprint(path: &Path) -> Result<String> {
    use digest::Digest;
    let mut hasher = sha2::Sha256::new();
    let mut file = fs::File::open(path).context(IoStatSnafu { path })?;
    std::io::copy(&mut file, &mut hasher).context(IoStatSnafu { path })?;
    Ok(hex::encode(hasher.finalize()))
}

fn hardlink_over(original: &Path, duplicate: &Path) -> std::io::Result<()> {
    let tmp = duplicate.with_extension("zi-core-optimise-tmp");
    fs::hard_link(original, &tmp)?;
    fs::rename(&tmp, duplicate)?;
    Ok(())
}

#[cfg(not(unix))]
fn libc_exdev() -> i32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::HexDigest;
    use crate::interfaces::NullHandler;
    use std::fs;

    fn populated_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("run.sh"), b"#!/bin/sh\necho hi\n").unwrap();
        dir
    }

    #[test]
    fn add_then_get_path_round_trips() {
        let store_root = tempfile::tempdir().unwrap();
        let store = DirStore::new(store_root.path());
        let source = populated_dir();

        let digest = manifest::manifest_digests(source.path(), &[DigestAlgorithm::Sha256]).unwrap();
        let handler = NullHandler;

        let published = store.add_directory(source.path(), &digest, &handler).unwrap();
        assert!(published.is_dir());
        assert!(store.contains(&digest));
        assert_eq!(published, store.get_path(&digest).unwrap());
    }

    #[test]
    fn add_with_wrong_digest_fails_and_leaves_no_entry() {
        let store_root = tempfile::tempdir().unwrap();
        let store = DirStore::new(store_root.path());
        let source = populated_dir();

        let wrong = ManifestDigest::single(DigestAlgorithm::Sha256, HexDigest::new("0".repeat(64)));
        let handler = NullHandler;

        let err = store.add_directory(source.path(), &wrong, &handler).unwrap_err();
        assert!(matches!(err, crate::error::Error::DigestMismatch { .. }));

        let remaining: Vec<_> = fs::read_dir(store_root.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert!(remaining.is_empty());
    }

    #[test]
    fn add_directory_is_idempotent() {
        let store_root = tempfile::tempdir().unwrap();
        let store = DirStore::new(store_root.path());
        let handler = NullHandler;

        let source_a = populated_dir();
        let digest = manifest::manifest_digests(source_a.path(), &[DigestAlgorithm::Sha256]).unwrap();
        store.add_directory(source_a.path(), &digest, &handler).unwrap();

        let source_b = populated_dir();
        // Second add with identical content is a no-op, not an error.
        let published = store.add_directory(source_b.path(), &digest, &handler).unwrap();
        assert!(published.is_dir());
    }

    #[test]
    fn remove_deletes_the_entry() {
        let store_root = tempfile::tempdir().unwrap();
        let store = DirStore::new(store_root.path());
        let source = populated_dir();
        let digest = manifest::manifest_digests(source.path(), &[DigestAlgorithm::Sha256]).unwrap();
        let handler = NullHandler;

        store.add_directory(source.path(), &digest, &handler).unwrap();
        store.remove(&digest).unwrap();
        assert!(!store.contains(&digest));
    }

    #[test]
    fn remove_missing_entry_fails() {
        let store_root = tempfile::tempdir().unwrap();
        let store = DirStore::new(store_root.path());
        let digest = ManifestDigest::single(DigestAlgorithm::Sha256, HexDigest::new("a".repeat(64)));

        let err = store.remove(&digest).unwrap_err();
        assert!(matches!(err, crate::error::Error::ImplementationNotFound));
    }

    #[test]
    fn verify_detects_tampering() {
        let store_root = tempfile::tempdir().unwrap();
        let store = DirStore::new(store_root.path());
        let source = populated_dir();
        let digest = manifest::manifest_digests(source.path(), &[DigestAlgorithm::Sha256]).unwrap();
        let handler = NullHandler;

        let published = store.add_directory(source.path(), &digest, &handler).unwrap();
        store.verify(&digest, &handler).unwrap();

        // Tamper: store entries are mode 0444, but the test still owns the
        // file and can rewrite it directly.
        let mut perms = fs::metadata(published.join("run.sh")).unwrap().permissions();
        perms.set_mode(0o644);
        fs::set_permissions(published.join("run.sh"), perms).unwrap();
        fs::write(published.join("run.sh"), b"tampered").unwrap();

        let err = store.verify(&digest, &handler).unwrap_err();
        assert!(matches!(err, crate::error::Error::DigestMismatch { .. }));
    }

    #[test]
    fn contains_matches_on_any_shared_algorithm() {
        let store_root = tempfile::tempdir().unwrap();
        let store = DirStore::new(store_root.path());
        let source = populated_dir();
        let digest =
            manifest::manifest_digests(source.path(), &[DigestAlgorithm::Sha256, DigestAlgorithm::Sha1New])
                .unwrap();
        let handler = NullHandler;
        store.add_directory(source.path(), &digest, &handler).unwrap();

        let single_algo = ManifestDigest::single(
            DigestAlgorithm::Sha1New,
            digest
                .entries()
                .iter()
                .find(|(a, _)| *a == DigestAlgorithm::Sha1New)
                .unwrap()
                .1
                .clone(),
        );
        assert!(store.contains(&single_algo));
    }

    #[test]
    fn list_all_reports_every_published_entry() {
        let store_root = tempfile::tempdir().unwrap();
        let store = DirStore::new(store_root.path());
        let handler = NullHandler;

        let source_a = populated_dir();
        let digest_a = manifest::manifest_digests(source_a.path(), &[DigestAlgorithm::Sha256]).unwrap();
        store.add_directory(source_a.path(), &digest_a, &handler).unwrap();

        let listed = store.list_all().unwrap();
        assert_eq!(1, listed.len());
        assert!(listed[0].partial_eq(&digest_a));
    }

    #[test]
    fn optimise_hardlinks_identical_file_content() {
        let store_root = tempfile::tempdir().unwrap();
        let store = DirStore::new(store_root.path());
        let handler = NullHandler;

        let source_a = tempfile::tempdir().unwrap();
        fs::write(source_a.path().join("shared.txt"), b"same content").unwrap();
        let digest_a = manifest::manifest_digests(source_a.path(), &[DigestAlgorithm::Sha256]).unwrap();
        store.add_directory(source_a.path(), &digest_a, &handler).unwrap();

        let source_b = tempfile::tempdir().unwrap();
        fs::write(source_b.path().join("shared.txt"), b"same content").unwrap();
        fs::write(source_b.path().join("extra.txt"), b"not shared").unwrap();
        let digest_b = manifest::manifest_digests(source_b.path(), &[DigestAlgorithm::Sha256]).unwrap();
        store.add_directory(source_b.path(), &digest_b, &handler).unwrap();

        let saved = store.optimise().unwrap();
        assert!(saved > 0);
    }
}
