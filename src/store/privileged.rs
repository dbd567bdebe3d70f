//! The privileged store variant: population happens
//! under the calling user's own rights, then a system-wide daemon with
//! elevated rights re-verifies the digest on the caller's staged data
//! before adopting it into the shared store.
//!
//! `zi_core` does not implement the daemon or its IPC transport (out of
//! scope, like `FeedProvider`); [`PrivilegedDaemon`] is the trait boundary
//! a caller's daemon client implements.

use super::{extract_all, ArchiveSource, DirStore, ImplementationStore};
use crate::digest::ManifestDigest;
use crate::error::{IoCreateSnafu, Result};
use crate::interfaces::Handler;
use snafu::ResultExt;
use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// A system-wide privileged daemon that performs the final, trusted
/// `add_directory` step after re-verifying the caller's staged content.
pub trait PrivilegedDaemon {
    fn add_verified_directory(
        &self,
        staged: &Path,
        expected_digest: &ManifestDigest,
    ) -> Result<PathBuf>;
}

/// A store that stages additions under user write access, revokes that
/// access once population is done, then hands the staged directory to a
/// [`PrivilegedDaemon`] for trusted verification and adoption. Reads
/// (`contains`/`get_path`/`list_all`/`verify`) are served directly from
/// the daemon's store root, which the calling process can always read.
pub struct PrivilegedStore<D: PrivilegedDaemon> {
    staging_root: PathBuf,
    read_view: DirStore,
    daemon: D,
}

impl<D: PrivilegedDaemon> PrivilegedStore<D> {
    pub fn new(staging_root: impl Into<PathBuf>, store_root: impl Into<PathBuf>, daemon: D) -> Self {
        Self {
            staging_root: staging_root.into(),
            read_view: DirStore::new(store_root.into()),
            daemon,
        }
    }

    fn stage(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.staging_root).context(IoCreateSnafu {
            path: &self.staging_root,
        })?;
        let name = format!("stage-{}-{:016x}", std::process::id(), rand::random::<u64>());
        let path = self.staging_root.join(name);
        fs::create_dir(&path).context(IoCreateSnafu { path: &path })?;
        // Staged directories grant the calling user write access for the
        // population step.
        fs::set_permissions(&path, Permissions::from_mode(0o755)).context(IoCreateSnafu { path: &path })?;
        Ok(path)
    }

    /// Revokes the calling user's write access to everything under
    /// `staged` before handing it to the daemon for verification.
    fn revoke_write_access(&self, staged: &Path) -> Result<()> {
        for entry in walkdir::WalkDir::new(staged) {
            let entry = entry.map_err(|_| crate::error::Error::UnsupportedFile {
                path: staged.to_path_buf(),
            })?;
            let mode = if entry.file_type().is_dir() { 0o555 } else { 0o444 };
            fs::set_permissions(entry.path(), Permissions::from_mode(mode))
                .context(IoCreateSnafu { path: entry.path() })?;
        }
        Ok(())
    }
}

impl<D: PrivilegedDaemon> ImplementationStore for PrivilegedStore<D> {
    fn contains(&self, digest: &ManifestDigest) -> bool {
        self.read_view.contains(digest)
    }

    fn get_path(&self, digest: &ManifestDigest) -> Result<PathBuf> {
        self.read_view.get_path(digest)
    }

    fn list_all(&self) -> Result<Vec<ManifestDigest>> {
        self.read_view.list_all()
    }

    fn add_directory(
        &self,
        source: &Path,
        expected_digest: &ManifestDigest,
        handler: &dyn Handler,
    ) -> Result<PathBuf> {
        let staged = self.stage()?;
        copy_into(source, &staged)?;
        self.revoke_write_access(&staged)?;
        handler.run_task("handing staged directory to the privileged daemon");
        self.daemon.add_verified_directory(&staged, expected_digest)
    }

    fn add_archives(
        &self,
        archives: &[ArchiveSource],
        expected_digest: &ManifestDigest,
        handler: &dyn Handler,
    ) -> Result<PathBuf> {
        let staged = self.stage()?;
        extract_all(archives, &staged)?;
        self.revoke_write_access(&staged)?;
        handler.run_task("handing staged directory to the privileged daemon");
        self.daemon.add_verified_directory(&staged, expected_digest)
    }

    fn remove(&self, digest: &ManifestDigest) -> Result<()> {
        self.read_view.remove(digest)
    }

    fn optimise(&self) -> Result<u64> {
        self.read_view.optimise()
    }

    fn verify(&self, digest: &ManifestDigest, handler: &dyn Handler) -> Result<()> {
        self.read_view.verify(digest, handler)
    }
}

fn copy_into(source: &Path, dest: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(|_| crate::error::Error::UnsupportedFile {
            path: source.to_path_buf(),
        })?;
        let relative = entry.path().strip_prefix(source).expect("walked under source");
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).context(IoCreateSnafu { path: &target })?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).context(IoCreateSnafu { path: parent })?;
            }
            fs::copy(entry.path(), &target).context(IoCreateSnafu { path: &target })?;
        }
    }
    Ok(())
}
