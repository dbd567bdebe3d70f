//! A store that is itself a list of sub-stores:
//! `Contains`/`GetPath` scan in order, `AddDirectory` writes to the first
//! writable sub-store, `ListAll` unions, and `Remove` removes from every
//! sub-store that contains the entry.

use super::{ArchiveSource, ImplementationStore};
use crate::digest::ManifestDigest;
use crate::error::{ImplementationNotFoundSnafu, Result};
use crate::interfaces::Handler;
use snafu::OptionExt;
use std::collections::HashSet;
use std::path::PathBuf;

/// An ordered list of sub-stores, typically a user's writable cache first
/// and one or more read-only system-wide stores after it.
pub struct CompositeStore {
    stores: Vec<Box<dyn ImplementationStore>>,
}

impl CompositeStore {
    pub fn new(stores: Vec<Box<dyn ImplementationStore>>) -> Self {
        Self { stores }
    }
}

impl ImplementationStore for CompositeStore {
    fn contains(&self, digest: &ManifestDigest) -> bool {
        self.stores.iter().any(|s| s.contains(digest))
    }

    fn get_path(&self, digest: &ManifestDigest) -> Result<PathBuf> {
        self.stores
            .iter()
            .find_map(|s| s.get_path(digest).ok())
            .context(ImplementationNotFoundSnafu)
    }

    fn list_all(&self) -> Result<Vec<ManifestDigest>> {
        let mut seen_names: HashSet<String> = HashSet::new();
        let mut out = Vec::new();
        for store in &self.stores {
            for digest in store.list_all()? {
                if let Some(name) = digest.preferred_store_name() {
                    if seen_names.insert(name) {
                        out.push(digest);
                    }
                }
            }
        }
        Ok(out)
    }

    fn add_directory(
        &self,
        source: &std::path::Path,
        expected_digest: &ManifestDigest,
        handler: &dyn Handler,
    ) -> Result<PathBuf> {
        let target = self
            .stores
            .iter()
            .find(|s| s.is_writable())
            .context(ImplementationNotFoundSnafu)?;
        target.add_directory(source, expected_digest, handler)
    }

    fn add_archives(
        &self,
        archives: &[ArchiveSource],
        expected_digest: &ManifestDigest,
        handler: &dyn Handler,
    ) -> Result<PathBuf> {
        let target = self
            .stores
            .iter()
            .find(|s| s.is_writable())
            .context(ImplementationNotFoundSnafu)?;
        target.add_archives(archives, expected_digest, handler)
    }

    fn remove(&self, digest: &ManifestDigest) -> Result<()> {
        let mut removed_any = false;
        for store in &self.stores {
            if store.contains(digest) {
                store.remove(digest)?;
                removed_any = true;
            }
        }
        if removed_any {
            Ok(())
        } else {
            ImplementationNotFoundSnafu.fail()
        }
    }

    fn optimise(&self) -> Result<u64> {
        let mut total = 0;
        for store in &self.stores {
            if store.is_writable() {
                total += store.optimise()?;
            }
        }
        Ok(total)
    }

    fn verify(&self, digest: &ManifestDigest, handler: &dyn Handler) -> Result<()> {
        let store = self
            .stores
            .iter()
            .find(|s| s.contains(digest))
            .context(ImplementationNotFoundSnafu)?;
        store.verify(digest, handler)
    }

    fn is_writable(&self) -> bool {
        self.stores.iter().any(|s| s.is_writable())
    }
}
