//! Canonical directory-tree manifests and the digests derived from them.
//!
//! Given a directory, [`build_manifest`] produces a canonical textual
//! manifest: one line per file/symlink/directory entry, ordered per the
//! chosen [`DigestAlgorithm`]. Hashing that text with the same algorithm
//! yields the overall [`ManifestDigest`] entry for the tree.

use crate::digest::{self, DigestAlgorithm, HexDigest, ManifestDigest, MultiDigestWriter};
use crate::error::{IoReadSnafu, Result, WalkFileSnafu};
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Filename of the store's sidecar manifest listing (see
/// `store::write_manifest_sidecar`). Excluded from [`collect_entries`] so a
/// published entry's digest never depends on a file written after that
/// digest was computed.
pub const MANIFEST_SIDECAR: &str = ".manifest";

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum EntryType {
    File,
    Directory,
    Symlink,
}

impl EntryType {
    fn type_char(self) -> char {
        match self {
            EntryType::File => 'F',
            EntryType::Directory => 'D',
            EntryType::Symlink => 'S',
        }
    }
}

struct Entry {
    relative_path: PathBuf,
    entry_type: EntryType,
    executable: bool,
    size: u64,
    mtime_secs: u64,
    digests: Vec<(DigestAlgorithm, HexDigest)>,
}

/// Walks `dir` and computes a [`ManifestDigest`] entry for `algorithm`.
pub fn manifest_digest(dir: &Path, algorithm: DigestAlgorithm) -> Result<HexDigest> {
    let entries = collect_entries(dir, &[algorithm])?;
    let text = render_manifest(&entries, algorithm);
    Ok(digest::digest_bytes(algorithm, text.as_bytes()))
}

/// Computes a [`ManifestDigest`] carrying an entry for every algorithm in
/// `algorithms` from a single tree walk.
pub fn manifest_digests(dir: &Path, algorithms: &[DigestAlgorithm]) -> Result<ManifestDigest> {
    let entries = collect_entries(dir, algorithms)?;
    let mut out = Vec::with_capacity(algorithms.len());
    for &algorithm in algorithms {
        let text = render_manifest(&entries, algorithm);
        out.push((algorithm, digest::digest_bytes(algorithm, text.as_bytes())));
    }
    Ok(ManifestDigest::new(out))
}

/// Renders the canonical manifest text for `dir` under `algorithm` without
/// hashing it; used for the store's `.manifest` sidecar, which keeps the
/// human-readable listing alongside the content it was hashed from.
pub fn render_manifest_text(dir: &Path, algorithm: DigestAlgorithm) -> Result<String> {
    let entries = collect_entries(dir, &[algorithm])?;
    Ok(render_manifest(&entries, algorithm))
}

fn collect_entries(dir: &Path, algorithms: &[DigestAlgorithm]) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();

    for walked in WalkDir::new(dir).min_depth(1) {
        let walked = walked.context(WalkFileSnafu {})?;
        let relative_path = walked
            .path()
            .strip_prefix(dir)
            .expect("walked entry is under dir")
            .to_path_buf();

        if relative_path == Path::new(MANIFEST_SIDECAR) {
            continue;
        }

        let metadata = walked.metadata().context(WalkFileSnafu {})?;
        let mtime_secs = rounded_mtime(metadata.modified().ok());

        let file_type = walked.file_type();
        let (entry_type, executable, size, digests) = if file_type.is_dir() {
            (EntryType::Directory, false, 0, Vec::new())
        } else if file_type.is_symlink() {
            (EntryType::Symlink, false, 0, Vec::new())
        } else if file_type.is_file() {
            let executable = metadata.permissions().mode() & 0o111 != 0;
            let mut writer = MultiDigestWriter::new(algorithms);
            let mut reader =
                File::open(walked.path()).context(IoReadSnafu { path: walked.path() })?;
            io::copy(&mut reader, &mut writer).context(IoReadSnafu { path: walked.path() })?;
            (EntryType::File, executable, metadata.size(), writer.finalize_hex())
        } else {
            (EntryType::File, false, 0, Vec::new())
        };

        entries.push(Entry {
            relative_path,
            entry_type,
            executable,
            size,
            mtime_secs,
            digests,
        });
    }

    Ok(entries)
}

/// Rounds a modification time down to whole seconds, per §4.B: mtimes are
/// recorded at second precision so the manifest is reproducible across
/// filesystems with different sub-second resolutions.
fn rounded_mtime(mtime: Option<SystemTime>) -> u64 {
    let mtime = mtime.unwrap_or(SystemTime::UNIX_EPOCH);
    mtime
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn render_manifest(entries: &[Entry], algorithm: DigestAlgorithm) -> String {
    let ordered = if algorithm.uses_depth_first_order() {
        depth_first_order(entries)
    } else {
        lexical_order(entries)
    };

    let mut text = String::new();
    for entry in ordered {
        let digest_hex = entry
            .digests
            .iter()
            .find(|(a, _)| *a == algorithm)
            .map(|(_, h)| h.as_str())
            .unwrap_or("");

        text.push_str(&format!(
            "{} {} {} {} {} {}\n",
            entry.entry_type.type_char(),
            if entry.executable { 1 } else { 0 },
            entry.size,
            entry.mtime_secs,
            digest_hex,
            entry.relative_path.to_string_lossy(),
        ));
    }
    text
}

fn lexical_order(entries: &[Entry]) -> Vec<&Entry> {
    let mut ordered: Vec<&Entry> = entries.iter().collect();
    ordered.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    ordered
}

/// POSIX depth-first order: a directory's entry precedes its children, and
/// siblings within a directory are lexically ordered before recursing into
/// any of them.
fn depth_first_order(entries: &[Entry]) -> Vec<&Entry> {
    let mut children: BTreeMap<PathBuf, Vec<&Entry>> = BTreeMap::new();
    for entry in entries {
        let parent = entry
            .relative_path
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .to_path_buf();
        children.entry(parent).or_default().push(entry);
    }
    for siblings in children.values_mut() {
        siblings.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    }

    let mut ordered = Vec::with_capacity(entries.len());
    visit(Path::new(""), &children, &mut ordered);
    ordered
}

fn visit<'a>(
    dir: &Path,
    children: &BTreeMap<PathBuf, Vec<&'a Entry>>,
    out: &mut Vec<&'a Entry>,
) {
    if let Some(siblings) = children.get(dir) {
        for entry in siblings {
            out.push(entry);
            if entry.entry_type == EntryType::Directory {
                visit(&entry.relative_path, children, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn manifest_digest_is_deterministic_for_identical_content() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();

        for dir in [dir_a.path(), dir_b.path()] {
            fs::create_dir_all(dir.join("sub")).unwrap();
            fs::write(dir.join("a.txt"), b"hello").unwrap();
            fs::write(dir.join("sub/b.txt"), b"world").unwrap();
        }

        let digest_a = manifest_digest(dir_a.path(), DigestAlgorithm::Sha256).unwrap();
        let digest_b = manifest_digest(dir_b.path(), DigestAlgorithm::Sha256).unwrap();

        assert_eq!(digest_a, digest_b);
    }

    #[test]
    fn manifest_digest_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let before = manifest_digest(dir.path(), DigestAlgorithm::Sha256).unwrap();

        fs::write(dir.path().join("a.txt"), b"goodbye").unwrap();
        let after = manifest_digest(dir.path(), DigestAlgorithm::Sha256).unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn depth_first_order_places_directory_before_its_children() {
        let entries = vec![
            Entry {
                relative_path: PathBuf::from("sub/file.txt"),
                entry_type: EntryType::File,
                executable: false,
                size: 0,
                mtime_secs: 0,
                digests: Vec::new(),
            },
            Entry {
                relative_path: PathBuf::from("sub"),
                entry_type: EntryType::Directory,
                executable: false,
                size: 0,
                mtime_secs: 0,
                digests: Vec::new(),
            },
        ];

        let ordered = depth_first_order(&entries);
        assert_eq!(PathBuf::from("sub"), ordered[0].relative_path);
        assert_eq!(PathBuf::from("sub/file.txt"), ordered[1].relative_path);
    }
}
