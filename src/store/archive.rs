//! Archive extraction for `AddArchives`: stage a temp dir by extracting
//! archives in order at their declared offsets/subpaths, then fall
//! through to the directory-add path.
//!
//! Supports tar (plain, gzip, bzip2) and zip, the formats implementations
//! are actually distributed in.

use crate::error::{
    IoCreateSnafu, IoReadSnafu, IoWriteSnafu, Result, UnsupportedFileSnafu,
};
use snafu::ResultExt;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Archive container format, inferred from the caller-supplied source (a
/// real `FeedProvider`-backed caller knows this from the feed's declared
/// MIME type; `zi_core` only needs to act on it).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ArchiveFormat {
    TarGz,
    TarBz2,
    Tar,
    Zip,
}

/// One archive to extract into the staging directory, in the order
/// `AddArchives` received them.
#[derive(Debug, Clone)]
pub struct ArchiveSource {
    pub path: PathBuf,
    pub format: ArchiveFormat,
    /// Bytes to skip before the archive's real content starts (some feeds
    /// bundle a self-extracting stub ahead of the archive payload).
    pub start_offset: u64,
    /// If set, only this subpath within the archive is extracted, and it
    /// becomes the root of what lands in the staging directory.
    pub extract_to_subpath: Option<PathBuf>,
}

impl ArchiveSource {
    pub fn new(path: PathBuf, format: ArchiveFormat) -> Self {
        Self {
            path,
            format,
            start_offset: 0,
            extract_to_subpath: None,
        }
    }
}

/// Extracts every archive in `sources`, in order, into `dest`. Later
/// archives are extracted on top of earlier ones, matching a feed's
/// "combine these archives into one tree" semantics.
pub fn extract_all(sources: &[ArchiveSource], dest: &Path) -> Result<()> {
    for source in sources {
        extract_one(source, dest)?;
    }
    Ok(())
}

fn extract_one(source: &ArchiveSource, dest: &Path) -> Result<()> {
    let mut file = File::open(&source.path).context(IoReadSnafu { path: &source.path })?;
    if source.start_offset > 0 {
        file.seek(SeekFrom::Start(source.start_offset))
            .context(IoReadSnafu { path: &source.path })?;
    }

    match source.format {
        ArchiveFormat::TarGz => {
            let decoder = flate2::read::GzDecoder::new(file);
            extract_tar(decoder, source, dest)
        }
        ArchiveFormat::TarBz2 => {
            let decoder = bzip2::read::BzDecoder::new(file);
            extract_tar(decoder, source, dest)
        }
        ArchiveFormat::Tar => extract_tar(file, source, dest),
        ArchiveFormat::Zip => extract_zip(file, source, dest),
    }
}

fn extract_tar<R: Read>(reader: R, source: &ArchiveSource, dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive
        .entries()
        .context(IoReadSnafu { path: &source.path })?
    {
        let mut entry = entry.context(IoReadSnafu { path: &source.path })?;
        let entry_path = entry
            .path()
            .context(IoReadSnafu { path: &source.path })?
            .into_owned();

        let Some(relative) = rebase(&entry_path, source.extract_to_subpath.as_deref()) else {
            continue;
        };
        let target = safe_join(dest, &relative)?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).context(IoCreateSnafu { path: parent })?;
        }
        entry
            .unpack(&target)
            .context(IoWriteSnafu { path: &target })?;
    }
    Ok(())
}

fn extract_zip<R: Read + Seek>(reader: R, source: &ArchiveSource, dest: &Path) -> Result<()> {
    let mut archive = zip::ZipArchive::new(reader).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        .context(IoReadSnafu { path: &source.path })?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
            .context(IoReadSnafu { path: &source.path })?;
        let Some(entry_path) = entry.enclosed_name().map(Path::to_path_buf) else {
            continue;
        };

        let Some(relative) = rebase(&entry_path, source.extract_to_subpath.as_deref()) else {
            continue;
        };
        let target = safe_join(dest, &relative)?;

        if entry.is_dir() {
            fs::create_dir_all(&target).context(IoCreateSnafu { path: &target })?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).context(IoCreateSnafu { path: parent })?;
        }
        let mut out = File::create(&target).context(IoCreateSnafu { path: &target })?;
        io::copy(&mut entry, &mut out).context(IoWriteSnafu { path: &target })?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode))
                .context(IoWriteSnafu { path: &target })?;
        }
    }
    Ok(())
}

/// Drops entries outside `subpath` and strips it as the new root; `None`
/// keeps every entry's path unchanged.
fn rebase(entry_path: &Path, subpath: Option<&Path>) -> Option<PathBuf> {
    match subpath {
        None => Some(entry_path.to_path_buf()),
        Some(subpath) => entry_path.strip_prefix(subpath).ok().map(Path::to_path_buf),
    }
}

/// Joins `relative` onto `dest`, rejecting any entry that would escape it
/// (a `..` component or an absolute path smuggled in by a hostile archive).
fn safe_join(dest: &Path, relative: &Path) -> Result<PathBuf> {
    use std::path::Component;
    if relative
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        || relative.is_absolute()
    {
        return UnsupportedFileSnafu {
            path: relative.to_path_buf(),
        }
        .fail();
    }
    Ok(dest.join(relative))
}
