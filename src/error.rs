use crate::solver::BlockedInterface;
use snafu::prelude::*;
use std::path::PathBuf;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Invalid version '{value}': {details}"))]
    InvalidVersion { value: String, details: String },

    #[snafu(display("Invalid interface id '{value}': {details}"))]
    InvalidInterfaceId { value: String, details: String },

    #[snafu(display("Invalid digest name '{value}', expected 'algo=value'"))]
    InvalidDigestName { value: String },

    #[snafu(display("Invalid value '{value}' for --{flag}: {details}"))]
    InvalidArgument { flag: String, value: String, details: String },

    #[snafu(display("Feed '{feed_id}' is unavailable and the network is offline"))]
    FeedUnavailable { feed_id: String },

    #[snafu(display("No solution satisfies the requirements"))]
    SolverUnsatisfied { blocked: Vec<BlockedInterface> },

    #[snafu(display(
        "Digest mismatch: expected {expected}, computed {computed}"
    ))]
    DigestMismatch { expected: String, computed: String },

    #[snafu(display("No implementation in the store matches the requested digest"))]
    ImplementationNotFound,

    #[snafu(display("The operation was canceled"))]
    OperationCanceled,

    #[snafu(display("Unauthorized access to {}", path.display()))]
    UnauthorizedAccess { path: PathBuf },

    #[snafu(display("IO error: {}", source))]
    IoGeneral { source: std::io::Error },

    #[snafu(display("Error creating {}: {}", path.display(), source))]
    IoCreate {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("Error reading {}: {}", path.display(), source))]
    IoRead {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("Error writing {}: {}", path.display(), source))]
    IoWrite {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("Error reading directory {}: {}", path.display(), source))]
    IoReadDir {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("Failed to rename {} to {}: {}", from.display(), to.display(), source))]
    IoRename {
        source: std::io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    #[snafu(display("Failed to delete {}: {}", path.display(), source))]
    IoDelete {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("Failed to stat {}: {}", path.display(), source))]
    IoStat {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("Error walking files: {}", source))]
    WalkFile { source: walkdir::Error },

    #[snafu(display("Unsupported file type at {}", path.display()))]
    UnsupportedFile { path: PathBuf },

    #[snafu(display("Path {} is not valid UTF-8", path.display()))]
    InvalidUtf8Path { path: PathBuf },
}
