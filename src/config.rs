//! Runtime configuration: network policy, cache freshness, and the
//! store-root resolution every `zi` invocation needs.
//!
//! No hidden global state: a [`Config`] is constructed once (typically by
//! the CLI, from flags and environment) and threaded explicitly to the
//! APIs that need it, the same way `bagr` passes its CLI-derived options
//! down into `bagit::bag` rather than reaching for statics.

use directories::ProjectDirs;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// How freely the solver and store may reach the network.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum NetworkUse {
    /// Fetch feeds and implementations whenever a candidate needs it.
    Full,
    /// Only fetch what's required to complete an otherwise-blocked solve.
    Minimal,
    /// Never touch the network; only already-cached feeds/implementations
    /// are usable.
    Offline,
}

impl Default for NetworkUse {
    fn default() -> Self {
        NetworkUse::Full
    }
}

impl NetworkUse {
    pub fn allows_network(&self) -> bool {
        !matches!(self, NetworkUse::Offline)
    }
}

/// How long a cached feed may be used before it's considered stale enough
/// to warrant a refresh attempt (subject to [`NetworkUse`]).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Freshness(Duration);

impl Freshness {
    pub fn new(duration: Duration) -> Self {
        Self(duration)
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl Default for Freshness {
    fn default() -> Self {
        Freshness(Duration::from_secs(30 * 24 * 60 * 60))
    }
}

/// Top-level configuration threaded into library calls by the `zi` CLI
/// (or any other caller).
#[derive(Debug, Clone)]
pub struct Config {
    pub network_use: NetworkUse,
    pub freshness: Freshness,
    pub help_with_testing: bool,
    pub store_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network_use: NetworkUse::default(),
            freshness: Freshness::default(),
            help_with_testing: false,
            store_root: default_store_root(),
        }
    }
}

/// Resolves the platform-appropriate implementation store root:
/// `$ZI_STORE_ROOT` if set, otherwise the platform's data directory for
/// this project (e.g. `~/.local/share/zi-core/store` on Linux).
pub fn default_store_root() -> PathBuf {
    if let Ok(root) = env::var("ZI_STORE_ROOT") {
        return PathBuf::from(root);
    }

    ProjectDirs::from("org", "zero-install", "zi-core")
        .map(|dirs| dirs.data_dir().join("store"))
        .unwrap_or_else(|| PathBuf::from(".zi-core/store"))
}
