//! External capabilities the solver and candidate enumerator consume but do
//! not implement: feed retrieval, user interaction/cancellation, and
//! stored preferences. Callers provide these; `zi_core` only defines the
//! trait boundary and a sane default `Handler`.

use crate::error::Result;
use crate::feed::{Feed, Stability};
use log::debug;

/// Resolves an interface id to its feed document.
///
/// Out of scope for `zi_core` itself: fetching and parsing the XML feed
/// format is a caller concern (network access, XML parsing, GPG
/// signature verification). `zi_core` only consumes the resulting
/// in-memory [`Feed`] tree.
pub trait FeedProvider {
    fn get(&self, feed_id: &str) -> Result<Feed>;
}

/// User interaction and cooperative cancellation during a solve or store
/// operation.
pub trait Handler {
    /// Checked at the top of every recursive solve step and before every
    /// `FeedProvider` call; returning `true` aborts with
    /// [`crate::error::Error::OperationCanceled`].
    fn is_cancelled(&self) -> bool;

    /// Reports progress on a long-running task (e.g. `AddArchives`
    /// extraction, a network fetch a caller's `FeedProvider` performs).
    fn run_task(&self, description: &str);
}

/// A [`Handler`] that never cancels and logs task descriptions at `debug`.
#[derive(Debug, Default, Copy, Clone)]
pub struct NullHandler;

impl Handler for NullHandler {
    fn is_cancelled(&self) -> bool {
        false
    }

    fn run_task(&self, description: &str) {
        debug!("{description}");
    }
}

/// Per-interface user preferences: the minimum stability to consider, and
/// implementations the user has explicitly blacklisted or pinned.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct InterfacePreferences {
    pub stability_policy: Stability,
    pub blacklisted_impl_ids: Vec<String>,
}

impl Default for InterfacePreferences {
    fn default() -> Self {
        Self {
            stability_policy: Stability::Stable,
            blacklisted_impl_ids: Vec::new(),
        }
    }
}

/// Per-feed user preferences: whether the user trusts implementations
/// from this feed above the interface's default stability policy.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct FeedPreferences {
    pub user_stability_overrides: Vec<(String, Stability)>,
}

impl FeedPreferences {
    /// The user-assigned stability override for `impl_id`, if any.
    pub fn override_for(&self, impl_id: &str) -> Option<Stability> {
        self.user_stability_overrides
            .iter()
            .find(|(id, _)| id == impl_id)
            .map(|(_, stability)| *stability)
    }
}

/// Reads and writes the user-preference records above. Out of scope for
/// `zi_core` to persist (that's a caller concern, typically a config
/// file); this crate only consumes the read side during a solve.
pub trait PreferencesStore {
    fn interface_preferences(&self, interface_id: &str) -> InterfacePreferences;
    fn feed_preferences(&self, feed_id: &str) -> FeedPreferences;
}

/// A [`PreferencesStore`] with no overrides, for callers that don't need
/// persisted preferences (tests, one-shot CLI invocations).
#[derive(Debug, Default, Copy, Clone)]
pub struct DefaultPreferencesStore;

impl PreferencesStore for DefaultPreferencesStore {
    fn interface_preferences(&self, _interface_id: &str) -> InterfacePreferences {
        InterfacePreferences::default()
    }

    fn feed_preferences(&self, _feed_id: &str) -> FeedPreferences {
        FeedPreferences::default()
    }
}
