//! Backtracking constraint solver: picks one implementation per interface
//! satisfying every requirement and restriction reachable from the root.
//!
//! A depth-first search with forward checking, following `spec.md` §4.F's
//! `TryToSolve` recursion literally rather than reaching for an
//! off-the-shelf SAT/PubGrub-style resolver — the design explicitly wants
//! the source algorithm's own completeness characteristics (including its
//! known re-entry limitation, see [`Solver::try_to_solve`]), not a
//! provably-optimal solve.

use crate::candidates::{SelectionCandidate, Unsuitability};
use crate::error::{Error, Result, SolverUnsatisfiedSnafu};
use crate::feed::{Dependency, Feed, Importance, Stability};
use crate::interfaces::{FeedProvider, Handler, PreferencesStore};
use crate::requirements::{Requirements, Restriction};
use crate::selections::{ImplementationSelection, Selections};
use snafu::ensure;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Why a particular candidate for a blocked interface didn't get picked.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RejectionReason {
    Unsuitable(Unsuitability),
    RestrictionConflict,
    DependencyFailed,
}

/// Diagnostics for one interface the solver could not satisfy: every
/// candidate considered and why each was rejected.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BlockedInterface {
    pub interface: String,
    pub rejected: Vec<(String, RejectionReason)>,
}

/// Atomic counters recording solver activity, for observability. Not part
/// of the solved result; read via [`Solver::stats`] after a solve.
#[derive(Debug, Default)]
pub struct SolverStats {
    pub candidates_considered: AtomicU64,
    pub backtracks: AtomicU64,
}

impl SolverStats {
    fn record_candidate(&self) {
        self.candidates_considered.fetch_add(1, Ordering::Relaxed);
    }

    fn record_backtrack(&self) {
        self.backtracks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.candidates_considered.load(Ordering::Relaxed),
            self.backtracks.load(Ordering::Relaxed),
        )
    }
}

/// Drives a single solve: holds the feed/preferences/handler capabilities
/// and the mutable search state (`Selections`, `_restrictions`) across the
/// recursive `try_to_solve` calls.
pub struct Solver<'a, F, P, H, InStore>
where
    F: FeedProvider,
    P: PreferencesStore,
    H: Handler,
    InStore: Fn(&crate::digest::ManifestDigest) -> bool,
{
    feed_provider: &'a F,
    preferences: &'a P,
    handler: &'a H,
    network_allowed: bool,
    help_with_testing: bool,
    in_store: InStore,
    stats: SolverStats,
    selections: RefCell<HashMap<String, ImplementationSelection>>,
    order: RefCell<Vec<String>>,
    restrictions: RefCell<Vec<(String, Restriction)>>,
    previously_failed: RefCell<HashMap<String, Vec<String>>>,
    blocked: RefCell<Vec<BlockedInterface>>,
}

impl<'a, F, P, H, InStore> Solver<'a, F, P, H, InStore>
where
    F: FeedProvider,
    P: PreferencesStore,
    H: Handler,
    InStore: Fn(&crate::digest::ManifestDigest) -> bool,
{
    pub fn new(feed_provider: &'a F, preferences: &'a P, handler: &'a H, network_allowed: bool, in_store: InStore) -> Self {
        Self {
            feed_provider,
            preferences,
            handler,
            network_allowed,
            help_with_testing: false,
            in_store,
            stats: SolverStats::default(),
            selections: RefCell::new(HashMap::new()),
            order: RefCell::new(Vec::new()),
            restrictions: RefCell::new(Vec::new()),
            previously_failed: RefCell::new(HashMap::new()),
            blocked: RefCell::new(Vec::new()),
        }
    }

    /// Per `spec.md` §6's `HelpWithTesting`: when set, every interface's
    /// effective stability floor is lowered to at most [`Stability::Testing`],
    /// overriding a stricter per-interface policy from preferences.
    pub fn with_help_with_testing(mut self, help_with_testing: bool) -> Self {
        self.help_with_testing = help_with_testing;
        self
    }

    pub fn stats(&self) -> &SolverStats {
        &self.stats
    }

    /// Top-level entry point: attempts to satisfy `requirements`, starting
    /// from empty state. On success, returns a finalized [`Selections`].
    /// On failure, returns [`Error::SolverUnsatisfied`] carrying per-
    /// interface diagnostics, with all partial state rolled back.
    pub fn solve(&self, requirements: &Requirements, root_command: Option<&str>) -> Result<Selections> {
        let root_interface = requirements.interface.clone();
        let ok = self.try_to_solve(requirements)?;

        ensure!(
            ok,
            SolverUnsatisfiedSnafu {
                blocked: self.blocked.borrow().clone(),
            }
        );

        let selections = self.selections.borrow();
        let order = self.order.borrow();
        let implementations = order
            .iter()
            .map(|id| selections.get(id).expect("selected interface recorded in order").clone())
            .collect();

        Ok(Selections::new(root_interface, root_command.map(str::to_string), implementations))
    }

    /// The recursive search step described by `spec.md` §4.F.
    ///
    /// Known completeness limitation (spec Open Question a): step 3's
    /// idempotent re-entry check means that once an interface has been
    /// selected, later requests for it never reconsider alternative
    /// candidates even if a different earlier choice elsewhere in the
    /// search tree would have made a previously-rejected candidate
    /// viable. This mirrors the source algorithm's own behavior rather
    /// than implementing a fully backtracking multi-interface search.
    fn try_to_solve(&self, requirements: &Requirements) -> Result<bool> {
        ensure!(!self.handler.is_cancelled(), crate::error::OperationCanceledSnafu);

        let interface = requirements.interface.clone();

        if let Some(existing) = self.selections.borrow().get(&interface) {
            let still_suitable = requirements.is_satisfied_by(
                &existing.version,
                &existing.architecture,
                existing.effective_stability,
            );
            return Ok(still_suitable);
        }

        ensure!(!self.handler.is_cancelled(), crate::error::OperationCanceledSnafu);
        let feed = self.feed_provider.get(&interface)?;

        let mut interface_prefs = self.preferences.interface_preferences(&interface);
        if self.help_with_testing && interface_prefs.stability_policy > Stability::Testing {
            interface_prefs.stability_policy = Stability::Testing;
        }
        let feed_prefs = self.preferences.feed_preferences(&feed.interface);
        let failed_here = self
            .previously_failed
            .borrow()
            .get(&interface)
            .cloned()
            .unwrap_or_default();

        let candidates = crate::candidates::enumerate_candidates(
            &feed,
            requirements,
            &interface_prefs,
            &feed_prefs,
            self.network_allowed,
            &failed_here,
            &self.in_store,
        );

        let restrictions_snapshot = self.restrictions.borrow().clone();
        let mut rejected = Vec::new();

        for candidate in &candidates {
            self.stats.record_candidate();

            if !candidate.is_suitable() {
                rejected.push((
                    candidate.implementation.id.clone(),
                    RejectionReason::Unsuitable(candidate.unsuitability().cloned().unwrap_or(Unsuitability::NotRetrievable)),
                ));
                continue;
            }

            if conflicts_with_restrictions(candidate, &restrictions_snapshot) {
                rejected.push((candidate.implementation.id.clone(), RejectionReason::RestrictionConflict));
                continue;
            }

            if self.try_candidate(&feed, requirements, candidate)? {
                return Ok(true);
            }

            self.stats.record_backtrack();
            self.previously_failed
                .borrow_mut()
                .entry(interface.clone())
                .or_default()
                .push(candidate.implementation.id.clone());
            rejected.push((candidate.implementation.id.clone(), RejectionReason::DependencyFailed));
        }

        self.blocked.borrow_mut().push(BlockedInterface { interface, rejected });
        Ok(false)
    }

    fn try_candidate(&self, feed: &Feed, requirements: &Requirements, candidate: &SelectionCandidate) -> Result<bool> {
        let interface = requirements.interface.clone();
        let restrictions_len_before = self.restrictions.borrow().len();

        {
            let mut restrictions = self.restrictions.borrow_mut();
            for dependency in &candidate.implementation.dependencies {
                for restriction in &dependency.restrictions {
                    restrictions.push((dependency.interface.clone(), restriction.clone()));
                }
            }
        }

        let selection = ImplementationSelection {
            interface: interface.clone(),
            impl_id: candidate.implementation.id.clone(),
            version: candidate.implementation.version.clone(),
            architecture: candidate.implementation.arch,
            effective_stability: candidate.effective_stability,
            digest: candidate.implementation.digest.clone(),
            from_feed: candidate.source_feed.clone(),
            main: candidate.implementation.main.clone(),
            dependency_interfaces: candidate
                .implementation
                .dependencies
                .iter()
                .map(|d| d.interface.clone())
                .collect(),
            bindings: Vec::new(),
        };
        self.selections.borrow_mut().insert(interface.clone(), selection);
        self.order.borrow_mut().push(interface.clone());

        let _ = feed;
        match self.solve_dependencies(&candidate.implementation.dependencies) {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.rollback(&interface, restrictions_len_before);
                Ok(false)
            }
            Err(err) => {
                self.rollback(&interface, restrictions_len_before);
                Err(err)
            }
        }
    }

    fn rollback(&self, interface: &str, restrictions_len_before: usize) {
        self.selections.borrow_mut().remove(interface);
        self.order.borrow_mut().retain(|id| id != interface);
        self.restrictions.borrow_mut().truncate(restrictions_len_before);
    }

    /// Dependencies are ordered per `spec.md` §4.F: restriction-bearing
    /// dependencies first, then those with their own sub-dependencies,
    /// then the rest, ties broken by original document order.
    fn solve_dependencies(&self, dependencies: &[Dependency]) -> Result<bool> {
        let mut ordered: Vec<(usize, &Dependency)> = dependencies.iter().enumerate().collect();
        ordered.sort_by_key(|(index, dep)| {
            let lacks_restrictions = dep.restrictions.is_empty();
            (lacks_restrictions, *index)
        });

        for (_, dependency) in ordered {
            if dependency.importance != Importance::Essential {
                continue;
            }
            let mut requirements = Requirements::new(dependency.interface.clone());
            requirements.restrictions = dependency.restrictions.clone();
            if !self.try_to_solve(&requirements)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn conflicts_with_restrictions(candidate: &SelectionCandidate, restrictions: &[(String, Restriction)]) -> bool {
    restrictions.iter().any(|(interface, restriction)| {
        *interface == candidate.implementation.interface
            && !restriction.is_satisfied_by(
                &candidate.implementation.version,
                &candidate.implementation.arch,
                candidate.effective_stability,
            )
    })
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::Unsuitable(reason) => write!(f, "unsuitable: {reason:?}"),
            RejectionReason::RestrictionConflict => write!(f, "conflicts with an existing restriction"),
            RejectionReason::DependencyFailed => write!(f, "a dependency could not be solved"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Architecture;
    use crate::digest::{DigestAlgorithm, HexDigest, ManifestDigest};
    use crate::feed::{Group, GroupChild, InheritedAttributes, RawImplementation, Stability};
    use crate::interfaces::{DefaultPreferencesStore, FeedPreferences, InterfacePreferences, NullHandler};
    use std::cell::RefCell as StdRefCell;
    use std::collections::HashMap as StdHashMap;

    struct StaticFeedProvider {
        feeds: StdRefCell<StdHashMap<String, Feed>>,
    }

    impl FeedProvider for StaticFeedProvider {
        fn get(&self, feed_id: &str) -> Result<Feed> {
            self.feeds
                .borrow()
                .get(feed_id)
                .cloned()
                .ok_or_else(|| Error::FeedUnavailable { feed_id: feed_id.to_string() })
        }
    }

    fn single_impl_feed(interface: &str, impl_id: &str, dependencies: Vec<Dependency>) -> Feed {
        let digest = ManifestDigest::single(DigestAlgorithm::Sha256, HexDigest::new(format!("{impl_id}-digest")));
        let raw = RawImplementation {
            id: impl_id.to_string(),
            attributes: InheritedAttributes {
                version: Some(crate::version::Version::parse("1.0").unwrap()),
                stability: Some(Stability::Stable),
                arch: Some(Architecture::any()),
                ..Default::default()
            },
            digest,
            dependencies,
            main: Some("run".to_string()),
        };
        Feed {
            interface: interface.to_string(),
            root: Group {
                attributes: InheritedAttributes::default(),
                children: vec![GroupChild::Implementation(raw)],
            },
        }
    }

    #[test]
    fn solves_a_single_interface_with_no_dependencies() {
        let feed = single_impl_feed("https://example.org/app.xml", "app-1", Vec::new());
        let mut feeds = StdHashMap::new();
        feeds.insert(feed.interface.clone(), feed.clone());
        let provider = StaticFeedProvider { feeds: StdRefCell::new(feeds) };
        let preferences = DefaultPreferencesStore;
        let handler = NullHandler;

        let solver = Solver::new(&provider, &preferences, &handler, true, |_| false);
        let requirements = Requirements::new(feed.interface.clone());
        let selections = solver.solve(&requirements, None).unwrap();

        assert_eq!(1, selections.implementations().len());
        assert_eq!("app-1", selections.implementations()[0].impl_id);
    }

    #[test]
    fn solves_transitive_dependencies() {
        let lib_feed = single_impl_feed("https://example.org/lib.xml", "lib-1", Vec::new());
        let app_feed = single_impl_feed(
            "https://example.org/app.xml",
            "app-1",
            vec![Dependency {
                interface: lib_feed.interface.clone(),
                restrictions: Vec::new(),
                importance: Importance::Essential,
            }],
        );

        let mut feeds = StdHashMap::new();
        feeds.insert(lib_feed.interface.clone(), lib_feed.clone());
        feeds.insert(app_feed.interface.clone(), app_feed.clone());
        let provider = StaticFeedProvider { feeds: StdRefCell::new(feeds) };
        let preferences = DefaultPreferencesStore;
        let handler = NullHandler;

        let solver = Solver::new(&provider, &preferences, &handler, true, |_| false);
        let requirements = Requirements::new(app_feed.interface.clone());
        let selections = solver.solve(&requirements, None).unwrap();

        assert_eq!(2, selections.implementations().len());
        assert!(selections.implementations().iter().any(|i| i.impl_id == "lib-1"));
    }

    #[test]
    fn unsatisfiable_requirements_report_blocked_interfaces() {
        let feed = single_impl_feed("https://example.org/app.xml", "app-1", Vec::new());
        let mut feeds = StdHashMap::new();
        feeds.insert(feed.interface.clone(), feed.clone());
        let provider = StaticFeedProvider { feeds: StdRefCell::new(feeds) };
        let preferences = DefaultPreferencesStore;
        let handler = NullHandler;

        let solver = Solver::new(&provider, &preferences, &handler, true, |_| false);
        let requirements = Requirements::new(feed.interface.clone()).with_restriction(
            Restriction::VersionRange(crate::version::VersionRange::interval(
                Some(crate::version::Version::parse("2.0").unwrap()),
                None,
            )),
        );

        let err = solver.solve(&requirements, None).unwrap_err();
        match err {
            Error::SolverUnsatisfied { blocked } => {
                assert_eq!(1, blocked.len());
                assert_eq!(feed.interface, blocked[0].interface);
            }
            other => panic!("expected SolverUnsatisfied, got {other:?}"),
        }
    }

    #[test]
    fn reentry_on_already_selected_interface_does_not_reconsider() {
        let feed = single_impl_feed("https://example.org/app.xml", "app-1", Vec::new());
        let mut feeds = StdHashMap::new();
        feeds.insert(feed.interface.clone(), feed.clone());
        let provider = StaticFeedProvider { feeds: StdRefCell::new(feeds) };
        let preferences = DefaultPreferencesStore;
        let handler = NullHandler;

        let solver = Solver::new(&provider, &preferences, &handler, true, |_| false);
        let requirements = Requirements::new(feed.interface.clone());
        assert!(solver.try_to_solve(&requirements).unwrap());
        // Second call for the same interface hits the idempotent re-entry
        // path rather than re-enumerating candidates.
        assert!(solver.try_to_solve(&requirements).unwrap());
    }

    #[test]
    fn help_with_testing_lowers_the_effective_stability_floor() {
        let digest = ManifestDigest::single(DigestAlgorithm::Sha256, HexDigest::new("testing-digest".into()));
        let raw = RawImplementation {
            id: "app-testing".to_string(),
            attributes: InheritedAttributes {
                version: Some(crate::version::Version::parse("1.0").unwrap()),
                stability: Some(Stability::Testing),
                arch: Some(Architecture::any()),
                ..Default::default()
            },
            digest,
            dependencies: Vec::new(),
            main: Some("run".to_string()),
        };
        let feed = Feed {
            interface: "https://example.org/testing-app.xml".to_string(),
            root: Group {
                attributes: InheritedAttributes::default(),
                children: vec![GroupChild::Implementation(raw)],
            },
        };

        let mut feeds = StdHashMap::new();
        feeds.insert(feed.interface.clone(), feed.clone());
        let provider = StaticFeedProvider { feeds: StdRefCell::new(feeds) };
        let preferences = DefaultPreferencesStore;
        let handler = NullHandler;
        let requirements = Requirements::new(feed.interface.clone());

        // DefaultPreferencesStore's policy is `Stable`; a `Testing`-rated
        // implementation is below it, so the plain solve fails.
        let strict = Solver::new(&provider, &preferences, &handler, true, |_| false);
        assert!(strict.solve(&requirements, None).is_err());

        // With the floor lowered, the same implementation becomes suitable.
        let lenient = Solver::new(&provider, &preferences, &handler, true, |_| false)
            .with_help_with_testing(true);
        let selections = lenient.solve(&requirements, None).unwrap();
        assert_eq!("app-testing", selections.implementations()[0].impl_id);
    }

    #[test]
    fn interface_preferences_and_feed_preferences_defaults_are_unused_fields_silenced() {
        let _ = InterfacePreferences::default();
        let _ = FeedPreferences::default();
    }
}
