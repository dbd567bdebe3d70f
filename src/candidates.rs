//! Candidate enumeration: turns a feed's flattened implementations into
//! an ordered, filtered list of [`SelectionCandidate`]s the solver can pick
//! from.

use crate::arch::Architecture;
use crate::feed::{simplify, Feed, Implementation, Stability};
use crate::interfaces::{FeedPreferences, InterfacePreferences};
use crate::requirements::Requirements;
use crate::version::Version;
use std::cmp::Ordering;

/// Why a candidate was excluded from the suitable set, surfaced in
/// [`crate::solver::BlockedInterface`] diagnostics.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Unsuitability {
    ArchitectureMismatch,
    BelowStabilityPolicy,
    Blacklisted,
    PreviouslyFailed,
    NotRetrievable,
}

/// One candidate implementation for an interface, paired with the feed it
/// came from and the filtering/ordering state computed against the
/// caller's requirements and preferences.
#[derive(Debug, Clone)]
pub struct SelectionCandidate {
    pub implementation: Implementation,
    pub source_feed: String,
    pub effective_stability: Stability,
    suitability: Result<(), Unsuitability>,
}

impl SelectionCandidate {
    pub fn is_suitable(&self) -> bool {
        self.suitability.is_ok()
    }

    pub fn unsuitability(&self) -> Option<&Unsuitability> {
        self.suitability.as_ref().err()
    }

    /// The preference tuple used to order candidates: higher is preferred.
    /// `(user_stability_override, in_store, stability_rank, version,
    /// architecture_specificity)`, compared lexicographically — this is
    /// the "total ordering" §4.E asks for.
    fn preference_key(&self, in_store: bool) -> (u8, bool, u8, &Version, u8) {
        let user_override_rank = match self.effective_stability {
            Stability::Preferred => 1,
            _ => 0,
        };
        (
            user_override_rank,
            in_store,
            stability_rank(self.effective_stability),
            &self.implementation.version,
            architecture_rank(&self.implementation.arch),
        )
    }
}

fn stability_rank(stability: Stability) -> u8 {
    match stability {
        Stability::Insecure => 0,
        Stability::Buggy => 1,
        Stability::Developer => 2,
        Stability::Testing => 3,
        Stability::Stable => 4,
        Stability::Packaged => 5,
        Stability::Preferred => 6,
    }
}

/// More specific (non-`Any`) architectures are preferred to generic ones
/// when both are otherwise equal, matching native packages' usual
/// precedence over portable source fallbacks.
fn architecture_rank(arch: &Architecture) -> u8 {
    use crate::arch::{Cpu, Os};
    match (arch.os, arch.cpu) {
        (Os::Any, Cpu::Any) => 0,
        _ => 1,
    }
}

/// Builds the ordered, filtered candidate list for one interface.
///
/// `in_store` is queried per implementation digest twice: to decide
/// retrieval feasibility (an offline candidate already in the store is
/// still suitable) and to break ordering ties in favor of implementations
/// the caller already has cached (the `network-use x in-store` term in
/// §4.E's preference tuple). `previously_failed` names implementation ids
/// the solver has already tried and rejected on this path.
pub fn enumerate_candidates(
    feed: &Feed,
    requirements: &Requirements,
    interface_prefs: &InterfacePreferences,
    feed_prefs: &FeedPreferences,
    network_allowed: bool,
    previously_failed: &[String],
    in_store: impl Fn(&crate::digest::ManifestDigest) -> bool,
) -> Vec<SelectionCandidate> {
    let mut candidates: Vec<SelectionCandidate> = simplify(feed)
        .into_iter()
        .map(|implementation| {
            let effective_stability = feed_prefs
                .override_for(&implementation.id)
                .unwrap_or(implementation.stability);

            let already_cached = in_store(&implementation.digest);
            let suitability = classify(
                &implementation,
                requirements,
                interface_prefs,
                effective_stability,
                network_allowed,
                previously_failed,
                already_cached,
            );

            SelectionCandidate {
                implementation,
                source_feed: feed.interface.clone(),
                effective_stability,
                suitability,
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        let a_in_store = in_store(&a.implementation.digest);
        let b_in_store = in_store(&b.implementation.digest);
        b.preference_key(b_in_store)
            .partial_cmp(&a.preference_key(a_in_store))
            .unwrap_or(Ordering::Equal)
    });

    candidates
}

fn classify(
    implementation: &Implementation,
    requirements: &Requirements,
    interface_prefs: &InterfacePreferences,
    effective_stability: Stability,
    network_allowed: bool,
    previously_failed: &[String],
    already_cached: bool,
) -> Result<(), Unsuitability> {
    if interface_prefs
        .blacklisted_impl_ids
        .iter()
        .any(|id| id == &implementation.id)
    {
        return Err(Unsuitability::Blacklisted);
    }

    if previously_failed.contains(&implementation.id) {
        return Err(Unsuitability::PreviouslyFailed);
    }

    let required_arch = requirements
        .restrictions
        .iter()
        .find_map(|r| match r {
            crate::requirements::Restriction::Architecture(arch) => Some(*arch),
            _ => None,
        })
        .unwrap_or_else(Architecture::any);
    if !implementation.arch.is_compatible_with(&required_arch) {
        return Err(Unsuitability::ArchitectureMismatch);
    }

    if effective_stability < interface_prefs.stability_policy {
        return Err(Unsuitability::BelowStabilityPolicy);
    }

    if !requirements.is_satisfied_by(&implementation.version, &implementation.arch, effective_stability) {
        return Err(Unsuitability::BelowStabilityPolicy);
    }

    // A local-path implementation (no `main` to fetch) is always usable.
    // One that needs fetching is feasible if it's already in the store, or
    // if the network is allowed to retrieve it fresh.
    let needs_retrieval = implementation.main.is_some();
    if needs_retrieval && !already_cached && !network_allowed {
        return Err(Unsuitability::NotRetrievable);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{Cpu, Os};
    use crate::digest::{DigestAlgorithm, HexDigest, ManifestDigest};
    use crate::feed::{Group, GroupChild, InheritedAttributes, RawImplementation};

    fn feed_with_two_implementations() -> Feed {
        let digest = ManifestDigest::single(DigestAlgorithm::Sha256, HexDigest::new("abc".into()));
        let stable = RawImplementation {
            id: "stable-impl".to_string(),
            attributes: InheritedAttributes {
                version: Some(Version::parse("1.0").unwrap()),
                stability: Some(Stability::Stable),
                arch: Some(Architecture::new(Os::Linux, Cpu::X86_64)),
                ..Default::default()
            },
            digest: digest.clone(),
            dependencies: Vec::new(),
            main: Some("run".to_string()),
        };
        let buggy = RawImplementation {
            id: "buggy-impl".to_string(),
            attributes: InheritedAttributes {
                version: Some(Version::parse("2.0").unwrap()),
                stability: Some(Stability::Buggy),
                arch: Some(Architecture::new(Os::Linux, Cpu::X86_64)),
                ..Default::default()
            },
            digest,
            dependencies: Vec::new(),
            main: Some("run".to_string()),
        };

        Feed {
            interface: "https://example.org/app.xml".to_string(),
            root: Group {
                attributes: InheritedAttributes::default(),
                children: vec![
                    GroupChild::Implementation(stable),
                    GroupChild::Implementation(buggy),
                ],
            },
        }
    }

    #[test]
    fn below_policy_stability_is_filtered_but_not_dropped() {
        let feed = feed_with_two_implementations();
        let requirements = Requirements::new(&feed.interface);
        let interface_prefs = InterfacePreferences::default();
        let feed_prefs = FeedPreferences::default();

        let candidates = enumerate_candidates(
            &feed,
            &requirements,
            &interface_prefs,
            &feed_prefs,
            true,
            &[],
            |_| false,
        );

        assert_eq!(2, candidates.len());
        let buggy = candidates.iter().find(|c| c.implementation.id == "buggy-impl").unwrap();
        assert!(!buggy.is_suitable());
        assert_eq!(Some(&Unsuitability::BelowStabilityPolicy), buggy.unsuitability());
    }

    #[test]
    fn suitable_candidates_are_ordered_by_preference() {
        let feed = feed_with_two_implementations();
        let requirements = Requirements::new(&feed.interface);
        let interface_prefs = InterfacePreferences {
            stability_policy: Stability::Buggy,
            blacklisted_impl_ids: Vec::new(),
        };
        let feed_prefs = FeedPreferences::default();

        let candidates = enumerate_candidates(
            &feed,
            &requirements,
            &interface_prefs,
            &feed_prefs,
            true,
            &[],
            |_| false,
        );

        assert!(candidates.iter().all(|c| c.is_suitable()));
        // stable-impl outranks buggy-impl on stability despite a lower version.
        assert_eq!("stable-impl", candidates[0].implementation.id);
    }

    #[test]
    fn architecture_mismatch_is_filtered() {
        let feed = feed_with_two_implementations();
        let requirements = Requirements::new(&feed.interface).with_restriction(
            crate::requirements::Restriction::Architecture(Architecture::new(Os::Windows, Cpu::X86_64)),
        );
        let interface_prefs = InterfacePreferences {
            stability_policy: Stability::Buggy,
            blacklisted_impl_ids: Vec::new(),
        };
        let feed_prefs = FeedPreferences::default();

        let candidates = enumerate_candidates(
            &feed,
            &requirements,
            &interface_prefs,
            &feed_prefs,
            true,
            &[],
            |_| false,
        );

        assert!(candidates.iter().all(|c| !c.is_suitable()));
    }

    #[test]
    fn offline_candidate_already_in_store_is_still_suitable() {
        let feed = feed_with_two_implementations();
        let requirements = Requirements::new(&feed.interface);
        let interface_prefs = InterfacePreferences {
            stability_policy: Stability::Buggy,
            blacklisted_impl_ids: Vec::new(),
        };
        let feed_prefs = FeedPreferences::default();

        // network_allowed = false, but `in_store` reports every digest as
        // already cached: per spec.md §4.E step 4, "retrieval feasible" is
        // in-store OR (has a retrieval method AND network allowed), so
        // these candidates remain suitable despite being offline.
        let candidates = enumerate_candidates(
            &feed,
            &requirements,
            &interface_prefs,
            &feed_prefs,
            false,
            &[],
            |_| true,
        );

        assert!(candidates.iter().all(|c| c.is_suitable()));
    }

    #[test]
    fn offline_candidate_not_in_store_is_not_retrievable() {
        let feed = feed_with_two_implementations();
        let requirements = Requirements::new(&feed.interface);
        let interface_prefs = InterfacePreferences {
            stability_policy: Stability::Buggy,
            blacklisted_impl_ids: Vec::new(),
        };
        let feed_prefs = FeedPreferences::default();

        let candidates = enumerate_candidates(
            &feed,
            &requirements,
            &interface_prefs,
            &feed_prefs,
            false,
            &[],
            |_| false,
        );

        assert!(candidates.iter().all(|c| !c.is_suitable()));
        assert!(candidates
            .iter()
            .all(|c| c.unsuitability() == Some(&Unsuitability::NotRetrievable)));
    }
}
