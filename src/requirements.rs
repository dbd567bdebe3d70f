//! Requirements and restrictions: the caller-facing request for an
//! interface, and the narrowing rules a dependency attaches to it.

use crate::arch::Architecture;
use crate::feed::{Importance, Stability};
use crate::version::VersionRange;

/// A restriction narrows which implementations of an interface are
/// acceptable, independent of who is asking for them.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Restriction {
    /// The implementation's version must fall in this range.
    VersionRange(VersionRange),
    /// The implementation must be built for a compatible architecture.
    Architecture(Architecture),
    /// The implementation's stability must be at or above this level (or
    /// the caller has explicitly marked it as acceptable regardless).
    MinStability(Stability),
}

impl Restriction {
    /// Whether an implementation with these characteristics satisfies the
    /// restriction. Architecture uses [`Architecture::is_compatible_with`]
    /// with `self` as the candidate.
    pub fn is_satisfied_by(
        &self,
        version: &crate::version::Version,
        arch: &Architecture,
        stability: Stability,
    ) -> bool {
        match self {
            Restriction::VersionRange(range) => range.contains(version),
            Restriction::Architecture(required) => arch.is_compatible_with(required),
            Restriction::MinStability(min) => stability >= *min,
        }
    }
}

/// The top-level request the solver is asked to satisfy: "give me an
/// implementation of this interface meeting these restrictions."
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Requirements {
    pub interface: String,
    pub restrictions: Vec<Restriction>,
    pub importance: Importance,
}

impl Requirements {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            restrictions: Vec::new(),
            importance: Importance::Essential,
        }
    }

    pub fn with_restriction(mut self, restriction: Restriction) -> Self {
        self.restrictions.push(restriction);
        self
    }

    /// Intersects every [`Restriction::VersionRange`] restriction into one
    /// effective range; restrictions of other kinds are evaluated per
    /// candidate rather than folded here.
    pub fn effective_version_range(&self) -> VersionRange {
        self.restrictions
            .iter()
            .filter_map(|r| match r {
                Restriction::VersionRange(range) => Some(range.clone()),
                _ => None,
            })
            .fold(VersionRange::any(), |acc, range| acc.intersect(&range))
    }

    pub fn is_satisfied_by(
        &self,
        version: &crate::version::Version,
        arch: &Architecture,
        stability: Stability,
    ) -> bool {
        self.restrictions
            .iter()
            .all(|r| r.is_satisfied_by(version, arch, stability))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;

    #[test]
    fn effective_range_intersects_multiple_version_restrictions() {
        let requirements = Requirements::new("https://example.org/app.xml")
            .with_restriction(Restriction::VersionRange(VersionRange::interval(
                Some(Version::parse("1.0").unwrap()),
                Some(Version::parse("3.0").unwrap()),
            )))
            .with_restriction(Restriction::VersionRange(VersionRange::interval(
                Some(Version::parse("2.0").unwrap()),
                None,
            )));

        let range = requirements.effective_version_range();
        assert!(range.contains(&Version::parse("2.5").unwrap()));
        assert!(!range.contains(&Version::parse("1.5").unwrap()));
    }

    #[test]
    fn architecture_and_stability_restrictions_combine() {
        use crate::arch::{Cpu, Os};

        let requirements = Requirements::new("https://example.org/app.xml")
            .with_restriction(Restriction::Architecture(Architecture::new(
                Os::Linux,
                Cpu::X86_64,
            )))
            .with_restriction(Restriction::MinStability(Stability::Testing));

        let version = Version::parse("1.0").unwrap();
        let compatible_arch = Architecture::new(Os::Linux, Cpu::I686);
        assert!(requirements.is_satisfied_by(&version, &compatible_arch, Stability::Stable));
        assert!(!requirements.is_satisfied_by(&version, &compatible_arch, Stability::Buggy));

        let incompatible_arch = Architecture::new(Os::Windows, Cpu::X86_64);
        assert!(!requirements.is_satisfied_by(&version, &incompatible_arch, Stability::Stable));
    }
}
