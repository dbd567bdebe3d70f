//! Feed documents: a tree of `Group`s carrying inherited attributes, each
//! bottoming out in `Implementation`s that the solver chooses between.
//!
//! [`simplify`] flattens that tree into a flat list of [`Implementation`]s
//! with every inherited attribute resolved, mirroring how a real feed's
//! nested `<group>` elements fold down onto each `<implementation>`.

use crate::arch::Architecture;
use crate::digest::ManifestDigest;
use crate::version::Version;
use std::collections::HashMap;

/// Attributes a `Group` or `Implementation` may set, inherited downward
/// unless overridden by a nested element.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct InheritedAttributes {
    pub version: Option<Version>,
    pub arch: Option<Architecture>,
    pub stability: Option<Stability>,
    pub released: Option<String>,
    pub langs: Vec<String>,
}

impl InheritedAttributes {
    /// Overlays `child` on top of `self`, with `child`'s explicit values
    /// winning and `self`'s values filling in anything `child` left unset.
    fn overlay(&self, child: &InheritedAttributes) -> InheritedAttributes {
        InheritedAttributes {
            version: child.version.clone().or_else(|| self.version.clone()),
            arch: child.arch.or(self.arch),
            stability: child.stability.or(self.stability),
            released: child.released.clone().or_else(|| self.released.clone()),
            langs: if child.langs.is_empty() {
                self.langs.clone()
            } else {
                child.langs.clone()
            },
        }
    }
}

/// How much a feed author trusts an implementation to work.
#[derive(Debug, Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub enum Stability {
    Insecure,
    Buggy,
    Developer,
    Testing,
    Stable,
    Packaged,
    Preferred,
}

/// A dependency on another interface, with the [`crate::requirements::Restriction`]s
/// that narrow which of its implementations are acceptable.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Dependency {
    pub interface: String,
    pub restrictions: Vec<crate::requirements::Restriction>,
    pub importance: Importance,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Importance {
    Essential,
    Recommended,
}

/// One concrete, installable artifact for an interface.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Implementation {
    pub id: String,
    pub interface: String,
    pub version: Version,
    pub arch: Architecture,
    pub stability: Stability,
    pub digest: ManifestDigest,
    pub dependencies: Vec<Dependency>,
    /// `None` for a local/native-package implementation that never needs
    /// the content-addressed store.
    pub main: Option<String>,
}

/// A nested grouping node in a feed, carrying attributes its children
/// inherit and either further `Group`s or `Implementation`s as children.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Group {
    pub attributes: InheritedAttributes,
    pub children: Vec<GroupChild>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum GroupChild {
    Group(Group),
    Implementation(RawImplementation),
}

/// An implementation as it appears in a feed, before group attributes have
/// been folded in. Fields left `None` are inherited from enclosing groups.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RawImplementation {
    pub id: String,
    pub attributes: InheritedAttributes,
    pub digest: ManifestDigest,
    pub dependencies: Vec<Dependency>,
    pub main: Option<String>,
}

/// A single interface's feed: an interface id plus the top-level group tree.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Feed {
    pub interface: String,
    pub root: Group,
}

/// Folds a feed's group tree into a flat list of fully-resolved
/// implementations, with every inherited attribute applied.
///
/// Mirrors a feed reader's "simplify" pass: each group in the tree
/// overlays its attributes onto its parent's before recursing, so by the
/// time a leaf `Implementation` is produced every attribute has a concrete
/// value (falling back to feed-wide defaults where nothing in the tree set
/// one explicitly).
pub fn simplify(feed: &Feed) -> Vec<Implementation> {
    let mut out = Vec::new();
    simplify_group(&feed.interface, &feed.root, &InheritedAttributes::default(), &mut out);
    out
}

fn simplify_group(
    interface: &str,
    group: &Group,
    inherited: &InheritedAttributes,
    out: &mut Vec<Implementation>,
) {
    let resolved = inherited.overlay(&group.attributes);
    for child in &group.children {
        match child {
            GroupChild::Group(nested) => simplify_group(interface, nested, &resolved, out),
            GroupChild::Implementation(raw) => {
                let attrs = resolved.overlay(&raw.attributes);
                out.push(Implementation {
                    id: raw.id.clone(),
                    interface: interface.to_string(),
                    version: attrs.version.clone().unwrap_or_else(default_version),
                    arch: attrs.arch.unwrap_or_else(Architecture::any),
                    stability: attrs.stability.unwrap_or(Stability::Testing),
                    digest: raw.digest.clone(),
                    dependencies: raw.dependencies.clone(),
                    main: raw.main.clone(),
                });
            }
        }
    }
}

fn default_version() -> Version {
    Version::parse("0").expect("'0' is always a valid version")
}

/// Flattened implementations across every feed known for an interface,
/// keyed by implementation id for quick lookup during candidate enumeration.
pub fn index_by_id(implementations: &[Implementation]) -> HashMap<String, &Implementation> {
    implementations.iter().map(|i| (i.id.clone(), i)).collect()
}
