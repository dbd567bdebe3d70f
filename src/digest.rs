//! Digest algorithms and manifest digests.
//!
//! A [`ManifestDigest`] is a set of algorithm-tagged hex digests computed
//! from a directory's canonical manifest (see [`crate::manifest`]). Two
//! digests are "partially equal" iff they share at least one
//! algorithm+value pair, which is what lets the store recognize an
//! implementation that was published under an older algorithm.

use digest::Digest;
use sha1::Sha1;
use sha2::Sha256;
use std::fmt::{self, Display, Formatter};
use std::io::Write;
use std::str::FromStr;
use strum_macros::{Display as StrumDisplay, EnumString};

/// A digest algorithm, ordered strongest-first for store directory naming:
/// when an entry is stored under more than one algorithm, lookups prefer
/// the strongest one that has a matching directory.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, EnumString, StrumDisplay)]
pub enum DigestAlgorithm {
    #[strum(serialize = "sha1new")]
    Sha1New,
    #[strum(serialize = "sha256")]
    Sha256,
    #[strum(serialize = "sha256new")]
    Sha256New,
}

impl DigestAlgorithm {
    /// Algorithms in store-naming preference order, strongest first.
    pub const ALL_STRONGEST_FIRST: [DigestAlgorithm; 3] = [
        DigestAlgorithm::Sha256New,
        DigestAlgorithm::Sha256,
        DigestAlgorithm::Sha1New,
    ];

    /// Whether this algorithm's manifest uses POSIX depth-first line
    /// ordering (`Sha256New`) rather than plain sorted-by-name ordering.
    pub fn uses_depth_first_order(&self) -> bool {
        matches!(self, DigestAlgorithm::Sha256New)
    }
}

/// A lowercase-hex digest value for one algorithm.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct HexDigest(String);

impl HexDigest {
    pub fn new(hex: String) -> Self {
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for HexDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hashes bytes written through it with every requested algorithm
/// simultaneously, avoiding re-reading file content once per algorithm.
pub struct MultiDigestWriter {
    sha1: Option<Sha1>,
    sha256: Option<Sha256>,
    algorithms: Vec<DigestAlgorithm>,
}

impl MultiDigestWriter {
    pub fn new(algorithms: &[DigestAlgorithm]) -> Self {
        let needs_sha1 = algorithms.contains(&DigestAlgorithm::Sha1New);
        let needs_sha256 = algorithms
            .iter()
            .any(|a| matches!(a, DigestAlgorithm::Sha256 | DigestAlgorithm::Sha256New));

        Self {
            sha1: needs_sha1.then(Sha1::new),
            sha256: needs_sha256.then(Sha256::new),
            algorithms: algorithms.to_vec(),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        if let Some(h) = self.sha1.as_mut() {
            Digest::update(h, bytes);
        }
        if let Some(h) = self.sha256.as_mut() {
            Digest::update(h, bytes);
        }
    }

    /// Consumes the writer, returning the hex digest for each requested
    /// algorithm (`Sha256` and `Sha256New` share the same underlying hash).
    pub fn finalize_hex(self) -> Vec<(DigestAlgorithm, HexDigest)> {
        let sha1_hex = self.sha1.map(|h| hex::encode(h.finalize()));
        let sha256_hex = self.sha256.map(|h| hex::encode(h.finalize()));

        self.algorithms
            .into_iter()
            .map(|algo| {
                let hex = match algo {
                    DigestAlgorithm::Sha1New => sha1_hex.clone().unwrap(),
                    DigestAlgorithm::Sha256 | DigestAlgorithm::Sha256New => {
                        sha256_hex.clone().unwrap()
                    }
                };
                (algo, HexDigest::new(hex))
            })
            .collect()
    }
}

impl Write for MultiDigestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Computes the digest of a byte slice with a single algorithm. Used for
/// hashing the assembled manifest text itself.
pub fn digest_bytes(algorithm: DigestAlgorithm, bytes: &[u8]) -> HexDigest {
    match algorithm {
        DigestAlgorithm::Sha1New => {
            let mut h = Sha1::new();
            Digest::update(&mut h, bytes);
            HexDigest::new(hex::encode(h.finalize()))
        }
        DigestAlgorithm::Sha256 | DigestAlgorithm::Sha256New => {
            let mut h = Sha256::new();
            Digest::update(&mut h, bytes);
            HexDigest::new(hex::encode(h.finalize()))
        }
    }
}

/// A set of algorithm-tagged hex digests identifying a directory tree.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct ManifestDigest {
    entries: Vec<(DigestAlgorithm, HexDigest)>,
}

impl ManifestDigest {
    pub fn new(mut entries: Vec<(DigestAlgorithm, HexDigest)>) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.dedup_by(|a, b| a.0 == b.0);
        Self { entries }
    }

    pub fn single(algorithm: DigestAlgorithm, value: HexDigest) -> Self {
        Self::new(vec![(algorithm, value)])
    }

    pub fn entries(&self) -> &[(DigestAlgorithm, HexDigest)] {
        &self.entries
    }

    /// Two digests are partially equal iff they share at least one
    /// algorithm+value pair.
    pub fn partial_eq(&self, other: &ManifestDigest) -> bool {
        self.entries.iter().any(|(algo, value)| {
            other
                .entries
                .iter()
                .any(|(other_algo, other_value)| algo == other_algo && value == other_value)
        })
    }

    /// The store directory name for this digest: `algo=value` for the
    /// strongest available algorithm.
    pub fn preferred_store_name(&self) -> Option<String> {
        for algo in DigestAlgorithm::ALL_STRONGEST_FIRST {
            if let Some((_, value)) = self.entries.iter().find(|(a, _)| *a == algo) {
                return Some(format!("{algo}={value}"));
            }
        }
        None
    }

    /// Every `algo=value` name this digest could be stored under.
    pub fn all_store_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(algo, value)| format!("{algo}={value}"))
            .collect()
    }
}

/// Parses a `algo=value` store directory name.
pub fn parse_store_name(name: &str) -> Option<(DigestAlgorithm, HexDigest)> {
    let (algo_str, value) = name.split_once('=')?;
    let algo = DigestAlgorithm::from_str(algo_str).ok()?;
    Some((algo, HexDigest::new(value.to_string())))
}
