//! Dotted-decimal version parsing and comparison, and half-open version ranges.
//!
//! A [`Version`] is a dotted sequence of dotted-integer segments separated by
//! named modifiers `pre < rc < (none) < post`. Two versions compare by
//! comparing their segment sequences lexicographically, then by modifier
//! rank, then by any trailing segment following the modifier.

use crate::error::{Error, InvalidVersionSnafu, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use snafu::ensure;
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Matches one dotted-decimal run, e.g. `1.2.3`.
static DOTTED_DECIMAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+(\.[0-9]+)*$").unwrap());

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
enum Modifier {
    Pre,
    Rc,
    None,
    Post,
}

impl Modifier {
    fn parse(s: &str) -> Option<(Self, &str)> {
        for (keyword, modifier) in [("pre", Modifier::Pre), ("rc", Modifier::Rc), ("post", Modifier::Post)] {
            if let Some(rest) = s.strip_prefix(keyword) {
                return Some((modifier, rest));
            }
        }
        None
    }
}

/// A single dotted-decimal run plus the modifier that terminates it, e.g. the
/// `1.2-pre3` in `1.2-pre3.4` parses to `(segments=[1,2], modifier=Pre,
/// trailing=[3])` followed by a second run `(segments=[4], modifier=None,
/// trailing=[])`.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
struct Run {
    segments: Vec<u64>,
    modifier: Modifier,
    trailing: Vec<u64>,
}

/// An immutable, totally-ordered, structurally-hashable version number.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Version {
    runs: Vec<Run>,
    original: String,
}

impl Version {
    /// Parses a version string per the grammar in the module docs.
    ///
    /// Fails with [`Error::InvalidVersion`] on malformed input.
    pub fn parse(value: &str) -> Result<Self> {
        ensure!(
            !value.is_empty(),
            InvalidVersionSnafu {
                value,
                details: "version string is empty".to_string(),
            }
        );

        let mut runs = Vec::new();
        let mut rest = value;

        loop {
            let (decimal_part, remainder) = split_decimal_run(rest);
            ensure!(
                !decimal_part.is_empty(),
                InvalidVersionSnafu {
                    value,
                    details: format!("expected a dotted-decimal run at '{rest}'"),
                }
            );
            ensure!(
                DOTTED_DECIMAL.is_match(decimal_part),
                InvalidVersionSnafu {
                    value,
                    details: format!("'{decimal_part}' is not a valid dotted-decimal run"),
                }
            );

            let segments = parse_segments(decimal_part, value)?;

            if remainder.is_empty() {
                runs.push(Run {
                    segments,
                    modifier: Modifier::None,
                    trailing: Vec::new(),
                });
                break;
            }

            ensure!(
                remainder.starts_with('-'),
                InvalidVersionSnafu {
                    value,
                    details: format!("expected '-' before a modifier at '{remainder}'"),
                }
            );
            let after_separator = &remainder[1..];

            // A bare `-` with no recognized keyword (e.g. the `-1` in
            // `1.0-1`) separates runs using the `None` modifier, the same
            // rank a plain `.`-joined run would have.
            let (modifier, after_modifier) = match Modifier::parse(after_separator) {
                Some((modifier, rest)) => (modifier, rest),
                None => (Modifier::None, after_separator),
            };

            let (trailing_decimal, after_trailing) = split_decimal_run(after_modifier);
            let trailing = if trailing_decimal.is_empty() {
                Vec::new()
            } else {
                parse_segments(trailing_decimal, value)?
            };

            runs.push(Run {
                segments,
                modifier,
                trailing,
            });

            if after_trailing.is_empty() {
                break;
            }
            rest = after_trailing.strip_prefix('.').unwrap_or(after_trailing);
        }

        Ok(Version {
            runs,
            original: value.to_string(),
        })
    }

    /// The original string this version was parsed from.
    pub fn as_str(&self) -> &str {
        &self.original
    }
}

fn parse_segments(decimal: &str, original: &str) -> Result<Vec<u64>> {
    decimal
        .split('.')
        .map(|part| {
            part.parse::<u64>().map_err(|_| Error::InvalidVersion {
                value: original.to_string(),
                details: format!("'{part}' is not a valid integer segment"),
            })
        })
        .collect()
}

/// Splits off the leading run of `[0-9.]` characters.
fn split_decimal_run(s: &str) -> (&str, &str) {
    let end = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    (&s[..end], &s[end..])
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.runs.cmp(&other.runs)
    }
}

/// A half-open interval `[lo, hi)`, with `None` meaning an unbounded end.
#[derive(Debug, Clone, Eq, PartialEq)]
struct Interval {
    lo: Option<Version>,
    hi: Option<Version>,
}

impl Interval {
    fn contains(&self, v: &Version) -> bool {
        self.lo.as_ref().map(|lo| v >= lo).unwrap_or(true)
            && self.hi.as_ref().map(|hi| v < hi).unwrap_or(true)
    }

    fn is_empty(&self) -> bool {
        match (&self.lo, &self.hi) {
            (Some(lo), Some(hi)) => lo >= hi,
            _ => false,
        }
    }

    fn intersect(&self, other: &Interval) -> Option<Interval> {
        let lo = match (&self.lo, &other.lo) {
            (None, None) => None,
            (Some(a), None) => Some(a.clone()),
            (None, Some(b)) => Some(b.clone()),
            (Some(a), Some(b)) => Some(if a >= b { a.clone() } else { b.clone() }),
        };
        let hi = match (&self.hi, &other.hi) {
            (None, None) => None,
            (Some(a), None) => Some(a.clone()),
            (None, Some(b)) => Some(b.clone()),
            (Some(a), Some(b)) => Some(if a <= b { a.clone() } else { b.clone() }),
        };
        let interval = Interval { lo, hi };
        if interval.is_empty() {
            None
        } else {
            Some(interval)
        }
    }
}

/// A union of half-open version intervals.
///
/// `v ∈ [lo, hi) ⇔ lo ≤ v < hi`, and the union is kept in a form where
/// `intersect` can detect emptiness directly rather than through membership
/// sampling.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct VersionRange {
    intervals: Vec<Interval>,
}

impl VersionRange {
    /// A range containing every version.
    pub fn any() -> Self {
        VersionRange {
            intervals: vec![Interval { lo: None, hi: None }],
        }
    }

    /// A range containing no version.
    pub fn empty() -> Self {
        VersionRange { intervals: Vec::new() }
    }

    /// `[lo, hi)`, where either bound may be omitted for unbounded.
    pub fn interval(lo: Option<Version>, hi: Option<Version>) -> Self {
        let interval = Interval { lo, hi };
        if interval.is_empty() {
            VersionRange::empty()
        } else {
            VersionRange {
                intervals: vec![interval],
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn contains(&self, v: &Version) -> bool {
        self.intervals.iter().any(|i| i.contains(v))
    }

    /// Intersects this range with `other`, returning the (possibly empty)
    /// resulting range. Emptiness is observable via [`VersionRange::is_empty`].
    pub fn intersect(&self, other: &VersionRange) -> VersionRange {
        let mut intervals = Vec::new();
        for a in &self.intervals {
            for b in &other.intervals {
                if let Some(i) = a.intersect(b) {
                    intervals.push(i);
                }
            }
        }
        VersionRange { intervals }
    }
}

/// Shorthand for the common `not-before X, before Y` constraint shape.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Constraint {
    pub not_before: Option<Version>,
    pub before: Option<Version>,
}

impl Constraint {
    pub fn new(not_before: Option<Version>, before: Option<Version>) -> Self {
        Self { not_before, before }
    }

    /// Lowers this constraint to the general `VersionRange` it describes.
    pub fn to_range(&self) -> VersionRange {
        VersionRange::interval(self.not_before.clone(), self.before.clone())
    }
}
