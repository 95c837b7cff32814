//! Package version comparison.
//!
//! Versions are segmented strings in the `[epoch:]pkgver[-release]` shape.
//! Ordering follows the classic distro comparator: walk both strings in
//! lockstep, compare maximal numeric runs numerically and maximal alphabetic
//! runs lexically, with numeric segments always newer than alphabetic ones.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("invalid epoch in version '{0}': epoch must be a non-negative integer")]
    InvalidEpoch(String),

    #[error("empty version string")]
    Empty,

    #[error("invalid requirement '{0}': missing version after operator")]
    MissingVersion(String),
}

/// A package version: optional epoch, upstream version, optional release.
///
/// `2:1.4.8-3` has epoch 2, upstream version `1.4.8`, release `3`.
#[derive(Debug, Clone, Eq)]
pub struct Version {
    epoch: Option<u64>,
    upstream: String,
    release: Option<String>,
}

impl Version {
    /// Parse a version string. `E:` (integer epoch) and a trailing `-R`
    /// release are split off; everything in between is the upstream version.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        if input.is_empty() {
            return Err(VersionError::Empty);
        }

        let (epoch, rest) = match input.split_once(':') {
            Some((e, rest)) => {
                let epoch = e
                    .parse::<u64>()
                    .map_err(|_| VersionError::InvalidEpoch(input.to_string()))?;
                (Some(epoch), rest)
            }
            None => (None, input),
        };

        // The release is everything after the last dash. A dash inside the
        // upstream version is only possible when a release is also present,
        // so splitting on the last one is unambiguous.
        let (upstream, release) = match rest.rsplit_once('-') {
            Some((up, rel)) => (up.to_string(), Some(rel.to_string())),
            None => (rest.to_string(), None),
        };

        if upstream.is_empty() {
            return Err(VersionError::Empty);
        }

        Ok(Self {
            epoch,
            upstream,
            release,
        })
    }

    pub fn epoch(&self) -> Option<u64> {
        self.epoch
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    pub fn release(&self) -> Option<&str> {
        self.release.as_deref()
    }

    /// Three-way comparison in the classic `-1 / 0 / 1` convention.
    pub fn vercmp(a: &Version, b: &Version) -> i8 {
        match a.cmp(b) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        }
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Version::parse(input)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(epoch) = self.epoch {
            write!(f, "{epoch}:")?;
        }
        write!(f, "{}", self.upstream)?;
        if let Some(rel) = &self.release {
            write!(f, "-{rel}")?;
        }
        Ok(())
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        // An explicit epoch always orders before the segment walk.
        match (self.epoch, other.epoch) {
            (Some(a), Some(b)) if a != b => return a.cmp(&b),
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            _ => {}
        }

        let upstream = compare_segments(&self.upstream, &other.upstream);
        if upstream.is_ne() {
            return upstream;
        }

        // The release participates only when both sides carry one; a bare
        // version and its `-1` rebuild are the same upstream state.
        match (&self.release, &other.release) {
            (Some(a), Some(b)) => compare_segments(a, b),
            _ => Ordering::Equal,
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Segment-wise comparison of two raw version strings.
///
/// Both strings are walked in lockstep: separators (non-alphanumerics) are
/// skipped, then the next maximal all-numeric or all-alphabetic run is
/// compared. Numeric runs compare as integers (leading zeros stripped, a
/// longer surviving run wins), alphabetic runs compare lexically, and a
/// numeric run beats an alphabetic one. When one side runs out, the side
/// with remaining content wins unless that remainder is alphabetic: a
/// trailing letter suffix never beats the plain version.
fn compare_segments(a: &str, b: &str) -> Ordering {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let mut ai = 0;
    let mut bi = 0;

    while ai < a.len() && bi < b.len() {
        let a_seg_start = ai;
        let b_seg_start = bi;
        while ai < a.len() && !a[ai].is_ascii_alphanumeric() {
            ai += 1;
        }
        while bi < b.len() && !b[bi].is_ascii_alphanumeric() {
            bi += 1;
        }
        if ai >= a.len() || bi >= b.len() {
            break;
        }

        // Different separator run lengths decide on their own.
        let a_seps = ai - a_seg_start;
        let b_seps = bi - b_seg_start;
        if a_seps != b_seps {
            return a_seps.cmp(&b_seps);
        }

        let numeric = a[ai].is_ascii_digit();
        let a_run = take_run(&a[ai..], numeric);
        let b_run = take_run(&b[bi..], numeric);
        ai += a_run.len();
        bi += b_run.len();

        // Mixed segment types: the numeric side is newer.
        if b_run.is_empty() {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        if numeric {
            let a_digits = strip_zeros(a_run);
            let b_digits = strip_zeros(b_run);
            match a_digits.len().cmp(&b_digits.len()) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
            if a_digits != b_digits {
                return a_digits.cmp(b_digits);
            }
        } else if a_run != b_run {
            return a_run.cmp(b_run);
        }
    }

    let a_rest = &a[ai..];
    let b_rest = &b[bi..];
    if a_rest.is_empty() && b_rest.is_empty() {
        return Ordering::Equal;
    }

    if (a_rest.is_empty() && !b_rest[0].is_ascii_alphabetic())
        || (!a_rest.is_empty() && a_rest[0].is_ascii_alphabetic())
    {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

fn take_run(s: &[u8], numeric: bool) -> &[u8] {
    let len = s
        .iter()
        .take_while(|c| {
            if numeric {
                c.is_ascii_digit()
            } else {
                c.is_ascii_alphabetic()
            }
        })
        .count();
    &s[..len]
}

fn strip_zeros(s: &[u8]) -> &[u8] {
    let skip = s.iter().take_while(|c| **c == b'0').count();
    &s[skip..]
}

/// Returns true when `candidate` should replace `current`.
pub fn is_newer(current: &Version, candidate: &Version) -> bool {
    candidate > current
}

/// Relational operator of a versioned dependency request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Comparison::Eq => ordering.is_eq(),
            Comparison::Lt => ordering.is_lt(),
            Comparison::Le => ordering.is_le(),
            Comparison::Gt => ordering.is_gt(),
            Comparison::Ge => ordering.is_ge(),
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Comparison::Eq => "=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
        };
        write!(f, "{s}")
    }
}

/// A dependency request: a package (or capability) name, optionally
/// constrained to a version range, e.g. `openssl>=3.0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    pub constraint: Option<(Comparison, Version)>,
}

impl Requirement {
    /// Parse a dependency string. The unqualified form (`zlib`) matches any
    /// version.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let operators: [(&str, Comparison); 5] = [
            ("<=", Comparison::Le),
            (">=", Comparison::Ge),
            ("=", Comparison::Eq),
            ("<", Comparison::Lt),
            (">", Comparison::Gt),
        ];

        for (token, op) in operators {
            if let Some(idx) = input.find(token) {
                let name = input[..idx].trim();
                let version = input[idx + token.len()..].trim();
                if name.is_empty() {
                    return Err(VersionError::Empty);
                }
                if version.is_empty() {
                    return Err(VersionError::MissingVersion(input.to_string()));
                }
                return Ok(Self {
                    name: name.to_string(),
                    constraint: Some((op, Version::parse(version)?)),
                });
            }
        }

        if input.trim().is_empty() {
            return Err(VersionError::Empty);
        }
        Ok(Self {
            name: input.trim().to_string(),
            constraint: None,
        })
    }

    /// Check a concrete version against this request.
    pub fn satisfied_by(&self, version: &Version) -> bool {
        match &self.constraint {
            None => true,
            Some((op, wanted)) => op.holds(version.cmp(wanted)),
        }
    }

    /// Check a provider's version string, where `None` means the provider
    /// declared the bare capability name. A bare provision satisfies any
    /// constraint on that name.
    pub fn satisfied_by_provision(&self, version: Option<&Version>) -> bool {
        match (&self.constraint, version) {
            (None, _) => true,
            (Some(_), None) => true,
            (Some((op, wanted)), Some(v)) => op.holds(v.cmp(wanted)),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            None => write!(f, "{}", self.name),
            Some((op, v)) => write!(f, "{}{op}{v}", self.name),
        }
    }
}
