//! Package version handling.
//!
//! Versions follow the `[+epoch-]upstream[-release][+revision]` form used
//! throughout the mortar ecosystem:
//!
//! - Epoch: `+2-1.0.0` (defaults to 1; epoch 0 is reserved for stubs)
//! - Upstream: dot-separated alphanumeric components: `1.2.3`, `2024.01`
//! - Pre-release: `1.0.0-beta.1` (sorts before `1.0.0`)
//! - Revision: `1.0.0+3` (a repackaging of the same upstream)
//!
//! A version additionally carries an *iteration*, a local tie-breaker that
//! never appears in the textual form and participates in comparison only
//! when explicitly requested.
//!
//! Constraints supported:
//! - Wildcard: `*`
//! - Exact: `== 1.2.3` or bare `1.2.3`
//! - Comparison: `>= 1.0.0`, `> 1.0.0`, `<= 2.0.0`, `< 2.0.0`
//! - Range: `[1.0.0 2.0.0)`, `(1.0.0 2.0.0]`
//! - Tilde: `~1.2.3` (>=1.2.3 <1.3.0)
//! - Caret: `^1.2.3` (>=1.2.3 <2.0.0)

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// Error produced when parsing a malformed version or constraint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidVersion {
    /// The version string is empty.
    #[error("empty version")]
    Empty,
    /// The epoch prefix is malformed.
    #[error("invalid epoch in '{0}'")]
    Epoch(String),
    /// The upstream part contains an invalid component.
    #[error("invalid upstream component in '{0}'")]
    Upstream(String),
    /// The release part contains an invalid component.
    #[error("invalid release component in '{0}'")]
    Release(String),
    /// The revision suffix is malformed.
    #[error("invalid revision in '{0}'")]
    Revision(String),
    /// The constraint string is malformed.
    #[error("invalid constraint '{0}'")]
    Constraint(String),
    /// The constraint interval is empty.
    #[error("empty constraint interval '{0}'")]
    EmptyInterval(String),
}

/// A single canonical component of an upstream or release string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Segment {
    /// Numeric component, compared by value.
    Number(u64),
    /// Alphanumeric component, compared lexicographically after numbers.
    Alpha(String),
}

fn segments(s: &str) -> SmallVec<[Segment; 4]> {
    s.split('.')
        .map(|c| match c.parse::<u64>() {
            Ok(n) => Segment::Number(n),
            Err(_) => Segment::Alpha(c.to_ascii_lowercase()),
        })
        .collect()
}

/// Compare two canonical component sequences, padding the shorter one with
/// zero components so that `1.2` and `1.2.0` compare equal.
fn compare_segments(a: &[Segment], b: &[Segment]) -> Ordering {
    let zero = Segment::Number(0);
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).unwrap_or(&zero);
        let y = b.get(i).unwrap_or(&zero);
        match x.cmp(y) {
            Ordering::Equal => {}
            ord => return ord,
        }
    }
    Ordering::Equal
}

/// A package version.
///
/// Equality and ordering ignore the iteration; use [`Version::compare`] to
/// take it into account.
#[derive(Debug, Clone)]
pub struct Version {
    /// Version epoch. Defaults to 1; 0 is reserved for stub packages.
    pub epoch: u16,
    /// Upstream version as written.
    pub upstream: String,
    /// Pre-release component, sorting before the same version without one.
    pub release: Option<String>,
    /// Package revision (repackaging of the same upstream).
    pub revision: u16,
    /// Local iteration; never printed, compared only on request.
    pub iteration: u32,
}

impl Version {
    /// Create a version from parts without validation.
    #[must_use]
    pub fn new(epoch: u16, upstream: impl Into<String>) -> Self {
        Self {
            epoch,
            upstream: upstream.into(),
            release: None,
            revision: 0,
            iteration: 0,
        }
    }

    /// The wildcard sentinel, satisfying any constraint.
    #[must_use]
    pub fn wildcard() -> Self {
        Self::new(u16::MAX, "*")
    }

    /// Whether this is the wildcard sentinel.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.epoch == u16::MAX && self.upstream == "*"
    }

    /// Whether this is a stub version (epoch 0).
    #[must_use]
    pub fn is_stub(&self) -> bool {
        self.epoch == 0
    }

    /// Return a copy with the given pre-release component.
    #[must_use]
    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = Some(release.into());
        self
    }

    /// Return a copy with the given revision.
    #[must_use]
    pub fn with_revision(mut self, revision: u16) -> Self {
        self.revision = revision;
        self
    }

    /// Return a copy with the given iteration.
    #[must_use]
    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = iteration;
        self
    }

    /// Parse a version from its textual form.
    pub fn parse(s: &str) -> Result<Self, InvalidVersion> {
        let s = s.trim();
        if s.is_empty() {
            return Err(InvalidVersion::Empty);
        }
        if s == "*" {
            return Ok(Self::wildcard());
        }

        // Optional `+<epoch>-` prefix.
        let (epoch, rest) = if let Some(rest) = s.strip_prefix('+') {
            let sep = rest
                .find('-')
                .ok_or_else(|| InvalidVersion::Epoch(s.to_string()))?;
            let epoch = rest[..sep]
                .parse::<u16>()
                .map_err(|_| InvalidVersion::Epoch(s.to_string()))?;
            (epoch, &rest[sep + 1..])
        } else {
            (1, s)
        };

        // Optional `+<revision>` suffix (the last `+`).
        let (rest, revision) = match rest.rfind('+') {
            Some(i) => {
                let revision = rest[i + 1..]
                    .parse::<u16>()
                    .map_err(|_| InvalidVersion::Revision(s.to_string()))?;
                (&rest[..i], revision)
            }
            None => (rest, 0),
        };

        // Optional `-<release>` (the first `-`).
        let (upstream, release) = match rest.find('-') {
            Some(i) => {
                let release = &rest[i + 1..];
                if release.is_empty() || !release.split('.').all(valid_component) {
                    return Err(InvalidVersion::Release(s.to_string()));
                }
                (&rest[..i], Some(release.to_string()))
            }
            None => (rest, None),
        };

        if upstream.is_empty() || !upstream.split('.').all(valid_component) {
            return Err(InvalidVersion::Upstream(s.to_string()));
        }

        Ok(Self {
            epoch,
            upstream: upstream.to_string(),
            release,
            revision,
            iteration: 0,
        })
    }

    /// Three-way comparison with explicit control over the revision and
    /// iteration parts.
    #[must_use]
    pub fn compare(&self, other: &Self, ignore_revision: bool, with_iteration: bool) -> Ordering {
        match (self.is_wildcard(), other.is_wildcard()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (false, false) => {}
        }

        self.epoch
            .cmp(&other.epoch)
            .then_with(|| {
                compare_segments(&segments(&self.upstream), &segments(&other.upstream))
            })
            .then_with(|| match (&self.release, &other.release) {
                (None, None) => Ordering::Equal,
                // Pre-releases sort before the release proper.
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => compare_segments(&segments(a), &segments(b)),
            })
            .then_with(|| {
                if ignore_revision {
                    Ordering::Equal
                } else {
                    self.revision.cmp(&other.revision)
                }
            })
            .then_with(|| {
                if with_iteration {
                    self.iteration.cmp(&other.iteration)
                } else {
                    Ordering::Equal
                }
            })
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other, false, false) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other, false, false)
    }
}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.epoch.hash(state);
        segments(&self.upstream).hash(state);
        self.release.as_deref().map(segments).hash(state);
        self.revision.hash(state);
    }
}

impl Hash for Segment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Number(n) => {
                0u8.hash(state);
                n.hash(state);
            }
            Self::Alpha(s) => {
                1u8.hash(state);
                s.hash(state);
            }
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_wildcard() {
            return write!(f, "*");
        }
        if self.epoch != 1 {
            write!(f, "+{}-", self.epoch)?;
        }
        write!(f, "{}", self.upstream)?;
        if let Some(r) = &self.release {
            write!(f, "-{r}")?;
        }
        if self.revision != 0 {
            write!(f, "+{}", self.revision)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = InvalidVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

fn valid_component(c: &str) -> bool {
    !c.is_empty() && c.chars().all(|ch| ch.is_ascii_alphanumeric())
}

/// One endpoint of a constraint interval.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bound {
    /// Endpoint version.
    pub version: Version,
    /// Whether the endpoint is excluded from the interval.
    pub open: bool,
}

/// An interval over versions with open or closed endpoints.
///
/// An absent endpoint is unbounded; a constraint with both endpoints absent
/// matches any version, as does the wildcard version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct VersionConstraint {
    /// Lower endpoint, if any.
    pub min: Option<Bound>,
    /// Upper endpoint, if any.
    pub max: Option<Bound>,
}

impl VersionConstraint {
    /// The constraint matching any version.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// An exact-version constraint.
    #[must_use]
    pub fn exact(version: &Version) -> Self {
        Self {
            min: Some(Bound {
                version: version.clone(),
                open: false,
            }),
            max: Some(Bound {
                version: version.clone(),
                open: false,
            }),
        }
    }

    /// A `>= version` constraint.
    #[must_use]
    pub fn at_least(version: &Version) -> Self {
        Self {
            min: Some(Bound {
                version: version.clone(),
                open: false,
            }),
            max: None,
        }
    }

    /// Whether this constraint matches any version.
    #[must_use]
    pub fn is_any(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// Whether this is an exact-version constraint, returning the version.
    #[must_use]
    pub fn exact_version(&self) -> Option<&Version> {
        match (&self.min, &self.max) {
            (Some(lo), Some(hi)) if !lo.open && !hi.open && lo.version == hi.version => {
                Some(&lo.version)
            }
            _ => None,
        }
    }

    /// Parse a constraint from its textual form.
    pub fn parse(s: &str) -> Result<Self, InvalidVersion> {
        let s = s.trim();
        if s.is_empty() {
            return Err(InvalidVersion::Constraint(s.to_string()));
        }
        if s == "*" {
            return Ok(Self::any());
        }

        // Range form: `[a b]`, `(a b)`, `[a b)`, `(a b]`.
        if s.starts_with('[') || s.starts_with('(') {
            let min_open = s.starts_with('(');
            let max_open = s.ends_with(')');
            if !(s.ends_with(']') || s.ends_with(')')) {
                return Err(InvalidVersion::Constraint(s.to_string()));
            }
            let inner = &s[1..s.len() - 1];
            let mut parts = inner.split_whitespace();
            let (lo, hi) = match (parts.next(), parts.next(), parts.next()) {
                (Some(lo), Some(hi), None) => (lo, hi),
                _ => return Err(InvalidVersion::Constraint(s.to_string())),
            };
            let r = Self {
                min: Some(Bound {
                    version: Version::parse(lo)?,
                    open: min_open,
                }),
                max: Some(Bound {
                    version: Version::parse(hi)?,
                    open: max_open,
                }),
            };
            if r.is_empty() {
                return Err(InvalidVersion::EmptyInterval(s.to_string()));
            }
            return Ok(r);
        }

        // Comparison forms.
        for (op, min, open) in [
            (">=", true, false),
            ("<=", false, false),
            ("==", true, true), // placeholder, handled below
            (">", true, true),
            ("<", false, true),
        ] {
            if let Some(rest) = s.strip_prefix(op) {
                let version = Version::parse(rest.trim())?;
                if op == "==" {
                    return Ok(Self::exact(&version));
                }
                let bound = Some(Bound { version, open });
                return Ok(if min {
                    Self {
                        min: bound,
                        max: None,
                    }
                } else {
                    Self {
                        min: None,
                        max: bound,
                    }
                });
            }
        }

        // Shortcut forms.
        if let Some(rest) = s.strip_prefix('~') {
            return Self::tilde(&Version::parse(rest.trim())?)
                .ok_or_else(|| InvalidVersion::Constraint(s.to_string()));
        }
        if let Some(rest) = s.strip_prefix('^') {
            return Self::caret(&Version::parse(rest.trim())?)
                .ok_or_else(|| InvalidVersion::Constraint(s.to_string()));
        }

        // Bare version: exact match.
        Ok(Self::exact(&Version::parse(s)?))
    }

    /// `~X.Y.Z` — same minor series: `>=X.Y.Z <X.(Y+1).0`.
    #[must_use]
    pub fn tilde(version: &Version) -> Option<Self> {
        let upper = bump_component(&version.upstream, 1)?;
        Some(Self {
            min: Some(Bound {
                version: version.clone(),
                open: false,
            }),
            max: Some(Bound {
                version: Version::new(version.epoch, upper),
                open: true,
            }),
        })
    }

    /// `^X.Y.Z` — same major series: `>=X.Y.Z <(X+1).0.0`; for major zero
    /// behaves like tilde.
    #[must_use]
    pub fn caret(version: &Version) -> Option<Self> {
        let first = version.upstream.split('.').next()?;
        if first.parse::<u64>() == Ok(0) {
            return Self::tilde(version);
        }
        let upper = bump_component(&version.upstream, 0)?;
        Some(Self {
            min: Some(Bound {
                version: version.clone(),
                open: false,
            }),
            max: Some(Bound {
                version: Version::new(version.epoch, upper),
                open: true,
            }),
        })
    }

    /// Whether the version satisfies this constraint. Total: the wildcard
    /// version satisfies anything and the any-constraint accepts everything.
    #[must_use]
    pub fn satisfies(&self, version: &Version) -> bool {
        if version.is_wildcard() {
            return true;
        }
        if let Some(lo) = &self.min {
            match version.compare(&lo.version, false, false) {
                Ordering::Less => return false,
                Ordering::Equal if lo.open => return false,
                _ => {}
            }
        }
        if let Some(hi) = &self.max {
            match version.compare(&hi.version, false, false) {
                Ordering::Greater => return false,
                Ordering::Equal if hi.open => return false,
                _ => {}
            }
        }
        true
    }

    /// Intersect with another constraint, returning `None` when the result
    /// is empty.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let min = tighter(self.min.as_ref(), other.min.as_ref(), true);
        let max = tighter(self.max.as_ref(), other.max.as_ref(), false);
        let r = Self {
            min: min.cloned(),
            max: max.cloned(),
        };
        if r.is_empty() { None } else { Some(r) }
    }

    fn is_empty(&self) -> bool {
        match (&self.min, &self.max) {
            (Some(lo), Some(hi)) => match lo.version.compare(&hi.version, false, false) {
                Ordering::Greater => true,
                Ordering::Equal => lo.open || hi.open,
                Ordering::Less => false,
            },
            _ => false,
        }
    }
}

/// Pick the tighter of two optional bounds (`lower` selects direction).
fn tighter<'a>(a: Option<&'a Bound>, b: Option<&'a Bound>, lower: bool) -> Option<&'a Bound> {
    match (a, b) {
        (None, x) | (x, None) => x,
        (Some(x), Some(y)) => {
            let ord = x.version.compare(&y.version, false, false);
            let pick_x = match ord {
                Ordering::Equal => x.open,
                Ordering::Less => !lower,
                Ordering::Greater => lower,
            };
            Some(if pick_x { x } else { y })
        }
    }
}

/// Increment the numeric component at `index` and zero the rest:
/// `bump_component("1.2.3", 1)` is `1.3.0`.
fn bump_component(upstream: &str, index: usize) -> Option<String> {
    let parts: Vec<&str> = upstream.split('.').collect();
    if parts.len() <= index {
        return None;
    }
    let bumped: u64 = parts[index].parse::<u64>().ok()?.checked_add(1)?;
    let mut out: Vec<String> = Vec::with_capacity(parts.len().max(3));
    for (i, p) in parts.iter().enumerate() {
        if i < index {
            p.parse::<u64>().ok()?;
            out.push((*p).to_string());
        } else if i == index {
            out.push(bumped.to_string());
        } else {
            out.push("0".to_string());
        }
    }
    while out.len() < 3 {
        out.push("0".to_string());
    }
    Some(out.join("."))
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(v) = self.exact_version() {
            return write!(f, "== {v}");
        }
        match (&self.min, &self.max) {
            (None, None) => write!(f, "*"),
            (Some(lo), None) => write!(f, "{} {}", if lo.open { ">" } else { ">=" }, lo.version),
            (None, Some(hi)) => write!(f, "{} {}", if hi.open { "<" } else { "<=" }, hi.version),
            (Some(lo), Some(hi)) => write!(
                f,
                "{}{} {}{}",
                if lo.open { '(' } else { '[' },
                lo.version,
                hi.version,
                if hi.open { ')' } else { ']' },
            ),
        }
    }
}

impl FromStr for VersionConstraint {
    type Err = InvalidVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn c(s: &str) -> VersionConstraint {
        VersionConstraint::parse(s).unwrap()
    }

    #[test]
    fn test_parse_plain() {
        let ver = v("1.2.3");
        assert_eq!(ver.epoch, 1);
        assert_eq!(ver.upstream, "1.2.3");
        assert_eq!(ver.release, None);
        assert_eq!(ver.revision, 0);
    }

    #[test]
    fn test_parse_full() {
        let ver = v("+2-1.2.3-beta.1+4");
        assert_eq!(ver.epoch, 2);
        assert_eq!(ver.upstream, "1.2.3");
        assert_eq!(ver.release.as_deref(), Some("beta.1"));
        assert_eq!(ver.revision, 4);
    }

    #[test]
    fn test_parse_stub_epoch() {
        assert!(v("+0-0").is_stub());
        assert!(!v("1.0.0").is_stub());
    }

    #[test_case("" ; "empty")]
    #[test_case("+x-1.0" ; "bad epoch")]
    #[test_case("1..2" ; "empty component")]
    #[test_case("1.0+x" ; "bad revision")]
    #[test_case("1.0-" ; "empty release")]
    fn test_parse_invalid(s: &str) {
        assert!(Version::parse(s).is_err());
    }

    #[test]
    fn test_prerelease_sorts_before_release() {
        assert!(v("1.0.0-beta") < v("1.0.0"));
        assert!(v("1.0.0-alpha") < v("1.0.0-beta"));
        assert!(v("1.0.0-beta.2") < v("1.0.0-beta.10"));
    }

    #[test]
    fn test_epoch_dominates() {
        assert!(v("+2-0.1.0") > v("99.0.0"));
    }

    #[test]
    fn test_trailing_zeros_equal() {
        assert_eq!(v("1.2"), v("1.2.0"));
    }

    #[test]
    fn test_revision_and_iteration() {
        assert!(v("1.0.0+1") > v("1.0.0"));
        assert_eq!(
            v("1.0.0+1").compare(&v("1.0.0"), true, false),
            Ordering::Equal
        );

        let a = v("1.0.0").with_iteration(1);
        let b = v("1.0.0");
        assert_eq!(a, b);
        assert_eq!(a.compare(&b, false, true), Ordering::Greater);
    }

    #[test]
    fn test_display_round_trip() {
        for s in ["1.2.3", "+2-1.2.3-beta.1+4", "1.0.0-rc.1", "1.0.0+2"] {
            assert_eq!(v(s).to_string(), s);
        }
    }

    #[test_case("*", "1.0.0", true)]
    #[test_case(">= 1.0.0", "1.0.0", true)]
    #[test_case("> 1.0.0", "1.0.0", false)]
    #[test_case("< 2.0.0", "2.0.0-beta", true ; "prerelease below open upper")]
    #[test_case("[1.0.0 2.0.0)", "2.0.0", false)]
    #[test_case("[1.0.0 2.0.0)", "1.5.0", true)]
    #[test_case("~1.2.3", "1.2.9", true)]
    #[test_case("~1.2.3", "1.3.0", false)]
    #[test_case("^1.2.3", "1.9.0", true)]
    #[test_case("^1.2.3", "2.0.0", false)]
    #[test_case("^0.2.3", "0.3.0", false ; "caret on zero major")]
    #[test_case("== 1.2.3", "1.2.3", true)]
    fn test_satisfies(constraint: &str, version: &str, expected: bool) {
        assert_eq!(c(constraint).satisfies(&v(version)), expected);
    }

    #[test]
    fn test_wildcard_version_satisfies_anything() {
        assert!(c("== 7.7.7").satisfies(&Version::wildcard()));
        assert!(c("[1.0.0 2.0.0)").satisfies(&Version::wildcard()));
    }

    #[test]
    fn test_intersect() {
        let a = c(">= 1.0.0");
        let b = c("< 2.0.0");
        let i = a.intersect(&b).unwrap();
        assert!(i.satisfies(&v("1.5.0")));
        assert!(!i.satisfies(&v("2.0.0")));

        assert!(c("< 1.0.0").intersect(&c(">= 2.0.0")).is_none());
        assert!(c("<= 1.0.0").intersect(&c(">= 1.0.0")).is_some());
        assert!(c("< 1.0.0").intersect(&c(">= 1.0.0")).is_none());
    }

    #[test]
    fn test_constraint_display() {
        assert_eq!(c("== 1.2.3").to_string(), "== 1.2.3");
        assert_eq!(c(">= 1.0.0").to_string(), ">= 1.0.0");
        assert_eq!(c("[1.0.0 2.0.0)").to_string(), "[1.0.0 2.0.0)");
        assert_eq!(c("*").to_string(), "*");
    }

    proptest::proptest! {
        #[test]
        fn prop_ordering_total(
            a in "[0-9]{1,3}(\\.[0-9]{1,3}){0,3}",
            b in "[0-9]{1,3}(\\.[0-9]{1,3}){0,3}",
        ) {
            let (x, y) = (v(&a), v(&b));
            // Antisymmetry of the total order.
            proptest::prop_assert_eq!(x.cmp(&y), y.cmp(&x).reverse());
        }

        #[test]
        fn prop_exact_constraint_accepts_itself(
            a in "[0-9]{1,3}(\\.[0-9]{1,3}){0,2}",
        ) {
            let ver = v(&a);
            proptest::prop_assert!(VersionConstraint::exact(&ver).satisfies(&ver));
        }
    }
}
