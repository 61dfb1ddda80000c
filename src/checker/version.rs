//! NuGet version numbers and version ranges.
//!
//! NuGet versions extend SemVer with an optional fourth "revision" part and
//! allow fewer than three numeric parts (`1.0` is `1.0.0`). Prerelease labels
//! compare case-insensitively. Prerelease and build metadata validation is
//! delegated to the `semver` crate.
//!
//! Ranges use NuGet interval notation:
//!
//! | Expression | Meaning |
//! |------------|---------|
//! | `1.0` | `1.0 <= x` |
//! | `[1.0]` | `x == 1.0` |
//! | `(1.0,)` | `1.0 < x` |
//! | `(,1.0]` | `x <= 1.0` |
//! | `[1.0,2.0)` | `1.0 <= x < 2.0` |
//! | `*` | any version |

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use semver::{BuildMetadata, Prerelease};

use crate::error::{Result, ScanError};

/// A parsed NuGet package version.
#[derive(Debug, Clone)]
pub struct NuGetVersion {
    major: u64,
    minor: u64,
    patch: u64,
    revision: u64,
    pre: Prerelease,
    pre_key: Prerelease,
    build: BuildMetadata,
    original: String,
}

impl NuGetVersion {
    /// Parses a version string such as `1.0`, `4.1.2`, `10.0.22621.755` or
    /// `3.0.2-dev-02044+sha.1`.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: String| ScanError::InvalidVersion {
            version: input.to_string(),
            reason,
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid("version is empty".to_string()));
        }

        let (rest, build) = match trimmed.split_once('+') {
            Some((_, "")) => return Err(invalid("empty build metadata".to_string())),
            Some((rest, meta)) => (
                rest,
                BuildMetadata::new(meta).map_err(|e| invalid(e.to_string()))?,
            ),
            None => (trimmed, BuildMetadata::EMPTY),
        };

        let (numbers, pre) = match rest.split_once('-') {
            Some((_, "")) => return Err(invalid("empty prerelease label".to_string())),
            Some((numbers, label)) => (
                numbers,
                Prerelease::new(label).map_err(|e| invalid(e.to_string()))?,
            ),
            None => (rest, Prerelease::EMPTY),
        };

        let parts: Vec<&str> = numbers.split('.').collect();
        if parts.len() > 4 {
            return Err(invalid("more than four numeric parts".to_string()));
        }

        let mut values = [0u64; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid(format!("'{part}' is not a number")));
            }
            *slot = part
                .parse()
                .map_err(|_| invalid(format!("'{part}' is out of range")))?;
        }

        let pre_key = Prerelease::new(&pre.as_str().to_ascii_lowercase())
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            major: values[0],
            minor: values[1],
            patch: values[2],
            revision: values[3],
            pre,
            pre_key,
            build,
            original: trimmed.to_string(),
        })
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn patch(&self) -> u64 {
        self.patch
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }

    /// The version exactly as it was written.
    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// Normalized form: three numeric parts (four when the revision is set),
    /// prerelease label kept, build metadata dropped.
    pub fn normalized(&self) -> String {
        let mut out = format!("{}.{}.{}", self.major, self.minor, self.patch);
        if self.revision > 0 {
            out.push_str(&format!(".{}", self.revision));
        }
        if !self.pre.is_empty() {
            out.push('-');
            out.push_str(self.pre.as_str());
        }
        out
    }

    /// Build metadata, if any. Ignored for comparisons.
    pub fn metadata(&self) -> Option<&str> {
        (!self.build.is_empty()).then(|| self.build.as_str())
    }
}

impl Ord for NuGetVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch, self.revision)
            .cmp(&(other.major, other.minor, other.patch, other.revision))
            .then_with(|| self.pre_key.cmp(&other.pre_key))
    }
}

impl PartialOrd for NuGetVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for NuGetVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for NuGetVersion {}

impl Hash for NuGetVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.major, self.minor, self.patch, self.revision).hash(state);
        self.pre_key.as_str().hash(state);
    }
}

impl fmt::Display for NuGetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl FromStr for NuGetVersion {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A NuGet version range in interval notation.
#[derive(Debug, Clone)]
pub struct VersionRange {
    min: Option<NuGetVersion>,
    min_inclusive: bool,
    max: Option<NuGetVersion>,
    max_inclusive: bool,
    original: String,
}

impl VersionRange {
    /// A range that every version satisfies.
    pub fn all() -> Self {
        Self {
            min: None,
            min_inclusive: true,
            max: None,
            max_inclusive: true,
            original: "*".to_string(),
        }
    }

    /// Parses a range expression. A bare version means "this version or newer".
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| ScanError::InvalidVersionRange {
            range: input.to_string(),
            reason: reason.to_string(),
        };

        let s = input.trim();
        if s.is_empty() {
            return Err(invalid("range is empty"));
        }
        if s == "*" {
            return Ok(Self::all());
        }

        let first = s.chars().next().unwrap_or_default();
        if first != '[' && first != '(' {
            let min = NuGetVersion::parse(s).map_err(|_| invalid("not a valid version"))?;
            return Ok(Self {
                min: Some(min),
                min_inclusive: true,
                max: None,
                max_inclusive: false,
                original: s.to_string(),
            });
        }

        let min_inclusive = first == '[';
        let max_inclusive = match s.chars().last() {
            Some(']') if s.len() > 1 => true,
            Some(')') => false,
            _ => return Err(invalid("missing closing bracket")),
        };

        let inner = &s[1..s.len() - 1];
        let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
        let parse_bound = |part: &str| -> Result<Option<NuGetVersion>> {
            if part.is_empty() {
                Ok(None)
            } else {
                NuGetVersion::parse(part)
                    .map(Some)
                    .map_err(|_| invalid("bound is not a valid version"))
            }
        };

        let (min, max) = match parts.as_slice() {
            [exact] => {
                if !(min_inclusive && max_inclusive) {
                    return Err(invalid("an exact version must be written as [x]"));
                }
                let version = parse_bound(exact)?.ok_or_else(|| invalid("range is empty"))?;
                (Some(version.clone()), Some(version))
            }
            [lower, upper] => (parse_bound(lower)?, parse_bound(upper)?),
            _ => return Err(invalid("too many bounds")),
        };

        match (&min, &max) {
            (None, None) => return Err(invalid("range has no bounds")),
            (Some(lower), Some(upper)) => {
                if upper < lower {
                    return Err(invalid("upper bound is below lower bound"));
                }
                if upper == lower && !(min_inclusive && max_inclusive) {
                    return Err(invalid("range cannot contain any version"));
                }
            }
            _ => {}
        }

        Ok(Self {
            min,
            min_inclusive,
            max,
            max_inclusive,
            original: s.to_string(),
        })
    }

    /// Returns true when `version` lies inside the range.
    pub fn satisfies(&self, version: &NuGetVersion) -> bool {
        if let Some(min) = &self.min {
            match version.cmp(min) {
                Ordering::Less => return false,
                Ordering::Equal if !self.min_inclusive => return false,
                _ => {}
            }
        }
        if let Some(max) = &self.max {
            match version.cmp(max) {
                Ordering::Greater => return false,
                Ordering::Equal if !self.max_inclusive => return false,
                _ => {}
            }
        }
        true
    }

    /// Lower bound, if any.
    pub fn min(&self) -> Option<&NuGetVersion> {
        self.min.as_ref()
    }

    pub fn is_min_inclusive(&self) -> bool {
        self.min_inclusive
    }

    /// Upper bound, if any.
    pub fn max(&self) -> Option<&NuGetVersion> {
        self.max.as_ref()
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl FromStr for VersionRange {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Answers whether `version` lies inside `range`.
///
/// Both arguments are parsed; either failing to parse is an error.
pub fn version_in_range(range: &str, version: &str) -> Result<bool> {
    let range = VersionRange::parse(range)?;
    let version = NuGetVersion::parse(version)?;
    Ok(range.satisfies(&version))
}
