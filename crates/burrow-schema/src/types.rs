use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A normalized package name.
///
/// Comparisons between package names are canonical: the input is lowercased
/// and every run of `-`, `_`, or `.` collapses to a single `-`, so
/// `Foo_bar`, `foo.bar`, and `foo-bar` all name the same package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageName(String);

impl PackageName {
    /// Create a new package name, normalizing the input.
    pub fn new(name: &str) -> Self {
        let mut out = String::with_capacity(name.len());
        let mut in_separator = false;
        for c in name.trim().chars() {
            if matches!(c, '-' | '_' | '.') {
                in_separator = true;
            } else {
                if in_separator && !out.is_empty() {
                    out.push('-');
                }
                in_separator = false;
                out.extend(c.to_lowercase());
            }
        }
        Self(out)
    }

    /// Return the normalized name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the normalized name is empty (the input had no usable characters).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for PackageName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PackageName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PackageName {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl PartialEq<str> for PackageName {
    fn eq(&self, other: &str) -> bool {
        self.0 == *PackageName::new(other).as_str()
    }
}

impl PartialEq<&str> for PackageName {
    fn eq(&self, other: &&str) -> bool {
        self == *other
    }
}

/// Error produced when a version string cannot be parsed.
#[derive(Error, Debug)]
#[error("invalid version '{input}': {source}")]
pub struct VersionError {
    /// The offending input string.
    pub input: String,
    #[source]
    source: semver::Error,
}

/// A package version with a total order and a canonical string form.
///
/// Wraps a semantic version. Parsing is lenient about missing components:
/// `"1.0"` parses as `1.0.0`, and the canonical `Display` form is always the
/// fully padded version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(semver::Version);

impl Version {
    /// Parse a version string, padding missing minor/patch components.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let padded = pad_version(input.trim());
        match semver::Version::parse(&padded) {
            Ok(v) => Ok(Self(v)),
            Err(source) => Err(VersionError {
                input: input.to_string(),
                source,
            }),
        }
    }

    /// Access the underlying semantic version.
    pub fn as_semver(&self) -> &semver::Version {
        &self.0
    }
}

/// Pad a dotted version core out to `major.minor.patch`, leaving any
/// pre-release or build suffix attached.
fn pad_version(input: &str) -> String {
    let (core, suffix) = match input.find(['-', '+']) {
        Some(i) => input.split_at(i),
        None => (input, ""),
    };
    match core.matches('.').count() {
        0 => format!("{core}.0.0{suffix}"),
        1 => format!("{core}.0{suffix}"),
        _ => input.to_string(),
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_normalization_is_canonical() {
        assert_eq!(PackageName::new("Foo_Bar"), PackageName::new("foo-bar"));
        assert_eq!(PackageName::new("foo.bar"), PackageName::new("foo-bar"));
        assert_eq!(PackageName::new("foo__bar"), PackageName::new("foo-bar"));
        assert_eq!(PackageName::new("Requests").as_str(), "requests");
    }

    #[test]
    fn name_compares_against_raw_strings() {
        let name = PackageName::new("typing_extensions");
        assert_eq!(name, "Typing.Extensions");
        assert_eq!(name.as_str(), "typing-extensions");
    }

    #[test]
    fn version_parse_pads_components() {
        assert_eq!(Version::parse("1.0").unwrap().to_string(), "1.0.0");
        assert_eq!(Version::parse("2").unwrap().to_string(), "2.0.0");
        assert_eq!(Version::parse("1.2.3").unwrap().to_string(), "1.2.3");
    }

    #[test]
    fn version_parse_keeps_prerelease() {
        let v = Version::parse("1.0-rc.1").unwrap();
        assert_eq!(v.to_string(), "1.0.0-rc.1");
    }

    #[test]
    fn version_ordering_is_total() {
        let mut versions = vec![
            Version::parse("1.2").unwrap(),
            Version::parse("2.0").unwrap(),
            Version::parse("1.0").unwrap(),
        ];
        versions.sort();
        let rendered: Vec<String> = versions.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["1.0.0", "1.2.0", "2.0.0"]);
    }

    #[test]
    fn version_rejects_garbage() {
        assert!(Version::parse("not-a-version").is_err());
        assert!(Version::parse("").is_err());
    }
}
