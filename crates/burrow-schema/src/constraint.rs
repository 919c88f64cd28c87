//! Version constraints and requirement specs.
//!
//! A [`Constraint`] is a conjunction of comparator clauses plus an exclusion
//! set, parsed from the requirement syntax users type on the command line
//! (`==1.0`, `>=1.0,<2.0`, `!=1.5`, `~=1.2`). A [`PackageSpec`] pairs a
//! normalized name with a constraint.

use std::fmt;
use std::str::FromStr;

use semver::{Comparator, Op, Prerelease, VersionReq};
use thiserror::Error;

use crate::types::{PackageName, Version, VersionError};

/// Error produced when a constraint or requirement spec cannot be parsed.
#[derive(Error, Debug)]
pub enum ConstraintError {
    /// A clause did not match any supported operator form.
    #[error("invalid constraint clause '{0}'")]
    InvalidClause(String),

    /// A clause operand was not a parseable version.
    #[error(transparent)]
    Version(#[from] VersionError),

    /// A requirement spec had no package name before the operator.
    #[error("missing package name in requirement '{0}'")]
    MissingName(String),

    /// The name portion contained characters outside `[A-Za-z0-9._-]`.
    #[error("invalid package name '{0}'")]
    InvalidName(String),
}

/// A predicate over [`Version`]s: a conjunction of comparator clauses and an
/// exclusion set.
///
/// The exclusion set exists because `!=` has no comparator form in semver
/// requirement syntax; everything else lowers onto semver comparators over
/// fully padded versions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Constraint {
    req: VersionReq,
    exclusions: Vec<Version>,
}

impl Constraint {
    /// The constraint satisfied by every version.
    pub fn any() -> Self {
        Self::default()
    }

    /// Whether this constraint admits every version.
    pub fn is_any(&self) -> bool {
        self.req.comparators.is_empty() && self.exclusions.is_empty()
    }

    /// Parse a comma-separated conjunction of clauses. An empty string is
    /// the universal constraint.
    pub fn parse(input: &str) -> Result<Self, ConstraintError> {
        let mut constraint = Self::default();
        for clause in input.split(',') {
            let clause = clause.trim();
            if clause.is_empty() || clause == "*" {
                continue;
            }
            constraint.push_clause(clause)?;
        }
        Ok(constraint)
    }

    /// Check whether a version satisfies every clause of this constraint.
    pub fn matches(&self, version: &Version) -> bool {
        self.req.matches(version.as_semver()) && !self.exclusions.contains(version)
    }

    fn push_clause(&mut self, clause: &str) -> Result<(), ConstraintError> {
        if let Some(rest) = clause.strip_prefix("==") {
            self.push_comparator(Op::Exact, &Version::parse(rest)?);
        } else if let Some(rest) = clause.strip_prefix("!=") {
            self.exclusions.push(Version::parse(rest)?);
        } else if let Some(rest) = clause.strip_prefix(">=") {
            self.push_comparator(Op::GreaterEq, &Version::parse(rest)?);
        } else if let Some(rest) = clause.strip_prefix("<=") {
            self.push_comparator(Op::LessEq, &Version::parse(rest)?);
        } else if let Some(rest) = clause.strip_prefix("~=") {
            self.push_compatible_release(clause, rest.trim())?;
        } else if let Some(rest) = clause.strip_prefix('>') {
            self.push_comparator(Op::Greater, &Version::parse(rest)?);
        } else if let Some(rest) = clause.strip_prefix('<') {
            self.push_comparator(Op::Less, &Version::parse(rest)?);
        } else {
            return Err(ConstraintError::InvalidClause(clause.to_string()));
        }
        Ok(())
    }

    fn push_comparator(&mut self, op: Op, version: &Version) {
        let v = version.as_semver();
        self.req.comparators.push(Comparator {
            op,
            major: v.major,
            minor: Some(v.minor),
            patch: Some(v.patch),
            pre: v.pre.clone(),
        });
    }

    /// `~=X.Y` means `>=X.Y, <X+1.0`; `~=X.Y.Z` means `>=X.Y.Z, <X.Y+1.0`.
    fn push_compatible_release(&mut self, clause: &str, rest: &str) -> Result<(), ConstraintError> {
        let components = rest.split('.').count();
        if components < 2 {
            return Err(ConstraintError::InvalidClause(clause.to_string()));
        }
        let lower = Version::parse(rest)?;
        let v = lower.as_semver();
        let (upper_major, upper_minor) = if components == 2 {
            (v.major + 1, 0)
        } else {
            (v.major, v.minor + 1)
        };
        self.push_comparator(Op::GreaterEq, &lower);
        self.req.comparators.push(Comparator {
            op: Op::Less,
            major: upper_major,
            minor: Some(upper_minor),
            patch: Some(0),
            pre: Prerelease::EMPTY,
        });
        Ok(())
    }
}

impl FromStr for Constraint {
    type Err = ConstraintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return write!(f, "*");
        }
        let mut first = true;
        for c in &self.req.comparators {
            if !first {
                write!(f, ",")?;
            }
            first = false;
            write!(f, "{}{}", op_symbol(&c.op), comparator_version(c))?;
        }
        for v in &self.exclusions {
            if !first {
                write!(f, ",")?;
            }
            first = false;
            write!(f, "!={v}")?;
        }
        Ok(())
    }
}

fn op_symbol(op: &Op) -> &'static str {
    match op {
        Op::Exact => "==",
        Op::Greater => ">",
        Op::GreaterEq => ">=",
        Op::Less => "<",
        Op::LessEq => "<=",
        _ => "",
    }
}

fn comparator_version(c: &Comparator) -> String {
    let mut s = format!(
        "{}.{}.{}",
        c.major,
        c.minor.unwrap_or(0),
        c.patch.unwrap_or(0)
    );
    if !c.pre.is_empty() {
        s.push('-');
        s.push_str(c.pre.as_str());
    }
    s
}

/// A requested package: a normalized name plus a version constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    /// The requested package name.
    pub name: PackageName,
    /// The version constraint; [`Constraint::any()`] when the request named
    /// no version.
    pub constraint: Constraint,
}

impl PackageSpec {
    /// Build a spec from already-parsed parts.
    pub fn new(name: PackageName, constraint: Constraint) -> Self {
        Self { name, constraint }
    }

    /// Parse a requirement such as `foo`, `foo==1.0`, or `foo>=1.0,<2.0`.
    pub fn parse(input: &str) -> Result<Self, ConstraintError> {
        let trimmed = input.trim();
        let split = trimmed
            .find(['=', '<', '>', '!', '~'])
            .unwrap_or(trimmed.len());
        let raw_name = trimmed[..split].trim();
        if raw_name.is_empty() {
            return Err(ConstraintError::MissingName(input.to_string()));
        }
        if !raw_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(ConstraintError::InvalidName(raw_name.to_string()));
        }
        let name = PackageName::new(raw_name);
        if name.is_empty() {
            return Err(ConstraintError::MissingName(input.to_string()));
        }
        let constraint = Constraint::parse(&trimmed[split..])?;
        Ok(Self { name, constraint })
    }
}

impl FromStr for PackageSpec {
    type Err = ConstraintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.constraint.is_any() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}{}", self.name, self.constraint)
        }
    }
}
