//! Backtracking version resolution.
//!
//! Resolution is a constraint search: packages are variables, their
//! published versions are the candidate values, and dependency requirements
//! are the constraints. The search picks the most-constrained undetermined
//! package first, tries candidates newest-first (baseline version first for
//! packages already installed), and backtracks by restoring a snapshot when
//! a package's candidate set empties.
//!
//! The search is iterative - an explicit decision stack instead of
//! recursion - which keeps cycle handling trivial: a dependency edge onto an
//! already-assigned package only re-checks the constraint against the
//! assigned version and never opens a new decision point.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use thiserror::Error;
use tracing::{debug, trace};

use burrow_schema::{Constraint, PackageName, PackageSpec, Version};

use crate::source::{ArtifactSource, SourceError};

/// Output of a successful resolution: one version per reachable package,
/// plus the dependency edges discovered along the way. The planner needs
/// the edges to order operations; the flat mapping alone is not enough.
#[derive(Debug, Clone, Default)]
pub struct ResolvedGraph {
    /// The chosen version for every package reachable from the request and
    /// the baseline.
    pub versions: BTreeMap<PackageName, Version>,
    /// For each resolved package, the names it depends on at its chosen
    /// version.
    pub dependencies: BTreeMap<PackageName, Vec<PackageName>>,
}

/// One accumulated constraint on a package, with its provenance.
#[derive(Debug, Clone)]
pub struct ConstraintOrigin {
    /// The constraint itself.
    pub constraint: Constraint,
    /// The package (at the version being tried) that imposed it, or `None`
    /// for a direct request.
    pub required_by: Option<(PackageName, Version)>,
}

impl fmt::Display for ConstraintOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.required_by {
            Some((name, version)) => {
                write!(f, "{} (required by {name} {version})", self.constraint)
            }
            None => write!(f, "{} (requested)", self.constraint),
        }
    }
}

/// Why resolution failed: the package whose candidates ran out, and every
/// constraint that was in force on it, each with the package that imposed it.
#[derive(Debug, Clone)]
pub struct ConflictReport {
    /// The package that could not be assigned a version.
    pub package: PackageName,
    /// The constraints that could not be jointly satisfied.
    pub constraints: Vec<ConstraintOrigin>,
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.constraints.is_empty() {
            return write!(f, "`{}` has no installable versions", self.package);
        }
        write!(f, "no version of `{}` satisfies ", self.package)?;
        for (i, origin) in self.constraints.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{origin}")?;
        }
        Ok(())
    }
}

/// Resolution failure.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// No satisfying assignment exists; the report names the conflicting
    /// constraints.
    #[error("dependency conflict: {0}")]
    Conflict(ConflictReport),

    /// The artifact source failed.
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Compute a consistent version assignment for `requested` on top of
/// `baseline`, consulting `source` for versions and dependency metadata.
///
/// Packages already in the baseline keep their installed version whenever it
/// satisfies every accumulated constraint; otherwise the search is free to
/// move them. Read-only with respect to the environment.
pub async fn resolve<S: ArtifactSource>(
    requested: &[PackageSpec],
    baseline: &BTreeMap<PackageName, Version>,
    source: &S,
) -> Result<ResolvedGraph, ResolveError> {
    let mut search = Search {
        source,
        baseline,
        state: SearchState::default(),
        stack: Vec::new(),
        versions_cache: HashMap::new(),
        metadata_cache: HashMap::new(),
        last_conflict: None,
    };
    search.seed(requested);
    search.run().await
}

/// The mutable portion of the search, snapshotted per decision so
/// backtracking is a plain restore.
#[derive(Debug, Clone, Default)]
struct SearchState {
    assigned: BTreeMap<PackageName, Version>,
    deps_of: BTreeMap<PackageName, Vec<PackageName>>,
    constraints: BTreeMap<PackageName, Vec<ConstraintOrigin>>,
    pending: BTreeSet<PackageName>,
}

/// One decision point: a package, its satisfying candidates (in preference
/// order), a cursor over them, and the state to restore before each try.
#[derive(Debug)]
struct Frame {
    package: PackageName,
    candidates: Vec<Version>,
    next: usize,
    saved: SearchState,
}

struct Search<'a, S: ArtifactSource> {
    source: &'a S,
    baseline: &'a BTreeMap<PackageName, Version>,
    state: SearchState,
    stack: Vec<Frame>,
    versions_cache: HashMap<PackageName, Vec<Version>>,
    metadata_cache: HashMap<(PackageName, Version), Vec<PackageSpec>>,
    last_conflict: Option<ConflictReport>,
}

impl<S: ArtifactSource> Search<'_, S> {
    fn seed(&mut self, requested: &[PackageSpec]) {
        for spec in requested {
            self.state
                .constraints
                .entry(spec.name.clone())
                .or_default()
                .push(ConstraintOrigin {
                    constraint: spec.constraint.clone(),
                    required_by: None,
                });
            self.state.pending.insert(spec.name.clone());
        }
        // Everything already installed stays reachable: its version is
        // re-validated and its dependencies stay part of the closure.
        for name in self.baseline.keys() {
            self.state.pending.insert(name.clone());
        }
    }

    async fn run(&mut self) -> Result<ResolvedGraph, ResolveError> {
        loop {
            if self.state.pending.is_empty() {
                return Ok(ResolvedGraph {
                    versions: self.state.assigned.clone(),
                    dependencies: self.state.deps_of.clone(),
                });
            }

            let pending: Vec<PackageName> = self.state.pending.iter().cloned().collect();
            let mut lists: Vec<(PackageName, Vec<Version>)> = Vec::with_capacity(pending.len());
            let mut exhausted = None;
            for name in pending {
                let candidates = self.candidates(&name).await?;
                if candidates.is_empty() {
                    exhausted = Some(name);
                    break;
                }
                lists.push((name, candidates));
            }

            if let Some(name) = exhausted {
                self.record_conflict(&name);
                self.backtrack().await?;
                continue;
            }

            // Most-constrained-first, name as the deterministic tie-break.
            lists.sort_by(|a, b| (a.1.len(), &a.0).cmp(&(b.1.len(), &b.0)));
            if let Some((package, candidates)) = lists.into_iter().next() {
                trace!(package = %package, candidates = candidates.len(), "opening decision");
                self.stack.push(Frame {
                    package,
                    candidates,
                    next: 0,
                    saved: self.state.clone(),
                });
                self.backtrack().await?;
            }
        }
    }

    /// Advance the topmost frame to its next workable candidate, popping
    /// exhausted frames. Errors with the last recorded conflict when the
    /// stack runs out.
    async fn backtrack(&mut self) -> Result<(), ResolveError> {
        loop {
            let attempt = match self.stack.last_mut() {
                None => {
                    return Err(ResolveError::Conflict(self.take_conflict()));
                }
                Some(frame) => {
                    if frame.next >= frame.candidates.len() {
                        None
                    } else {
                        let version = frame.candidates[frame.next].clone();
                        frame.next += 1;
                        Some((frame.package.clone(), version, frame.saved.clone()))
                    }
                }
            };

            match attempt {
                None => {
                    self.stack.pop();
                }
                Some((package, version, saved)) => {
                    self.state = saved;
                    if self.try_assign(&package, &version).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Tentatively select `version` for `package`: record the assignment,
    /// pull in that version's dependency constraints, and check them against
    /// anything already assigned. Returns false (with a conflict recorded)
    /// if the selection is immediately inconsistent.
    async fn try_assign(
        &mut self,
        package: &PackageName,
        version: &Version,
    ) -> Result<bool, ResolveError> {
        trace!(package = %package, version = %version, "trying candidate");
        self.state
            .assigned
            .insert(package.clone(), version.clone());
        self.state.pending.remove(package);

        let deps = self.metadata(package, version).await?;
        let mut dep_names: Vec<PackageName> = deps.iter().map(|d| d.name.clone()).collect();
        dep_names.sort();
        dep_names.dedup();
        self.state.deps_of.insert(package.clone(), dep_names);

        for dep in deps {
            self.state
                .constraints
                .entry(dep.name.clone())
                .or_default()
                .push(ConstraintOrigin {
                    constraint: dep.constraint.clone(),
                    required_by: Some((package.clone(), version.clone())),
                });

            if let Some(existing) = self.state.assigned.get(&dep.name) {
                // Already decided on this search path. A compatible edge
                // closes a cycle (or a shared dependency); an incompatible
                // one sinks this candidate.
                if !dep.constraint.matches(existing) {
                    self.record_conflict(&dep.name);
                    return Ok(false);
                }
            } else {
                self.state.pending.insert(dep.name.clone());
            }
        }
        Ok(true)
    }

    /// Satisfying candidates for a package, in preference order: the
    /// baseline version first when it still satisfies everything, then the
    /// rest newest-first.
    async fn candidates(&mut self, name: &PackageName) -> Result<Vec<Version>, ResolveError> {
        let all = self.versions(name).await?;
        let origins = self.state.constraints.get(name);
        let mut result: Vec<Version> = all
            .iter()
            .filter(|v| {
                origins
                    .map(|os| os.iter().all(|o| o.constraint.matches(v)))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        if let Some(installed) = self.baseline.get(name) {
            if let Some(pos) = result.iter().position(|v| v == installed) {
                if pos > 0 {
                    let preferred = result.remove(pos);
                    result.insert(0, preferred);
                }
            }
        }
        Ok(result)
    }

    async fn versions(&mut self, name: &PackageName) -> Result<Vec<Version>, ResolveError> {
        if let Some(cached) = self.versions_cache.get(name) {
            return Ok(cached.clone());
        }
        let mut versions = match self.source.list_versions(name).await {
            Ok(versions) => versions,
            // An installed package that has vanished from the index is kept
            // at its recorded version rather than failing the whole resolve.
            Err(SourceError::PackageNotFound(_)) if self.baseline.contains_key(name) => {
                debug!(package = %name, "installed package missing from index, pinning recorded version");
                self.baseline.get(name).cloned().into_iter().collect()
            }
            Err(e) => return Err(e.into()),
        };
        if let Some(installed) = self.baseline.get(name) {
            if !versions.contains(installed) {
                versions.push(installed.clone());
            }
        }
        versions.sort();
        versions.dedup();
        versions.reverse();
        self.versions_cache.insert(name.clone(), versions.clone());
        Ok(versions)
    }

    async fn metadata(
        &mut self,
        name: &PackageName,
        version: &Version,
    ) -> Result<Vec<PackageSpec>, ResolveError> {
        let key = (name.clone(), version.clone());
        if let Some(cached) = self.metadata_cache.get(&key) {
            return Ok(cached.clone());
        }
        let deps = match self.source.fetch_metadata(name, version).await {
            Ok(deps) => deps,
            Err(SourceError::PackageNotFound(_) | SourceError::VersionNotFound { .. })
                if self.baseline.get(name) == Some(version) =>
            {
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };
        self.metadata_cache.insert(key, deps.clone());
        Ok(deps)
    }

    fn record_conflict(&mut self, name: &PackageName) {
        let constraints = self.state.constraints.get(name).cloned().unwrap_or_default();
        debug!(package = %name, "dead end: no candidate satisfies accumulated constraints");
        self.last_conflict = Some(ConflictReport {
            package: name.clone(),
            constraints,
        });
    }

    fn take_conflict(&mut self) -> ConflictReport {
        self.last_conflict.take().unwrap_or_else(|| ConflictReport {
            package: PackageName::new("unknown"),
            constraints: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn spec(s: &str) -> PackageSpec {
        PackageSpec::parse(s).unwrap()
    }

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn n(s: &str) -> PackageName {
        PackageName::new(s)
    }

    fn baseline(entries: &[(&str, &str)]) -> BTreeMap<PackageName, Version> {
        entries.iter().map(|(name, ver)| (n(name), v(ver))).collect()
    }

    #[tokio::test]
    async fn newest_satisfying_version_wins_and_pulls_dependencies() {
        let mut source = MemorySource::new();
        source.add("foo", "1.0", &[], b"foo-1.0").unwrap();
        source.add("foo", "1.2", &[], b"foo-1.2").unwrap();
        source.add("foo", "2.0", &["bar==1.0"], b"foo-2.0").unwrap();
        source.add("bar", "1.0", &[], b"bar-1.0").unwrap();

        let graph = resolve(&[spec("foo>=1.0")], &BTreeMap::new(), &source)
            .await
            .unwrap();

        assert_eq!(graph.versions.get(&n("foo")), Some(&v("2.0")));
        assert_eq!(graph.versions.get(&n("bar")), Some(&v("1.0")));
        assert_eq!(graph.dependencies.get(&n("foo")), Some(&vec![n("bar")]));
    }

    #[tokio::test]
    async fn incompatible_constraints_name_both_requesters() {
        let mut source = MemorySource::new();
        source.add("foo", "1.0", &["bar==1.0"], b"foo").unwrap();
        source.add("bar", "1.0", &[], b"bar1").unwrap();
        source.add("bar", "2.0", &[], b"bar2").unwrap();

        let err = resolve(
            &[spec("foo==1.0"), spec("bar==2.0")],
            &BTreeMap::new(),
            &source,
        )
        .await
        .unwrap_err();

        let ResolveError::Conflict(report) = err else {
            panic!("expected conflict, got {err}");
        };
        assert_eq!(report.package, n("bar"));
        assert_eq!(report.constraints.len(), 2);
        let rendered = report.to_string();
        assert!(rendered.contains("bar"), "report: {rendered}");
        assert!(rendered.contains("foo"), "report: {rendered}");
        assert!(rendered.contains("==2.0.0"), "report: {rendered}");
        assert!(rendered.contains("==1.0.0"), "report: {rendered}");
    }

    #[tokio::test]
    async fn dependency_cycles_resolve_without_duplicates() {
        let mut source = MemorySource::new();
        source.add("a", "1.0", &["b>=1.0"], b"a").unwrap();
        source.add("b", "1.0", &["c>=1.0"], b"b").unwrap();
        source.add("c", "1.0", &["a>=1.0"], b"c").unwrap();

        let graph = resolve(&[spec("a")], &BTreeMap::new(), &source)
            .await
            .unwrap();

        assert_eq!(graph.versions.len(), 3);
        for name in ["a", "b", "c"] {
            assert_eq!(graph.versions.get(&n(name)), Some(&v("1.0")));
        }
    }

    #[tokio::test]
    async fn search_backtracks_to_an_older_version() {
        let mut source = MemorySource::new();
        source.add("a", "2.0", &["c==2.0"], b"a2").unwrap();
        source.add("a", "1.0", &["c==1.0"], b"a1").unwrap();
        source.add("b", "1.0", &["c==1.0"], b"b1").unwrap();
        source.add("c", "1.0", &[], b"c1").unwrap();
        source.add("c", "2.0", &[], b"c2").unwrap();

        let graph = resolve(&[spec("a"), spec("b")], &BTreeMap::new(), &source)
            .await
            .unwrap();

        assert_eq!(graph.versions.get(&n("a")), Some(&v("1.0")));
        assert_eq!(graph.versions.get(&n("b")), Some(&v("1.0")));
        assert_eq!(graph.versions.get(&n("c")), Some(&v("1.0")));
    }

    #[tokio::test]
    async fn satisfied_baseline_package_is_left_alone() {
        let mut source = MemorySource::new();
        source.add("foo", "1.0", &[], b"foo1").unwrap();
        source.add("foo", "2.0", &[], b"foo2").unwrap();

        let graph = resolve(
            &[spec("foo>=1.0")],
            &baseline(&[("foo", "1.0")]),
            &source,
        )
        .await
        .unwrap();

        assert_eq!(graph.versions.get(&n("foo")), Some(&v("1.0")));
    }

    #[tokio::test]
    async fn baseline_package_moves_when_constraints_force_it() {
        let mut source = MemorySource::new();
        source.add("foo", "1.0", &[], b"foo1").unwrap();
        source.add("foo", "2.0", &[], b"foo2").unwrap();

        let graph = resolve(
            &[spec("foo>=2.0")],
            &baseline(&[("foo", "1.0")]),
            &source,
        )
        .await
        .unwrap();

        assert_eq!(graph.versions.get(&n("foo")), Some(&v("2.0")));
    }

    #[tokio::test]
    async fn installed_package_missing_from_index_is_pinned() {
        let mut source = MemorySource::new();
        source.add("foo", "1.0", &[], b"foo").unwrap();

        let graph = resolve(
            &[spec("foo")],
            &baseline(&[("legacy", "0.9")]),
            &source,
        )
        .await
        .unwrap();

        assert_eq!(graph.versions.get(&n("foo")), Some(&v("1.0")));
        assert_eq!(graph.versions.get(&n("legacy")), Some(&v("0.9")));
    }

    #[tokio::test]
    async fn unsatisfiable_request_reports_instead_of_looping() {
        let mut source = MemorySource::new();
        source.add("foo", "1.0", &[], b"foo").unwrap();

        let err = resolve(&[spec("foo==3.0")], &BTreeMap::new(), &source)
            .await
            .unwrap_err();

        let ResolveError::Conflict(report) = err else {
            panic!("expected conflict, got {err}");
        };
        assert_eq!(report.package, n("foo"));
        assert!(report.to_string().contains("==3.0.0"));
    }

    #[tokio::test]
    async fn conflicting_direct_requests_are_reported() {
        let mut source = MemorySource::new();
        source.add("foo", "1.0", &[], b"foo1").unwrap();
        source.add("foo", "2.0", &[], b"foo2").unwrap();

        let err = resolve(
            &[spec("foo==1.0"), spec("foo==2.0")],
            &BTreeMap::new(),
            &source,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ResolveError::Conflict(_)));
    }

    #[tokio::test]
    async fn unknown_package_is_a_source_error_not_a_conflict() {
        let source = MemorySource::new();
        let err = resolve(&[spec("ghost")], &BTreeMap::new(), &source)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Source(SourceError::PackageNotFound(_))
        ));
    }

    #[tokio::test]
    async fn transitive_constraints_narrow_shared_dependencies() {
        let mut source = MemorySource::new();
        source.add("app", "1.0", &["lib>=1.0", "util>=1.0"], b"app").unwrap();
        source.add("util", "1.0", &["lib<2.0"], b"util").unwrap();
        source.add("lib", "1.0", &[], b"lib1").unwrap();
        source.add("lib", "2.0", &[], b"lib2").unwrap();

        let graph = resolve(&[spec("app")], &BTreeMap::new(), &source)
            .await
            .unwrap();

        assert_eq!(graph.versions.get(&n("lib")), Some(&v("1.0")));
    }
}
