//! Install planning: diff a resolved target against the recorded state.
//!
//! Installs and upgrades come first, in dependency order (dependencies
//! before dependents), because package import hooks may assume their
//! dependencies are already importable. Removals run after everything else,
//! dependents before their dependencies, so nothing is ever missing while a
//! survivor still depends on it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use burrow_schema::{PackageName, Version};

use crate::resolver::ResolvedGraph;

/// A single step of an install plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Materialize a package that is not currently installed.
    Install {
        /// Package to install.
        name: PackageName,
        /// Version to install.
        version: Version,
    },
    /// Replace an installed version with a different one.
    Upgrade {
        /// Package to upgrade.
        name: PackageName,
        /// Currently recorded version.
        from: Version,
        /// Version to install instead.
        to: Version,
    },
    /// Delete an installed package.
    Remove {
        /// Package to remove.
        name: PackageName,
        /// Currently recorded version, for reporting.
        version: Version,
    },
}

impl Operation {
    /// The package this operation acts on.
    pub fn name(&self) -> &PackageName {
        match self {
            Self::Install { name, .. } | Self::Upgrade { name, .. } | Self::Remove { name, .. } => {
                name
            }
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install { name, version } => write!(f, "install {name} {version}"),
            Self::Upgrade { name, from, to } => write!(f, "upgrade {name} {from} -> {to}"),
            Self::Remove { name, version } => write!(f, "remove {name} {version}"),
        }
    }
}

/// An ordered sequence of operations taking an environment from `current`
/// to the resolved target.
#[derive(Debug, Clone, Default)]
pub struct InstallPlan {
    /// The operations, in execution order.
    pub operations: Vec<Operation>,
}

impl InstallPlan {
    /// Diff the resolved target against the current state.
    ///
    /// The graph's dependency edges drive the ordering. Packages with no
    /// recorded edges (and members of dependency cycles, which admit no
    /// topological order) fall back to name order, which keeps the output
    /// deterministic.
    pub fn compute(graph: &ResolvedGraph, current: &BTreeMap<PackageName, Version>) -> Self {
        let mut operations = Vec::new();

        let mut changed: BTreeSet<PackageName> = BTreeSet::new();
        for (name, version) in &graph.versions {
            if current.get(name) != Some(version) {
                changed.insert(name.clone());
            }
        }

        let target_names: BTreeSet<PackageName> = graph.versions.keys().cloned().collect();
        for name in topological_order(&target_names, &graph.dependencies) {
            if !changed.contains(&name) {
                continue;
            }
            let version = graph.versions[&name].clone();
            match current.get(&name) {
                None => operations.push(Operation::Install { name, version }),
                Some(from) => operations.push(Operation::Upgrade {
                    name,
                    from: from.clone(),
                    to: version,
                }),
            }
        }

        let mut removed: BTreeSet<PackageName> = BTreeSet::new();
        for name in current.keys() {
            if !graph.versions.contains_key(name) {
                removed.insert(name.clone());
            }
        }
        let mut removals = topological_order(&removed, &graph.dependencies);
        removals.reverse();
        for name in removals {
            let version = current[&name].clone();
            operations.push(Operation::Remove { name, version });
        }

        Self { operations }
    }

    /// Whether the plan changes anything.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// The state that results from applying this plan to `current`.
    pub fn applied_to(
        &self,
        current: &BTreeMap<PackageName, Version>,
    ) -> BTreeMap<PackageName, Version> {
        let mut state = current.clone();
        for op in &self.operations {
            match op {
                Operation::Install { name, version } => {
                    state.insert(name.clone(), version.clone());
                }
                Operation::Upgrade { name, to, .. } => {
                    state.insert(name.clone(), to.clone());
                }
                Operation::Remove { name, .. } => {
                    state.remove(name);
                }
            }
        }
        state
    }
}

/// Kahn's algorithm over the subgraph induced by `nodes`, dependencies
/// first. Ties break lexicographically; leftover nodes (cycles) append in
/// name order.
fn topological_order(
    nodes: &BTreeSet<PackageName>,
    deps_of: &BTreeMap<PackageName, Vec<PackageName>>,
) -> Vec<PackageName> {
    let mut in_degree: BTreeMap<&PackageName, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&PackageName, Vec<&PackageName>> = BTreeMap::new();

    for name in nodes {
        let degree = deps_of
            .get(name)
            .map(|deps| {
                deps.iter()
                    .filter(|dep| nodes.contains(*dep) && *dep != name)
                    .count()
            })
            .unwrap_or(0);
        in_degree.insert(name, degree);
        if let Some(deps) = deps_of.get(name) {
            for dep in deps {
                if nodes.contains(dep) && dep != name {
                    dependents.entry(dep).or_default().push(name);
                }
            }
        }
    }

    let mut ready: BTreeSet<&PackageName> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(&name) = ready.iter().next() {
        ready.remove(name);
        order.push(name.clone());
        if let Some(deps) = dependents.get(name) {
            for dependent in deps {
                if let Some(degree) = in_degree.get_mut(*dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }
    }

    // Cycles never drain; emit the leftovers in name order so the plan
    // stays deterministic.
    if order.len() < nodes.len() {
        for name in nodes {
            if !order.contains(name) {
                order.push(name.clone());
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(s: &str) -> PackageName {
        PackageName::new(s)
    }

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn state(entries: &[(&str, &str)]) -> BTreeMap<PackageName, Version> {
        entries.iter().map(|(name, ver)| (n(name), v(ver))).collect()
    }

    fn graph(
        versions: &[(&str, &str)],
        deps: &[(&str, &[&str])],
    ) -> ResolvedGraph {
        ResolvedGraph {
            versions: state(versions),
            dependencies: deps
                .iter()
                .map(|(name, ds)| (n(name), ds.iter().map(|d| n(d)).collect()))
                .collect(),
        }
    }

    #[test]
    fn dependencies_install_before_dependents() {
        let graph = graph(
            &[("foo", "2.0"), ("bar", "1.0")],
            &[("foo", &["bar"]), ("bar", &[])],
        );
        let plan = InstallPlan::compute(&graph, &BTreeMap::new());
        let rendered: Vec<String> = plan.operations.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec!["install bar 1.0.0", "install foo 2.0.0"]
        );
    }

    #[test]
    fn identical_target_yields_empty_plan() {
        let graph = graph(&[("foo", "1.0"), ("bar", "2.0")], &[]);
        let current = state(&[("foo", "1.0"), ("bar", "2.0")]);
        let plan = InstallPlan::compute(&graph, &current);
        assert!(plan.is_empty());
    }

    #[test]
    fn version_change_becomes_an_upgrade() {
        let graph = graph(&[("foo", "2.0")], &[]);
        let current = state(&[("foo", "1.0")]);
        let plan = InstallPlan::compute(&graph, &current);
        assert_eq!(
            plan.operations,
            vec![Operation::Upgrade {
                name: n("foo"),
                from: v("1.0"),
                to: v("2.0"),
            }]
        );
    }

    #[test]
    fn removals_come_last_dependents_first() {
        // `app` depends on `lib`; both leave the target. `app` must be
        // removed before `lib`.
        let graph = graph(&[("keep", "1.0")], &[("app", &["lib"])]);
        let current = state(&[("keep", "1.0"), ("app", "1.0"), ("lib", "1.0")]);
        let plan = InstallPlan::compute(&graph, &current);
        let rendered: Vec<String> = plan.operations.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["remove app 1.0.0", "remove lib 1.0.0"]);
    }

    #[test]
    fn mixed_plan_keeps_installs_before_removes() {
        let graph = graph(&[("new", "1.0")], &[]);
        let current = state(&[("old", "1.0")]);
        let plan = InstallPlan::compute(&graph, &current);
        let rendered: Vec<String> = plan.operations.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["install new 1.0.0", "remove old 1.0.0"]);
    }

    #[test]
    fn cyclic_dependencies_still_produce_a_full_plan() {
        let graph = graph(
            &[("a", "1.0"), ("b", "1.0")],
            &[("a", &["b"]), ("b", &["a"])],
        );
        let plan = InstallPlan::compute(&graph, &BTreeMap::new());
        assert_eq!(plan.operations.len(), 2);
    }

    #[test]
    fn diamond_order_is_deterministic() {
        let graph = graph(
            &[("app", "1.0"), ("left", "1.0"), ("right", "1.0"), ("base", "1.0")],
            &[
                ("app", &["left", "right"]),
                ("left", &["base"]),
                ("right", &["base"]),
            ],
        );
        let plan = InstallPlan::compute(&graph, &BTreeMap::new());
        let rendered: Vec<String> = plan.operations.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "install base 1.0.0",
                "install left 1.0.0",
                "install right 1.0.0",
                "install app 1.0.0",
            ]
        );
    }

    #[test]
    fn applied_to_replays_the_plan() {
        let graph = graph(&[("foo", "2.0"), ("new", "1.0")], &[]);
        let current = state(&[("foo", "1.0"), ("old", "1.0")]);
        let plan = InstallPlan::compute(&graph, &current);
        let result = plan.applied_to(&current);
        assert_eq!(result, state(&[("foo", "2.0"), ("new", "1.0")]));
    }
}
