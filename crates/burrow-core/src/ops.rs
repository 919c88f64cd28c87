//! User-level operations tying the engine together.
//!
//! `install` runs the full resolve -> plan -> apply pipeline, re-planning a
//! bounded number of times when the environment changed underneath the
//! resolution. `uninstall` removes packages by name, leaving their
//! dependencies installed, and orders removals dependents-first using
//! whatever metadata the source still has.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, warn};

use burrow_schema::{PackageName, PackageSpec};

use crate::config::Config;
use crate::environment::Environment;
use crate::install::{InstallError, Installer};
use crate::plan::{InstallPlan, Operation};
use crate::resolver::{self, ResolveError, ResolvedGraph};
use crate::source::ArtifactSource;
use crate::state::StateError;

/// Failure of a user-level operation.
#[derive(Error, Debug)]
pub enum OpsError {
    /// Resolution failed (conflict or source failure).
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The transactional apply failed.
    #[error(transparent)]
    Install(#[from] InstallError),

    /// The state record failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// Uninstall named a package the environment does not have.
    #[error("package `{0}` is not installed")]
    NotInstalled(PackageName),
}

/// What an operation did, for reporting.
#[derive(Debug, Default)]
pub struct OpReport {
    /// The operations that were applied, in order. Empty when the
    /// environment already satisfied the request.
    pub operations: Vec<Operation>,
}

/// Resolve `specs` against the environment's baseline and apply the
/// resulting plan transactionally.
pub async fn install<S: ArtifactSource>(
    env: &Environment,
    specs: &[PackageSpec],
    source: &S,
    config: &Config,
) -> Result<OpReport, OpsError> {
    let store = env.state_store();
    let mut attempts = 0;
    loop {
        let baseline = store.read()?;
        let graph = resolver::resolve(specs, &baseline, source).await?;
        let plan = InstallPlan::compute(&graph, &baseline);
        if plan.is_empty() {
            debug!("requested packages already satisfied");
            return Ok(OpReport::default());
        }

        let installer = Installer::new(env, source).with_concurrency(config.fetch_concurrency);
        match installer.apply(&plan, &baseline).await {
            Ok(()) => {
                return Ok(OpReport {
                    operations: plan.operations,
                });
            }
            Err(InstallError::StaleBaseline) if attempts < config.stale_retries => {
                attempts += 1;
                warn!(attempt = attempts, "baseline changed during resolution, re-planning");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Remove packages by name. The recorded version is whatever gets removed;
/// dependencies of the removed packages stay installed.
pub async fn uninstall<S: ArtifactSource>(
    env: &Environment,
    names: &[PackageName],
    source: &S,
    config: &Config,
) -> Result<OpReport, OpsError> {
    let store = env.state_store();
    let mut attempts = 0;
    loop {
        let baseline = store.read()?;
        for name in names {
            if !baseline.contains_key(name) {
                return Err(OpsError::NotInstalled(name.clone()));
            }
        }

        let mut target = baseline.clone();
        for name in names {
            target.remove(name);
        }

        // Removal ordering wants dependency edges. The source may no longer
        // know an installed version; those packages just get name-order
        // removal.
        let mut dependencies = BTreeMap::new();
        for (name, version) in &baseline {
            match source.fetch_metadata(name, version).await {
                Ok(deps) => {
                    let mut dep_names: Vec<PackageName> =
                        deps.into_iter().map(|spec| spec.name).collect();
                    dep_names.sort();
                    dep_names.dedup();
                    dependencies.insert(name.clone(), dep_names);
                }
                Err(e) => {
                    debug!(package = %name, error = %e, "no metadata for removal ordering");
                }
            }
        }

        let graph = ResolvedGraph {
            versions: target,
            dependencies,
        };
        let plan = InstallPlan::compute(&graph, &baseline);
        if plan.is_empty() {
            return Ok(OpReport::default());
        }

        let installer = Installer::new(env, source).with_concurrency(config.fetch_concurrency);
        match installer.apply(&plan, &baseline).await {
            Ok(()) => {
                return Ok(OpReport {
                    operations: plan.operations,
                });
            }
            Err(InstallError::StaleBaseline) if attempts < config.stale_retries => {
                attempts += 1;
                warn!(attempt = attempts, "baseline changed during planning, re-planning");
            }
            Err(e) => return Err(e.into()),
        }
    }
}
