//! Transactional plan execution.
//!
//! Every operation stages into a tempdir on the environment's own volume:
//! artifacts are fetched (bounded worker pool), verified against their
//! declared checksums, and materialized as package trees, all without
//! touching the live environment. Only when every operation has staged does
//! commit run: displaced live directories move into a staging-side backup,
//! staged directories rename into place, and the state record is replaced
//! atomically. Any failure before the state write rolls the swaps back, so
//! the environment is byte-identical to its pre-apply state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use burrow_schema::{PackageName, Sha256Hash, Version};

use crate::environment::Environment;
use crate::lock::{EnvLock, LockError};
use crate::plan::{InstallPlan, Operation};
use crate::source::{ArtifactSource, SourceError};
use crate::state::StateError;

/// Installer failure. Carries enough context to name the failing operation.
#[derive(Error, Debug)]
pub enum InstallError {
    /// Another process holds the environment's lock.
    #[error("environment is busy (another process is modifying it)")]
    Busy,

    /// The recorded state no longer matches the baseline the plan was
    /// computed against. The caller re-resolves and re-plans.
    #[error("environment changed since resolution began")]
    StaleBaseline,

    /// A fetched artifact did not match its declared checksum. Fatal for
    /// the operation; never retried.
    #[error("checksum mismatch for {name} {version}: expected {expected}, got {actual}")]
    Checksum {
        /// Package whose artifact failed verification.
        name: PackageName,
        /// Version being staged.
        version: Version,
        /// Checksum the source declared.
        expected: Sha256Hash,
        /// Checksum of the bytes actually fetched.
        actual: Sha256Hash,
    },

    /// The artifact source failed while staging an operation.
    #[error("failed to fetch {name} {version}: {source}")]
    Fetch {
        /// Package being fetched.
        name: PackageName,
        /// Version being fetched.
        version: Version,
        /// Underlying source failure.
        #[source]
        source: SourceError,
    },

    /// The apply was cancelled between operations. Staging is discarded
    /// exactly as on failure.
    #[error("install cancelled")]
    Cancelled,

    /// The state record could not be read or committed.
    #[error(transparent)]
    State(#[from] StateError),

    /// Filesystem failure; the context names the step.
    #[error("{context}: {source}")]
    Io {
        /// What the installer was doing.
        context: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// A live-tree mutation performed during commit, remembered so a later
/// failure can undo it.
#[derive(Debug)]
struct Swap {
    live: PathBuf,
    backup: Option<PathBuf>,
    placed: bool,
}

/// Executes an [`InstallPlan`] against one environment.
#[derive(Debug)]
pub struct Installer<'a, S: ArtifactSource> {
    env: &'a Environment,
    source: &'a S,
    concurrency: usize,
    cancel: CancellationToken,
}

impl<'a, S: ArtifactSource> Installer<'a, S> {
    /// An installer with the default fetch concurrency.
    pub fn new(env: &'a Environment, source: &'a S) -> Self {
        Self {
            env,
            source,
            concurrency: 4,
            cancel: CancellationToken::new(),
        }
    }

    /// Bound the artifact fetch worker pool.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// A token that cancels the apply at the next operation boundary.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Apply the plan. `expected` is the baseline the plan was computed
    /// against; if the environment's recorded state differs under the lock,
    /// nothing happens and [`InstallError::StaleBaseline`] is returned.
    pub async fn apply(
        &self,
        plan: &InstallPlan,
        expected: &BTreeMap<PackageName, Version>,
    ) -> Result<(), InstallError> {
        let _lock = match EnvLock::acquire(&self.env.lock_path()) {
            Ok(lock) => lock,
            Err(LockError::Busy) => return Err(InstallError::Busy),
            Err(LockError::Io(e)) => {
                return Err(io_ctx("acquiring environment lock", e));
            }
        };

        let store = self.env.state_store();
        let current = store.read()?;
        if current != *expected {
            return Err(InstallError::StaleBaseline);
        }
        if plan.is_empty() {
            debug!("empty plan, nothing to apply");
            return Ok(());
        }

        // Staging lives inside the environment root so the final renames
        // never cross a filesystem boundary.
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(self.env.root())
            .map_err(|e| io_ctx("creating staging directory", e))?;
        let fetch_dir = staging.path().join("fetch");
        let pkgs_dir = staging.path().join("pkgs");
        let backup_dir = staging.path().join("backup");
        for dir in [&fetch_dir, &pkgs_dir, &backup_dir] {
            std::fs::create_dir_all(dir).map_err(|e| io_ctx("creating staging directory", e))?;
        }

        let targets: Vec<(&PackageName, &Version)> = plan
            .operations
            .iter()
            .filter_map(|op| match op {
                Operation::Install { name, version } => Some((name, version)),
                Operation::Upgrade { name, to, .. } => Some((name, to)),
                Operation::Remove { .. } => None,
            })
            .collect();

        info!(
            operations = plan.operations.len(),
            fetches = targets.len(),
            "staging plan"
        );
        let mut staged = futures::stream::iter(
            targets
                .into_iter()
                .map(|(name, version)| self.stage_one(&fetch_dir, &pkgs_dir, name, version)),
        )
        .buffer_unordered(self.concurrency);
        while let Some(result) = staged.next().await {
            result?;
        }
        drop(staged);

        if self.cancel.is_cancelled() {
            return Err(InstallError::Cancelled);
        }

        // Single-threaded commit: the only section that mutates the live
        // tree, and every mutation is an undoable rename.
        let mut completed: Vec<Swap> = Vec::new();
        if let Err(e) = self.commit_swaps(plan, &pkgs_dir, &backup_dir, &mut completed) {
            self.rollback(&completed);
            return Err(e);
        }

        let target = plan.applied_to(expected);
        if let Err(e) = store.write(&target) {
            self.rollback(&completed);
            return Err(e.into());
        }

        info!(packages = target.len(), "plan applied");
        Ok(())
    }

    /// Fetch, verify, and materialize one package into staging.
    async fn stage_one(
        &self,
        fetch_dir: &Path,
        pkgs_dir: &Path,
        name: &PackageName,
        version: &Version,
    ) -> Result<(), InstallError> {
        if self.cancel.is_cancelled() {
            return Err(InstallError::Cancelled);
        }

        let fetch_dest = fetch_dir.join(name.as_str());
        tokio::fs::create_dir_all(&fetch_dest)
            .await
            .map_err(|e| io_ctx(format!("staging {name}"), e))?;

        let artifact = self
            .source
            .fetch_artifact(name, version, &fetch_dest)
            .await
            .map_err(|e| InstallError::Fetch {
                name: name.clone(),
                version: version.clone(),
                source: e,
            })?;

        let artifact_path = artifact.path.clone();
        let actual = tokio::task::spawn_blocking(move || Sha256Hash::compute_file(&artifact_path))
            .await
            .map_err(|e| io_ctx("hashing artifact", std::io::Error::other(e)))?
            .map_err(|e| io_ctx(format!("hashing artifact for {name}"), e))?;
        if actual != artifact.sha256 {
            return Err(InstallError::Checksum {
                name: name.clone(),
                version: version.clone(),
                expected: artifact.sha256,
                actual,
            });
        }

        let pkg_dir = pkgs_dir.join(name.as_str());
        tokio::fs::create_dir_all(&pkg_dir)
            .await
            .map_err(|e| io_ctx(format!("staging {name}"), e))?;

        if is_tar_gz(&artifact.path) {
            let archive = artifact.path.clone();
            let dest = pkg_dir.clone();
            tokio::task::spawn_blocking(move || unpack_tar_gz(&archive, &dest))
                .await
                .map_err(|e| io_ctx("unpacking artifact", std::io::Error::other(e)))?
                .map_err(|e| io_ctx(format!("unpacking artifact for {name}"), e))?;
        } else {
            let file_name = artifact
                .path
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(name.as_str()));
            tokio::fs::copy(&artifact.path, pkg_dir.join(file_name))
                .await
                .map_err(|e| io_ctx(format!("staging {name}"), e))?;
        }

        debug!(package = %name, version = %version, "staged");
        Ok(())
    }

    fn commit_swaps(
        &self,
        plan: &InstallPlan,
        pkgs_dir: &Path,
        backup_dir: &Path,
        completed: &mut Vec<Swap>,
    ) -> Result<(), InstallError> {
        let site = self.env.site_packages();
        std::fs::create_dir_all(&site).map_err(|e| io_ctx("preparing site-packages", e))?;

        for op in &plan.operations {
            let name = op.name();
            let live = site.join(name.as_str());
            match op {
                Operation::Remove { .. } => {
                    // A recorded package whose tree is already gone is
                    // nothing to undo.
                    if live.exists() {
                        let backup = backup_dir.join(name.as_str());
                        std::fs::rename(&live, &backup)
                            .map_err(|e| io_ctx(format!("commit of '{op}'"), e))?;
                        completed.push(Swap {
                            live,
                            backup: Some(backup),
                            placed: false,
                        });
                    }
                }
                Operation::Install { .. } | Operation::Upgrade { .. } => {
                    let staged = pkgs_dir.join(name.as_str());
                    let mut backup = None;
                    if live.exists() {
                        let displaced = backup_dir.join(name.as_str());
                        std::fs::rename(&live, &displaced)
                            .map_err(|e| io_ctx(format!("commit of '{op}'"), e))?;
                        backup = Some(displaced);
                    }
                    if let Err(e) = std::fs::rename(&staged, &live) {
                        // Keep the displaced dir restorable before bailing.
                        completed.push(Swap {
                            live: live.clone(),
                            backup,
                            placed: false,
                        });
                        return Err(io_ctx(format!("commit of '{op}'"), e));
                    }
                    completed.push(Swap {
                        live,
                        backup,
                        placed: true,
                    });
                }
            }
            debug!(operation = %op, "committed");
        }
        Ok(())
    }

    /// Best-effort undo of committed swaps, newest first.
    fn rollback(&self, completed: &[Swap]) {
        info!(swaps = completed.len(), "rolling back live-tree changes");
        for swap in completed.iter().rev() {
            if swap.placed {
                if let Err(e) = std::fs::remove_dir_all(&swap.live) {
                    error!(path = %swap.live.display(), error = %e, "rollback: failed to remove placed dir");
                }
            }
            if let Some(backup) = &swap.backup {
                if let Err(e) = std::fs::rename(backup, &swap.live) {
                    error!(path = %swap.live.display(), error = %e, "rollback: failed to restore backup");
                }
            }
        }
    }
}

fn io_ctx(context: impl Into<String>, source: std::io::Error) -> InstallError {
    InstallError::Io {
        context: context.into(),
        source,
    }
}

fn is_tar_gz(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name.ends_with(".tar.gz") || name.ends_with(".tgz")
}

fn unpack_tar_gz(archive: &Path, dest: &Path) -> std::io::Result<()> {
    let file = std::fs::File::open(archive)?;
    let mut tar = tar::Archive::new(flate2::read::GzDecoder::new(file));
    tar.unpack(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_detection_is_by_suffix() {
        assert!(is_tar_gz(Path::new("pkg-1.0.tar.gz")));
        assert!(is_tar_gz(Path::new("PKG.TGZ")));
        assert!(!is_tar_gz(Path::new("pkg-1.0.whl")));
        assert!(!is_tar_gz(Path::new("pkg-1.0.gz")));
    }

    #[test]
    fn unpack_round_trips_a_small_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("pkg.tar.gz");

        let file = std::fs::File::create(&archive_path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let payload = b"print('hello')\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(payload.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "pkg/__init__.py", payload.as_slice())
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let dest = dir.path().join("out");
        std::fs::create_dir_all(&dest).unwrap();
        unpack_tar_gz(&archive_path, &dest).unwrap();
        assert_eq!(
            std::fs::read(dest.join("pkg/__init__.py")).unwrap(),
            payload
        );
    }
}
