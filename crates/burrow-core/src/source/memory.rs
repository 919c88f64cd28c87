//! Deterministic in-process artifact source.
//!
//! Serves versions, metadata, and artifact payloads from memory. Used by the
//! engine's tests and by anything that needs fully reproducible resolution
//! without a network.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;

use burrow_schema::{ConstraintError, PackageName, PackageSpec, Sha256Hash, Version, VersionError};

use super::{ArtifactSource, FetchedArtifact, SourceError};

use thiserror::Error;

/// Error building a [`MemorySource`] fixture.
#[derive(Error, Debug)]
pub enum FixtureError {
    /// A version string in the fixture did not parse.
    #[error(transparent)]
    Version(#[from] VersionError),

    /// A requirement string in the fixture did not parse.
    #[error(transparent)]
    Requirement(#[from] ConstraintError),

    /// `corrupt` named a release that was never added.
    #[error("no release {version} of `{name}` in fixture")]
    UnknownRelease {
        /// Package named by the call.
        name: PackageName,
        /// Version named by the call.
        version: Version,
    },
}

#[derive(Debug, Clone)]
struct Release {
    requires: Vec<PackageSpec>,
    payload: Vec<u8>,
    declared: Sha256Hash,
    filename: String,
}

/// [`ArtifactSource`] holding everything in memory.
#[derive(Debug, Default)]
pub struct MemorySource {
    packages: HashMap<PackageName, BTreeMap<Version, Release>>,
}

impl MemorySource {
    /// An empty source; populate it with [`add`](Self::add).
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a release with its declared requirements and payload bytes.
    /// The declared checksum is computed from the payload.
    pub fn add(
        &mut self,
        name: &str,
        version: &str,
        requires: &[&str],
        payload: &[u8],
    ) -> Result<(), FixtureError> {
        self.insert(name, version, requires, payload, "bin")
    }

    /// Register a release whose payload is a gzipped tarball; the served
    /// filename carries the `.tar.gz` suffix so installers unpack it.
    pub fn add_archive(
        &mut self,
        name: &str,
        version: &str,
        requires: &[&str],
        payload: &[u8],
    ) -> Result<(), FixtureError> {
        self.insert(name, version, requires, payload, "tar.gz")
    }

    fn insert(
        &mut self,
        name: &str,
        version: &str,
        requires: &[&str],
        payload: &[u8],
        extension: &str,
    ) -> Result<(), FixtureError> {
        let parsed: Result<Vec<PackageSpec>, ConstraintError> =
            requires.iter().map(|r| PackageSpec::parse(r)).collect();
        let name = PackageName::new(name);
        let version = Version::parse(version)?;
        let release = Release {
            requires: parsed?,
            payload: payload.to_vec(),
            declared: Sha256Hash::compute(payload),
            filename: format!("{name}-{version}.{extension}"),
        };
        self.packages
            .entry(name)
            .or_default()
            .insert(version, release);
        Ok(())
    }

    /// Corrupt a release's declared checksum so fetching it trips the
    /// installer's verification.
    pub fn corrupt(&mut self, name: &str, version: &str) -> Result<(), FixtureError> {
        let name = PackageName::new(name);
        let version = Version::parse(version)?;
        let release = self
            .packages
            .get_mut(&name)
            .and_then(|releases| releases.get_mut(&version))
            .ok_or_else(|| FixtureError::UnknownRelease {
                name: name.clone(),
                version: version.clone(),
            })?;
        release.declared = Sha256Hash::compute(b"not the real payload");
        Ok(())
    }

    fn release(
        &self,
        name: &PackageName,
        version: &Version,
    ) -> Result<&Release, SourceError> {
        let releases = self
            .packages
            .get(name)
            .ok_or_else(|| SourceError::PackageNotFound(name.clone()))?;
        releases
            .get(version)
            .ok_or_else(|| SourceError::VersionNotFound {
                name: name.clone(),
                version: version.clone(),
            })
    }
}

#[async_trait]
impl ArtifactSource for MemorySource {
    async fn list_versions(&self, name: &PackageName) -> Result<Vec<Version>, SourceError> {
        let releases = self
            .packages
            .get(name)
            .ok_or_else(|| SourceError::PackageNotFound(name.clone()))?;
        Ok(releases.keys().rev().cloned().collect())
    }

    async fn fetch_metadata(
        &self,
        name: &PackageName,
        version: &Version,
    ) -> Result<Vec<PackageSpec>, SourceError> {
        Ok(self.release(name, version)?.requires.clone())
    }

    async fn fetch_artifact(
        &self,
        name: &PackageName,
        version: &Version,
        dest: &Path,
    ) -> Result<FetchedArtifact, SourceError> {
        let release = self.release(name, version)?;
        let path = dest.join(&release.filename);
        tokio::fs::write(&path, &release.payload).await?;
        Ok(FetchedArtifact {
            path,
            sha256: release.declared.clone(),
        })
    }
}
