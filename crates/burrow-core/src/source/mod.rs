//! Artifact sources: where versions, dependency metadata, and downloadable
//! artifacts come from.
//!
//! The engine is written against the [`ArtifactSource`] trait so resolution
//! and installation are deterministic under test. [`HttpSource`] talks to a
//! JSON package index over the network; [`MemorySource`] serves fixtures
//! from process memory.

mod http;
mod memory;

pub use http::HttpSource;
pub use memory::{FixtureError, MemorySource};

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use burrow_schema::{PackageName, PackageSpec, Sha256Hash, Version};

/// Failure modes of an artifact source.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The index has no package by this name.
    #[error("package `{0}` not found in index")]
    PackageNotFound(PackageName),

    /// The package exists but not at the requested version.
    #[error("no version {version} of `{name}` in index")]
    VersionNotFound {
        /// Package whose version was missing.
        name: PackageName,
        /// The version that was requested.
        version: Version,
    },

    /// Transport-level failure. Retryable at the fetch layer.
    #[error("network failure fetching `{name}`: {source}")]
    Network {
        /// Package being fetched when the failure occurred.
        name: PackageName,
        /// Underlying transport error.
        source: reqwest::Error,
    },

    /// The index served data the client cannot use.
    #[error("invalid index entry for `{name}`: {reason}")]
    InvalidIndex {
        /// Package whose index entry was malformed.
        name: PackageName,
        /// What was wrong with it.
        reason: String,
    },

    /// The HTTP client itself could not be constructed.
    #[error("failed to build http client: {0}")]
    Client(reqwest::Error),

    /// Local filesystem failure while storing fetched content.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A fetched artifact on local disk, plus the checksum the source declared
/// for it. Verification against the declared checksum is the installer's
/// job, not the source's.
#[derive(Debug, Clone)]
pub struct FetchedArtifact {
    /// Where the downloaded content landed.
    pub path: PathBuf,
    /// The checksum the index declared for this artifact.
    pub sha256: Sha256Hash,
}

/// Capability for listing versions, reading dependency metadata, and
/// fetching artifacts. Passed explicitly to the resolver and installer;
/// never referenced globally.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// All known versions of a package, newest first.
    async fn list_versions(&self, name: &PackageName) -> Result<Vec<Version>, SourceError>;

    /// The dependency specs a given version declares.
    async fn fetch_metadata(
        &self,
        name: &PackageName,
        version: &Version,
    ) -> Result<Vec<PackageSpec>, SourceError>;

    /// Download the artifact for a version into `dest` and return its local
    /// path together with the declared checksum.
    async fn fetch_artifact(
        &self,
        name: &PackageName,
        version: &Version,
        dest: &Path,
    ) -> Result<FetchedArtifact, SourceError>;
}
