//! JSON package index over HTTP.
//!
//! Index layout: `GET {base}/{name}/index.json` returns a document listing
//! every release of the package with its artifact URL, SHA-256 checksum,
//! and declared requirements. Transient network failures are retried here
//! with exponential backoff; nothing above this layer retries.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use burrow_schema::{PackageName, PackageSpec, Sha256Hash, Version};

use super::{ArtifactSource, FetchedArtifact, SourceError};
use crate::config::Config;
use crate::io::download::{self, DownloadError};
use crate::paths::filename_from_url;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
struct IndexDocument {
    #[serde(default)]
    releases: Vec<ReleaseEntry>,
}

#[derive(Debug, Deserialize)]
struct ReleaseEntry {
    version: String,
    url: String,
    sha256: String,
    #[serde(default)]
    requires: Vec<String>,
}

/// [`ArtifactSource`] backed by a remote JSON index.
///
/// Index documents are cached for the life of the source, so a resolve call
/// hits the network at most once per package for metadata.
#[derive(Debug)]
pub struct HttpSource {
    client: Client,
    base_url: String,
    retries: u32,
    cache: Mutex<HashMap<PackageName, Arc<IndexDocument>>>,
}

impl HttpSource {
    /// Build a source from configuration (index URL, timeout, retry budget).
    pub fn new(config: &Config) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .user_agent(crate::USER_AGENT)
            .build()
            .map_err(SourceError::Client)?;
        Ok(Self {
            client,
            base_url: config.index_url.trim_end_matches('/').to_string(),
            retries: config.fetch_retries,
            cache: Mutex::new(HashMap::new()),
        })
    }

    async fn index(&self, name: &PackageName) -> Result<Arc<IndexDocument>, SourceError> {
        if let Some(doc) = self.cache.lock().await.get(name) {
            return Ok(doc.clone());
        }

        let url = format!("{}/{}/index.json", self.base_url, name);
        let mut delay = INITIAL_BACKOFF;
        let mut attempt = 0;
        let doc = loop {
            match self.fetch_index_once(&url, name).await {
                Ok(doc) => break doc,
                Err(SourceError::Network { name, source })
                    if attempt < self.retries && is_transient(&source) =>
                {
                    attempt += 1;
                    warn!(
                        package = %name,
                        attempt,
                        error = %source,
                        "transient network failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        };

        debug!(package = %name, releases = doc.releases.len(), "fetched index document");
        let doc = Arc::new(doc);
        self.cache.lock().await.insert(name.clone(), doc.clone());
        Ok(doc)
    }

    async fn fetch_index_once(
        &self,
        url: &str,
        name: &PackageName,
    ) -> Result<IndexDocument, SourceError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| network(name, e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(SourceError::PackageNotFound(name.clone()));
        }
        let response = response.error_for_status().map_err(|e| network(name, e))?;
        response
            .json::<IndexDocument>()
            .await
            .map_err(|e| network(name, e))
    }

    fn release<'a>(
        &self,
        doc: &'a IndexDocument,
        name: &PackageName,
        version: &Version,
    ) -> Result<&'a ReleaseEntry, SourceError> {
        doc.releases
            .iter()
            .find(|r| {
                Version::parse(&r.version)
                    .map(|v| v == *version)
                    .unwrap_or(false)
            })
            .ok_or_else(|| SourceError::VersionNotFound {
                name: name.clone(),
                version: version.clone(),
            })
    }
}

fn network(name: &PackageName, source: reqwest::Error) -> SourceError {
    SourceError::Network {
        name: name.clone(),
        source,
    }
}

fn is_transient(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.status().is_some_and(|s| s.is_server_error())
}

#[async_trait]
impl ArtifactSource for HttpSource {
    async fn list_versions(&self, name: &PackageName) -> Result<Vec<Version>, SourceError> {
        let doc = self.index(name).await?;
        let mut versions = Vec::with_capacity(doc.releases.len());
        for release in &doc.releases {
            let version =
                Version::parse(&release.version).map_err(|e| SourceError::InvalidIndex {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            versions.push(version);
        }
        versions.sort();
        versions.dedup();
        versions.reverse();
        Ok(versions)
    }

    async fn fetch_metadata(
        &self,
        name: &PackageName,
        version: &Version,
    ) -> Result<Vec<PackageSpec>, SourceError> {
        let doc = self.index(name).await?;
        let release = self.release(&doc, name, version)?;
        let mut specs = Vec::with_capacity(release.requires.len());
        for requirement in &release.requires {
            let spec = PackageSpec::parse(requirement).map_err(|e| SourceError::InvalidIndex {
                name: name.clone(),
                reason: format!("requirement '{requirement}': {e}"),
            })?;
            specs.push(spec);
        }
        Ok(specs)
    }

    async fn fetch_artifact(
        &self,
        name: &PackageName,
        version: &Version,
        dest: &Path,
    ) -> Result<FetchedArtifact, SourceError> {
        let doc = self.index(name).await?;
        let release = self.release(&doc, name, version)?;

        let sha256 =
            Sha256Hash::validated(&release.sha256).map_err(|e| SourceError::InvalidIndex {
                name: name.clone(),
                reason: e.to_string(),
            })?;

        let filename = match filename_from_url(&release.url) {
            "" => format!("{name}-{version}"),
            f => f.to_string(),
        };
        let path = dest.join(filename);

        let mut delay = INITIAL_BACKOFF;
        let mut attempt = 0;
        loop {
            match download::fetch_to_file(&self.client, &release.url, &path).await {
                Ok(()) => break,
                Err(DownloadError::Http(e)) if attempt < self.retries && is_transient(&e) => {
                    attempt += 1;
                    warn!(
                        package = %name,
                        attempt,
                        error = %e,
                        "transient download failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(DownloadError::Http(e)) => return Err(network(name, e)),
                Err(DownloadError::Io(e)) => return Err(SourceError::Io(e)),
            }
        }

        Ok(FetchedArtifact { path, sha256 })
    }
}
