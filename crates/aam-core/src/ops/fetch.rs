//! Fetching archive bytes for resolved packages.

use std::sync::Arc;

use aam_schema::{ArtifactType, Constraint, Sha256Digest};
use async_trait::async_trait;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::registry::{LocalRegistry, Selector};
use crate::reporter::Reporter;
use crate::resolver::{Provenance, ResolvedPackage};
use crate::retry::with_retry;
use crate::source::{Candidate, SourceStore, classify};

/// Archive bytes plus the digest they must hash to, when one is known.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    pub expected: Option<Sha256Digest>,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Retrieve the archive for `pkg`. Bytes are not verified here.
    async fn fetch(&self, pkg: &ResolvedPackage, reporter: &dyn Reporter) -> Result<Fetched>;
}

/// Reads from the configured registries and sources, with retries.
#[derive(Debug)]
pub struct StoreFetcher {
    config: Arc<Config>,
    registries: Arc<Vec<LocalRegistry>>,
    sources: Arc<SourceStore>,
}

impl StoreFetcher {
    pub fn new(
        config: Arc<Config>,
        registries: Arc<Vec<LocalRegistry>>,
        sources: Arc<SourceStore>,
    ) -> Self {
        Self {
            config,
            registries,
            sources,
        }
    }

    async fn from_registry(
        &self,
        pkg: &ResolvedPackage,
        registry_name: &str,
        reporter: &dyn Reporter,
    ) -> Result<Fetched> {
        let registry = self
            .registries
            .iter()
            .find(|r| r.name() == registry_name)
            .cloned()
            .ok_or_else(|| Error::RegistryUnreachable {
                name: registry_name.to_string(),
                reason: "not configured".into(),
            })?;
        let subject = format!("fetch {}@{}", pkg.name, pkg.version);
        let selector = Selector::Constraint(Constraint::exact(&pkg.version));

        with_retry(
            &self.config.retry,
            &subject,
            |attempt, err| reporter.retrying(&subject, attempt, &err.to_string()),
            || {
                let registry = registry.clone();
                let name = pkg.name.clone();
                let selector = selector.clone();
                async move {
                    tokio::task::spawn_blocking(move || {
                        let info = registry.select(&name, &selector)?;
                        let bytes = registry.read_blob(&info)?;
                        Ok(Fetched {
                            bytes,
                            expected: Some(info.digest),
                        })
                    })
                    .await
                    .map_err(|e| Error::Other(format!("fetch task failed: {e}")))?
                }
            },
        )
        .await
    }

    async fn from_source(
        &self,
        pkg: &ResolvedPackage,
        source_name: &str,
        revision: &str,
        path: &str,
        reporter: &dyn Reporter,
    ) -> Result<Fetched> {
        let source = self
            .config
            .source(source_name)
            .ok_or_else(|| Error::SourceUnavailable {
                name: source_name.to_string(),
                reason: "not configured".into(),
            })?;
        let candidate = source_candidate(pkg, path);
        let subject = format!("pack {}@{}", pkg.name, short_rev(revision));

        let archive = with_retry(
            &self.config.retry,
            &subject,
            |attempt, err| reporter.retrying(&subject, attempt, &err.to_string()),
            || self.sources.pack(source, &candidate, revision),
        )
        .await?;

        // Packing is deterministic, so a locked digest still applies.
        Ok(Fetched {
            bytes: archive.bytes().to_vec(),
            expected: pkg.digest.clone(),
        })
    }
}

#[async_trait]
impl Fetcher for StoreFetcher {
    async fn fetch(&self, pkg: &ResolvedPackage, reporter: &dyn Reporter) -> Result<Fetched> {
        match &pkg.provenance {
            Provenance::Registry { name } => self.from_registry(pkg, name, reporter).await,
            Provenance::Source {
                name,
                revision,
                path,
            } => {
                self.from_source(pkg, name, revision, path, reporter)
                    .await
            }
        }
    }
}

/// Rebuild the scan candidate a source package was resolved from.
fn source_candidate(pkg: &ResolvedPackage, path: &str) -> Candidate {
    Candidate {
        name: pkg.name.name().to_string(),
        kind: classify(path).unwrap_or(ArtifactType::Skill),
        path: path.to_string(),
    }
}

fn short_rev(revision: &str) -> &str {
    revision.get(..12).unwrap_or(revision)
}
