//! Snapshot the configured registries and sources into a [`MemoryCatalog`].

use std::collections::BTreeMap;

use aam_schema::PackageName;
use futures::stream::{self, StreamExt};

use crate::error::Result;
use crate::lockfile::{LockEntry, LockFile};
use crate::ops::Context;
use crate::resolver::{CatalogEntry, MemoryCatalog, Provenance};
use crate::source::{SOURCE_VERSION, package_name};

/// When to contact source remotes while building a catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRefresh {
    /// Only clone sources that have never been synced.
    IfMissing,
    /// Fetch every source.
    Always,
}

/// Build a catalog from every registry and source in `ctx`.
///
/// Registries contribute every published version. Sources contribute their
/// current revision, plus the locked revision of any source package in
/// `lock` so that locked pins stay resolvable. Sources are synced
/// concurrently. A source that fails to sync is logged and served from its
/// existing clone, or skipped if it has none.
pub async fn build_catalog(
    ctx: &Context,
    lock: &LockFile,
    refresh: SourceRefresh,
) -> Result<MemoryCatalog> {
    let mut catalog = MemoryCatalog::new();

    for registry in ctx.registries.iter() {
        let index = registry.index()?;
        for (name, entry) in &index.packages {
            for info in &entry.versions {
                catalog.add(
                    name.clone(),
                    CatalogEntry {
                        version: info.version.clone(),
                        provenance: Provenance::Registry {
                            name: registry.name().to_string(),
                        },
                        digest: Some(info.digest.clone()),
                        dependencies: info.dependencies.clone(),
                    },
                );
            }
        }
    }

    let to_sync: Vec<_> = ctx
        .config
        .sources
        .iter()
        .filter(|s| refresh == SourceRefresh::Always || !ctx.sources.is_cloned(&s.name))
        .collect();
    let synced: Vec<_> = stream::iter(to_sync)
        .map(|source| async move { (source, ctx.sources.sync(source).await) })
        .buffer_unordered(ctx.config.concurrency.max(1))
        .collect()
        .await;
    for (source, result) in synced {
        if let Err(err) = result {
            ctx.reporter
                .warning(&format!("Could not sync source '{}': {err}", source.name));
        }
    }

    for source in &ctx.config.sources {
        if !ctx.sources.is_cloned(&source.name) {
            continue;
        }
        let Some(revision) = ctx.sources.last_revision(&source.name)? else {
            continue;
        };
        for candidate in ctx.sources.scan(source)? {
            let name = package_name(&source.name, &candidate)?;
            catalog.add(
                name,
                CatalogEntry {
                    version: SOURCE_VERSION,
                    provenance: Provenance::Source {
                        name: source.name.clone(),
                        revision: revision.clone(),
                        path: candidate.path.clone(),
                    },
                    digest: None,
                    dependencies: BTreeMap::new(),
                },
            );
        }
    }

    for (name, entry) in &lock.packages {
        if let Provenance::Source { name: source, .. } = &entry.provenance
            && ctx.config.source(source).is_some()
        {
            add_locked(&mut catalog, name, entry);
        }
    }

    tracing::debug!(packages = catalog.names().count(), "Built catalog");
    Ok(catalog)
}

fn add_locked(catalog: &mut MemoryCatalog, name: &PackageName, entry: &LockEntry) {
    catalog.add(
        name.clone(),
        CatalogEntry {
            version: entry.version.clone(),
            provenance: entry.provenance.clone(),
            digest: Some(entry.digest.clone()),
            dependencies: entry.dependencies.clone(),
        },
    );
}
