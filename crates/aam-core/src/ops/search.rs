//! Search across every configured registry.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ops::Context;
use crate::registry::{SearchHit, rank_hits};

/// Search every registry for `query` and merge the hits into one ranking.
///
/// A registry that cannot be read is reported as a warning and left out.
pub async fn search(ctx: &Context, query: &str) -> Result<Vec<SearchHit>> {
    let registries = Arc::clone(&ctx.registries);
    let query = query.to_string();
    let (mut hits, unreadable) = tokio::task::spawn_blocking(move || {
        let mut hits = Vec::new();
        let mut unreadable = Vec::new();
        for registry in registries.iter() {
            match registry.search(&query) {
                Ok(found) => hits.extend(found),
                Err(err) => unreadable.push((registry.name().to_string(), err)),
            }
        }
        (hits, unreadable)
    })
    .await
    .map_err(|e| Error::Other(format!("search task failed: {e}")))?;

    for (name, err) in unreadable {
        ctx.reporter
            .warning(&format!("Could not search registry '{name}': {err}"));
    }
    hits.sort_by(rank_hits);
    Ok(hits)
}
