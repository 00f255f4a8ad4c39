//! Diffing a tile set against the persistent cache.

use crate::address::TileAddress;
use crate::cache::Cache;
use crate::error::{Error, Result};
use crate::tileset::TileSet;

/// Return the candidates that are not yet cached.
///
/// Lookups are issued one at a time in the set's enumeration order and the
/// output preserves that order, so batch boundaries downstream are a
/// deterministic function of the candidate set.
///
/// The result is a snapshot: entries written by another synchronization
/// after a lookup are not seen.
///
/// An empty candidate set issues no lookups at all. Stores report that they
/// are unreachable when they are opened (see [`FilesystemCache::open`]), not
/// here.
///
/// [`FilesystemCache::open`]: crate::cache::FilesystemCache::open
///
/// # Errors
///
/// Returns [`Error::CacheUnavailable`] if any lookup fails. No partial diff
/// is produced.
pub async fn diff_against_cache<C: Cache + ?Sized>(
    candidates: &TileSet,
    cache: &C,
) -> Result<Vec<TileAddress>> {
    let mut missing = Vec::new();

    for address in candidates {
        let present = cache.contains(address).await.map_err(|e| match e {
            e @ Error::CacheUnavailable { .. } => e,
            other => Error::cache("lookup", other),
        })?;

        if present {
            tracing::trace!(%address, "cache hit");
        } else {
            tracing::trace!(%address, "cache miss");
            missing.push(address.clone());
        }
    }

    tracing::debug!(
        candidates = candidates.len(),
        missing = missing.len(),
        "diffed tile set against cache"
    );

    Ok(missing)
}
