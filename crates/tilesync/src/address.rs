//! Tile addresses: the canonical cache keys for tiles.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::coords::TileCoordinate;

/// Base URL of the default tile server (GSI standard map).
pub const DEFAULT_TILE_BASE_URL: &str = "https://cyberjapandata.gsi.go.jp/xyz/std";

/// The canonical key of a tile, shared by the diff, the messages sent to
/// the caching agent and the persistent cache.
///
/// Two tiles are the same iff their addresses are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TileAddress(String);

impl TileAddress {
    /// Wrap an existing key, e.g. one read back from the cache.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TileAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derives addresses from coordinates as `<base>/<zoom>/<x>/<y>.png`.
///
/// The layout must not change: entries stored under earlier addresses are
/// only found again if the same template produces them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileTemplate {
    base_url: String,
}

impl TileTemplate {
    /// Create a template for a tile server base URL.
    ///
    /// Trailing slashes are ignored so that `https://a/` and `https://a`
    /// produce identical keys.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url }
    }

    /// The normalized base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the address of a tile.
    #[must_use]
    pub fn address(&self, tile: TileCoordinate) -> TileAddress {
        TileAddress(format!(
            "{}/{}/{}/{}.png",
            self.base_url, tile.zoom, tile.x, tile.y
        ))
    }
}

impl Default for TileTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_BASE_URL)
    }
}
