//! Tile sets covering the neighbourhood of one or more points.

use std::collections::HashSet;

use crate::address::{TileAddress, TileTemplate};
use crate::coords::{GeoPoint, map_to_tile};
use crate::error::Result;

/// A set of unique tile addresses.
///
/// Membership is what matters, but the set remembers the order in which
/// addresses were first inserted so that everything downstream (the diff
/// and the batch boundaries) is deterministic.
#[derive(Debug, Clone, Default)]
pub struct TileSet {
    order: Vec<TileAddress>,
    seen: HashSet<TileAddress>,
}

impl TileSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an address. Returns `false` if it was already present.
    pub fn insert(&mut self, address: TileAddress) -> bool {
        if self.seen.contains(&address) {
            return false;
        }
        self.seen.insert(address.clone());
        self.order.push(address);
        true
    }

    /// Check whether an address is in the set.
    #[must_use]
    pub fn contains(&self, address: &TileAddress) -> bool {
        self.seen.contains(address)
    }

    /// Number of unique addresses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterate in first-insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, TileAddress> {
        self.order.iter()
    }

    /// Consume the set, returning addresses in first-insertion order.
    #[must_use]
    pub fn into_vec(self) -> Vec<TileAddress> {
        self.order
    }
}

impl<'a> IntoIterator for &'a TileSet {
    type Item = &'a TileAddress;
    type IntoIter = std::slice::Iter<'a, TileAddress>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Extend<TileAddress> for TileSet {
    fn extend<I: IntoIterator<Item = TileAddress>>(&mut self, iter: I) {
        for address in iter {
            self.insert(address);
        }
    }
}

/// Build the set of tiles covering a square neighbourhood around each point.
///
/// For every point the centre tile is found at `zoom`, then every tile in
/// `[x - radius, x + radius] × [y - radius, y + radius]` is added, columns in
/// the outer loop and rows in the inner loop. A single point yields exactly
/// `(2 * radius + 1)²` addresses; overlapping neighbourhoods are deduplicated.
///
/// # Errors
///
/// Fails with [`Error::OutOfRangeInput`](crate::Error::OutOfRangeInput) if
/// any point cannot be projected. No partial set is returned.
pub fn build_tile_set(
    points: &[GeoPoint],
    zoom: u8,
    radius: u32,
    template: &TileTemplate,
) -> Result<TileSet> {
    let r = i64::from(radius);
    let mut set = TileSet::new();

    for point in points {
        let center = map_to_tile(point.latitude, point.longitude, zoom)?;
        for dx in -r..=r {
            for dy in -r..=r {
                set.insert(template.address(center.offset(dx, dy)));
            }
        }
    }

    tracing::debug!(
        points = points.len(),
        zoom,
        radius,
        tiles = set.len(),
        "built tile set"
    );

    Ok(set)
}
