//! Web Mercator (slippy map) tile coordinates.
//!
//! Converts geographic coordinates into the integer `zoom/x/y` grid used by
//! common raster tile servers.

use std::f64::consts::PI;
use std::fmt;

use crate::error::{Error, Result};

/// Latitude limit of the Web Mercator projection, in degrees.
///
/// Beyond this the projected row leaves the tile grid, and at the poles the
/// projection itself is undefined.
pub const MAX_LAT: f64 = 85.051_128_779_806_59;

/// Highest zoom level accepted by [`map_to_tile`].
pub const MAX_ZOOM: u8 = 20;

/// A geographic position in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    /// Latitude in degrees, positive north.
    pub latitude: f64,
    /// Longitude in degrees, positive east.
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a new point.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A tile in the slippy map grid.
///
/// Tiles produced by [`map_to_tile`] lie in `[0, 2^zoom)` on both axes.
/// Neighbourhood enumeration may step outside that range at the edges of the
/// world; such coordinates are addressed verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoordinate {
    /// Zoom level.
    pub zoom: u8,
    /// Column, 0 at the antimeridian going east.
    pub x: i64,
    /// Row, 0 at the north edge going south.
    pub y: i64,
}

impl TileCoordinate {
    /// Create a new tile coordinate.
    #[must_use]
    pub fn new(zoom: u8, x: i64, y: i64) -> Self {
        Self { zoom, x, y }
    }

    /// Return the tile offset by `dx` columns and `dy` rows.
    #[must_use]
    pub fn offset(self, dx: i64, dy: i64) -> Self {
        Self {
            zoom: self.zoom,
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Number of tiles along one axis at `zoom`.
#[must_use]
pub fn tiles_per_axis(zoom: u8) -> i64 {
    1_i64 << zoom
}

/// Project a geographic position onto the tile grid.
///
/// ```text
/// x = floor((lon + 180) / 360 * 2^zoom)
/// y = floor((1 - ln(tan(lat) + sec(lat)) / π) / 2 * 2^zoom)
/// ```
///
/// Longitude 180 and latitude `-MAX_LAT` land exactly on the far edge of the
/// grid and are folded into the last column/row.
///
/// # Errors
///
/// Returns [`Error::OutOfRangeInput`] for non-finite input, latitudes beyond
/// [`MAX_LAT`] (including the poles), longitudes outside `[-180, 180]`, or a
/// zoom above [`MAX_ZOOM`].
pub fn map_to_tile(lat: f64, lon: f64, zoom: u8) -> Result<TileCoordinate> {
    if !lat.is_finite() || lat.abs() > MAX_LAT {
        return Err(Error::OutOfRangeInput {
            context: "latitude",
            detail: format!("{lat} is outside ±{MAX_LAT}"),
        });
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Err(Error::OutOfRangeInput {
            context: "longitude",
            detail: format!("{lon} is outside ±180"),
        });
    }
    if zoom > MAX_ZOOM {
        return Err(Error::OutOfRangeInput {
            context: "zoom",
            detail: format!("{zoom} is above {MAX_ZOOM}"),
        });
    }

    let n = tiles_per_axis(zoom);
    #[allow(clippy::cast_precision_loss)]
    let scale = n as f64;

    let lat_rad = lat * PI / 180.0;
    let x = ((lon + 180.0) / 360.0 * scale).floor();
    let y = ((1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * scale).floor();

    if !y.is_finite() {
        return Err(Error::OutOfRangeInput {
            context: "latitude",
            detail: format!("{lat} does not project to a finite row"),
        });
    }

    #[allow(clippy::cast_possible_truncation)]
    let (x, y) = (x as i64, y as i64);

    Ok(TileCoordinate {
        zoom,
        x: x.clamp(0, n - 1),
        y: y.clamp(0, n - 1),
    })
}

/// Return the north-west corner of a tile.
#[must_use]
pub fn tile_to_lat_lon(tile: &TileCoordinate) -> GeoPoint {
    #[allow(clippy::cast_precision_loss)]
    let (n, x, y) = (
        tiles_per_axis(tile.zoom) as f64,
        tile.x as f64,
        tile.y as f64,
    );

    let lon = x / n * 360.0 - 180.0;
    let lat = (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees();

    GeoPoint::new(lat, lon)
}
