//! Reading recorded tracks.

use std::io::BufReader;

use crate::coords::GeoPoint;
use crate::error::Result;

/// Extract the recorded positions of a GPX document.
///
/// Only track points are read, segment by segment in document order.
/// Route points and standalone waypoints mark places, not the path that was
/// travelled, and are ignored.
///
/// # Errors
///
/// Returns [`Error::Track`](crate::Error::Track) if the document is not
/// valid GPX.
pub fn parse_gpx(text: &str) -> Result<Vec<GeoPoint>> {
    let gpx = gpx::read(BufReader::new(text.as_bytes()))?;

    let points: Vec<GeoPoint> = gpx
        .tracks
        .iter()
        .flat_map(|track| &track.segments)
        .flat_map(|segment| &segment.points)
        .map(|waypoint| {
            let point = waypoint.point();
            GeoPoint::new(point.y(), point.x())
        })
        .collect();

    tracing::debug!(points = points.len(), "parsed gpx");
    Ok(points)
}
