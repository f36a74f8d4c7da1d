//! Map viewport resolution.
//!
//! Planned stops frame a session best, so they win when present. Without
//! them the breadcrumbs are used, centered on their densest cluster so a
//! single stray fix far away does not drag the map off the work area.

use crate::geo_utils::compute_center;
use crate::{GeoPoint, TrackingConfig, Viewport};

/// Mean latitude and longitude of the valid points, or `fallback` when
/// there are none.
///
/// # Example
/// ```
/// use field_session::{arithmetic_center, GeoPoint};
///
/// let fallback = GeoPoint::new(27.7172, 85.3240);
/// assert_eq!(arithmetic_center(&[], fallback), fallback);
///
/// let c = arithmetic_center(&[GeoPoint::new(10.0, 20.0), GeoPoint::new(12.0, 22.0)], fallback);
/// assert_eq!(c, GeoPoint::new(11.0, 21.0));
/// ```
pub fn arithmetic_center(points: &[GeoPoint], fallback: GeoPoint) -> GeoPoint {
    compute_center(points).unwrap_or(fallback)
}

/// Center of the densest cluster of points.
///
/// Each point counts the other points inside an axis-aligned box of
/// half-width `search_radius_deg` around it. The point with the most
/// neighbors (the first one on ties) anchors the cluster, and the result is
/// the mean of every point inside the anchor's box, anchor included.
///
/// A single point is returned unchanged; empty input returns `fallback`.
/// Invalid coordinates are ignored. O(n²), fine for one session's breadcrumbs.
pub fn densest_cluster_center(points: &[GeoPoint], search_radius_deg: f64, fallback: GeoPoint) -> GeoPoint {
    let valid: Vec<GeoPoint> = points.iter().copied().filter(GeoPoint::is_valid).collect();

    match valid.as_slice() {
        [] => return fallback,
        [only] => return *only,
        _ => {}
    }

    let in_box = |anchor: &GeoPoint, other: &GeoPoint| {
        (anchor.lat - other.lat).abs() <= search_radius_deg
            && (anchor.lng - other.lng).abs() <= search_radius_deg
    };

    let mut anchor = valid[0];
    let mut best = 0usize;
    for (i, candidate) in valid.iter().enumerate() {
        let neighbors = valid
            .iter()
            .enumerate()
            .filter(|(j, other)| *j != i && in_box(candidate, *other))
            .count();
        if neighbors > best {
            best = neighbors;
            anchor = *candidate;
        }
    }

    let cluster: Vec<GeoPoint> = valid.iter().copied().filter(|p| in_box(&anchor, p)).collect();
    arithmetic_center(&cluster, anchor)
}

/// Pick the map center for a session view.
///
/// Planned stops are averaged when any have coordinates. Otherwise the
/// breadcrumbs' densest cluster is used. With neither, the configured
/// fallback center is returned.
pub fn resolve_viewport(planned_stops: &[GeoPoint], breadcrumbs: &[GeoPoint], config: &TrackingConfig) -> Viewport {
    let fallback = config.fallback_center;

    let center = if let Some(center) = compute_center(planned_stops) {
        center
    } else if breadcrumbs.iter().any(GeoPoint::is_valid) {
        densest_cluster_center(breadcrumbs, config.cluster_search_radius_deg, fallback)
    } else {
        fallback
    };

    Viewport { center }
}
