//! # Geographic Utilities
//!
//! Distance and centroid helpers shared by the session pipeline.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`to_radians`] | Degrees to radians |
//! | [`haversine_distance_km`] | Great-circle distance between two coordinates |
//! | [`polyline_length_km`] | Total length of a breadcrumb sequence |
//! | [`meters_to_degrees`] | Longitude half-width of a circle at a latitude |
//! | [`compute_center`] | Arithmetic centroid of a coordinate set |
//!
//! ## Example
//!
//! ```rust
//! use field_session::geo_utils;
//!
//! // Kathmandu to Pokhara
//! let d = geo_utils::haversine_distance_km(27.7172, 85.3240, 28.2096, 83.9856);
//! assert!(d > 140.0 && d < 160.0);
//! ```
//!
//! ## Algorithm Notes
//!
//! Distances use the haversine formula on a spherical Earth of mean radius
//! 6,371 km, via [`geo::Haversine`]. Accurate to within 0.3% for the short
//! hops between breadcrumbs and directory locations.
//!
//! All functions expect WGS84 latitude/longitude in degrees.

use crate::{GeoPoint, LocationPoint};
use geo::{Distance, Haversine, Point};

/// Mean Earth radius used by [`geo::Haversine`]
const EARTH_RADIUS_M: f64 = 6_371_008.8;

// =============================================================================
// Distance Functions
// =============================================================================

/// Convert degrees to radians.
#[inline]
pub fn to_radians(degrees: f64) -> f64 {
    degrees * std::f64::consts::PI / 180.0
}

/// Great-circle distance in kilometers between two coordinates.
///
/// Returns exactly 0 for identical coordinates and is symmetric in its
/// arguments.
///
/// # Example
///
/// ```rust
/// use field_session::geo_utils::haversine_distance_km;
///
/// let d = haversine_distance_km(27.7172, 85.3240, 27.7172, 85.3240);
/// assert_eq!(d, 0.0);
/// ```
#[inline]
pub fn haversine_distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let point1 = Point::new(lon1, lat1);
    let point2 = Point::new(lon2, lat2);
    Haversine::distance(point1, point2) / 1000.0
}

/// Distance in kilometers between two breadcrumbs.
#[inline]
pub fn point_distance_km(a: &LocationPoint, b: &LocationPoint) -> f64 {
    haversine_distance_km(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Total length of a breadcrumb sequence in kilometers.
///
/// Sums the haversine distance between consecutive points. Empty or
/// single-point sequences return 0.0.
pub fn polyline_length_km(points: &[LocationPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| point_distance_km(&w[0], &w[1]))
        .sum()
}

/// Longitude half-width, in degrees, of a circle of `meters` around a point
/// at `latitude`.
///
/// The longitude span is never smaller than the latitude span of the same
/// circle, so a square box of this half-width always contains it (before
/// wrapping at the antimeridian). Returns 180 when the circle reaches a pole.
pub fn meters_to_degrees(meters: f64, latitude: f64) -> f64 {
    let angular = meters / EARTH_RADIUS_M;
    let lat = to_radians(latitude).abs();
    if lat + angular >= std::f64::consts::FRAC_PI_2 {
        return 180.0;
    }
    // Widest longitude offset of a spherical cap
    let span = (angular.sin() / lat.cos()).min(1.0).asin();
    span.to_degrees().min(180.0)
}

// =============================================================================
// Center/Centroid Functions
// =============================================================================

/// Arithmetic mean of latitude and longitude, skipping invalid coordinates.
///
/// Returns `None` when no valid coordinate is present.
///
/// Simple averaging misbehaves across the antimeridian; beat plans cover a
/// single territory so this is not a concern here.
pub fn compute_center(points: &[GeoPoint]) -> Option<GeoPoint> {
    let (sum_lat, sum_lng, n) = points
        .iter()
        .filter(|p| p.is_valid())
        .fold((0.0, 0.0, 0usize), |(lat, lng, n), p| (lat + p.lat, lng + p.lng, n + 1));

    if n == 0 {
        return None;
    }

    Some(GeoPoint::new(sum_lat / n as f64, sum_lng / n as f64))
}

// =============================================================================
// Unit Tests
// =============================================================================
