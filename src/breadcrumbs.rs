//! Breadcrumb de-noising.
//!
//! Stationary GPS receivers jitter by a few meters between fixes. Keeping
//! every fix draws a scribble on the map and inflates the trip distance, so
//! the route is reduced to fixes that moved a minimum distance from the
//! previously kept fix. The newest fix is always kept so the route ends
//! where the employee currently is.

use crate::geo_utils::point_distance_km;
use crate::{LocationPoint, TrackingConfig};

/// Filter a breadcrumb sequence using the configured minimum distance.
///
/// # Example
/// ```
/// use field_session::{breadcrumbs, LocationPoint, TrackingConfig};
///
/// let raw = vec![
///     LocationPoint::new(27.71720, 85.3240, 0),
///     LocationPoint::new(27.71721, 85.3240, 1_000), // ~1 m jitter
///     LocationPoint::new(27.71730, 85.3240, 2_000),
///     LocationPoint::new(27.71820, 85.3240, 3_000), // ~110 m on
/// ];
/// let kept = breadcrumbs::filter_breadcrumbs(&raw, &TrackingConfig::default());
/// assert_eq!(kept.len(), 2);
/// assert_eq!(kept.last().unwrap().timestamp, 3_000);
/// ```
pub fn filter_breadcrumbs(points: &[LocationPoint], config: &TrackingConfig) -> Vec<LocationPoint> {
    filter_breadcrumbs_with_threshold(points, config.breadcrumb_min_distance_km)
}

/// Filter a breadcrumb sequence, keeping fixes more than `min_distance_km`
/// from the last kept fix.
///
/// The input is sorted by timestamp first (stable, so equal timestamps keep
/// their receipt order). The first fix is always kept, and so is the last.
pub fn filter_breadcrumbs_with_threshold(
    points: &[LocationPoint],
    min_distance_km: f64,
) -> Vec<LocationPoint> {
    let mut sorted: Vec<&LocationPoint> = points.iter().collect();
    sorted.sort_by_key(|p| p.timestamp);

    let Some((first, rest)) = sorted.split_first() else {
        return Vec::new();
    };

    let mut kept: Vec<LocationPoint> = vec![(*first).clone()];
    let last_index = rest.len().saturating_sub(1);

    for (i, point) in rest.iter().enumerate() {
        let anchor = &kept[kept.len() - 1];
        if i == last_index || point_distance_km(anchor, point) > min_distance_km {
            kept.push((*point).clone());
        }
    }

    kept
}
