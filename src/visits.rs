//! Visit resolution.
//!
//! Beat-plan visit records are authoritative for which stops were completed.
//! Archived sessions occasionally come back without any visit records; for
//! those the visited set is rebuilt from breadcrumbs with a proximity
//! geofence around each directory location.

use std::collections::BTreeSet;

use log::debug;
use rstar::{RTree, RTreeObject, AABB};

use crate::geo_utils::{haversine_distance_km, meters_to_degrees};
use crate::{DirectoryLocation, LocationPoint, VisitRecord};

/// A directory location's coordinates, indexed for envelope queries.
#[derive(Debug, Clone)]
struct IndexedDirectory {
    id: String,
    lat: f64,
    lng: f64,
}

impl RTreeObject for IndexedDirectory {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lng, self.lat])
    }
}

/// Spatial index over the directory locations of one beat plan.
///
/// Directories without valid coordinates are left out.
pub struct DirectoryIndex {
    tree: RTree<IndexedDirectory>,
}

impl DirectoryIndex {
    pub fn new<'a>(directories: impl IntoIterator<Item = &'a DirectoryLocation>) -> Self {
        let entries: Vec<IndexedDirectory> = directories
            .into_iter()
            .filter_map(|d| {
                let c = d.coordinates()?;
                Some(IndexedDirectory { id: d.id.clone(), lat: c.lat, lng: c.lng })
            })
            .collect();
        Self { tree: RTree::bulk_load(entries) }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Ids of directories within `radius_km` of the given coordinate.
    ///
    /// Search boxes that cross the antimeridian are split in two.
    pub fn within(&self, lat: f64, lng: f64, radius_km: f64) -> impl Iterator<Item = &str> + '_ {
        search_boxes(lat, lng, radius_km)
            .into_iter()
            .flat_map(move |search| self.tree.locate_in_envelope(&search))
            .filter(move |d| haversine_distance_km(lat, lng, d.lat, d.lng) <= radius_km)
            .map(|d| d.id.as_str())
    }
}

/// Envelopes covering a circle of `radius_km`, split at the antimeridian.
fn search_boxes(lat: f64, lng: f64, radius_km: f64) -> Vec<AABB<[f64; 2]>> {
    let pad = meters_to_degrees(radius_km * 1000.0, lat);
    let (south, north) = (lat - pad, lat + pad);

    if pad >= 180.0 {
        return vec![AABB::from_corners([-180.0, south], [180.0, north])];
    }

    let (west, east) = (lng - pad, lng + pad);
    let mut boxes = vec![AABB::from_corners([west, south], [east, north])];
    if west < -180.0 {
        boxes.push(AABB::from_corners([west + 360.0, south], [180.0, north]));
    }
    if east > 180.0 {
        boxes.push(AABB::from_corners([-180.0, south], [east - 360.0, north]));
    }
    boxes
}

/// Determine which directory locations were visited during a session.
///
/// When the beat plan supplies any visit records, the ids of the `visited`
/// ones are returned as-is. Only when there are no records at all does the
/// geofence fallback run: every directory within `radius_km` of some
/// breadcrumb counts as visited.
///
/// # Example
/// ```
/// use field_session::{resolve_visited, VisitRecord, VisitStatus};
///
/// let visits = vec![
///     VisitRecord { directory_id: "p-1".into(), status: VisitStatus::Visited, visited_at: None },
///     VisitRecord { directory_id: "p-2".into(), status: VisitStatus::Pending, visited_at: None },
/// ];
/// let visited = resolve_visited(&visits, std::iter::empty(), &[], 0.05);
/// assert_eq!(visited.len(), 1);
/// assert!(visited.contains("p-1"));
/// ```
pub fn resolve_visited<'a>(
    visits: &[VisitRecord],
    directories: impl IntoIterator<Item = &'a DirectoryLocation>,
    breadcrumbs: &[LocationPoint],
    radius_km: f64,
) -> BTreeSet<String> {
    if !visits.is_empty() {
        return visits
            .iter()
            .filter(|v| v.is_visited())
            .map(|v| v.directory_id.clone())
            .collect();
    }

    let index = DirectoryIndex::new(directories);
    if index.is_empty() || breadcrumbs.is_empty() {
        return BTreeSet::new();
    }

    let mut visited = BTreeSet::new();
    for point in breadcrumbs {
        for id in index.within(point.latitude, point.longitude, radius_km) {
            visited.insert(id.to_string());
        }
        if visited.len() == index.len() {
            break;
        }
    }

    debug!(
        "[VisitResolver] geofence fallback: {} of {} directories within {:.0}m of {} breadcrumbs",
        visited.len(),
        index.len(),
        radius_km * 1000.0,
        breadcrumbs.len()
    );

    visited
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DirectoryKind, VisitStatus};

    fn directory(id: &str, lat: f64, lng: f64) -> DirectoryLocation {
        DirectoryLocation {
            id: id.into(),
            kind: DirectoryKind::Site,
            name: id.into(),
            address: None,
            latitude: Some(lat),
            longitude: Some(lng),
        }
    }

    fn visit(id: &str, status: VisitStatus) -> VisitRecord {
        VisitRecord {
            directory_id: id.into(),
            status,
            visited_at: Some("2024-05-01T10:00:00Z".into()),
        }
    }

    #[test]
    fn test_records_are_authoritative() {
        let dirs = vec![directory("a", 27.7, 85.3), directory("b", 27.8, 85.4)];
        // Breadcrumb sits right on "b", but records say only "a"
        let crumbs = vec![LocationPoint::new(27.8, 85.4, 0)];
        let visits = vec![visit("a", VisitStatus::Visited), visit("b", VisitStatus::Pending)];
        let visited = resolve_visited(&visits, &dirs, &crumbs, 0.05);
        assert_eq!(visited.into_iter().collect::<Vec<_>>(), vec!["a".to_string()]);
    }

    #[test]
    fn test_all_pending_means_nothing_visited() {
        let dirs = vec![directory("a", 27.7, 85.3)];
        let crumbs = vec![LocationPoint::new(27.7, 85.3, 0)];
        let visits = vec![visit("a", VisitStatus::Pending)];
        assert!(resolve_visited(&visits, &dirs, &crumbs, 0.05).is_empty());
    }

    #[test]
    fn test_geofence_fallback() {
        let dirs = vec![
            directory("near", 27.7000, 85.3000),
            directory("far", 27.7100, 85.3000),
        ];
        // ~33 m north of "near", ~1.1 km from "far"
        let crumbs = vec![LocationPoint::new(27.7003, 85.3000, 0)];
        let visited = resolve_visited(&[], &dirs, &crumbs, 0.05);
        assert!(visited.contains("near"));
        assert!(!visited.contains("far"));
    }

    #[test]
    fn test_geofence_boundary_uses_true_distance() {
        // 0.0008 degrees of longitude at 60N is ~44 m, of latitude ~89 m
        let dirs = vec![directory("d", 60.0, 10.0)];
        let east = vec![LocationPoint::new(60.0, 10.0008, 0)];
        let north = vec![LocationPoint::new(60.0008, 10.0, 0)];
        assert!(resolve_visited(&[], &dirs, &east, 0.05).contains("d"));
        assert!(!resolve_visited(&[], &dirs, &north, 0.05).contains("d"));
    }

    #[test]
    fn test_geofence_across_antimeridian() {
        // ~21 m apart on either side of the 180th meridian
        let dirs = vec![directory("d", -17.0, 179.9999)];
        let crumbs = vec![LocationPoint::new(-17.0, -179.9999, 0)];
        assert!(resolve_visited(&[], &dirs, &crumbs, 0.05).contains("d"));

        let dirs = vec![directory("d", -17.0, -179.9999)];
        let crumbs = vec![LocationPoint::new(-17.0, 179.9999, 0)];
        assert!(resolve_visited(&[], &dirs, &crumbs, 0.05).contains("d"));
    }

    #[test]
    fn test_search_boxes_split_at_antimeridian() {
        assert_eq!(search_boxes(-17.0, 0.0, 0.05).len(), 1);
        assert_eq!(search_boxes(-17.0, 179.9999, 0.05).len(), 2);
        assert_eq!(search_boxes(-17.0, -179.9999, 0.05).len(), 2);
        assert_eq!(search_boxes(90.0, 179.9999, 0.05).len(), 1);
    }

    #[test]
    fn test_geofence_near_pole() {
        // 0.01 degrees of longitude at 88N is ~39 m
        let dirs = vec![directory("d", 88.0, 10.0), directory("far", 88.0, 10.05)];
        let crumbs = vec![LocationPoint::new(88.0, 10.01, 0)];
        let visited = resolve_visited(&[], &dirs, &crumbs, 0.05);
        assert!(visited.contains("d"));
        assert!(!visited.contains("far"));

        // A fix on the pole sees every longitude
        let dirs = vec![directory("p", 89.9999, -120.0)];
        let crumbs = vec![LocationPoint::new(90.0, 60.0, 0)];
        assert!(resolve_visited(&[], &dirs, &crumbs, 0.05).contains("p"));
    }

    #[test]
    fn test_directories_without_coordinates_are_ignored() {
        let mut dir = directory("x", 27.7, 85.3);
        dir.latitude = None;
        let crumbs = vec![LocationPoint::new(27.7, 85.3, 0)];
        assert!(resolve_visited(&[], &[dir], &crumbs, 0.05).is_empty());
    }

    #[test]
    fn test_index_within() {
        let dirs = vec![directory("a", 27.7, 85.3), directory("b", 27.7002, 85.3)];
        let index = DirectoryIndex::new(&dirs);
        assert_eq!(index.len(), 2);
        let mut ids: Vec<&str> = index.within(27.7001, 85.3, 0.05).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
