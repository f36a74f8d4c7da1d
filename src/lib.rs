//! # Field Session
//!
//! Live field-session tracking engine for beat-plan sessions.
//!
//! This library provides:
//! - GPS breadcrumb de-noising and trip statistics
//! - Visit detection against a beat plan's directory locations
//! - A merged, reverse-chronological activity timeline
//! - Map viewport resolution from planned stops or breadcrumb clusters
//! - A live session view combining push updates with periodic refresh
//!
//! ## Features
//!
//! - **`http`** - Enable the REST client for the session/beat-plan API
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use field_session::{
//!     breadcrumbs, stats, GeoPoint, LocationPoint, SessionStatus, SessionSummary, TrackingConfig,
//! };
//!
//! let config = TrackingConfig::default();
//! let raw: Vec<LocationPoint> = (0..5)
//!     .map(|i| LocationPoint::new(27.7172 + i as f64 * 0.0045, 85.3240, i * 60_000))
//!     .collect();
//!
//! let route = breadcrumbs::filter_breadcrumbs(&raw, &config);
//! let summary = SessionSummary::new("s-1", "bp-1", SessionStatus::Active, 0);
//! let input = stats::StatsInput {
//!     breadcrumbs: &route,
//!     visited_count: 0,
//!     summary: &summary,
//!     now_ms: 240_000,
//! };
//! let trip = stats::aggregate_stats(&input);
//! assert!((trip.total_distance_km - 2.0).abs() < 0.05);
//! assert_eq!(GeoPoint::from(&route[0]), GeoPoint::new(27.7172, 85.3240));
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod error;
pub use error::{Result, SessionError};

pub mod geo_utils;

// Pure pipeline stages
pub mod breadcrumbs;
pub mod stats;
pub mod timeline;
pub mod viewport;
pub mod visits;

pub use timeline::{build_timeline, TimelineEntry, TimelineItem};
pub use viewport::{arithmetic_center, densest_cluster_center, resolve_viewport};
pub use visits::{resolve_visited, DirectoryIndex};

// Live session view and its collaborators
pub mod memory;
pub mod session;
pub mod view;

pub use memory::{LocalFeed, MemorySource};
pub use session::{LocationFeed, SessionSource, SessionView, Subscription};
pub use view::{LoadState, PlannedStop, SessionViewModel};

// REST client for the session API
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::SessionApiClient;

// ============================================================================
// Core Types
// ============================================================================

/// A plain latitude/longitude pair.
///
/// # Example
/// ```
/// use field_session::GeoPoint;
/// let kathmandu = GeoPoint::new(27.7172, 85.3240);
/// assert!(kathmandu.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Create a new coordinate.
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && self.lat >= -90.0
            && self.lat <= 90.0
            && self.lng >= -180.0
            && self.lng <= 180.0
    }
}

impl From<&LocationPoint> for GeoPoint {
    fn from(point: &LocationPoint) -> Self {
        GeoPoint::new(point.latitude, point.longitude)
    }
}

/// Reverse-geocoded address attached to a breadcrumb by the producer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Address {
    pub formatted_address: Option<String>,
    pub locality: Option<String>,
    pub city: Option<String>,
}

/// The three visitable directory entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryKind {
    Party,
    Site,
    Prospect,
}

/// Server-side correlation of a breadcrumb with its closest directory location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearestDirectory {
    pub directory_id: String,
    #[serde(rename = "type")]
    pub kind: DirectoryKind,
    /// Distance in kilometers, when the producer supplied one
    #[serde(default)]
    pub distance: Option<f64>,
    pub name: String,
}

/// One recorded GPS fix for a session.
///
/// Points are immutable once received. `timestamp` is server-assigned
/// epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    pub timestamp: i64,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub nearest_directory: Option<NearestDirectory>,
}

impl LocationPoint {
    /// Create a bare fix with no sensor extras, address or correlation.
    pub fn new(latitude: f64, longitude: f64, timestamp: i64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
            speed: None,
            heading: None,
            timestamp,
            address: None,
            nearest_directory: None,
        }
    }
}

/// A visitable party, site or prospect referenced by a beat plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryLocation {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: DirectoryKind,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl DirectoryLocation {
    /// Coordinates of the location, if both are present and valid.
    pub fn coordinates(&self) -> Option<GeoPoint> {
        let point = GeoPoint::new(self.latitude?, self.longitude?);
        point.is_valid().then_some(point)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisitStatus {
    Pending,
    Visited,
}

/// Beat-plan record of whether a stop was completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitRecord {
    pub directory_id: String,
    pub status: VisitStatus,
    /// RFC 3339 check-in time; `None` until visited
    #[serde(default)]
    pub visited_at: Option<String>,
}

impl VisitRecord {
    pub fn is_visited(&self) -> bool {
        self.status == VisitStatus::Visited
    }
}

/// Planned stops and visit records for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BeatPlan {
    pub id: String,
    pub parties: Vec<DirectoryLocation>,
    pub sites: Vec<DirectoryLocation>,
    pub prospects: Vec<DirectoryLocation>,
    pub visits: Vec<VisitRecord>,
}

impl BeatPlan {
    /// All directory locations in the plan: parties, then sites, then prospects.
    pub fn directories(&self) -> impl Iterator<Item = &DirectoryLocation> {
        self.parties
            .iter()
            .chain(self.sites.iter())
            .chain(self.prospects.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
}

/// Aggregate trip statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total_distance_km: f64,
    pub duration_minutes: f64,
    pub average_speed_kmh: f64,
    pub visited_count: usize,
}

/// Session header as served by the session API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub beat_plan_id: String,
    pub status: SessionStatus,
    /// Epoch milliseconds
    pub started_at: i64,
    #[serde(default)]
    pub ended_at: Option<i64>,
    /// Backend-computed stats, present for archived sessions
    #[serde(default)]
    pub stats: Option<SessionStats>,
}

impl SessionSummary {
    pub fn new(session_id: &str, beat_plan_id: &str, status: SessionStatus, started_at: i64) -> Self {
        Self {
            session_id: session_id.to_string(),
            beat_plan_id: beat_plan_id.to_string(),
            status,
            started_at,
            ended_at: None,
            stats: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

/// Map framing for a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub center: GeoPoint,
}

/// Tuning constants for the tracking engine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Minimum distance from the last kept breadcrumb for a new one to be kept.
    /// Default: 0.015 km (15 m)
    pub breadcrumb_min_distance_km: f64,

    /// Geofence radius used when a beat plan has no visit records.
    /// Default: 0.05 km (50 m)
    pub visit_radius_km: f64,

    /// Half-width of the axis-aligned box used to count cluster neighbors.
    /// Default: 0.05 degrees
    pub cluster_search_radius_deg: f64,

    /// Map center when there is nothing to frame.
    /// Default: Kathmandu (27.7172, 85.3240)
    pub fallback_center: GeoPoint,

    /// How often an active session pulls the authoritative summary and visits.
    /// Default: 10 seconds
    #[serde(with = "duration_secs")]
    pub refresh_interval: Duration,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            breadcrumb_min_distance_km: 0.015,
            visit_radius_km: 0.05,
            cluster_search_radius_deg: 0.05,
            fallback_center: GeoPoint::new(27.7172, 85.3240),
            refresh_interval: Duration::from_secs(10),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Tests
// ============================================================================
