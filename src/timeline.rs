//! Activity timeline.
//!
//! Merges breadcrumbs and completed visits into one feed, newest first.
//! The build is a pure function of its inputs so re-rendering the same
//! snapshot always yields the same feed.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{DirectoryLocation, LocationPoint, SessionStatus, VisitRecord};

const LOCATION_FALLBACK_TITLE: &str = "Location Update";
const UNKNOWN_LOCATION: &str = "Unknown Location";
const UNKNOWN_ADDRESS: &str = "Address not available";
const UNKNOWN_TIME: &str = "Unknown Time";

/// What a timeline row represents.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum TimelineEntry {
    /// A breadcrumb.
    Location {
        point: LocationPoint,
        title: String,
        /// `"Near {name} ({distance} km)"` when the producer correlated the fix
        subtitle: Option<String>,
        correlated_directory_name: Option<String>,
        /// Newest breadcrumb of an active session
        is_current: bool,
    },
    /// A completed beat-plan stop.
    Visit {
        directory_id: String,
        title: String,
        subtitle: String,
    },
}

/// One row of the activity feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineItem {
    /// Epoch milliseconds used for ordering; 0 when unknown
    pub timestamp: i64,
    /// `HH:MM` UTC, or `"Unknown Time"`
    pub time_label: String,
    #[serde(flatten)]
    pub entry: TimelineEntry,
}

impl TimelineItem {
    pub fn is_current(&self) -> bool {
        matches!(self.entry, TimelineEntry::Location { is_current: true, .. })
    }

    pub fn is_visit(&self) -> bool {
        matches!(self.entry, TimelineEntry::Visit { .. })
    }

    pub fn title(&self) -> &str {
        match &self.entry {
            TimelineEntry::Location { title, .. } | TimelineEntry::Visit { title, .. } => title,
        }
    }
}

/// Build the reverse-chronological activity feed.
///
/// Each breadcrumb becomes a location row; each visited record becomes a
/// visit row with its directory's name and address. Rows are stably sorted
/// by timestamp, newest first. While `status` is active, the newest location
/// row is flagged as current.
///
/// # Example
/// ```
/// use field_session::{build_timeline, LocationPoint, SessionStatus};
///
/// let crumbs = vec![LocationPoint::new(27.70, 85.3, 0), LocationPoint::new(27.71, 85.3, 60_000)];
/// let feed = build_timeline(&crumbs, &[], std::iter::empty(), SessionStatus::Active);
/// assert_eq!(feed[0].timestamp, 60_000);
/// assert!(feed[0].is_current());
/// assert!(!feed[1].is_current());
/// ```
pub fn build_timeline<'a>(
    breadcrumbs: &[LocationPoint],
    visits: &[VisitRecord],
    directories: impl IntoIterator<Item = &'a DirectoryLocation>,
    status: SessionStatus,
) -> Vec<TimelineItem> {
    let lookup: HashMap<&str, &DirectoryLocation> = directories
        .into_iter()
        .map(|d| (d.id.as_str(), d))
        .collect();

    let mut items: Vec<TimelineItem> = breadcrumbs
        .iter()
        .map(location_item)
        .chain(
            visits
                .iter()
                .filter(|v| v.is_visited())
                .map(|v| visit_item(v, lookup.get(v.directory_id.as_str()).copied())),
        )
        .collect();

    // sort_by is stable: equal timestamps keep breadcrumb-then-visit input order
    items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    if status == SessionStatus::Active {
        let newest_location = items.iter_mut().find_map(|item| match &mut item.entry {
            TimelineEntry::Location { is_current, .. } => Some(is_current),
            TimelineEntry::Visit { .. } => None,
        });
        if let Some(is_current) = newest_location {
            *is_current = true;
        }
    }

    items
}

fn location_item(point: &LocationPoint) -> TimelineItem {
    let title = point
        .address
        .as_ref()
        .and_then(|a| {
            [&a.formatted_address, &a.locality, &a.city]
                .into_iter()
                .flatten()
                .find(|s| !s.trim().is_empty())
        })
        .cloned()
        .unwrap_or_else(|| LOCATION_FALLBACK_TITLE.to_string());

    let subtitle = point.nearest_directory.as_ref().map(|near| match near.distance {
        Some(km) => format!("Near {} ({:.2} km)", near.name, km),
        None => format!("Near {}", near.name),
    });

    TimelineItem {
        timestamp: point.timestamp,
        time_label: time_label(point.timestamp),
        entry: TimelineEntry::Location {
            point: point.clone(),
            title,
            subtitle,
            correlated_directory_name: point.nearest_directory.as_ref().map(|n| n.name.clone()),
            is_current: false,
        },
    }
}

fn visit_item(visit: &VisitRecord, directory: Option<&DirectoryLocation>) -> TimelineItem {
    let visited_at = visit.visited_at.as_deref().and_then(parse_timestamp_ms);

    let title = directory
        .map(|d| d.name.clone())
        .unwrap_or_else(|| UNKNOWN_LOCATION.to_string());
    let subtitle = directory
        .and_then(|d| d.address.clone())
        .filter(|a| !a.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string());

    TimelineItem {
        timestamp: visited_at.unwrap_or(0),
        time_label: visited_at.map_or_else(|| UNKNOWN_TIME.to_string(), time_label),
        entry: TimelineEntry::Visit {
            directory_id: visit.directory_id.clone(),
            title,
            subtitle,
        },
    }
}

/// Parse an RFC 3339 timestamp to epoch milliseconds.
pub fn parse_timestamp_ms(raw: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.timestamp_millis())
}

fn time_label(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map_or_else(|| UNKNOWN_TIME.to_string(), |dt| dt.format("%H:%M").to_string())
}
