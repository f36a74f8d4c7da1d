//! Session state and the recomputed view model.
//!
//! [`SessionState`] is the only mutable state of a watched session. Every
//! change, pushed or polled, goes through [`SessionState::apply`], and the
//! view model is rebuilt from scratch afterwards by
//! [`SessionState::view_model`].

use std::collections::BTreeSet;

use log::debug;
use serde::Serialize;

use crate::breadcrumbs::filter_breadcrumbs;
use crate::stats::{aggregate_stats, StatsInput};
use crate::timeline::{build_timeline, TimelineItem};
use crate::viewport::resolve_viewport;
use crate::visits::resolve_visited;
use crate::{
    BeatPlan, DirectoryKind, GeoPoint, LocationPoint, SessionError, SessionStatus, SessionSummary,
    TrackingConfig, Viewport,
};

/// Whether the view has anything to show yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum LoadState {
    /// Waiting for the first summary
    Loading,
    /// Summary loaded; no breadcrumbs or visits yet
    NoData,
    Ready,
    /// The last refresh failed; the view keeps the last good data
    Failed(String),
}

/// A beat-plan stop for map markers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedStop {
    pub id: String,
    pub kind: DirectoryKind,
    pub name: String,
    pub position: Option<GeoPoint>,
    pub visited: bool,
}

/// Read-only snapshot handed to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionViewModel {
    pub session_id: String,
    pub load_state: LoadState,
    /// A push subscription is delivering live points
    pub is_live: bool,
    /// Session header with locally aggregated stats
    pub summary: Option<SessionSummary>,
    pub timeline: Vec<TimelineItem>,
    /// Filtered breadcrumbs for the route polyline, oldest first
    pub route: Vec<GeoPoint>,
    pub visited: BTreeSet<String>,
    pub planned_stops: Vec<PlannedStop>,
    pub viewport: Viewport,
    /// Newest fix, only while the session is active
    pub live_location: Option<LocationPoint>,
}

impl SessionViewModel {
    /// Placeholder shown before the first refresh completes.
    pub fn loading(session_id: &str, config: &TrackingConfig) -> Self {
        Self {
            session_id: session_id.to_string(),
            load_state: LoadState::Loading,
            is_live: false,
            summary: None,
            timeline: Vec::new(),
            route: Vec::new(),
            visited: BTreeSet::new(),
            planned_stops: Vec::new(),
            viewport: Viewport { center: config.fallback_center },
            live_location: None,
        }
    }

    pub fn status(&self) -> Option<SessionStatus> {
        self.summary.as_ref().map(|s| s.status)
    }
}

/// A change to a session's state.
#[derive(Debug, Clone)]
pub enum Update {
    /// Authoritative snapshot from a periodic refresh. `beat_plan` is `None`
    /// when the plan could not be fetched; the previous plan is kept.
    Refreshed {
        summary: SessionSummary,
        breadcrumbs: Vec<LocationPoint>,
        beat_plan: Option<BeatPlan>,
    },
    RefreshFailed(SessionError),
    /// A point delivered by the push stream
    Location(LocationPoint),
    /// The push subscription was established or lost
    Connection(bool),
}

/// Mutable state of one watched session.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    summary: Option<SessionSummary>,
    /// Raw breadcrumbs in receipt order
    breadcrumbs: Vec<LocationPoint>,
    beat_plan: Option<BeatPlan>,
    last_error: Option<String>,
    connected: bool,
}

impl SessionState {
    pub fn summary(&self) -> Option<&SessionSummary> {
        self.summary.as_ref()
    }

    /// Raw breadcrumbs in receipt order.
    pub fn breadcrumbs(&self) -> &[LocationPoint] {
        &self.breadcrumbs
    }

    pub fn beat_plan(&self) -> Option<&BeatPlan> {
        self.beat_plan.as_ref()
    }

    /// Message of the last failed refresh, cleared by the next good one.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_active(&self) -> bool {
        self.summary.as_ref().is_some_and(SessionSummary::is_active)
    }

    /// Apply one update. The only way session state changes.
    pub fn apply(&mut self, update: Update) {
        match update {
            Update::Refreshed { summary, breadcrumbs, beat_plan } => {
                self.merge_snapshot(breadcrumbs);
                self.summary = Some(summary);
                if beat_plan.is_some() {
                    self.beat_plan = beat_plan;
                }
                self.last_error = None;
            }
            Update::RefreshFailed(err) => {
                self.last_error = Some(err.to_string());
            }
            Update::Location(point) => {
                let duplicate = self.breadcrumbs.last().is_some_and(|last| {
                    last.timestamp >= point.timestamp
                        && last.latitude == point.latitude
                        && last.longitude == point.longitude
                });
                if duplicate {
                    debug!("[SessionState] dropping duplicate point at {}", point.timestamp);
                } else {
                    self.breadcrumbs.push(point);
                }
            }
            Update::Connection(connected) => {
                self.connected = connected;
            }
        }
    }

    /// Replace breadcrumbs with the snapshot, keeping pushed points that are
    /// newer than anything the snapshot contains.
    fn merge_snapshot(&mut self, snapshot: Vec<LocationPoint>) {
        let newest = snapshot.iter().map(|p| p.timestamp).max();
        let pushed_after: Vec<LocationPoint> = match newest {
            Some(newest) => self
                .breadcrumbs
                .drain(..)
                .filter(|p| p.timestamp > newest)
                .collect(),
            None => std::mem::take(&mut self.breadcrumbs),
        };
        self.breadcrumbs = snapshot;
        self.breadcrumbs.extend(pushed_after);
    }

    /// Rebuild the view model from the current state.
    pub fn view_model(&self, session_id: &str, config: &TrackingConfig, now_ms: i64) -> SessionViewModel {
        let empty_plan = BeatPlan::default();
        let plan = self.beat_plan.as_ref().unwrap_or(&empty_plan);
        let status = self.summary.as_ref().map(|s| s.status);
        let active = status == Some(SessionStatus::Active);

        let filtered = filter_breadcrumbs(&self.breadcrumbs, config);
        let visited = resolve_visited(&plan.visits, plan.directories(), &self.breadcrumbs, config.visit_radius_km);

        // An unknown status never marks a current point
        let timeline = build_timeline(
            &filtered,
            &plan.visits,
            plan.directories(),
            status.unwrap_or(SessionStatus::Paused),
        );

        let summary = self.summary.as_ref().map(|summary| {
            let stats = aggregate_stats(&StatsInput {
                breadcrumbs: &filtered,
                visited_count: visited.len(),
                summary,
                now_ms,
            });
            SessionSummary { stats: Some(stats), ..summary.clone() }
        });

        let planned_stops: Vec<PlannedStop> = plan
            .directories()
            .map(|d| PlannedStop {
                id: d.id.clone(),
                kind: d.kind,
                name: d.name.clone(),
                position: d.coordinates(),
                visited: visited.contains(&d.id),
            })
            .collect();

        let route: Vec<GeoPoint> = filtered.iter().map(GeoPoint::from).collect();
        let stop_positions: Vec<GeoPoint> = planned_stops.iter().filter_map(|s| s.position).collect();
        let viewport = resolve_viewport(&stop_positions, &route, config);

        let load_state = match (&self.last_error, &self.summary) {
            (Some(err), _) => LoadState::Failed(err.clone()),
            (None, None) => LoadState::Loading,
            (None, Some(_)) if self.breadcrumbs.is_empty() && visited.is_empty() => LoadState::NoData,
            (None, Some(_)) => LoadState::Ready,
        };

        SessionViewModel {
            session_id: session_id.to_string(),
            load_state,
            is_live: self.connected && active,
            summary,
            timeline,
            route,
            visited,
            planned_stops,
            viewport,
            live_location: if active { filtered.last().cloned() } else { None },
        }
    }
}
