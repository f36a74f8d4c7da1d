//! Trip statistics.
//!
//! Completed sessions carry backend-computed stats; everything else is
//! recomputed from the breadcrumb stream. Either way the visited count comes
//! from the locally resolved visited set, since archived summaries have been
//! seen to under-report visits.

use crate::geo_utils::polyline_length_km;
use crate::{LocationPoint, SessionStats, SessionStatus, SessionSummary};

const MS_PER_MINUTE: f64 = 60_000.0;

/// Everything the aggregator reads. Nothing here is mutated.
#[derive(Debug, Clone, Copy)]
pub struct StatsInput<'a> {
    /// Filtered breadcrumbs, oldest first
    pub breadcrumbs: &'a [LocationPoint],
    /// Size of the resolved visited-directory set
    pub visited_count: usize,
    pub summary: &'a SessionSummary,
    /// Wall clock in epoch milliseconds, used while the session has no end time
    pub now_ms: i64,
}

/// Compute trip statistics for a session.
///
/// - Completed sessions with a backend summary reporting a positive distance
///   use that summary, with `visited_count` overridden.
/// - Otherwise distance is the haversine length of the breadcrumbs, duration
///   runs from `started_at` to `ended_at` (or `now_ms`) with a floor of one
///   minute, and speed is distance over duration.
///
/// Never returns negative values.
pub fn aggregate_stats(input: &StatsInput<'_>) -> SessionStats {
    let summary = input.summary;

    if summary.status == SessionStatus::Completed {
        if let Some(backend) = summary.stats.filter(|s| s.total_distance_km > 0.0) {
            return SessionStats {
                total_distance_km: backend.total_distance_km,
                duration_minutes: backend.duration_minutes.max(1.0),
                average_speed_kmh: backend.average_speed_kmh.max(0.0),
                visited_count: input.visited_count,
            };
        }
    }

    let total_distance_km = polyline_length_km(input.breadcrumbs);
    let end_ms = summary.ended_at.unwrap_or(input.now_ms);
    let duration_minutes = ((end_ms - summary.started_at) as f64 / MS_PER_MINUTE).max(1.0);

    SessionStats {
        total_distance_km,
        duration_minutes,
        average_speed_kmh: total_distance_km / duration_minutes * 60.0,
        visited_count: input.visited_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: i64 = 60_000;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    fn straight_walk() -> Vec<LocationPoint> {
        // ~500 m per minute heading north
        (0..5)
            .map(|i| LocationPoint::new(27.7 + i as f64 * 0.0045, 85.3, i * MINUTE))
            .collect()
    }

    #[test]
    fn test_local_stats_for_active_session() {
        let crumbs = straight_walk();
        let summary = SessionSummary::new("s", "bp", SessionStatus::Active, 0);
        let stats = aggregate_stats(&StatsInput {
            breadcrumbs: &crumbs,
            visited_count: 2,
            summary: &summary,
            now_ms: 4 * MINUTE,
        });
        assert!(approx_eq(stats.total_distance_km, 2.0, 0.01));
        assert!(approx_eq(stats.duration_minutes, 4.0, 1e-9));
        assert!(approx_eq(stats.average_speed_kmh, 30.0, 0.2));
        assert_eq!(stats.visited_count, 2);
    }

    #[test]
    fn test_empty_breadcrumbs() {
        let summary = SessionSummary::new("s", "bp", SessionStatus::Active, 0);
        let stats = aggregate_stats(&StatsInput {
            breadcrumbs: &[],
            visited_count: 0,
            summary: &summary,
            now_ms: 0,
        });
        assert_eq!(stats.total_distance_km, 0.0);
        assert_eq!(stats.average_speed_kmh, 0.0);
        assert_eq!(stats.duration_minutes, 1.0);
        assert_eq!(stats.visited_count, 0);
    }

    #[test]
    fn test_duration_floor_with_clock_skew() {
        // now earlier than start must not produce negative values
        let summary = SessionSummary::new("s", "bp", SessionStatus::Paused, 10 * MINUTE);
        let crumbs = straight_walk();
        let stats = aggregate_stats(&StatsInput {
            breadcrumbs: &crumbs,
            visited_count: 0,
            summary: &summary,
            now_ms: 0,
        });
        assert_eq!(stats.duration_minutes, 1.0);
        assert!(stats.average_speed_kmh >= 0.0);
    }

    #[test]
    fn test_end_time_preferred_over_now() {
        let mut summary = SessionSummary::new("s", "bp", SessionStatus::Completed, 0);
        summary.ended_at = Some(30 * MINUTE);
        let stats = aggregate_stats(&StatsInput {
            breadcrumbs: &[],
            visited_count: 0,
            summary: &summary,
            now_ms: 600 * MINUTE,
        });
        assert_eq!(stats.duration_minutes, 30.0);
    }

    #[test]
    fn test_completed_trusts_backend_but_overrides_visits() {
        let mut summary = SessionSummary::new("s", "bp", SessionStatus::Completed, 0);
        summary.ended_at = Some(60 * MINUTE);
        summary.stats = Some(SessionStats {
            total_distance_km: 12.5,
            duration_minutes: 60.0,
            average_speed_kmh: 12.5,
            visited_count: 1,
        });
        let crumbs = straight_walk();
        let stats = aggregate_stats(&StatsInput {
            breadcrumbs: &crumbs,
            visited_count: 4,
            summary: &summary,
            now_ms: 0,
        });
        assert_eq!(stats.total_distance_km, 12.5);
        assert_eq!(stats.average_speed_kmh, 12.5);
        assert_eq!(stats.visited_count, 4);
    }

    #[test]
    fn test_completed_with_empty_backend_recomputes() {
        let mut summary = SessionSummary::new("s", "bp", SessionStatus::Completed, 0);
        summary.ended_at = Some(4 * MINUTE);
        summary.stats = Some(SessionStats::default());
        let crumbs = straight_walk();
        let stats = aggregate_stats(&StatsInput {
            breadcrumbs: &crumbs,
            visited_count: 1,
            summary: &summary,
            now_ms: 0,
        });
        assert!(approx_eq(stats.total_distance_km, 2.0, 0.01));
        assert_eq!(stats.duration_minutes, 4.0);
    }

    #[test]
    fn test_active_ignores_backend_summary() {
        let mut summary = SessionSummary::new("s", "bp", SessionStatus::Active, 0);
        summary.stats = Some(SessionStats {
            total_distance_km: 99.0,
            duration_minutes: 10.0,
            average_speed_kmh: 594.0,
            visited_count: 0,
        });
        let stats = aggregate_stats(&StatsInput {
            breadcrumbs: &[],
            visited_count: 0,
            summary: &summary,
            now_ms: MINUTE,
        });
        assert_eq!(stats.total_distance_km, 0.0);
    }
}
