//! End-to-end session scenarios driven through the in-process collaborators.
//!
//! All tests run with tokio's clock paused, so refresh ticks happen in
//! virtual time.

use std::sync::Arc;
use std::time::Duration;

use field_session::{
    BeatPlan, DirectoryKind, DirectoryLocation, LoadState, LocalFeed, LocationPoint, MemorySource, SessionError,
    SessionStatus, SessionSummary, SessionView, TimelineEntry, TrackingConfig, VisitRecord, VisitStatus,
};

const SESSION: &str = "s-1";
const PLAN: &str = "bp-1";
const T0: i64 = 1_714_557_600_000; // 2024-05-01T10:00:00Z
const MINUTE: i64 = 60_000;

fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
    (a - b).abs() < epsilon
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Point `i` of a straight walk north, ~500 m and one minute apart.
fn walk(i: i64) -> LocationPoint {
    LocationPoint::new(27.7 + i as f64 * 0.0045, 85.3, T0 + i * MINUTE)
}

/// One party ~30 m east of the third walk point, visited at 10:02:30.
fn plan(visits: Vec<VisitRecord>) -> BeatPlan {
    BeatPlan {
        id: PLAN.into(),
        parties: vec![DirectoryLocation {
            id: "p-1".into(),
            kind: DirectoryKind::Party,
            name: "Hari Traders".into(),
            address: Some("New Road".into()),
            latitude: Some(27.709),
            longitude: Some(85.3003),
        }],
        visits,
        ..Default::default()
    }
}

fn visited_p1() -> VisitRecord {
    VisitRecord {
        directory_id: "p-1".into(),
        status: VisitStatus::Visited,
        visited_at: Some("2024-05-01T10:02:30Z".into()),
    }
}

fn setup(status: SessionStatus, crumbs: i64, visits: Vec<VisitRecord>) -> (Arc<MemorySource>, Arc<LocalFeed>) {
    init_logging();
    let source = Arc::new(MemorySource::new());
    source.put_session(SessionSummary::new(SESSION, PLAN, status, T0));
    source.put_beat_plan(plan(visits));
    for i in 0..crumbs {
        source.record_breadcrumb(SESSION, walk(i));
    }
    (source, Arc::new(LocalFeed::new()))
}

fn start(source: &Arc<MemorySource>, feed: &Arc<LocalFeed>) -> SessionView {
    SessionView::start(SESSION, source.clone(), feed.clone(), TrackingConfig::default())
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_active_session() {
    let (source, feed) = setup(SessionStatus::Active, 5, vec![visited_p1()]);
    let mut view = start(&source, &feed);

    let vm = view.wait_for(|vm| vm.is_live).await.unwrap();
    assert_eq!(vm.load_state, LoadState::Ready);

    let stats = vm.summary.as_ref().and_then(|s| s.stats).unwrap();
    assert_eq!(stats.visited_count, 1);
    assert!(approx_eq(stats.total_distance_km, 2.0, 0.01));

    // Five location rows plus one visit, newest first
    assert_eq!(vm.timeline.len(), 6);
    let stamps: Vec<i64> = vm.timeline.iter().map(|i| i.timestamp).collect();
    assert_eq!(
        stamps,
        vec![T0 + 4 * MINUTE, T0 + 3 * MINUTE, T0 + 150_000, T0 + 2 * MINUTE, T0 + MINUTE, T0]
    );
    assert!(vm.timeline[2].is_visit());
    assert_eq!(vm.timeline[2].title(), "Hari Traders");
    assert_eq!(vm.timeline[2].time_label, "10:02");
    assert!(vm.timeline[0].is_current());
    assert_eq!(vm.timeline.iter().filter(|i| i.is_current()).count(), 1);

    assert_eq!(vm.live_location.as_ref().map(|p| p.timestamp), Some(T0 + 4 * MINUTE));
    assert!(vm.planned_stops[0].visited);
    view.stop();
}

#[tokio::test(start_paused = true)]
async fn test_geofence_fallback_without_visit_records() {
    let (source, feed) = setup(SessionStatus::Active, 5, vec![]);
    let mut view = start(&source, &feed);

    let vm = view.wait_for(|vm| vm.load_state == LoadState::Ready).await.unwrap();
    assert!(vm.visited.contains("p-1"));
    // Fallback visits count but never produce timeline rows
    assert!(vm.timeline.iter().all(|i| !i.is_visit()));
    view.stop();
}

#[tokio::test(start_paused = true)]
async fn test_pushed_points_update_the_view() {
    let (source, feed) = setup(SessionStatus::Active, 2, vec![]);
    let mut view = start(&source, &feed);
    view.wait_for(|vm| vm.is_live).await.unwrap();

    assert!(feed.publish(SESSION, walk(2)));
    let vm = view.wait_for(|vm| vm.route.len() == 3).await.unwrap();
    assert_eq!(vm.live_location.as_ref().map(|p| p.timestamp), Some(T0 + 2 * MINUTE));
    match &vm.timeline[0].entry {
        TimelineEntry::Location { is_current, .. } => assert!(*is_current),
        other => panic!("expected a location row, got {:?}", other),
    }

    // A jittery fix a few meters from the previous one is not drawn once
    // the walk moves on
    let mut jitter = walk(2);
    jitter.latitude += 0.00005;
    jitter.timestamp += 5_000;
    assert!(feed.publish(SESSION, jitter));
    assert!(feed.publish(SESSION, walk(3)));
    let vm = view
        .wait_for(|vm| vm.live_location.as_ref().map(|p| p.timestamp) == Some(T0 + 3 * MINUTE))
        .await
        .unwrap();
    assert_eq!(vm.route.len(), 4);

    // Re-delivery of the same fix is ignored
    assert!(feed.publish(SESSION, walk(3)));
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(view.current_view_model().route.len(), 4);
    view.stop();
}

#[tokio::test(start_paused = true)]
async fn test_completion_flips_current_marker_and_releases_feed() {
    let (source, feed) = setup(SessionStatus::Active, 5, vec![visited_p1()]);
    let mut view = start(&source, &feed);
    view.wait_for(|vm| vm.is_live).await.unwrap();
    assert!(feed.is_subscribed(SESSION));

    source.set_status(SESSION, SessionStatus::Completed, Some(T0 + 5 * MINUTE));
    let vm = view
        .wait_for(|vm| vm.status() == Some(SessionStatus::Completed))
        .await
        .unwrap();

    assert!(vm.timeline.iter().all(|i| !i.is_current()));
    assert!(vm.live_location.is_none());

    while view.is_running() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!feed.is_subscribed(SESSION));
    assert!(!view.current_view_model().is_live);

    // Refresh stopped with the session
    let fetches = source.summary_fetches();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(source.summary_fetches(), fetches);

    let stats = view.current_view_model().summary.and_then(|s| s.stats).unwrap();
    assert!(approx_eq(stats.duration_minutes, 5.0, 1e-9));
}

#[tokio::test(start_paused = true)]
async fn test_completed_session_loads_once() {
    let (source, feed) = setup(SessionStatus::Completed, 3, vec![visited_p1()]);
    let mut view = start(&source, &feed);

    let vm = view.wait_for(|vm| vm.load_state == LoadState::Ready).await.unwrap();
    assert!(!vm.is_live);
    assert!(!feed.is_subscribed(SESSION));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(source.summary_fetches(), 1);
    assert!(!view.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent_and_freezes_view() {
    let (source, feed) = setup(SessionStatus::Active, 3, vec![]);
    let mut view = start(&source, &feed);
    let before = view.wait_for(|vm| vm.is_live).await.unwrap();

    view.stop();
    view.stop();
    assert!(!feed.is_subscribed(SESSION));
    assert!(!feed.publish(SESSION, walk(3)));

    source.record_breadcrumb(SESSION, walk(4));
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(view.current_view_model(), before);
    assert_eq!(view.changed().await, Err(SessionError::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_stop_before_first_load() {
    let (source, feed) = setup(SessionStatus::Active, 0, vec![]);
    let mut view = start(&source, &feed);
    view.stop();
    assert_eq!(view.current_view_model().load_state, LoadState::Loading);
    assert!(!feed.is_subscribed(SESSION));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_recovers_on_next_refresh() {
    let (source, feed) = setup(SessionStatus::Active, 2, vec![]);
    let mut view = start(&source, &feed);
    view.wait_for(|vm| vm.is_live).await.unwrap();

    assert!(feed.disconnect(SESSION));
    let vm = view.wait_for(|vm| !vm.is_live).await.unwrap();
    assert_eq!(vm.route.len(), 2);

    // Points recorded while disconnected arrive with the next refresh
    source.record_breadcrumb(SESSION, walk(2));
    let vm = view.wait_for(|vm| vm.is_live && vm.route.len() == 3).await.unwrap();
    assert_eq!(vm.load_state, LoadState::Ready);
    assert!(feed.is_subscribed(SESSION));
    view.stop();
}

#[tokio::test(start_paused = true)]
async fn test_failed_subscribe_is_retried() {
    let (source, feed) = setup(SessionStatus::Active, 1, vec![]);
    feed.fail_next_subscriptions(1);
    let mut view = start(&source, &feed);

    let vm = view.wait_for(|vm| vm.load_state == LoadState::Ready).await.unwrap();
    assert!(!vm.is_live);

    view.wait_for(|vm| vm.is_live).await.unwrap();
    assert!(feed.is_subscribed(SESSION));
    view.stop();
}

#[tokio::test(start_paused = true)]
async fn test_initial_fetch_error_then_recovery() {
    init_logging();
    let source = Arc::new(MemorySource::new());
    let feed = Arc::new(LocalFeed::new());
    let mut view = start(&source, &feed);

    let vm = view
        .wait_for(|vm| matches!(vm.load_state, LoadState::Failed(_)))
        .await
        .unwrap();
    assert!(vm.summary.is_none());
    assert!(vm.timeline.is_empty());

    source.put_session(SessionSummary::new(SESSION, PLAN, SessionStatus::Active, T0));
    let vm = view.wait_for(|vm| vm.load_state == LoadState::NoData).await.unwrap();
    assert_eq!(vm.status(), Some(SessionStatus::Active));
    view.stop();
}

#[tokio::test(start_paused = true)]
async fn test_outage_keeps_last_good_data() {
    let (source, feed) = setup(SessionStatus::Active, 3, vec![]);
    let mut view = start(&source, &feed);
    view.wait_for(|vm| vm.load_state == LoadState::Ready).await.unwrap();

    source.set_unavailable(true);
    let vm = view
        .wait_for(|vm| matches!(vm.load_state, LoadState::Failed(_)))
        .await
        .unwrap();
    assert_eq!(vm.route.len(), 3);

    source.set_unavailable(false);
    view.wait_for(|vm| vm.load_state == LoadState::Ready).await.unwrap();
    view.stop();
}
