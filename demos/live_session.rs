//! Watch a simulated field session end to end.
//!
//! Run with: `RUST_LOG=debug cargo run --example live_session`

use std::sync::Arc;
use std::time::Duration;

use field_session::{
    BeatPlan, DirectoryKind, DirectoryLocation, LocalFeed, LocationPoint, MemorySource, SessionStatus,
    SessionSummary, SessionView, SessionViewModel, TrackingConfig, VisitRecord, VisitStatus,
};

const SESSION_ID: &str = "s-demo";
const BEAT_PLAN_ID: &str = "bp-demo";
const START_MS: i64 = 1_714_557_600_000; // 2024-05-01T10:00:00Z
const MINUTE: i64 = 60_000;

fn beat_plan() -> BeatPlan {
    let stop = |id: &str, kind, name: &str, lat: f64, lng: f64| DirectoryLocation {
        id: id.to_string(),
        kind,
        name: name.to_string(),
        address: None,
        latitude: Some(lat),
        longitude: Some(lng),
    };

    BeatPlan {
        id: BEAT_PLAN_ID.to_string(),
        parties: vec![stop("p-1", DirectoryKind::Party, "Hari Traders", 27.7262, 85.3243)],
        sites: vec![stop("st-1", DirectoryKind::Site, "North Depot", 27.7352, 85.3240)],
        prospects: vec![stop("pr-1", DirectoryKind::Prospect, "Lakeside Mart", 27.7400, 85.3300)],
        visits: vec![VisitRecord {
            directory_id: "p-1".to_string(),
            status: VisitStatus::Visited,
            visited_at: Some("2024-05-01T10:02:30Z".to_string()),
        }],
    }
}

fn print_view(label: &str, vm: &SessionViewModel) {
    println!("\n=== {} ===", label);
    println!("State: {:?}  live: {}", vm.load_state, vm.is_live);
    if let Some(stats) = vm.summary.as_ref().and_then(|s| s.stats) {
        println!(
            "Distance: {:.2} km  visited: {}  avg speed: {:.1} km/h",
            stats.total_distance_km, stats.visited_count, stats.average_speed_kmh
        );
    }
    println!("Map center: ({:.4}, {:.4})", vm.viewport.center.lat, vm.viewport.center.lng);
    for item in &vm.timeline {
        let marker = if item.is_current() { "*" } else { " " };
        println!("  {} {}  {}", marker, item.time_label, item.title());
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let source = Arc::new(MemorySource::new());
    let feed = Arc::new(LocalFeed::new());

    source.put_session(SessionSummary::new(SESSION_ID, BEAT_PLAN_ID, SessionStatus::Active, START_MS));
    source.put_beat_plan(beat_plan());
    for i in 0..3 {
        source.record_breadcrumb(SESSION_ID, LocationPoint::new(27.7172 + i as f64 * 0.0045, 85.3240, START_MS + i * MINUTE));
    }

    let config = TrackingConfig { refresh_interval: Duration::from_secs(2), ..TrackingConfig::default() };
    let mut view = SessionView::start(SESSION_ID, source.clone(), feed.clone(), config);

    match view.wait_for(|vm| vm.is_live).await {
        Ok(vm) => print_view("Connected", &vm),
        Err(e) => {
            eprintln!("Session closed before going live: {}", e);
            return;
        }
    }

    // Two more minutes of walking arrive over the push channel
    for i in 3..5 {
        let point = LocationPoint::new(27.7172 + i as f64 * 0.0045, 85.3240, START_MS + i * MINUTE);
        source.record_breadcrumb(SESSION_ID, point.clone());
        feed.publish(SESSION_ID, point);
    }
    if let Ok(vm) = view.wait_for(|vm| vm.route.len() == 5).await {
        print_view("After live updates", &vm);
    }

    source.set_status(SESSION_ID, SessionStatus::Completed, Some(START_MS + 5 * MINUTE));
    if let Ok(vm) = view.wait_for(|vm| vm.status() == Some(SessionStatus::Completed)).await {
        print_view("Completed", &vm);
    }

    view.stop();

    match serde_json::to_string_pretty(&view.current_view_model()) {
        Ok(json) => println!("\nFinal view model:\n{}", json),
        Err(e) => eprintln!("Failed to serialize view model: {}", e),
    }
}
