//! Live session view.
//!
//! A [`SessionView`] watches exactly one session. It spawns a task that owns
//! the session's state and multiplexes two update paths:
//!
//! - the push stream from a [`LocationFeed`], carrying new breadcrumbs
//! - a periodic refresh against a [`SessionSource`], carrying the
//!   authoritative summary, full breadcrumb history and beat plan
//!
//! Both paths write through the same `apply` funnel, so points are applied in
//! receipt order and every recomputation sees the latest state. If the push
//! stream is unavailable the refresh alone keeps the view current, one
//! interval behind.
//!
//! ```no_run
//! use std::sync::Arc;
//! use field_session::{LocalFeed, MemorySource, SessionView, TrackingConfig};
//!
//! # async fn demo(source: Arc<MemorySource>, feed: Arc<LocalFeed>) {
//! let mut view = SessionView::start("s-42", source, feed, TrackingConfig::default());
//! let vm = view.current_view_model();
//! println!("{} timeline rows", vm.timeline.len());
//! view.stop();
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{try_join, BoxFuture};
use futures::stream::BoxStream;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::view::{SessionState, SessionViewModel, Update};
use crate::{BeatPlan, LocationPoint, Result, SessionError, SessionStatus, SessionSummary, TrackingConfig};

/// Lower bound on the refresh period; a zero interval would spin.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Collaborator Contracts
// ============================================================================

/// Pull API for session data.
pub trait SessionSource: Send + Sync {
    fn fetch_summary<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<SessionSummary>>;

    /// Full breadcrumb history, oldest first.
    fn fetch_breadcrumbs<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<Vec<LocationPoint>>>;

    /// The beat plan; `archived` selects the frozen copy kept for completed sessions.
    fn fetch_beat_plan<'a>(&'a self, beat_plan_id: &'a str, archived: bool) -> BoxFuture<'a, Result<BeatPlan>>;
}

/// Push channel for live breadcrumbs.
///
/// At most one subscription per session is expected to be open per viewer.
pub trait LocationFeed: Send + Sync {
    fn subscribe<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<Subscription>>;
}

type UnsubscribeFn = Box<dyn FnOnce() + Send>;

/// Shared, fire-once unsubscribe callback.
#[derive(Clone)]
struct Unsubscribe(Arc<Mutex<Option<UnsubscribeFn>>>);

impl Unsubscribe {
    fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(Some(Box::new(f)))))
    }

    fn fire(&self) {
        let callback = self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(callback) = callback {
            callback();
        }
    }
}

/// Unsubscribe handle shared between a view and its task.
///
/// Once closed, nothing can be stored; the task must release any
/// subscription it opens afterwards itself.
#[derive(Default)]
struct ReleaseSlot(Mutex<ReleaseState>);

#[derive(Default)]
struct ReleaseState {
    closed: bool,
    pending: Option<Unsubscribe>,
}

impl ReleaseSlot {
    fn state(&self) -> MutexGuard<'_, ReleaseState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the handle unless the view is closed. Returns `false` when closed.
    fn store(&self, unsubscribe: Unsubscribe) -> bool {
        let mut state = self.state();
        if state.closed {
            return false;
        }
        state.pending = Some(unsubscribe);
        true
    }

    fn clear(&self) {
        self.state().pending = None;
    }

    /// Close the slot, handing back whatever was stored.
    fn close(&self) -> Option<Unsubscribe> {
        let mut state = self.state();
        state.closed = true;
        state.pending.take()
    }
}

/// An open push subscription.
///
/// Dropping it unsubscribes. The unsubscribe callback runs at most once.
pub struct Subscription {
    updates: BoxStream<'static, LocationPoint>,
    unsubscribe: Unsubscribe,
}

impl Subscription {
    pub fn new(updates: BoxStream<'static, LocationPoint>, on_unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self { updates, unsubscribe: Unsubscribe::new(on_unsubscribe) }
    }

    /// Next pushed point; `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<LocationPoint> {
        self.updates.next().await
    }

    pub fn unsubscribe(&mut self) {
        self.unsubscribe.fire();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe.fire();
    }
}

// ============================================================================
// Session View
// ============================================================================

/// Handle to one watched session.
///
/// Stopping (or dropping) the handle cancels the refresh timer, releases the
/// push subscription and freezes the view model: nothing observed through
/// this handle changes afterwards.
pub struct SessionView {
    session_id: String,
    updates: watch::Receiver<SessionViewModel>,
    frozen: Option<SessionViewModel>,
    release: Arc<ReleaseSlot>,
    task: Option<JoinHandle<()>>,
}

impl SessionView {
    /// Open a session and start watching it.
    ///
    /// Active sessions subscribe to the push feed and refresh every
    /// `config.refresh_interval`. Sessions that are not active are loaded
    /// once. Must be called from within a tokio runtime.
    pub fn start(
        session_id: &str,
        source: Arc<dyn SessionSource>,
        feed: Arc<dyn LocationFeed>,
        config: TrackingConfig,
    ) -> Self {
        let (publish, updates) = watch::channel(SessionViewModel::loading(session_id, &config));
        let release = Arc::new(ReleaseSlot::default());

        let task = SessionTask {
            session_id: session_id.to_string(),
            source,
            feed,
            config,
            state: SessionState::default(),
            subscription: None,
            release: Arc::clone(&release),
            publish,
        };

        info!("[SessionView {}] starting", session_id);
        let handle = tokio::spawn(task.run());

        Self {
            session_id: session_id.to_string(),
            updates,
            frozen: None,
            release,
            task: Some(handle),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Latest view model.
    pub fn current_view_model(&self) -> SessionViewModel {
        match &self.frozen {
            Some(vm) => vm.clone(),
            None => self.updates.borrow().clone(),
        }
    }

    /// Wait for the next published view model.
    ///
    /// Fails with [`SessionError::Closed`] once the view is stopped or the
    /// session task has finished and every update has been seen.
    pub async fn changed(&mut self) -> Result<SessionViewModel> {
        if self.frozen.is_some() {
            return Err(SessionError::Closed);
        }
        self.updates.changed().await.map_err(|_| SessionError::Closed)?;
        Ok(self.updates.borrow_and_update().clone())
    }

    /// Wait until a published view model satisfies `predicate`.
    pub async fn wait_for(&mut self, predicate: impl FnMut(&SessionViewModel) -> bool) -> Result<SessionViewModel> {
        if self.frozen.is_some() {
            return Err(SessionError::Closed);
        }
        let vm = self.updates.wait_for(predicate).await.map_err(|_| SessionError::Closed)?;
        Ok(vm.clone())
    }

    /// Whether the session task is still watching for updates.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop watching. Idempotent; safe when no subscription was ever opened.
    pub fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        self.frozen = Some(self.updates.borrow().clone());
        task.abort();

        if let Some(unsubscribe) = self.release.close() {
            unsubscribe.fire();
        }

        info!("[SessionView {}] stopped", self.session_id);
    }
}

impl Drop for SessionView {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Session Task
// ============================================================================

struct SessionTask {
    session_id: String,
    source: Arc<dyn SessionSource>,
    feed: Arc<dyn LocationFeed>,
    config: TrackingConfig,
    state: SessionState,
    subscription: Option<Subscription>,
    release: Arc<ReleaseSlot>,
    publish: watch::Sender<SessionViewModel>,
}

impl SessionTask {
    async fn run(mut self) {
        self.refresh().await;

        if !self.should_watch() {
            info!(
                "[SessionView {}] session is {:?}, loaded once",
                self.session_id,
                self.state.summary().map(|s| s.status)
            );
            return;
        }

        self.ensure_subscribed().await;

        let period = self.config.refresh_interval.max(MIN_REFRESH_INTERVAL);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                pushed = next_pushed(&mut self.subscription) => match pushed {
                    Some(point) => {
                        debug!(
                            "[SessionView {}] pushed point at {} ({:.5}, {:.5})",
                            self.session_id, point.timestamp, point.latitude, point.longitude
                        );
                        self.apply(Update::Location(point));
                    }
                    None => {
                        warn!("[SessionView {}] push stream ended, relying on refresh", self.session_id);
                        self.release_subscription();
                    }
                },
                _ = ticker.tick() => {
                    self.refresh().await;
                    if !self.should_watch() {
                        info!(
                            "[SessionView {}] session left active state, closing live channel",
                            self.session_id
                        );
                        self.release_subscription();
                        break;
                    }
                    self.ensure_subscribed().await;
                }
            }
        }
    }

    /// Keep watching while the session is active, or while it has never loaded.
    fn should_watch(&self) -> bool {
        self.state.summary().map_or(true, SessionSummary::is_active)
    }

    async fn refresh(&mut self) {
        let fetched = try_join(
            self.source.fetch_summary(&self.session_id),
            self.source.fetch_breadcrumbs(&self.session_id),
        )
        .await;

        let update = match fetched {
            Ok((summary, breadcrumbs)) => {
                let archived = summary.status == SessionStatus::Completed;
                let plan = self.source.fetch_beat_plan(&summary.beat_plan_id, archived).await;
                let beat_plan = match plan {
                    Ok(plan) => Some(plan),
                    Err(e) => {
                        warn!(
                            "[SessionView {}] beat plan {} unavailable, keeping previous: {}",
                            self.session_id, summary.beat_plan_id, e
                        );
                        None
                    }
                };
                debug!(
                    "[SessionView {}] refreshed: {:?}, {} breadcrumbs",
                    self.session_id,
                    summary.status,
                    breadcrumbs.len()
                );
                Update::Refreshed { summary, breadcrumbs, beat_plan }
            }
            Err(e) => {
                warn!("[SessionView {}] refresh failed: {}", self.session_id, e);
                Update::RefreshFailed(e)
            }
        };

        self.apply(update);
    }

    async fn ensure_subscribed(&mut self) {
        if self.subscription.is_some() || !self.state.is_active() {
            return;
        }

        let result = self.feed.subscribe(&self.session_id).await;
        match result {
            Ok(mut subscription) => {
                if !self.release.store(subscription.unsubscribe.clone()) {
                    info!("[SessionView {}] view stopped while subscribing, releasing", self.session_id);
                    subscription.unsubscribe();
                    return;
                }
                info!("[SessionView {}] subscribed to live updates", self.session_id);
                self.subscription = Some(subscription);
                self.apply(Update::Connection(true));
            }
            Err(e) => {
                warn!(
                    "[SessionView {}] subscribe failed, retrying on next refresh: {}",
                    self.session_id, e
                );
            }
        }
    }

    fn release_subscription(&mut self) {
        self.release.clear();
        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe();
            self.apply(Update::Connection(false));
        }
    }

    fn apply(&mut self, update: Update) {
        self.state.apply(update);
        let now_ms = chrono::Utc::now().timestamp_millis();
        let vm = self.state.view_model(&self.session_id, &self.config, now_ms);
        self.publish.send_replace(vm);
    }
}

/// Next point from the subscription, or never when there is none.
async fn next_pushed(subscription: &mut Option<Subscription>) -> Option<LocationPoint> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}
