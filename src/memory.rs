//! In-process collaborators.
//!
//! [`MemorySource`] serves session snapshots from memory and [`LocalFeed`]
//! delivers pushed breadcrumbs over an in-process channel. Hosts that receive
//! session data through their own transport can feed it in here, and tests
//! use them to drive a [`SessionView`](crate::SessionView) without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::future::{self, BoxFuture};
use futures::{FutureExt, StreamExt};
use log::debug;

use crate::session::{LocationFeed, SessionSource, Subscription};
use crate::{BeatPlan, LocationPoint, Result, SessionError, SessionStatus, SessionSummary};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Memory Source
// ============================================================================

#[derive(Debug, Clone)]
struct StoredSession {
    summary: SessionSummary,
    breadcrumbs: Vec<LocationPoint>,
}

/// Mutable in-memory store implementing [`SessionSource`].
///
/// Archived beat-plan requests are served from the archived copy when one
/// was stored, otherwise from the live plan.
#[derive(Debug, Default)]
pub struct MemorySource {
    sessions: Mutex<HashMap<String, StoredSession>>,
    plans: Mutex<HashMap<String, BeatPlan>>,
    archived_plans: Mutex<HashMap<String, BeatPlan>>,
    unavailable: AtomicBool,
    summary_fetches: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a session, clearing its breadcrumbs.
    pub fn put_session(&self, summary: SessionSummary) {
        let id = summary.session_id.clone();
        lock(&self.sessions).insert(id, StoredSession { summary, breadcrumbs: Vec::new() });
    }

    pub fn put_beat_plan(&self, plan: BeatPlan) {
        lock(&self.plans).insert(plan.id.clone(), plan);
    }

    pub fn put_archived_beat_plan(&self, plan: BeatPlan) {
        lock(&self.archived_plans).insert(plan.id.clone(), plan);
    }

    /// Append a breadcrumb to a stored session's history.
    pub fn record_breadcrumb(&self, session_id: &str, point: LocationPoint) -> bool {
        match lock(&self.sessions).get_mut(session_id) {
            Some(session) => {
                session.breadcrumbs.push(point);
                true
            }
            None => false,
        }
    }

    /// Change a stored session's status, optionally stamping its end time.
    pub fn set_status(&self, session_id: &str, status: SessionStatus, ended_at: Option<i64>) -> bool {
        match lock(&self.sessions).get_mut(session_id) {
            Some(session) => {
                session.summary.status = status;
                if ended_at.is_some() {
                    session.summary.ended_at = ended_at;
                }
                true
            }
            None => false,
        }
    }

    /// Mark a visit in a stored beat plan.
    pub fn record_visit(&self, beat_plan_id: &str, directory_id: &str, visited_at: &str) -> bool {
        let mut plans = lock(&self.plans);
        let Some(plan) = plans.get_mut(beat_plan_id) else {
            return false;
        };
        match plan.visits.iter_mut().find(|v| v.directory_id == directory_id) {
            Some(visit) => {
                visit.status = crate::VisitStatus::Visited;
                visit.visited_at = Some(visited_at.to_string());
            }
            None => plan.visits.push(crate::VisitRecord {
                directory_id: directory_id.to_string(),
                status: crate::VisitStatus::Visited,
                visited_at: Some(visited_at.to_string()),
            }),
        }
        true
    }

    /// Simulate an outage: every fetch fails with a transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of summary fetches served or refused so far.
    pub fn summary_fetches(&self) -> usize {
        self.summary_fetches.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(SessionError::Transport("source unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn session(&self, session_id: &str) -> Result<StoredSession> {
        self.check_available()?;
        lock(&self.sessions)
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(format!("session {}", session_id)))
    }
}

impl SessionSource for MemorySource {
    fn fetch_summary<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<SessionSummary>> {
        self.summary_fetches.fetch_add(1, Ordering::SeqCst);
        future::ready(self.session(session_id).map(|s| s.summary)).boxed()
    }

    fn fetch_breadcrumbs<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<Vec<LocationPoint>>> {
        future::ready(self.session(session_id).map(|s| s.breadcrumbs)).boxed()
    }

    fn fetch_beat_plan<'a>(&'a self, beat_plan_id: &'a str, archived: bool) -> BoxFuture<'a, Result<BeatPlan>> {
        let result = self.check_available().and_then(|()| {
            let archived_copy = if archived {
                lock(&self.archived_plans).get(beat_plan_id).cloned()
            } else {
                None
            };
            archived_copy
                .or_else(|| lock(&self.plans).get(beat_plan_id).cloned())
                .ok_or_else(|| SessionError::NotFound(format!("beat plan {}", beat_plan_id)))
        });
        future::ready(result).boxed()
    }
}

// ============================================================================
// Local Feed
// ============================================================================

#[derive(Debug)]
struct Subscriber {
    id: u64,
    sender: UnboundedSender<LocationPoint>,
}

/// In-process push channel implementing [`LocationFeed`].
///
/// One subscriber per session; subscribing again replaces (and ends) the
/// previous stream.
#[derive(Debug, Default)]
pub struct LocalFeed {
    subscribers: Arc<Mutex<HashMap<String, Subscriber>>>,
    next_id: AtomicU64,
    failures_pending: AtomicUsize,
}

impl LocalFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a point to the session's subscriber. Returns `false` when
    /// nobody is subscribed.
    pub fn publish(&self, session_id: &str, point: LocationPoint) -> bool {
        lock(&self.subscribers)
            .get(session_id)
            .is_some_and(|s| s.sender.unbounded_send(point).is_ok())
    }

    /// End the session's stream as if the connection dropped.
    pub fn disconnect(&self, session_id: &str) -> bool {
        lock(&self.subscribers).remove(session_id).is_some()
    }

    pub fn is_subscribed(&self, session_id: &str) -> bool {
        lock(&self.subscribers).contains_key(session_id)
    }

    /// Make the next `count` subscribe calls fail.
    pub fn fail_next_subscriptions(&self, count: usize) {
        self.failures_pending.store(count, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl LocationFeed for LocalFeed {
    fn subscribe<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<Subscription>> {
        if self.take_failure() {
            return future::ready(Err(SessionError::Subscribe(format!(
                "feed refused session {}",
                session_id
            ))))
            .boxed();
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = unbounded();
        lock(&self.subscribers).insert(session_id.to_string(), Subscriber { id, sender });
        debug!("[LocalFeed] session {} subscribed (#{})", session_id, id);

        let subscribers = Arc::clone(&self.subscribers);
        let key = session_id.to_string();
        let subscription = Subscription::new(receiver.boxed(), move || {
            let mut subscribers = lock(&subscribers);
            if subscribers.get(&key).is_some_and(|s| s.id == id) {
                subscribers.remove(&key);
                debug!("[LocalFeed] session {} unsubscribed (#{})", key, id);
            }
        });

        future::ready(Ok(subscription)).boxed()
    }
}
