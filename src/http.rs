//! REST client for the field-sales backend.
//!
//! Implements [`SessionSource`] over four read-only endpoints:
//!
//! | Endpoint | Returns |
//! |---|---|
//! | `GET {base}/sessions/{id}` | [`SessionSummary`] |
//! | `GET {base}/sessions/{id}/breadcrumbs` | `Vec<LocationPoint>` |
//! | `GET {base}/beat-plans/{id}` | [`BeatPlan`] |
//! | `GET {base}/beat-plans/{id}/archived` | [`BeatPlan`] (frozen copy) |
//!
//! Requests share one pooled connection set. Transport errors and 429
//! responses are retried with exponential backoff.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use base64::Engine;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use crate::session::SessionSource;
use crate::{BeatPlan, LocationPoint, Result, SessionError, SessionSummary};

const MAX_IDLE_CONNECTIONS: usize = 8;
const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 500;

/// Exponential backoff for the given retry attempt: 500ms, 1s, 2s, then 4s.
fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(BASE_BACKOFF_MS * (1 << attempt.min(3)))
}

/// Authenticated client for the session endpoints.
pub struct SessionApiClient {
    client: Client,
    base_url: String,
    auth_header: String,
    consecutive_429s: AtomicU32,
}

impl SessionApiClient {
    /// Create a client for `base_url` (e.g. `https://api.example.com/v1`)
    /// authenticating with `api_key`.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let auth = base64::engine::general_purpose::STANDARD.encode(format!("API_KEY:{}", api_key));

        let client = Client::builder()
            .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS)
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SessionError::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header: format!("Basic {}", auth),
            consecutive_429s: AtomicU32::new(0),
        })
    }

    fn summary_url(&self, session_id: &str) -> String {
        format!("{}/sessions/{}", self.base_url, session_id)
    }

    fn breadcrumbs_url(&self, session_id: &str) -> String {
        format!("{}/sessions/{}/breadcrumbs", self.base_url, session_id)
    }

    fn beat_plan_url(&self, beat_plan_id: &str, archived: bool) -> String {
        if archived {
            format!("{}/beat-plans/{}/archived", self.base_url, beat_plan_id)
        } else {
            format!("{}/beat-plans/{}", self.base_url, beat_plan_id)
        }
    }

    fn record_429(&self) -> Duration {
        let count = self.consecutive_429s.fetch_add(1, Ordering::Relaxed);
        let wait = backoff(count);
        warn!("[SessionApiClient] got 429, consecutive: {}, backing off {:?}", count + 1, wait);
        wait
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T> {
        let started = Instant::now();
        let mut retries = 0;

        loop {
            let response = self
                .client
                .get(&url)
                .header("Authorization", &self.auth_header)
                .send()
                .await;

            let resp = match response {
                Ok(resp) => resp,
                Err(e) => {
                    if retries >= MAX_RETRIES {
                        return Err(SessionError::Transport(format!("{}: {}", url, e)));
                    }
                    let wait = backoff(retries);
                    retries += 1;
                    warn!("[SessionApiClient] {} failed: {}, retry {} after {:?}", url, e, retries, wait);
                    tokio::time::sleep(wait).await;
                    continue;
                }
            };

            let status = resp.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                if retries >= MAX_RETRIES {
                    return Err(SessionError::Http { status: status.as_u16(), url });
                }
                retries += 1;
                tokio::time::sleep(self.record_429()).await;
                continue;
            }
            self.consecutive_429s.store(0, Ordering::Relaxed);

            if status == StatusCode::NOT_FOUND {
                return Err(SessionError::NotFound(url));
            }
            if !status.is_success() {
                return Err(SessionError::Http { status: status.as_u16(), url });
            }

            let bytes = resp
                .bytes()
                .await
                .map_err(|e| SessionError::Transport(format!("body download from {}: {}", url, e)))?;
            let data = serde_json::from_slice(&bytes).map_err(|e| SessionError::Decode(format!("{}: {}", url, e)))?;

            debug!(
                "[SessionApiClient] GET {} -> {:.1}KB in {:?}",
                url,
                bytes.len() as f64 / 1024.0,
                started.elapsed()
            );
            return Ok(data);
        }
    }
}

impl SessionSource for SessionApiClient {
    fn fetch_summary<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<SessionSummary>> {
        self.get_json(self.summary_url(session_id)).boxed()
    }

    fn fetch_breadcrumbs<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<Vec<LocationPoint>>> {
        self.get_json(self.breadcrumbs_url(session_id)).boxed()
    }

    fn fetch_beat_plan<'a>(&'a self, beat_plan_id: &'a str, archived: bool) -> BoxFuture<'a, Result<BeatPlan>> {
        self.get_json(self.beat_plan_url(beat_plan_id, archived)).boxed()
    }
}
