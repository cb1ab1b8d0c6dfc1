//! FIFO request queue with a concurrency cap over a keep-alive client.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::Method;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::backoff::BackoffTracker;
use super::{Upstream, UpstreamResponse, UPSTREAM_TIMEOUT};
use crate::stats::{ActiveRequest, CompletedRequest, QueueStats};
use crate::telemetry;
use crate::{ProxyError, Result};

/// Completions ring size.
const COMPLETED_RING_SIZE: usize = 20;

/// Response headers replayed from the upstream to clients.
const PASSTHROUGH_HEADERS: &[&str] = &["content-type", "etag", "last-modified"];

/// A non-GET request forwarded verbatim (never cached).
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    /// Full URL as received: path plus query string.
    pub url: String,
    pub body: Option<Bytes>,
    pub content_type: Option<String>,
}

/// One unit of upstream work.
#[derive(Debug, Clone)]
struct Job {
    method: Method,
    url: String,
    body: Option<Bytes>,
    content_type: Option<String>,
    /// Whether this job's outcome feeds the backoff map. True for the
    /// cacheable GET path only.
    count_backoff: bool,
}

struct QueuedJob {
    job: Job,
    tx: oneshot::Sender<Result<UpstreamResponse>>,
    queued_at: Instant,
}

struct ActiveJob {
    id: u64,
    url: String,
    started: Instant,
}

struct CompletedJob {
    url: String,
    started_wall: DateTime<Utc>,
    finished_wall: DateTime<Utc>,
    runtime: Duration,
    success: bool,
}

/// Queue, active set, and completions ring behind one lock.
///
/// The lock is only ever held to mutate these collections; the HTTP call
/// itself runs in a detached task with no lock held.
#[derive(Default)]
struct DispatchState {
    queue: VecDeque<QueuedJob>,
    active: Vec<ActiveJob>,
    completed: VecDeque<CompletedJob>,
}

struct Inner {
    http: reqwest::Client,
    base_url: String,
    max_concurrent: usize,
    backoff: BackoffTracker,
    state: Mutex<DispatchState>,
    dispatching: AtomicBool,
    next_job_id: AtomicU64,
}

/// Bounded-concurrency gateway to the upstream service.
///
/// At most `max_concurrent` requests are in flight; the rest wait FIFO.
/// The dispatch trigger is re-entrant-safe: concurrent triggers collapse
/// into one drain pass, and a trigger arriving mid-drain is never lost.
///
/// Cloning is cheap; all clones share the same queue and backoff state.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager for the given upstream base URL.
    pub fn new(base_url: impl Into<String>, max_concurrent: usize) -> Self {
        let http = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        let base_url = base_url.into();
        Self {
            inner: Arc::new(Inner {
                http,
                base_url: base_url.trim_end_matches('/').to_string(),
                max_concurrent: max_concurrent.max(1),
                backoff: BackoffTracker::new(),
                state: Mutex::new(DispatchState::default()),
                dispatching: AtomicBool::new(false),
                next_job_id: AtomicU64::new(0),
            }),
        }
    }

    /// Issue (or queue) a GET for the given full URL.
    ///
    /// Fails fast with [`ProxyError::Backoff`] while the URL's backoff
    /// window is open; nothing is enqueued in that case.
    pub async fn fetch(&self, full_url: &str) -> Result<UpstreamResponse> {
        if let Some((retry_after, consecutive_errors)) = self.inner.backoff.remaining(full_url) {
            metrics::counter!(telemetry::BACKOFF_REJECTS_TOTAL).increment(1);
            return Err(ProxyError::Backoff {
                url: full_url.to_string(),
                retry_after,
                consecutive_errors,
            });
        }
        self.enqueue(Job {
            method: Method::GET,
            url: full_url.to_string(),
            body: None,
            content_type: None,
            count_backoff: true,
        })
        .await
    }

    /// Forward a non-GET request verbatim. Shares the queue and the
    /// concurrency cap with cacheable traffic, but never touches backoff.
    pub async fn forward(&self, request: ForwardRequest) -> Result<UpstreamResponse> {
        self.enqueue(Job {
            method: request.method,
            url: request.url,
            body: request.body,
            content_type: request.content_type,
            count_backoff: false,
        })
        .await
    }

    /// Time until the URL may be fetched again, if it is in backoff.
    pub fn backoff_remaining(&self, full_url: &str) -> Option<Duration> {
        self.inner.backoff.remaining(full_url).map(|(d, _)| d)
    }

    /// Failure accounting, exposed for the statistics surface.
    pub fn backoff(&self) -> &BackoffTracker {
        &self.inner.backoff
    }

    async fn enqueue(&self, job: Job) -> Result<UpstreamResponse> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock().unwrap();
            state.queue.push_back(QueuedJob {
                job,
                tx,
                queued_at: Instant::now(),
            });
            metrics::gauge!(telemetry::QUEUE_DEPTH).set(state.queue.len() as f64);
        }
        Self::trigger_dispatch(&self.inner);
        rx.await.map_err(|_| ProxyError::ShuttingDown)?
    }

    /// Drain the queue into flight slots.
    ///
    /// The `dispatching` flag collapses concurrent triggers. After a drain
    /// pass releases the flag, the queue is re-checked so a trigger that
    /// arrived (and bounced off the flag) mid-drain is still honoured.
    fn trigger_dispatch(inner: &Arc<Inner>) {
        loop {
            if inner.dispatching.swap(true, Ordering::AcqRel) {
                return;
            }
            loop {
                let next = {
                    let mut state = inner.state.lock().unwrap();
                    if state.active.len() >= inner.max_concurrent {
                        None
                    } else if let Some(queued) = state.queue.pop_front() {
                        let id = inner.next_job_id.fetch_add(1, Ordering::Relaxed);
                        state.active.push(ActiveJob {
                            id,
                            url: queued.job.url.clone(),
                            started: Instant::now(),
                        });
                        metrics::gauge!(telemetry::QUEUE_DEPTH).set(state.queue.len() as f64);
                        metrics::histogram!(telemetry::QUEUE_WAIT_SECONDS)
                            .record(queued.queued_at.elapsed().as_secs_f64());
                        Some((id, queued))
                    } else {
                        None
                    }
                };
                match next {
                    Some((id, queued)) => Self::launch(inner.clone(), id, queued),
                    None => break,
                }
            }
            inner.dispatching.store(false, Ordering::Release);
            let state = inner.state.lock().unwrap();
            if state.queue.is_empty() || state.active.len() >= inner.max_concurrent {
                return;
            }
        }
    }

    fn launch(inner: Arc<Inner>, id: u64, queued: QueuedJob) {
        tokio::spawn(async move {
            let QueuedJob { job, tx, .. } = queued;
            let started = Instant::now();
            let started_wall = Utc::now();
            let result = Self::execute(&inner, &job).await;
            Self::complete(&inner, id, &job, started, started_wall, &result);
            // A dropped receiver just means the waiter went away.
            let _ = tx.send(result);
            Self::trigger_dispatch(&inner);
        });
    }

    /// The HTTP exchange itself. Status < 500 is a non-error so 4xx
    /// results flow back to the caller for caching; 5xx, transport
    /// errors, and timeouts are failures.
    async fn execute(inner: &Inner, job: &Job) -> Result<UpstreamResponse> {
        let url = format!("{}{}", inner.base_url, job.url);
        let started = Instant::now();

        let mut request = inner.http.request(job.method.clone(), &url);
        if let Some(body) = &job.body {
            request = request.body(body.clone());
        }
        if let Some(content_type) = &job.content_type {
            request = request.header("content-type", content_type);
        }

        let response = request.send().await.map_err(ProxyError::from)?;
        let status = response.status();
        if status.is_server_error() {
            return Err(ProxyError::UpstreamStatus {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("upstream error")
                    .to_string(),
            });
        }

        let headers = PASSTHROUGH_HEADERS
            .iter()
            .filter_map(|name| {
                response
                    .headers()
                    .get(*name)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();
        let payload = response.bytes().await.map_err(ProxyError::from)?;

        Ok(UpstreamResponse {
            status: status.as_u16(),
            payload,
            headers,
            duration: started.elapsed(),
        })
    }

    fn complete(
        inner: &Inner,
        id: u64,
        job: &Job,
        started: Instant,
        started_wall: DateTime<Utc>,
        result: &Result<UpstreamResponse>,
    ) {
        let success = result.is_ok();
        let runtime = started.elapsed();

        {
            let mut state = inner.state.lock().unwrap();
            state.active.retain(|a| a.id != id);
            state.completed.push_front(CompletedJob {
                url: job.url.clone(),
                started_wall,
                finished_wall: Utc::now(),
                runtime,
                success,
            });
            state.completed.truncate(COMPLETED_RING_SIZE);
        }

        match result {
            Ok(response) => {
                if job.count_backoff {
                    inner.backoff.record_success(&job.url);
                }
                debug!(url = %job.url, status = response.status,
                    runtime_ms = runtime.as_millis() as u64, "upstream request completed");
            }
            Err(e) => {
                if e.counts_as_upstream_failure() {
                    metrics::counter!(telemetry::UPSTREAM_ERRORS_TOTAL).increment(1);
                    if job.count_backoff {
                        inner.backoff.record_failure(&job.url);
                    }
                }
                warn!(url = %job.url, error = %e, "upstream request failed");
            }
        }

        let status = if success { "ok" } else { "error" };
        metrics::counter!(telemetry::UPSTREAM_REQUESTS_TOTAL, "status" => status).increment(1);
        metrics::histogram!(telemetry::UPSTREAM_DURATION_SECONDS).record(runtime.as_secs_f64());
    }

    /// Best-effort snapshot of queue, active set, and completions ring.
    pub fn queue_stats(&self) -> QueueStats {
        let state = self.inner.state.lock().unwrap();
        QueueStats {
            queue_length: state.queue.len(),
            active_count: state.active.len(),
            max_concurrent: self.inner.max_concurrent,
            queued_urls: state.queue.iter().map(|q| q.job.url.clone()).collect(),
            active: state
                .active
                .iter()
                .map(|a| ActiveRequest {
                    url: a.url.clone(),
                    elapsed_ms: a.started.elapsed().as_millis() as u64,
                })
                .collect(),
            recently_completed: state
                .completed
                .iter()
                .map(|c| CompletedRequest {
                    url: c.url.clone(),
                    started_at: c.started_wall,
                    finished_at: c.finished_wall,
                    runtime_ms: c.runtime.as_millis() as u64,
                    success: c.success,
                })
                .collect(),
        }
    }
}

#[async_trait]
impl Upstream for ConnectionManager {
    async fn fetch(&self, full_url: &str) -> Result<UpstreamResponse> {
        ConnectionManager::fetch(self, full_url).await
    }

    fn backoff_remaining(&self, full_url: &str) -> Option<Duration> {
        ConnectionManager::backoff_remaining(self, full_url)
    }
}
