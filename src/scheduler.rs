//! Polling refresh for one data source.
//!
//! `RefreshCore` is the single writer of a source's state: every request gets
//! a sequence number, and only the response to the most recently issued
//! request may change anything. Readers watch the published `RefreshState`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{RiskThresholds, SchedulePolicy};
use crate::error::{FetchError, FetchResult};
use crate::models::{CustomerBatch, HealthScale, Snapshot};
use crate::normalize::{self, NormalizeOptions};
use crate::source::{DashboardStats, DataSource};

/// Something the scheduler can load on every tick.
#[async_trait]
pub trait Feed: Send + Sync + 'static {
    type Item: Send + Sync + 'static;

    async fn load(&self) -> FetchResult<Self::Item>;
}

/// Customers endpoint plus normalization; shape errors fail the cycle.
pub struct CustomerFeed<S: ?Sized> {
    source: Arc<S>,
    health_scale: HealthScale,
    thresholds: RiskThresholds,
}

impl<S: ?Sized> CustomerFeed<S> {
    pub fn new(source: Arc<S>, health_scale: HealthScale, thresholds: RiskThresholds) -> Self {
        Self {
            source,
            health_scale,
            thresholds,
        }
    }
}

#[async_trait]
impl<S: DataSource + ?Sized + 'static> Feed for CustomerFeed<S> {
    type Item = CustomerBatch;

    async fn load(&self) -> FetchResult<CustomerBatch> {
        let payload = self.source.customers().await?;
        let options = NormalizeOptions {
            health_scale: self.health_scale,
            thresholds: self.thresholds,
            reference_date: Utc::now().date_naive(),
        };
        normalize::normalize_customers(&payload, &options)
    }
}

pub struct StatsFeed<S: ?Sized> {
    source: Arc<S>,
}

impl<S: ?Sized> StatsFeed<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl<S: DataSource + ?Sized + 'static> Feed for StatsFeed<S> {
    type Item = DashboardStats;

    async fn load(&self) -> FetchResult<DashboardStats> {
        self.source.dashboard_stats().await?.ok_or_else(|| {
            FetchError::MalformedPayload("source does not provide dashboard stats".to_string())
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Fetching,
    Ready,
    Error,
}

/// What readers see. An error never removes the last good snapshot.
#[derive(Debug)]
pub struct RefreshState<T> {
    pub phase: Phase,
    pub snapshot: Option<Arc<Snapshot<T>>>,
    pub last_error: Option<FetchError>,
    pub consecutive_errors: u32,
}

impl<T> Clone for RefreshState<T> {
    fn clone(&self) -> Self {
        Self {
            phase: self.phase,
            snapshot: self.snapshot.clone(),
            last_error: self.last_error.clone(),
            consecutive_errors: self.consecutive_errors,
        }
    }
}

impl<T> Default for RefreshState<T> {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            snapshot: None,
            last_error: None,
            consecutive_errors: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTicket {
    seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied { generation: u64 },
    Failed,
    Discarded,
}

pub struct RefreshCore<T> {
    label: &'static str,
    issued: u64,
    in_flight: Option<u64>,
    generation: u64,
    closed: bool,
    state: watch::Sender<RefreshState<T>>,
}

impl<T> RefreshCore<T> {
    pub fn new(label: &'static str) -> (Self, watch::Receiver<RefreshState<T>>) {
        let (state, rx) = watch::channel(RefreshState::default());
        let core = Self {
            label,
            issued: 0,
            in_flight: None,
            generation: 0,
            closed: false,
            state,
        };
        (core, rx)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.state.borrow().consecutive_errors
    }

    /// Issues a new request, superseding any outstanding one.
    pub fn begin(&mut self) -> Option<RequestTicket> {
        if self.closed {
            return None;
        }
        self.issued += 1;
        self.in_flight = Some(self.issued);
        self.state.send_modify(|state| state.phase = Phase::Fetching);
        tracing::debug!(source = self.label, seq = self.issued, "refresh issued");
        Some(RequestTicket { seq: self.issued })
    }

    pub fn complete(&mut self, ticket: RequestTicket, result: FetchResult<T>) -> Outcome {
        if self.closed || ticket.seq != self.issued {
            tracing::debug!(
                source = self.label,
                seq = ticket.seq,
                latest = self.issued,
                closed = self.closed,
                "stale response discarded"
            );
            return Outcome::Discarded;
        }
        self.in_flight = None;

        match result {
            Ok(payload) => {
                self.generation += 1;
                let snapshot = Arc::new(Snapshot {
                    generation: self.generation,
                    fetched_at: Utc::now(),
                    payload,
                });
                self.state.send_modify(|state| {
                    state.phase = Phase::Ready;
                    state.snapshot = Some(snapshot);
                    state.last_error = None;
                    state.consecutive_errors = 0;
                });
                tracing::info!(source = self.label, generation = self.generation, "snapshot refreshed");
                Outcome::Applied {
                    generation: self.generation,
                }
            }
            Err(err) => {
                tracing::warn!(source = self.label, seq = ticket.seq, error = %err, "refresh failed");
                self.state.send_modify(|state| {
                    state.phase = Phase::Error;
                    state.last_error = Some(err);
                    state.consecutive_errors += 1;
                });
                Outcome::Failed
            }
        }
    }

    /// After close no request is issued and every pending response is dropped.
    pub fn close(&mut self) {
        self.closed = true;
        self.in_flight = None;
    }
}

/// Owner's side of a running scheduler. Dropping it tears the scheduler down.
pub struct RefreshHandle<T> {
    core: Arc<Mutex<RefreshCore<T>>>,
    rx: watch::Receiver<RefreshState<T>>,
    trigger: Arc<Notify>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<T> RefreshHandle<T> {
    pub fn subscribe(&self) -> watch::Receiver<RefreshState<T>> {
        self.rx.clone()
    }

    #[cfg(test)]
    pub fn current(&self) -> RefreshState<T> {
        self.rx.borrow().clone()
    }

    pub fn latest(&self) -> Option<Arc<Snapshot<T>>> {
        self.rx.borrow().snapshot.clone()
    }

    /// Issues a request now, even if one is outstanding.
    pub fn refresh_now(&self) {
        self.trigger.notify_one();
    }

    pub async fn shutdown(mut self) {
        self.teardown();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn teardown(&mut self) {
        self.cancel.cancel();
        self.core.lock().close();
    }
}

impl<T> Drop for RefreshHandle<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Starts polling `feed` under `policy`. The first request goes out immediately.
pub fn spawn<F: Feed>(feed: F, policy: SchedulePolicy, label: &'static str) -> RefreshHandle<F::Item> {
    let (core, rx) = RefreshCore::new(label);
    let core = Arc::new(Mutex::new(core));
    let trigger = Arc::new(Notify::new());
    let cancel = CancellationToken::new();

    let task = tokio::spawn(run(
        Arc::new(feed),
        core.clone(),
        policy,
        trigger.clone(),
        cancel.clone(),
    ));

    RefreshHandle {
        core,
        rx,
        trigger,
        cancel,
        task: Some(task),
    }
}

async fn run<F: Feed>(
    feed: Arc<F>,
    core: Arc<Mutex<RefreshCore<F::Item>>>,
    policy: SchedulePolicy,
    trigger: Arc<Notify>,
    cancel: CancellationToken,
) {
    let settled = Arc::new(Notify::new());
    let mut rng = StdRng::from_entropy();
    let mut last_issue = Instant::now();
    let mut next_at = last_issue;

    loop {
        let forced = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep_until(next_at) => false,
            _ = trigger.notified() => true,
            _ = settled.notified() => {
                // Re-plan the pending tick with the latest failure streak.
                let errors = core.lock().consecutive_errors();
                next_at = last_issue + policy.next_delay(errors, &mut rng);
                continue;
            }
        };

        let ticket = {
            let mut core = core.lock();
            if !forced && core.is_in_flight() {
                tracing::debug!(source = core.label, "tick skipped, request still in flight");
                None
            } else {
                core.begin()
            }
        };

        last_issue = Instant::now();
        let errors = core.lock().consecutive_errors();
        next_at = last_issue + policy.next_delay(errors, &mut rng);

        if let Some(ticket) = ticket {
            tokio::spawn(fetch(
                feed.clone(),
                core.clone(),
                ticket,
                policy,
                settled.clone(),
                cancel.clone(),
            ));
        }
    }

    tracing::debug!(source = core.lock().label, "refresh scheduler stopped");
}

async fn fetch<F: Feed>(
    feed: Arc<F>,
    core: Arc<Mutex<RefreshCore<F::Item>>>,
    ticket: RequestTicket,
    policy: SchedulePolicy,
    settled: Arc<Notify>,
    cancel: CancellationToken,
) {
    let timeout = policy.request_timeout();
    let result = tokio::select! {
        _ = cancel.cancelled() => return,
        loaded = tokio::time::timeout(timeout, feed.load()) => match loaded {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout { secs: timeout.as_secs() }),
        },
    };

    let outcome = core.lock().complete(ticket, result);
    if outcome != Outcome::Discarded {
        settled.notify_one();
    }
}
