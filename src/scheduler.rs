//! Refresh scheduler.
//!
//! A single actor owns the fetch→detect→persist pipeline. Its inputs are
//! the interval timer, manual-trigger commands and the shutdown token; its
//! output is a `RefreshResult` published to every waiter of the run.
//!
//! Exactly one refresh is in flight at any instant. Ticks arriving while
//! a refresh runs are dropped; manual triggers piggyback on the in-flight
//! run and all receive the same result.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::detector::{self, DetectionConfig};
use crate::feed::OddsFeed;
use crate::store::{Store, StoreError};
use crate::types::{
    Event, FeedError, LastRun, QuotaSnapshot, RefreshResult, RefreshStatus, Sport,
};

/// Retry attempts per sport on transient upstream failures.
const MAX_FETCH_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff between retries (1s → 2s → 4s).
const BASE_BACKOFF_MS: u64 = 1000;

/// Relative jitter applied to each backoff delay.
const BACKOFF_JITTER_PCT: u64 = 10;

/// Opportunity rows older than this are purged after each refresh.
const OPPORTUNITY_RETENTION_DAYS: i64 = 30;

/// Bound on the drain after a shutdown request.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Settings and shared state
// ---------------------------------------------------------------------------

/// Scheduler parameters, snapshotted once at startup.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Sports to poll. Empty = derive from the synced catalogue.
    pub sports: Vec<String>,
    /// Zero disables automatic ticks (manual-only mode).
    pub refresh_interval: Duration,
    pub detection: DetectionConfig,
}

/// State published by the scheduler for the read surface. Each field is
/// replaced wholesale by its single writer (the scheduler task).
#[derive(Default)]
pub struct SharedState {
    last_run: RwLock<Option<LastRun>>,
    quota: RwLock<Option<QuotaSnapshot>>,
    catalogue: RwLock<Vec<Sport>>,
    last_success_started: RwLock<Option<chrono::DateTime<Utc>>>,
}

/// Cheap cloneable handle for triggering refreshes and reading status.
#[derive(Clone)]
pub struct SchedulerHandle {
    cmd_tx: mpsc::Sender<Command>,
    shared: Arc<SharedState>,
}

impl SchedulerHandle {
    /// Trigger a refresh and wait for its result. If a refresh is already
    /// in flight, the call piggybacks on it. Returns a cancelled result
    /// when the scheduler is shutting down.
    pub async fn trigger_refresh(&self) -> RefreshResult {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Refresh { reply: reply_tx })
            .await
            .is_err()
        {
            return RefreshResult::cancelled();
        }
        reply_rx.await.unwrap_or_else(|_| RefreshResult::cancelled())
    }

    pub async fn last_run(&self) -> Option<LastRun> {
        self.shared.last_run.read().await.clone()
    }

    pub async fn quota(&self) -> Option<QuotaSnapshot> {
        self.shared.quota.read().await.clone()
    }

    pub async fn catalogue(&self) -> Vec<Sport> {
        self.shared.catalogue.read().await.clone()
    }

    /// Start instant of the most recent refresh that replaced the
    /// latest-events snapshot. Drives the "current opportunities" read.
    pub async fn last_success_started(&self) -> Option<chrono::DateTime<Utc>> {
        *self.shared.last_success_started.read().await
    }
}

enum Command {
    Refresh { reply: oneshot::Sender<RefreshResult> },
}

// ---------------------------------------------------------------------------
// Scheduler actor
// ---------------------------------------------------------------------------

pub struct Scheduler {
    feed: Arc<dyn OddsFeed>,
    store: Arc<Store>,
    settings: SchedulerSettings,
    shared: Arc<SharedState>,
    cmd_rx: mpsc::Receiver<Command>,
    cancel: CancellationToken,
}

/// Everything a finished refresh hands back to the actor.
struct RefreshOutcome {
    result: RefreshResult,
    last_run: LastRun,
    /// Set when the store snapshot was replaced this run.
    store_updated: bool,
    /// Tick suppression requested by a quota-exhausted cycle.
    suppress_for: Option<Duration>,
}

impl Scheduler {
    /// Spawn the scheduler actor. Returns the handle and the join handle
    /// for shutdown sequencing.
    pub fn spawn(
        feed: Arc<dyn OddsFeed>,
        store: Arc<Store>,
        settings: SchedulerSettings,
        cancel: CancellationToken,
    ) -> (SchedulerHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let shared = Arc::new(SharedState::default());
        let handle = SchedulerHandle { cmd_tx, shared: shared.clone() };

        let scheduler = Scheduler { feed, store, settings, shared, cmd_rx, cancel };
        let join = tokio::spawn(scheduler.run());

        (handle, join)
    }

    async fn run(mut self) {
        self.sync_catalogue().await;

        let auto = !self.settings.refresh_interval.is_zero();
        let mut ticker = if auto {
            let period = self.settings.refresh_interval;
            let mut interval = tokio::time::interval_at(
                tokio::time::Instant::now() + period,
                period,
            );
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            Some(interval)
        } else {
            info!("Automatic refresh disabled (interval = 0); manual mode");
            None
        };

        let mut running: Option<JoinHandle<RefreshOutcome>> = None;
        let mut waiters: Vec<oneshot::Sender<RefreshResult>> = Vec::new();
        let mut suppress_until: Option<tokio::time::Instant> = None;

        // Initial refresh before the first interval tick.
        if auto {
            info!("Running initial refresh");
            running = Some(self.spawn_refresh().await);
        }

        loop {
            tokio::select! {
                outcome = join_running(&mut running) => {
                    running = None;
                    self.finish_refresh(outcome, &mut waiters, &mut suppress_until).await;
                }
                Some(Command::Refresh { reply }) = self.cmd_rx.recv() => {
                    waiters.push(reply);
                    if running.is_none() {
                        running = Some(self.spawn_refresh().await);
                    } else {
                        debug!("Manual refresh piggybacks on in-flight run");
                    }
                }
                _ = tick(&mut ticker) => {
                    if running.is_some() {
                        info!("Interval tick dropped; refresh already in flight");
                        continue;
                    }
                    if let Some(until) = suppress_until {
                        let now = tokio::time::Instant::now();
                        if now < until {
                            info!(
                                remaining_s = (until - now).as_secs(),
                                "Tick suppressed until quota reset"
                            );
                            continue;
                        }
                        suppress_until = None;
                    }
                    running = Some(self.spawn_refresh().await);
                }
                _ = self.cancel.cancelled() => {
                    // The refresh task shares the token and aborts at its
                    // next safe point; give it the grace period to drain.
                    if let Some(handle) = running.take() {
                        match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                            Ok(outcome) => {
                                self.finish_refresh(outcome, &mut waiters, &mut suppress_until)
                                    .await;
                            }
                            Err(_) => warn!("Refresh did not drain within the shutdown grace"),
                        }
                    }
                    break;
                }
            }
        }

        for waiter in waiters {
            let _ = waiter.send(RefreshResult::cancelled());
        }
        info!("Scheduler stopped");
    }

    /// Resolve the sports to poll and spawn the refresh task.
    async fn spawn_refresh(&self) -> JoinHandle<RefreshOutcome> {
        let sports = if self.settings.sports.is_empty() {
            self.shared
                .catalogue
                .read()
                .await
                .iter()
                .filter(|s| s.active && s.has_outcomes)
                .map(|s| s.key.clone())
                .collect()
        } else {
            self.settings.sports.clone()
        };

        let feed = self.feed.clone();
        let store = self.store.clone();
        let detection = self.settings.detection.clone();
        let cancel = self.cancel.child_token();

        tokio::spawn(run_refresh(feed, store, sports, detection, cancel))
    }

    /// Publish the outcome of a finished refresh and wake its waiters.
    async fn finish_refresh(
        &self,
        outcome: Result<RefreshOutcome, tokio::task::JoinError>,
        waiters: &mut Vec<oneshot::Sender<RefreshResult>>,
        suppress_until: &mut Option<tokio::time::Instant>,
    ) {
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Refresh task aborted");
                for waiter in waiters.drain(..) {
                    let _ = waiter.send(RefreshResult::cancelled());
                }
                return;
            }
        };

        if let Some(quota) = &outcome.result.quota {
            *self.shared.quota.write().await = Some(quota.clone());
        }
        if outcome.store_updated {
            *self.shared.last_success_started.write().await =
                Some(outcome.last_run.started_at);
        }
        *self.shared.last_run.write().await = Some(outcome.last_run);

        if let Some(delay) = outcome.suppress_for {
            info!(delay_s = delay.as_secs(), "Suppressing ticks until quota reset");
            *suppress_until = Some(tokio::time::Instant::now() + delay);
        }

        for waiter in waiters.drain(..) {
            let _ = waiter.send(outcome.result.clone());
        }
    }

    /// Fetch the upstream catalogue once at startup and publish it for
    /// the read surface; configured sports absent from it are logged.
    async fn sync_catalogue(&self) {
        match self.feed.list_sports().await {
            Ok(sports) => {
                for key in &self.settings.sports {
                    if !sports.iter().any(|s| &s.key == key) {
                        warn!(sport = %key, "Configured sport not in upstream catalogue");
                    }
                }
                info!(count = sports.len(), "Sports catalogue synced");
                *self.shared.catalogue.write().await = sports;
            }
            Err(e) => warn!(error = %e, "Catalogue sync failed; continuing without"),
        }
    }
}

/// Await the next tick, or pend forever in manual-only mode.
async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Await the in-flight refresh, or pend forever while idle.
async fn join_running(
    running: &mut Option<JoinHandle<RefreshOutcome>>,
) -> Result<RefreshOutcome, tokio::task::JoinError> {
    match running {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// One refresh cycle
// ---------------------------------------------------------------------------

async fn run_refresh(
    feed: Arc<dyn OddsFeed>,
    store: Arc<Store>,
    sports: Vec<String>,
    detection: DetectionConfig,
    cancel: CancellationToken,
) -> RefreshOutcome {
    let started_at = Utc::now();
    let t0 = Instant::now();
    info!(sports = sports.len(), "Refresh started");

    let mut all_events: Vec<Event> = Vec::new();
    let mut errors: Vec<String> = Vec::new();
    let mut quota: Option<QuotaSnapshot> = None;
    let mut status = RefreshStatus::Ok;
    let mut suppress_for: Option<Duration> = None;
    let mut aborted = false;

    for sport in &sports {
        // Safe abort point between sport fetches.
        if cancel.is_cancelled() {
            info!("Refresh cancelled between sport fetches");
            status = RefreshStatus::Cancelled;
            aborted = true;
            break;
        }

        match fetch_with_retry(feed.as_ref(), sport, &cancel).await {
            Ok((events, q)) => {
                info!(sport = %sport, events = events.len(), "Odds fetched");
                all_events.extend(events);
                if q.is_some() {
                    quota = q;
                }
            }
            Err(FeedError::Auth) => {
                error!(sport = %sport, "Upstream rejected the API key; aborting cycle");
                errors.push("upstream rejected the API key".to_string());
                status = RefreshStatus::Failed;
                aborted = true;
                break;
            }
            Err(FeedError::QuotaExhausted { retry_after }) => {
                warn!(sport = %sport, retry_after = ?retry_after, "Quota exhausted; aborting cycle");
                errors.push(format!("quota exhausted while fetching {sport}"));
                status = RefreshStatus::Partial;
                suppress_for = retry_after;
                aborted = true;
                break;
            }
            Err(FeedError::Cancelled) => {
                info!("Refresh cancelled during fetch");
                status = RefreshStatus::Cancelled;
                aborted = true;
                break;
            }
            Err(e) => {
                // Transient (after retries), bad request or bad payload:
                // skip this sport, the rest of the cycle proceeds.
                warn!(sport = %sport, error = %e, "Sport skipped for this cycle");
                errors.push(format!("{sport}: {e}"));
                status = RefreshStatus::Partial;
            }
        }
    }

    let mut detected = 0usize;
    let mut persisted = 0usize;
    let mut store_updated = false;

    if !aborted {
        let opportunities = detector::detect(&all_events, &detection, started_at);
        detected = opportunities.len();
        for op in &opportunities {
            info!(
                event = %op.event_name,
                market = %op.market,
                profit_pct = format!("{:.2}", op.profit_pct),
                books = ?op.legs.iter().map(|l| l.bookmaker.as_str()).collect::<Vec<_>>(),
                "ARB FOUND"
            );
        }

        // Two sequential transactions. The snapshot replace is
        // authoritative; a failed opportunity append is logged but does
        // not undo it.
        match write_with_retry(|| store.replace_latest(&all_events)) {
            Ok(()) => {
                store_updated = true;
                match write_with_retry(|| store.append_opportunities(&opportunities)) {
                    Ok(n) => persisted = n,
                    Err(e) => {
                        error!(error = %e, "Failed to persist opportunities");
                        errors.push(format!("opportunity append failed: {e}"));
                        if status == RefreshStatus::Ok {
                            status = RefreshStatus::Partial;
                        }
                    }
                }

                let cutoff = started_at - chrono::Duration::days(OPPORTUNITY_RETENTION_DAYS);
                if let Err(e) = store.purge_opportunities(cutoff) {
                    warn!(error = %e, "Opportunity purge failed");
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to replace latest snapshot; prior snapshot stands");
                errors.push(format!("snapshot replace failed: {e}"));
                status = RefreshStatus::Failed;
            }
        }
    }

    let finished_at = Utc::now();
    let result = RefreshResult {
        status,
        events_fetched: all_events.len(),
        opportunities_found: detected,
        opportunities_persisted: persisted,
        sports_checked: sports,
        errors: errors.clone(),
        quota,
        duration_ms: t0.elapsed().as_millis() as u64,
        finished_at,
    };
    let last_run = LastRun {
        started_at,
        finished_at,
        status,
        events_fetched: result.events_fetched,
        detected,
        persisted,
        errors,
    };

    info!(
        status = %status,
        events = result.events_fetched,
        arbs = detected,
        persisted,
        duration_ms = result.duration_ms,
        "Refresh complete"
    );

    RefreshOutcome { result, last_run, store_updated, suppress_for }
}

/// Fetch one sport with bounded retries on transient failures. Backoff
/// sleeps and the request itself race against cancellation.
async fn fetch_with_retry(
    feed: &dyn OddsFeed,
    sport: &str,
    cancel: &CancellationToken,
) -> Result<(Vec<Event>, Option<QuotaSnapshot>), FeedError> {
    let mut last_error = None;

    for attempt in 0..MAX_FETCH_ATTEMPTS {
        if attempt > 0 {
            let delay = backoff_delay(attempt);
            debug!(sport = %sport, attempt, delay_ms = delay.as_millis() as u64, "Retrying fetch");
            tokio::select! {
                _ = cancel.cancelled() => return Err(FeedError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(FeedError::Cancelled),
            res = feed.fetch_odds(sport) => match res {
                Ok(page) => return Ok(page),
                Err(FeedError::Transient(msg)) => {
                    warn!(sport = %sport, attempt, error = %msg, "Transient fetch failure");
                    last_error = Some(FeedError::Transient(msg));
                }
                Err(e) => return Err(e),
            }
        }
    }

    Err(last_error.unwrap_or_else(|| FeedError::Transient("retries exhausted".to_string())))
}

/// Exponential backoff (1s, 2s, 4s) with +-10% jitter. Jitter is derived
/// from the clock's sub-second nanos; cryptographic quality is not needed
/// to de-synchronise retry storms.
fn backoff_delay(attempt: u32) -> Duration {
    let base = BASE_BACKOFF_MS * 2u64.pow(attempt.saturating_sub(1));
    let span = base * BACKOFF_JITTER_PCT / 100;
    if span == 0 {
        return Duration::from_millis(base);
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    let offset = nanos % (2 * span + 1);
    Duration::from_millis(base - span + offset)
}

/// Run a store write, retrying once on failure.
fn write_with_retry<T>(
    mut write: impl FnMut() -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    match write() {
        Ok(v) => Ok(v),
        Err(e) => {
            warn!(error = %e, "Store write failed; retrying once");
            write()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
