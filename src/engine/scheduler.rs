//! # engine::scheduler
//!
//! **Control Loop** — drives ticks, bounds concurrency, owns the lifecycle
//!
//! ```text
//!   stopped ──start()──▶ running ──stop()──▶ stopped
//!
//!   every tick_interval (start-to-start, missed ticks skipped):
//!     1. list eligible ids          ← collaborator (failure ⇒ skip tick)
//!     2. staleness filter           ← needs_analysis (fail closed)
//!     3. acquire slot + claim id    ← queue here when all slots are busy
//!     4. spawn Analyzer::analyze
//!     5. drain the whole batch      ← next tick waits for this
//!
//!   on-demand requests share the same slots and the same in-flight set;
//!   a request for an id that is already being analysed waits for that
//!   analysis to finish, then runs.
//! ```
//!
//! `stop()` cancels a token; the tick future is dropped, which drops its
//! `JoinSet`, which aborts every worker.  Permits and in-flight claims are
//! RAII guards held by the worker, so an aborted worker releases both.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{mpsc, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::config::AgentConfig;
use crate::engine::analyzer::Analyzer;
use crate::error::AppError;
use crate::events::AgentEvent;
use crate::models::{AnalysisResult, Decision, PositionId};

/// Recent decisions kept for status queries.
pub const DECISION_HISTORY: usize = 50;

/// Pending on-demand analysis requests.
const REQUEST_QUEUE: usize = 64;

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

// ─── Decision Log ─────────────────────────────────────────────────────────────

/// Append-only ring of the most recent decisions.
pub struct DecisionLog {
    entries:  Mutex<VecDeque<Decision>>,
    capacity: usize,
}

impl DecisionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity + 1)),
            capacity,
        }
    }

    pub fn push(&self, decision: Decision) {
        let mut entries = guard(&self.entries);
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(decision);
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<Decision> {
        guard(&self.entries).iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        guard(&self.entries).len()
    }
}

// ─── In-flight Claims ─────────────────────────────────────────────────────────

/// Ids under analysis, plus a wake-up for anyone waiting on one of them.
#[derive(Default)]
struct InFlightSet {
    ids:      Mutex<HashSet<PositionId>>,
    released: Notify,
}

type InFlight = Arc<InFlightSet>;

/// Exclusive right to analyse one id; released on drop.
struct Claim {
    set: InFlight,
    id:  PositionId,
}

impl Claim {
    fn acquire(set: &InFlight, id: PositionId) -> Option<Self> {
        if guard(&set.ids).insert(id) {
            Some(Self { set: Arc::clone(set), id })
        } else {
            None
        }
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        guard(&self.set.ids).remove(&self.id);
        self.set.released.notify_waiters();
    }
}

/// Slot + claim for an on-demand request.  Never holds a slot while waiting
/// for another analysis of the same id to release its claim.
async fn reserve(
    slots: Arc<Semaphore>,
    in_flight: InFlight,
    id: PositionId,
) -> Option<(OwnedSemaphorePermit, Claim)> {
    loop {
        // registered before the check so a release in between is not lost
        let released = in_flight.released.notified();
        let permit = Arc::clone(&slots).acquire_owned().await.ok()?;
        if let Some(claim) = Claim::acquire(&in_flight, id) {
            return Some((permit, claim));
        }
        drop(permit);
        debug!(position_id = id, "Already in flight — request waiting");
        released.await;
    }
}

// ─── Reporting ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub tick:         u64,
    /// `true` when the eligible listing failed and the tick did nothing.
    pub skipped:      bool,
    pub eligible:     usize,
    pub analyzed:     usize,
    pub failed:       usize,
    /// Ids skipped because an on-demand analysis already held them.
    pub busy:         usize,
    pub decisions:    usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub running:         bool,
    pub started_at:      Option<DateTime<Utc>>,
    pub tick_count:      u64,
    pub analysis_count:  u64,
    pub execution_count: u64,
    pub decision_count:  usize,
    pub last_tick_at:    Option<DateTime<Utc>>,
    pub last_tick:       Option<TickSummary>,
    pub in_flight:       usize,
    pub free_slots:      usize,
    pub subscribers:     usize,
    pub config:          AgentConfig,
}

struct RunHandle {
    token:      CancellationToken,
    ticker:     JoinHandle<()>,
    requests:   JoinHandle<()>,
    started_at: DateTime<Utc>,
}

// ─── Agent ────────────────────────────────────────────────────────────────────

pub struct Agent {
    analyzer:     Arc<Analyzer>,
    events:       Broadcaster,
    config:       Arc<AgentConfig>,
    slots:        Arc<Semaphore>,
    in_flight:    InFlight,
    decisions:    DecisionLog,
    last_results: Mutex<Vec<AnalysisResult>>,
    last_tick:    Mutex<Option<(DateTime<Utc>, TickSummary)>>,
    lifecycle:    tokio::sync::Mutex<Option<RunHandle>>,
    request_tx:   mpsc::Sender<PositionId>,
    request_rx:   tokio::sync::Mutex<mpsc::Receiver<PositionId>>,
    tick_count:   AtomicU64,
    analyses:     AtomicU64,
    executions:   AtomicU64,
}

impl Agent {
    pub fn new(analyzer: Arc<Analyzer>, events: Broadcaster, config: Arc<AgentConfig>) -> Self {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE);
        Self {
            analyzer,
            events,
            slots:        Arc::new(Semaphore::new(config.max_concurrent_analyses)),
            config,
            in_flight:    Arc::new(InFlightSet::default()),
            decisions:    DecisionLog::new(DECISION_HISTORY),
            last_results: Mutex::new(Vec::new()),
            last_tick:    Mutex::new(None),
            lifecycle:    tokio::sync::Mutex::new(None),
            request_tx,
            request_rx:   tokio::sync::Mutex::new(request_rx),
            tick_count:   AtomicU64::new(0),
            analyses:     AtomicU64::new(0),
            executions:   AtomicU64::new(0),
        }
    }

    pub fn analyzer(&self) -> &Arc<Analyzer> {
        &self.analyzer
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Start the loop.  Returns `false` if it was already running.
    pub async fn start(self: &Arc<Self>) -> bool {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            return false;
        }

        let token = CancellationToken::new();
        let ticker = tokio::spawn(Arc::clone(self).control_loop(token.clone()));
        let requests = tokio::spawn(Arc::clone(self).request_loop(token.clone()));

        *lifecycle = Some(RunHandle { token, ticker, requests, started_at: Utc::now() });

        info!(
            interval_ms    = self.config.tick_interval.as_millis() as u64,
            max_concurrent = self.config.max_concurrent_analyses,
            min_confidence = self.config.min_confidence,
            auto_execute   = self.config.auto_execute,
            "▶️  Agent started"
        );
        true
    }

    /// Stop the loop, cancelling the running tick.  Returns `false` if it was
    /// not running.
    pub async fn stop(&self) -> bool {
        let Some(handle) = self.lifecycle.lock().await.take() else {
            return false;
        };

        handle.token.cancel();
        if let Err(e) = handle.ticker.await {
            warn!(error = %e, "Control loop task ended abnormally");
        }
        if let Err(e) = handle.requests.await {
            warn!(error = %e, "Request loop task ended abnormally");
        }

        info!("⏹️  Agent stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.lifecycle.lock().await.is_some()
    }

    /// Queue `id` for analysis on the next free slot, bypassing staleness.
    pub async fn request_analysis(&self, id: PositionId) -> Result<(), AppError> {
        if !self.is_running().await {
            return Err(AppError::BadRequest("agent is stopped".into()));
        }
        self.request_tx.try_send(id).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                AppError::BadRequest("analysis request queue is full".into())
            }
            mpsc::error::TrySendError::Closed(_) => {
                AppError::Internal(anyhow::anyhow!("analysis request queue closed"))
            }
        })?;

        debug!(position_id = id, "On-demand analysis queued");
        self.events.publish(AgentEvent::thought(id, format!("Analysis of position #{id} requested")));
        Ok(())
    }

    // ── Loops ─────────────────────────────────────────────────────────────────

    async fn control_loop(self: Arc<Self>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = self.run_tick() => {}
            }
        }

        debug!("Control loop exited");
    }

    async fn request_loop(self: Arc<Self>, token: CancellationToken) {
        let mut rx = self.request_rx.lock().await;
        let mut workers: JoinSet<Option<AnalysisResult>> = JoinSet::new();

        loop {
            tokio::select! {
                _ = token.cancelled() => break,

                // stop pulling once REQUEST_QUEUE requests are pending so the
                // channel fills and request_analysis reports backpressure
                Some(id) = rx.recv(), if workers.len() < REQUEST_QUEUE => {
                    let slots = Arc::clone(&self.slots);
                    let in_flight = Arc::clone(&self.in_flight);
                    let analyzer = Arc::clone(&self.analyzer);
                    workers.spawn(async move {
                        let (_permit, _claim) = reserve(slots, in_flight, id).await?;
                        analyzer.analyze(id).await
                    });
                }

                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    match joined {
                        Ok(Some(result)) => self.record(&result),
                        Ok(None) => {}
                        Err(e) => warn!(error = %e, "On-demand analysis task failed"),
                    }
                }
            }
        }

        debug!("Request loop exited");
    }

    // ── Tick ──────────────────────────────────────────────────────────────────

    /// One evaluation cycle.  Returns once every dispatched analysis finished.
    pub async fn run_tick(&self) -> TickSummary {
        let tick = self.tick_count.fetch_add(1, Ordering::Relaxed) + 1;
        let mut summary = TickSummary { tick, ..TickSummary::default() };
        let source = self.analyzer.source();
        let timeout = self.config.call_timeout;

        // ── 1. Eligible ids ───────────────────────────────────────────────────
        let ids = match tokio::time::timeout(timeout, source.list_eligible_positions()).await {
            Ok(Ok(ids)) => ids,
            Ok(Err(e)) => {
                warn!(tick, error = %e, "Listing eligible positions failed — skipping tick");
                summary.skipped = true;
                self.finish_tick(summary.clone(), None);
                return summary;
            }
            Err(_) => {
                warn!(tick, "Listing eligible positions timed out — skipping tick");
                summary.skipped = true;
                self.finish_tick(summary.clone(), None);
                return summary;
            }
        };

        // ── 2. Staleness filter ───────────────────────────────────────────────
        let mut unique = HashSet::new();
        let candidates: Vec<PositionId> = ids.into_iter().filter(|id| unique.insert(*id)).collect();
        let max_age = self.config.max_analysis_age_secs;

        let checks = join_all(candidates.iter().map(|&id| async move {
            let stale = tokio::time::timeout(timeout, source.needs_analysis(id, max_age))
                .await
                .unwrap_or(false);
            (id, stale)
        }))
        .await;

        let eligible: Vec<PositionId> = checks
            .into_iter()
            .filter_map(|(id, stale)| stale.then_some(id))
            .collect();
        summary.eligible = eligible.len();

        debug!(tick, listed = candidates.len(), eligible = eligible.len(), "Tick dispatching");

        // ── 3-4. Dispatch under the slot bound ────────────────────────────────
        let mut workers: JoinSet<Option<AnalysisResult>> = JoinSet::new();
        for id in eligible {
            let permit = match Arc::clone(&self.slots).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let Some(claim) = Claim::acquire(&self.in_flight, id) else {
                debug!(tick, position_id = id, "Already in flight — skipped");
                summary.busy += 1;
                continue;
            };

            let analyzer = Arc::clone(&self.analyzer);
            workers.spawn(async move {
                let _permit = permit;
                let _claim = claim;
                analyzer.analyze(id).await
            });
        }

        // ── 5. Drain ──────────────────────────────────────────────────────────
        let mut results = Vec::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Some(result)) => {
                    self.record(&result);
                    if result.decision.is_some() {
                        summary.decisions += 1;
                    }
                    summary.analyzed += 1;
                    results.push(result);
                }
                Ok(None) => summary.failed += 1,
                Err(e) => {
                    warn!(tick, error = %e, "Analysis task failed");
                    summary.failed += 1;
                }
            }
        }

        info!(
            tick,
            eligible  = summary.eligible,
            analyzed  = summary.analyzed,
            failed    = summary.failed,
            decisions = summary.decisions,
            "🔁 Tick complete"
        );
        self.finish_tick(summary.clone(), Some(results));
        summary
    }

    fn finish_tick(&self, summary: TickSummary, results: Option<Vec<AnalysisResult>>) {
        *guard(&self.last_tick) = Some((Utc::now(), summary));
        if let Some(results) = results {
            *guard(&self.last_results) = results;
        }
    }

    fn record(&self, result: &AnalysisResult) {
        self.analyses.fetch_add(1, Ordering::Relaxed);
        if let Some(decision) = &result.decision {
            if decision.executed {
                self.executions.fetch_add(1, Ordering::Relaxed);
            }
            self.decisions.push(decision.clone());
        }
    }

    // ── Reporting ─────────────────────────────────────────────────────────────

    pub fn decisions(&self) -> Vec<Decision> {
        self.decisions.snapshot()
    }

    pub fn last_results(&self) -> Vec<AnalysisResult> {
        guard(&self.last_results).clone()
    }

    pub fn in_flight_count(&self) -> usize {
        guard(&self.in_flight.ids).len()
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub async fn status(&self) -> AgentStatus {
        let started_at = self.lifecycle.lock().await.as_ref().map(|h| h.started_at);
        let last_tick = guard(&self.last_tick).clone();

        AgentStatus {
            running:         started_at.is_some(),
            started_at,
            tick_count:      self.tick_count.load(Ordering::Relaxed),
            analysis_count:  self.analyses.load(Ordering::Relaxed),
            execution_count: self.executions.load(Ordering::Relaxed),
            decision_count:  self.decisions.len(),
            last_tick_at:    last_tick.as_ref().map(|(at, _)| *at),
            last_tick:       last_tick.map(|(_, summary)| summary),
            in_flight:       self.in_flight_count(),
            free_slots:      self.available_slots(),
            subscribers:     self.events.subscriber_count(),
            config:          (*self.config).clone(),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
