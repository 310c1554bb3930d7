// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! The engine pool: admission, dispatch, health upkeep and adaptive sizing.

use crate::breaker::{CircuitBreaker, CircuitState};
use crate::config::PoolConfig;
use crate::events::{PoolEvent, RemovalReason};
use crate::health::{self, HealthPolicy};
use crate::metrics::{PoolMetrics, ResponseWindow, SessionSnapshot, performance_score};
use crate::queue::{QueueStats, QueuedRequest, RequestQueue};
use crate::record::SessionRecord;
use crate::scaling::{self, ScalingDecision, ScalingInputs, ScalingPolicy};
use dashmap::DashMap;
use engine_common::{
    AnalysisError, AnalysisOptions, AnalysisPriority, AnalysisResult, ConfigError, Evaluation, EvaluationUpdate, HealthStatus, PositionDescriptor, RequestId,
    SessionId,
};
use engine_session::{EngineSession, SearchToken, WorkerSpawner};
use futures::future::join_all;
use metrics::gauge;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

const DISPOSE_POLL: Duration = Duration::from_millis(10);

/// A pool of engine sessions behind a single `analyze` call.
///
/// Cloning is cheap; every clone drives the same pool. Background loops stop
/// on [`EnginePool::dispose`] or once the last clone is dropped.
#[derive(Clone)]
pub struct EnginePool {
    inner: Arc<PoolInner>,
}

/// A session slot taken for one request.
struct Reservation {
    id: SessionId,
    session: Arc<EngineSession>,
    previous_use: Option<Instant>,
}

struct PoolInner {
    config: PoolConfig,
    spawner: Arc<dyn WorkerSpawner>,
    sessions: DashMap<SessionId, SessionRecord>,
    queue: Mutex<RequestQueue>,
    breaker: Arc<CircuitBreaker>,
    window: Mutex<ResponseWindow>,
    events: broadcast::Sender<PoolEvent>,
    disposed: AtomicBool,
    last_scaling: Mutex<Option<Instant>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Sessions still running their handshake
    growing: AtomicUsize,
}

impl EnginePool {
    /// Validates the configuration, starts the initial sessions and the
    /// background loops. Sessions that fail to start are logged and left to
    /// the health loop to replace.
    #[instrument(skip(config, spawner), fields(initial = config.initial_pool_size))]
    pub async fn start(config: PoolConfig, spawner: Arc<dyn WorkerSpawner>) -> Result<Self, ConfigError> {
        config.validate()?;

        let (events, _) = broadcast::channel(config.event_capacity);
        let observer_events = events.clone();
        let breaker = CircuitBreaker::new(config.failure_threshold, config.breaker_cooldown()).with_observer(move |from, to| {
            if to == CircuitState::Open {
                warn!(%from, %to, "Circuit breaker opened");
            } else {
                info!(%from, %to, "Circuit breaker state changed");
            }
            let _ = observer_events.send(PoolEvent::CircuitStateChanged { from, to });
        });

        let inner = Arc::new(PoolInner {
            sessions: DashMap::new(),
            queue: Mutex::new(RequestQueue::with_capacity(config.max_queue_length)),
            breaker: Arc::new(breaker),
            window: Mutex::new(ResponseWindow::new(config.metrics_window)),
            events,
            disposed: AtomicBool::new(false),
            last_scaling: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            growing: AtomicUsize::new(0),
            spawner,
            config,
        });

        join_all((0..inner.config.initial_pool_size).map(|_| inner.add_session())).await;
        info!(size = inner.sessions.len(), "Engine pool started");

        let tasks = vec![
            spawn_periodic(&inner, inner.config.queue_drain_interval(), "drain", |inner| async move { inner.drain_queue() }),
            spawn_periodic(&inner, inner.config.health_check_interval(), "health", |inner| async move { inner.health_check().await }),
            spawn_periodic(&inner, inner.config.scaling_interval(), "scaling", |inner| async move { inner.scale().await }),
        ];
        *inner.tasks.lock() = tasks;

        Ok(Self { inner })
    }

    /// Analyzes a position on whichever session the pool picks.
    ///
    /// Fails fast with `CircuitOpen` or `QueueOverflow` when the pool cannot
    /// take the request; never retried on another session.
    #[instrument(skip(self, position, options))]
    pub async fn analyze(&self, position: &PositionDescriptor, options: &AnalysisOptions, priority: AnalysisPriority) -> AnalysisResult<Evaluation> {
        self.submit(position, options, priority, None).await
    }

    /// Like [`EnginePool::analyze`], streaming progressive updates into `progress`.
    #[instrument(skip(self, position, options, progress))]
    pub async fn analyze_with_progress(
        &self,
        position: &PositionDescriptor,
        options: &AnalysisOptions,
        priority: AnalysisPriority,
        progress: mpsc::UnboundedSender<EvaluationUpdate>,
    ) -> AnalysisResult<Evaluation> {
        self.submit(position, options, priority, Some(progress)).await
    }

    async fn submit(
        &self,
        position: &PositionDescriptor,
        options: &AnalysisOptions,
        priority: AnalysisPriority,
        progress: Option<mpsc::UnboundedSender<EvaluationUpdate>>,
    ) -> AnalysisResult<Evaluation> {
        if self.inner.is_disposed() {
            return Err(AnalysisError::EngineDisposed);
        }

        let permit = match self.inner.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(error) => {
                self.inner.window.lock().record_rejected();
                debug!(%error, "Request rejected by circuit breaker");
                return Err(error);
            }
        };

        let (sink, receiver) = oneshot::channel();
        self.inner.submit(QueuedRequest {
            id: RequestId::new(),
            position: position.clone(),
            options: options.clone(),
            priority,
            enqueued_at: Instant::now(),
            sink,
            progress,
            permit,
        });

        receiver.await.unwrap_or(Err(AnalysisError::EngineDisposed))
    }

    /// Current load, health and latency figures.
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.metrics()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.inner.queue.lock().stats()
    }

    /// Live sessions, excluding ones still starting.
    pub fn pool_size(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.inner.breaker.state()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.events.subscribe()
    }

    /// Asks every busy session to finish its search early. Callers still get
    /// whatever evaluation the engine had reached.
    pub fn stop_all(&self) {
        self.inner.stop_all();
    }

    /// Rejects queued and future requests, waits up to the drain timeout for
    /// running analyses, then shuts every session down. Idempotent.
    #[instrument(skip(self))]
    pub async fn dispose(&self) {
        let inner = &self.inner;
        if inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Disposing engine pool");

        let tasks = std::mem::take(&mut *inner.tasks.lock());
        for task in tasks {
            task.abort();
        }

        let pending = inner.queue.lock().drain_all();
        for request in pending {
            inner.fail_request(request, AnalysisError::EngineDisposed);
        }

        let deadline = Instant::now() + inner.config.drain_timeout();
        while inner.active_analyses() > 0 && Instant::now() < deadline {
            tokio::time::sleep(DISPOSE_POLL).await;
        }
        let active = inner.active_analyses();
        if active > 0 {
            warn!(active, "Drain timeout elapsed, stopping running analyses");
            inner.stop_all();
        }

        let ids: Vec<SessionId> = inner.sessions.iter().map(|record| *record.key()).collect();
        join_all(ids.into_iter().map(|id| inner.remove_session(id, RemovalReason::Disposed))).await;

        gauge!("enginepool_sessions_total", 0.0);
        gauge!("enginepool_queue_length", 0.0);
        info!("Engine pool disposed");
    }
}

impl std::fmt::Debug for EnginePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnginePool")
            .field("sessions", &self.inner.sessions.len())
            .field("disposed", &self.inner.is_disposed())
            .finish()
    }
}

/// Runs `tick` every `period` until the pool is disposed or dropped.
fn spawn_periodic<F, Fut>(inner: &Arc<PoolInner>, period: Duration, name: &'static str, tick: F) -> JoinHandle<()>
where
    F: Fn(Arc<PoolInner>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let weak: Weak<PoolInner> = Arc::downgrade(inner);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if inner.is_disposed() {
                break;
            }
            tick(inner).await;
        }
        debug!(task = name, "Background loop stopped");
    })
}

impl PoolInner {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn emit(&self, event: PoolEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn active_analyses(&self) -> usize {
        self.sessions.iter().map(|record| record.active_count).sum()
    }

    /// Dispatches straight to a free session when nothing is waiting,
    /// otherwise queues behind higher or equal priority work.
    fn submit(self: &Arc<Self>, request: QueuedRequest) {
        let mut queue = self.queue.lock();
        if self.is_disposed() {
            drop(queue);
            self.fail_request(request, AnalysisError::EngineDisposed);
            return;
        }

        if queue.is_empty() {
            if let Some(reservation) = self.reserve() {
                drop(queue);
                self.dispatch(reservation, request);
                return;
            }
        }

        let (id, priority) = (request.id, request.priority);
        match queue.push(request) {
            Ok(()) => {
                let queue_length = queue.len();
                drop(queue);
                debug!(request_id = %id, %priority, queue_length, "Request queued");
                gauge!("enginepool_queue_length", queue_length as f64);
                self.emit(PoolEvent::RequestQueued { request: id, priority, queue_length });
            }
            Err(request) => {
                drop(queue);
                warn!(request_id = %id, max = self.config.max_queue_length, "Queue full, rejecting request");
                self.window.lock().record_rejected();
                self.fail_request(request, AnalysisError::QueueOverflow);
                return;
            }
        }

        self.drain_queue();
    }

    fn fail_request(&self, request: QueuedRequest, error: AnalysisError) {
        self.emit(PoolEvent::RequestFailed {
            request: request.id,
            error: error.to_string(),
        });
        let _ = request.sink.send(Err(error));
    }

    /// Takes a slot on the session the strategy prefers. Called with the
    /// queue lock held so that dispatch order follows queue order.
    fn reserve(&self) -> Option<Reservation> {
        let cap = self.config.max_concurrent_per_session;
        let mut candidates: Vec<_> = self
            .sessions
            .iter()
            .filter(|record| record.is_dispatchable(cap))
            .map(|record| record.candidate())
            .collect();

        while let Some(id) = self.config.strategy.select(&candidates) {
            if let Some(mut record) = self.sessions.get_mut(&id) {
                if record.is_dispatchable(cap) {
                    let previous_use = record.begin(Instant::now());
                    return Some(Reservation {
                        id,
                        session: record.session.clone(),
                        previous_use,
                    });
                }
            }
            candidates.retain(|candidate| candidate.id != id);
        }
        None
    }

    fn release(&self, reservation: Reservation) {
        if let Some(mut record) = self.sessions.get_mut(&reservation.id) {
            record.cancel_reservation(reservation.previous_use);
        }
    }

    fn dispatch(self: &Arc<Self>, reservation: Reservation, request: QueuedRequest) {
        debug!(
            request_id = %request.id,
            session_id = %reservation.id,
            priority = %request.priority,
            "Dispatching request"
        );
        self.emit(PoolEvent::RequestDispatched {
            request: request.id,
            session: reservation.id,
            priority: request.priority,
        });
        gauge!("enginepool_active_analyses", self.active_analyses() as f64);

        let inner = self.clone();
        tokio::spawn(async move {
            inner.run_request(reservation, request).await;
        });
    }

    async fn run_request(self: Arc<Self>, reservation: Reservation, request: QueuedRequest) {
        let QueuedRequest {
            id,
            position,
            options,
            mut sink,
            progress,
            permit,
            ..
        } = request;
        let Reservation { id: session_id, session, .. } = reservation;

        let started = Instant::now();
        let token = SearchToken::new();
        let analysis = session.analyze_cancellable(&position, &options, progress.as_ref(), &token);
        tokio::pin!(analysis);

        let mut cancelled = false;
        let result = loop {
            tokio::select! {
                result = &mut analysis => break result,
                _ = sink.closed(), if !cancelled => {
                    debug!(request_id = %id, session_id = %session_id, "Caller went away, cancelling search");
                    session.cancel(&token);
                    cancelled = true;
                }
            }
        };
        let elapsed = started.elapsed();

        self.complete(session_id, elapsed, result.as_ref().map(|_| ()));
        match &result {
            Ok(_) => permit.succeed(),
            Err(error) => {
                debug!(request_id = %id, session_id = %session_id, %error, "Analysis failed");
                permit.fail(error);
                self.emit(PoolEvent::RequestFailed {
                    request: id,
                    error: error.to_string(),
                });
            }
        }

        let _ = sink.send(result.map(Arc::unwrap_or_clone));
        self.drain_queue();
    }

    fn complete(&self, session_id: SessionId, elapsed: Duration, outcome: Result<(), &AnalysisError>) {
        let counted = !matches!(outcome, Err(AnalysisError::Cancelled | AnalysisError::EngineDisposed));
        let failed = outcome.is_err_and(|error| error.is_dispatch_failure());
        if let Some(mut record) = self.sessions.get_mut(&session_id) {
            if counted {
                record.finish(Instant::now(), elapsed, failed, self.config.error_window());
            } else {
                record.finish_uncounted();
            }
        }
        self.window.lock().record(elapsed, outcome);
        gauge!("enginepool_active_analyses", self.active_analyses() as f64);
    }

    /// Fails requests that waited too long, then hands queued work to free
    /// sessions in priority order.
    fn drain_queue(self: &Arc<Self>) {
        if self.is_disposed() {
            return;
        }

        let (abandoned, expired, ready, queue_length) = {
            let mut queue = self.queue.lock();
            // Dropping an entry releases its breaker permit.
            let abandoned = queue.prune_abandoned();
            let expired = queue.expire(Instant::now(), self.config.queue_timeout());
            let mut ready = Vec::new();
            while !queue.is_empty() {
                let Some(reservation) = self.reserve() else {
                    break;
                };
                match queue.pop() {
                    Some(request) => ready.push((reservation, request)),
                    None => {
                        self.release(reservation);
                        break;
                    }
                }
            }
            (abandoned, expired, ready, queue.len())
        };

        if abandoned > 0 {
            debug!(count = abandoned, "Dropped queued requests whose callers went away");
        }

        if !expired.is_empty() {
            warn!(count = expired.len(), "Queued requests timed out");
            self.window.lock().record_expired(expired.len());
            for request in expired {
                self.fail_request(request, AnalysisError::AnalysisTimeout);
            }
        }

        if !ready.is_empty() {
            gauge!("enginepool_queue_length", queue_length as f64);
        }
        for (reservation, request) in ready {
            self.dispatch(reservation, request);
        }
    }

    /// Starts one session and adds it once the handshake succeeded.
    async fn add_session(self: &Arc<Self>) -> bool {
        self.growing.fetch_add(1, Ordering::SeqCst);
        let id = SessionId::new();
        let session = Arc::new(EngineSession::new(id, self.spawner.clone(), self.config.session.clone()));

        let added = match session.initialize().await {
            Ok(()) if !self.is_disposed() => {
                self.sessions.insert(id, SessionRecord::new(session, Instant::now()));
                info!(session_id = %id, size = self.sessions.len(), "Session added");
                self.emit(PoolEvent::SessionAdded { session: id });
                true
            }
            Ok(()) => {
                session.dispose().await;
                false
            }
            Err(error) => {
                warn!(session_id = %id, %error, "Failed to start session");
                self.emit(PoolEvent::Error {
                    message: format!("failed to start {id}: {error}"),
                });
                session.dispose().await;
                false
            }
        };
        self.growing.fetch_sub(1, Ordering::SeqCst);
        gauge!("enginepool_sessions_total", self.sessions.len() as f64);

        if added {
            self.drain_queue();
        }
        added
    }

    async fn remove_session(&self, id: SessionId, reason: RemovalReason) -> bool {
        let Some((_, record)) = self.sessions.remove(&id) else {
            return false;
        };
        record.session.dispose().await;
        info!(session_id = %id, %reason, size = self.sessions.len(), "Session removed");
        self.emit(PoolEvent::SessionRemoved { session: id, reason });
        gauge!("enginepool_sessions_total", self.sessions.len() as f64);
        true
    }

    fn health_policy(&self) -> HealthPolicy {
        HealthPolicy {
            freshness_window: self.config.freshness_window(),
            activity_window: self.config.activity_window(),
            error_threshold: self.config.error_threshold,
        }
    }

    /// Pings stale idle sessions, reassesses every session, evicts the
    /// unhealthy idle ones and refills to the minimum size.
    async fn health_check(self: &Arc<Self>) {
        let stale_after = self.config.freshness_window() / 2;
        let now = Instant::now();
        let stale: Vec<Arc<EngineSession>> = self
            .sessions
            .iter()
            .filter(|record| record.is_idle() && !record.draining)
            .filter(|record| {
                record
                    .session
                    .last_interaction_at()
                    .is_none_or(|at| now.saturating_duration_since(at) >= stale_after)
            })
            .map(|record| record.session.clone())
            .collect();

        join_all(stale.iter().map(|session| async move {
            if let Err(error) = session.ping().await {
                debug!(session_id = %session.id(), %error, "Liveness probe failed");
            }
        }))
        .await;

        let (transitions, evicted) = self.assess_sessions();
        for (session, from, to) in transitions {
            if to == HealthStatus::Healthy {
                info!(session_id = %session, %from, %to, "Session health changed");
            } else {
                warn!(session_id = %session, %from, %to, "Session health changed");
            }
            self.emit(PoolEvent::HealthChanged { session, from, to });
        }

        join_all(evicted.into_iter().map(|id| self.remove_session(id, RemovalReason::Unhealthy))).await;
        self.refill().await;
    }

    fn assess_sessions(&self) -> (Vec<(SessionId, HealthStatus, HealthStatus)>, Vec<SessionId>) {
        let policy = self.health_policy();
        let error_window = self.config.error_window();
        let now = Instant::now();
        let mut transitions = Vec::new();
        let mut evicted = Vec::new();

        for mut record in self.sessions.iter_mut() {
            let id = *record.key();
            let inputs = record.health_inputs(now, error_window);
            let status = health::assess(&policy, &inputs, now);
            if status != record.health {
                transitions.push((id, record.health, status));
                record.health = status;
            }
            if status != HealthStatus::Healthy && record.is_idle() && !record.draining {
                record.draining = true;
                evicted.push(id);
            }
        }
        (transitions, evicted)
    }

    async fn refill(self: &Arc<Self>) {
        if self.is_disposed() {
            return;
        }
        let current = self.sessions.len() + self.growing.load(Ordering::SeqCst);
        let missing = self.config.min_pool_size.saturating_sub(current);
        if missing > 0 {
            info!(missing, "Refilling pool to minimum size");
            join_all((0..missing).map(|_| self.add_session())).await;
        }
    }

    async fn scale(self: &Arc<Self>) {
        let now = Instant::now();
        let last = *self.last_scaling.lock();
        if last.is_some_and(|last| now.saturating_duration_since(last) < self.config.scaling_cooldown()) {
            return;
        }

        let policy = ScalingPolicy {
            min_pool_size: self.config.min_pool_size,
            max_pool_size: self.config.max_pool_size,
            target_response_ms: self.config.target_response_time_ms as f64,
            scale_up_queue_length: self.config.scale_up_queue_length,
        };
        let avg_response_ms = self.window.lock().avg_response_ms();
        let queue_length = self.queue.lock().len();
        let inputs = ScalingInputs {
            pool_size: self.sessions.len() + self.growing.load(Ordering::SeqCst),
            avg_response_ms,
            queue_length,
        };

        match scaling::decide(&policy, &inputs) {
            ScalingDecision::ScaleUp => {
                *self.last_scaling.lock() = Some(now);
                info!(size = inputs.pool_size, queue_length, avg_response_ms, "Scaling up");
                if self.add_session().await {
                    self.emit(PoolEvent::ScaledUp { size: self.sessions.len() });
                }
            }
            ScalingDecision::ScaleDown => {
                let Some(victim) = self.pick_idle_victim() else {
                    return;
                };
                *self.last_scaling.lock() = Some(now);
                info!(session_id = %victim, size = inputs.pool_size, avg_response_ms, "Scaling down");
                if self.remove_session(victim, RemovalReason::ScaledDown).await {
                    self.emit(PoolEvent::ScaledDown { size: self.sessions.len() });
                }
            }
            ScalingDecision::Hold => {}
        }
    }

    /// Least used idle session, oldest use first; marked draining so it
    /// takes no new work before removal.
    fn pick_idle_victim(&self) -> Option<SessionId> {
        let mut idle: Vec<_> = self
            .sessions
            .iter()
            .filter(|record| record.is_idle() && !record.draining)
            .map(|record| (record.total_count, record.last_used_at, *record.key()))
            .collect();
        idle.sort();

        for (_, _, id) in idle {
            let Some(mut record) = self.sessions.get_mut(&id) else {
                continue;
            };
            if record.is_idle() && !record.draining {
                record.draining = true;
                return Some(id);
            }
        }
        None
    }

    fn stop_all(&self) {
        let busy: Vec<Arc<EngineSession>> = self
            .sessions
            .iter()
            .filter(|record| !record.is_idle())
            .map(|record| record.session.clone())
            .collect();
        info!(sessions = busy.len(), "Stopping running analyses");
        for session in busy {
            session.stop();
        }
    }

    fn metrics(&self) -> PoolMetrics {
        let mut sessions: Vec<SessionSnapshot> = self.sessions.iter().map(|record| record.snapshot()).collect();
        sessions.sort_by_key(|snapshot| snapshot.id);

        let total_sessions = sessions.len();
        let healthy_sessions = sessions.iter().filter(|snapshot| snapshot.health == HealthStatus::Healthy).count();
        let active_analyses = sessions.iter().map(|snapshot| snapshot.active_count).sum();
        let queue_length = self.queue.lock().len();
        let breaker = self.breaker.get_stats();

        let metrics = {
            let window = self.window.lock();
            let avg_response_time_ms = window.avg_response_ms();
            let error_rate = window.error_rate();
            PoolMetrics {
                total_sessions,
                healthy_sessions,
                active_analyses,
                queue_length,
                avg_response_time_ms,
                error_rate,
                performance_score: performance_score(
                    total_sessions,
                    healthy_sessions,
                    avg_response_time_ms,
                    self.config.target_response_time_ms as f64,
                    error_rate,
                ),
                circuit_state: breaker.state,
                consecutive_failures: breaker.consecutive_failures,
                completed: window.completed(),
                failed: window.failed(),
                rejected: window.rejected(),
                expired: window.expired(),
                sessions,
            }
        };
        metrics.publish();
        metrics
    }
}
