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

//! One worker, one protocol conversation.
//!
//! [`EngineSession`] owns a worker link and drives the protocol state
//! machine: handshake, option sync, readiness sync, search and shutdown.
//! All exchanges with the worker are serialized by the session's I/O lock;
//! `stop()`, `cancel()` and `dispose()` reach the worker without it.

use crate::cache::{CacheKey, CacheStats, EvaluationCache};
use crate::config::SessionConfig;
use crate::events::{SessionEvent, SessionEventKind, SessionState};
use crate::protocol::{DeclaredOption, EngineCommand, EngineMessage, IdField, ProtocolError, SearchLimit, parse_line};
use crate::search::SearchAccumulator;
use crate::transport::{WorkerSpawner, WorkerTerminator};
use engine_common::{AnalysisError, AnalysisOptions, AnalysisResult, Evaluation, EvaluationUpdate, HealthStatus, PositionDescriptor, SessionId};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{Mutex as AsyncMutex, broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

/// Timeouts inside the timeout window that demote a session to degraded.
const DEGRADE_AFTER_TIMEOUTS: usize = 2;

/// What the worker told us about itself during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineIdentity {
    pub name: Option<String>,
    pub author: Option<String>,
    pub options: Vec<DeclaredOption>,
}

impl EngineIdentity {
    /// Workers that declare no options are assumed to accept the standard ones.
    pub fn supports(&self, option: &str) -> bool {
        self.options.is_empty() || self.options.iter().any(|declared| declared.name.eq_ignore_ascii_case(option))
    }
}

/// Handle on one `analyze` call. Cancelling it stops that call's search,
/// or keeps it from starting, and never touches other callers' searches.
#[derive(Debug, Clone, Default)]
pub struct SearchToken {
    cancelled: Arc<AtomicBool>,
}

impl SearchToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn same(&self, other: &SearchToken) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AppliedSettings {
    hash_size_mb: u32,
    threads: u32,
    multi_pv: u32,
}

impl From<&AnalysisOptions> for AppliedSettings {
    fn from(options: &AnalysisOptions) -> Self {
        Self {
            hash_size_mb: options.hash_size_mb,
            threads: options.threads,
            multi_pv: options.multi_pv,
        }
    }
}

#[derive(Debug)]
struct WorkerIo {
    output: mpsc::UnboundedReceiver<String>,
    terminator: WorkerTerminator,
    /// Settings last pushed with `setoption`
    applied: Option<AppliedSettings>,
}

#[derive(Debug, Default)]
struct HealthTracker {
    status: HealthStatus,
    timeouts: VecDeque<Instant>,
    last_success: Option<Instant>,
    last_interaction: Option<Instant>,
    errors: u64,
    violations: u64,
}

impl HealthTracker {
    fn prune(&mut self, now: Instant, window: Duration) {
        while self.timeouts.front().is_some_and(|at| now.duration_since(*at) > window) {
            self.timeouts.pop_front();
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A single analysis worker and its protocol state.
#[derive(Debug)]
pub struct EngineSession {
    id: SessionId,
    config: SessionConfig,
    spawner: Arc<dyn WorkerSpawner>,
    commands: Mutex<Option<mpsc::UnboundedSender<String>>>,
    io: AsyncMutex<Option<WorkerIo>>,
    state: Mutex<SessionState>,
    health: Mutex<HealthTracker>,
    cache: Mutex<EvaluationCache>,
    identity: RwLock<EngineIdentity>,
    events: broadcast::Sender<SessionEvent>,
    disposed: watch::Sender<bool>,
    stop_requested: AtomicBool,
    /// Token of the search the worker is running
    search_owner: Mutex<Option<SearchToken>>,
    in_flight: AtomicUsize,
}

impl EngineSession {
    pub fn new(id: SessionId, spawner: Arc<dyn WorkerSpawner>, config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (disposed, _) = watch::channel(false);
        let cache = EvaluationCache::new(config.cache_capacity);

        Self {
            id,
            config,
            spawner,
            commands: Mutex::new(None),
            io: AsyncMutex::new(None),
            state: Mutex::new(SessionState::Uninitialized),
            health: Mutex::new(HealthTracker::default()),
            cache: Mutex::new(cache),
            identity: RwLock::new(EngineIdentity::default()),
            events,
            disposed,
            stop_requested: AtomicBool::new(false),
            search_owner: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn health(&self) -> HealthStatus {
        self.health.lock().status
    }

    pub fn identity(&self) -> EngineIdentity {
        self.identity.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    /// Last time the worker completed an exchange (handshake, sync, search).
    pub fn last_success_at(&self) -> Option<Instant> {
        self.health.lock().last_success
    }

    /// Last time the worker produced a recognised line.
    pub fn last_interaction_at(&self) -> Option<Instant> {
        self.health.lock().last_interaction
    }

    pub fn error_count(&self) -> u64 {
        self.health.lock().errors
    }

    pub fn violation_count(&self) -> u64 {
        self.health.lock().violations
    }

    /// True while a call holds or waits for the worker.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// Spawns the worker and runs the handshake. A no-op when already initialized.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn initialize(&self) -> AnalysisResult<()> {
        self.ensure_live()?;
        let _in_flight = InFlight::enter(&self.in_flight);
        let mut slot = self.io.lock().await;
        self.ensure_live()?;

        if slot.is_some() {
            return Ok(());
        }
        self.start_worker(&mut slot).await
    }

    /// Analyzes a position. Identical requests are answered from the cache
    /// without touching the worker.
    pub async fn analyze(
        &self,
        position: &PositionDescriptor,
        options: &AnalysisOptions,
        progress: Option<&mpsc::UnboundedSender<EvaluationUpdate>>,
    ) -> AnalysisResult<Arc<Evaluation>> {
        self.analyze_cancellable(position, options, progress, &SearchToken::new()).await
    }

    /// Like [`analyze`](Self::analyze), but the call can be withdrawn with
    /// [`cancel`](Self::cancel). A call cancelled before its search starts
    /// fails with `Cancelled`; one cancelled mid-search returns whatever
    /// evaluation the worker reached.
    #[instrument(skip(self, progress, token), fields(session_id = %self.id))]
    pub async fn analyze_cancellable(
        &self,
        position: &PositionDescriptor,
        options: &AnalysisOptions,
        progress: Option<&mpsc::UnboundedSender<EvaluationUpdate>>,
        token: &SearchToken,
    ) -> AnalysisResult<Arc<Evaluation>> {
        self.ensure_live()?;
        let options = options.normalized();
        let key = CacheKey::new(position, &options);
        if let Some(hit) = self.cache.lock().get(&key) {
            debug!(session_id = %self.id, %position, "Cache hit");
            return Ok(hit);
        }

        let _in_flight = InFlight::enter(&self.in_flight);
        let mut slot = self.io.lock().await;
        self.ensure_live()?;

        // Another caller may have produced it while we waited for the worker.
        if let Some(hit) = self.cache.lock().recheck(&key) {
            return Ok(hit);
        }
        if token.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }

        if slot.is_none() {
            self.start_worker(&mut slot).await?;
        }
        let Some(io) = slot.as_mut() else {
            return Err(AnalysisError::WorkerFault("worker not running".to_string()));
        };

        match self.run_search(io, position, &options, progress, token).await {
            Ok(evaluation) => {
                let evaluation = Arc::new(evaluation);
                if !self.stop_requested.load(Ordering::SeqCst) {
                    self.cache.lock().insert(key, evaluation.clone());
                }
                self.record_success(false);
                debug!(
                    session_id = %self.id,
                    depth = evaluation.depth,
                    score = %evaluation.score,
                    best_move = evaluation.best_move.as_deref().unwrap_or("-"),
                    "Analysis complete"
                );
                Ok(evaluation)
            }
            Err(error) => {
                self.record_failure(&error, &mut slot);
                Err(error)
            }
        }
    }

    /// Withdraws the `analyze_cancellable` call holding `token`. Stops the
    /// worker only when that call owns the running search.
    pub fn cancel(&self, token: &SearchToken) {
        token.cancelled.store(true, Ordering::SeqCst);
        let owner = self.search_owner.lock();
        if owner.as_ref().is_some_and(|owner| owner.same(token)) {
            self.stop();
        }
    }

    /// Asks whatever search is running to finish early. Best effort; ignored when idle.
    pub fn stop(&self) {
        if self.state() != SessionState::Analyzing {
            return;
        }
        self.stop_requested.store(true, Ordering::SeqCst);
        if let Err(error) = self.send(EngineCommand::Stop) {
            debug!(session_id = %self.id, %error, "Failed to send stop");
        }
    }

    /// Readiness round trip. Returns `Ok(None)` without touching the worker
    /// when the session is busy or has no worker yet.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn ping(&self) -> AnalysisResult<Option<Duration>> {
        self.ensure_live()?;
        if self.is_busy() {
            return Ok(None);
        }
        let Ok(mut slot) = self.io.try_lock() else {
            return Ok(None);
        };
        let _in_flight = InFlight::enter(&self.in_flight);
        let Some(io) = slot.as_mut() else {
            return Ok(None);
        };

        let started = Instant::now();
        let result = match self.drain_stale(io) {
            Ok(()) => self.sync_ready(io).await,
            Err(error) => Err(error),
        };

        match result {
            Ok(()) => {
                self.record_success(false);
                Ok(Some(started.elapsed()))
            }
            Err(error) => {
                self.record_failure(&error, &mut slot);
                Err(error)
            }
        }
    }

    /// Shuts the worker down. In-flight and later calls fail with `EngineDisposed`.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn dispose(&self) {
        if self.state() == SessionState::Disposed {
            return;
        }
        self.set_state(SessionState::Disposed);
        self.disposed.send_replace(true);
        let _ = self.send(EngineCommand::Quit);

        let mut slot = self.io.lock().await;
        if let Some(mut io) = slot.take() {
            io.terminator.terminate();
        }
        *self.commands.lock() = None;
        info!(session_id = %self.id, "Session disposed");
    }

    fn ensure_live(&self) -> AnalysisResult<()> {
        if self.state() == SessionState::Disposed {
            return Err(AnalysisError::EngineDisposed);
        }
        Ok(())
    }

    async fn start_worker(&self, slot: &mut Option<WorkerIo>) -> AnalysisResult<()> {
        let link = match self.spawner.spawn().await {
            Ok(link) => link,
            Err(error) => {
                self.record_failure(&error, slot);
                return Err(error);
            }
        };

        *self.commands.lock() = Some(link.commands);
        let mut io = WorkerIo {
            output: link.output,
            terminator: link.terminator,
            applied: None,
        };
        self.set_state(SessionState::HandshakeSent);

        match self.handshake(&mut io).await {
            Ok(identity) => {
                info!(
                    session_id = %self.id,
                    engine = identity.name.as_deref().unwrap_or("unknown"),
                    options = identity.options.len(),
                    "Worker ready"
                );
                *self.identity.write() = identity;
                *slot = Some(io);
                self.set_state(SessionState::Ready);
                self.record_success(true);
                Ok(())
            }
            Err(error) => {
                *slot = Some(io);
                self.record_failure(&error, slot);
                self.teardown(slot);
                Err(error)
            }
        }
    }

    async fn handshake(&self, io: &mut WorkerIo) -> AnalysisResult<EngineIdentity> {
        self.send(EngineCommand::Uci)?;
        let deadline = Instant::now() + self.config.handshake_timeout();

        let mut identity = EngineIdentity::default();
        self.wait_for(io, deadline, AnalysisError::HandshakeTimeout, |message| match message {
            EngineMessage::Id(IdField::Name(name)) => {
                identity.name = Some(name);
                None
            }
            EngineMessage::Id(IdField::Author(author)) => {
                identity.author = Some(author);
                None
            }
            EngineMessage::Option(option) => {
                identity.options.push(option);
                None
            }
            EngineMessage::UciOk => Some(()),
            _ => None,
        })
        .await?;

        self.apply_settings(io, &identity, &self.config.defaults.normalized())?;
        self.send(EngineCommand::UciNewGame)?;
        self.sync_ready(io).await?;
        Ok(identity)
    }

    async fn run_search(
        &self,
        io: &mut WorkerIo,
        position: &PositionDescriptor,
        options: &AnalysisOptions,
        progress: Option<&mpsc::UnboundedSender<EvaluationUpdate>>,
        token: &SearchToken,
    ) -> AnalysisResult<Evaluation> {
        self.drain_stale(io)?;
        let identity = self.identity();
        self.apply_settings(io, &identity, options)?;
        self.sync_ready(io).await?;

        {
            // Claimed under the owner lock so a concurrent `cancel` either
            // sees this search or is seen here.
            let mut owner = self.search_owner.lock();
            if token.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }
            self.stop_requested.store(false, Ordering::SeqCst);
            *owner = Some(token.clone());
            self.set_state(SessionState::Analyzing);
        }
        let result = self.search(io, position, options, progress).await;
        {
            let mut owner = self.search_owner.lock();
            *owner = None;
            self.set_state(SessionState::Ready);
        }
        result
    }

    async fn search(
        &self,
        io: &mut WorkerIo,
        position: &PositionDescriptor,
        options: &AnalysisOptions,
        progress: Option<&mpsc::UnboundedSender<EvaluationUpdate>>,
    ) -> AnalysisResult<Evaluation> {
        let limit = SearchLimit::from_options(options);
        let budget = match limit {
            SearchLimit::Depth(_) => options.max_time(),
            SearchLimit::MoveTime(_) => options.max_time() + self.config.stop_grace(),
        };
        let deadline = Instant::now() + budget;

        self.send(EngineCommand::Position(position.clone()))?;
        self.send(EngineCommand::Go(limit))?;
        if self.stop_requested.load(Ordering::SeqCst) {
            // The stop raced ahead of `go` and reached an idle worker.
            self.send(EngineCommand::Stop)?;
        }

        let mut accumulator = SearchAccumulator::new(limit);
        let outcome = self
            .wait_for(io, deadline, AnalysisError::AnalysisTimeout, |message| match message {
                EngineMessage::Info(info) => {
                    if let Some(update) = accumulator.apply(&info) {
                        self.publish_progress(update, progress);
                    }
                    None
                }
                EngineMessage::BestMove { best_move, ponder } => Some((best_move, ponder)),
                _ => None,
            })
            .await;

        match outcome {
            Ok((best_move, ponder)) => {
                let evaluation = accumulator.finish(best_move, ponder).ok_or_else(|| {
                    if self.stop_requested.load(Ordering::SeqCst) {
                        AnalysisError::Cancelled
                    } else {
                        AnalysisError::InvalidEngineOutput("search ended without a scored principal variation".to_string())
                    }
                })?;
                self.publish_progress(EvaluationUpdate { evaluation: evaluation.clone(), progress: 100 }, progress);
                Ok(evaluation)
            }
            Err(AnalysisError::AnalysisTimeout) => {
                warn!(session_id = %self.id, budget_ms = budget.as_millis() as u64, "Search deadline expired, stopping worker");
                self.send(EngineCommand::Stop)?;
                let grace = Instant::now() + self.config.stop_grace();
                match self
                    .wait_for(io, grace, AnalysisError::AnalysisTimeout, |message| matches!(message, EngineMessage::BestMove { .. }).then_some(()))
                    .await
                {
                    Ok(()) | Err(AnalysisError::AnalysisTimeout) => Err(AnalysisError::AnalysisTimeout),
                    Err(error) => Err(error),
                }
            }
            Err(error) => Err(error),
        }
    }

    async fn sync_ready(&self, io: &mut WorkerIo) -> AnalysisResult<()> {
        self.send(EngineCommand::IsReady)?;
        let deadline = Instant::now() + self.config.readiness_timeout();
        self.wait_for(io, deadline, AnalysisError::ReadinessTimeout, |message| matches!(message, EngineMessage::ReadyOk).then_some(()))
            .await
    }

    /// Pushes `setoption` for every setting that differs from what the worker last received.
    fn apply_settings(&self, io: &mut WorkerIo, identity: &EngineIdentity, options: &AnalysisOptions) -> AnalysisResult<()> {
        let wanted = AppliedSettings::from(options);
        let previous = io.applied;
        let changes = [
            ("Hash", wanted.hash_size_mb, previous.map(|applied| applied.hash_size_mb)),
            ("Threads", wanted.threads, previous.map(|applied| applied.threads)),
            ("MultiPV", wanted.multi_pv, previous.map(|applied| applied.multi_pv)),
        ];

        for (name, value, before) in changes {
            if before != Some(value) && identity.supports(name) {
                self.send(EngineCommand::set_option(name, value))?;
            }
        }
        io.applied = Some(wanted);
        Ok(())
    }

    /// Discards output left over from an earlier exchange, such as a late
    /// `bestmove` after a stop timed out.
    fn drain_stale(&self, io: &mut WorkerIo) -> AnalysisResult<()> {
        loop {
            match io.output.try_recv() {
                Ok(line) => trace!(session_id = %self.id, %line, "Discarded stale output"),
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => return Err(AnalysisError::WorkerFault("worker output closed".to_string())),
            }
        }
    }

    /// Reads worker lines until `handle` yields a value, the deadline
    /// passes, the worker goes away, or the session is disposed.
    async fn wait_for<T>(
        &self,
        io: &mut WorkerIo,
        deadline: Instant,
        on_timeout: AnalysisError,
        mut handle: impl FnMut(EngineMessage) -> Option<T>,
    ) -> AnalysisResult<T> {
        let mut disposed = self.disposed.subscribe();
        loop {
            let line = tokio::select! {
                biased;
                _ = disposal(&mut disposed) => return Err(AnalysisError::EngineDisposed),
                _ = tokio::time::sleep_until(deadline) => return Err(on_timeout),
                line = io.output.recv() => line,
            };

            let Some(line) = line else {
                return Err(AnalysisError::WorkerFault("worker output closed".to_string()));
            };
            trace!(session_id = %self.id, %line, "<<");

            match parse_line(&line) {
                Ok(message) => {
                    self.health.lock().last_interaction = Some(Instant::now());
                    if let Some(value) = handle(message) {
                        return Ok(value);
                    }
                }
                Err(error) => self.record_violation(&line, &error),
            }
        }
    }

    fn send(&self, command: EngineCommand) -> AnalysisResult<()> {
        let line = command.to_string();
        let commands = self.commands.lock();
        let sender = commands.as_ref().ok_or_else(|| AnalysisError::WorkerFault("worker not running".to_string()))?;
        trace!(session_id = %self.id, %line, ">>");
        sender.send(line).map_err(|_| AnalysisError::WorkerFault("worker input closed".to_string()))
    }

    fn publish_progress(&self, update: EvaluationUpdate, sink: Option<&mpsc::UnboundedSender<EvaluationUpdate>>) {
        if let Some(sink) = sink {
            let _ = sink.send(update.clone());
        }
        self.emit(SessionEventKind::Progress { update });
    }

    fn emit(&self, kind: SessionEventKind) {
        // No subscribers is fine.
        let _ = self.events.send(SessionEvent { session: self.id, kind });
    }

    fn set_state(&self, to: SessionState) {
        let from = {
            let mut state = self.state.lock();
            if *state == to || *state == SessionState::Disposed {
                return;
            }
            std::mem::replace(&mut *state, to)
        };
        debug!(session_id = %self.id, %from, %to, "State changed");
        self.emit(SessionEventKind::StateChanged { from, to });
    }

    fn teardown(&self, slot: &mut Option<WorkerIo>) {
        if let Some(mut io) = slot.take() {
            io.terminator.terminate();
        }
        *self.commands.lock() = None;
        self.set_state(SessionState::Uninitialized);
    }

    fn update_health(&self, update: impl FnOnce(&mut HealthTracker)) {
        let (from, to) = {
            let mut tracker = self.health.lock();
            let from = tracker.status;
            update(&mut tracker);
            (from, tracker.status)
        };

        if from != to {
            if to == HealthStatus::Healthy {
                info!(session_id = %self.id, %from, %to, "Session health changed");
            } else {
                warn!(session_id = %self.id, %from, %to, "Session health changed");
            }
            self.emit(SessionEventKind::HealthChanged { from, to });
        }
    }

    fn record_success(&self, fresh_worker: bool) {
        let now = Instant::now();
        let window = self.config.timeout_window();
        self.update_health(|tracker| {
            tracker.last_success = Some(now);
            tracker.last_interaction = Some(now);
            tracker.prune(now, window);
            if tracker.status != HealthStatus::Failed || fresh_worker {
                tracker.status = if tracker.timeouts.len() >= DEGRADE_AFTER_TIMEOUTS { HealthStatus::Degraded } else { HealthStatus::Healthy };
            }
        });
    }

    fn record_failure(&self, error: &AnalysisError, slot: &mut Option<WorkerIo>) {
        if matches!(
            error,
            AnalysisError::EngineDisposed | AnalysisError::Cancelled | AnalysisError::CircuitOpen | AnalysisError::QueueOverflow
        ) {
            return;
        }
        warn!(session_id = %self.id, %error, "Session operation failed");

        let now = Instant::now();
        let window = self.config.timeout_window();
        self.update_health(|tracker| {
            tracker.errors += 1;
            tracker.prune(now, window);
            match error {
                AnalysisError::WorkerFault(_) => tracker.status = HealthStatus::Failed,
                AnalysisError::HandshakeTimeout | AnalysisError::ReadinessTimeout | AnalysisError::AnalysisTimeout => {
                    tracker.timeouts.push_back(now);
                    if tracker.timeouts.len() >= DEGRADE_AFTER_TIMEOUTS && tracker.status == HealthStatus::Healthy {
                        tracker.status = HealthStatus::Degraded;
                    }
                }
                _ => {}
            }
        });
        self.emit(SessionEventKind::Error { message: error.to_string() });

        if matches!(error, AnalysisError::WorkerFault(_)) {
            self.teardown(slot);
        }
    }

    fn record_violation(&self, line: &str, error: &ProtocolError) {
        warn!(session_id = %self.id, %line, %error, "Rejected worker output");
        self.health.lock().violations += 1;
        self.emit(SessionEventKind::ProtocolViolation {
            line: line.to_string(),
            reason: error.to_string(),
        });
    }
}

/// Resolves once the session is marked disposed.
async fn disposal(receiver: &mut watch::Receiver<bool>) {
    loop {
        let disposed = *receiver.borrow_and_update();
        if disposed {
            return;
        }
        if receiver.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
