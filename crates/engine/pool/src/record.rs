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

//! Pool bookkeeping for one managed session.

use crate::balancer::Candidate;
use crate::health::HealthInputs;
use crate::metrics::SessionSnapshot;
use engine_common::HealthStatus;
use engine_session::EngineSession;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub(crate) struct SessionRecord {
    pub session: Arc<EngineSession>,
    /// Last pool-side assessment
    pub health: HealthStatus,
    pub active_count: usize,
    pub total_count: u64,
    pub completed: u64,
    pub last_used_at: Option<Instant>,
    pub avg_response_time_ms: f64,
    pub error_count: u64,
    pub created_at: Instant,
    /// No new work; removed once idle
    pub draining: bool,
    recent_errors: VecDeque<Instant>,
}

impl SessionRecord {
    pub fn new(session: Arc<EngineSession>, now: Instant) -> Self {
        Self {
            session,
            health: HealthStatus::Healthy,
            active_count: 0,
            total_count: 0,
            completed: 0,
            last_used_at: None,
            avg_response_time_ms: 0.0,
            error_count: 0,
            created_at: now,
            draining: false,
            recent_errors: VecDeque::new(),
        }
    }

    pub fn is_dispatchable(&self, max_concurrent: usize) -> bool {
        !self.draining && self.health.is_dispatchable() && self.session.health().is_dispatchable() && self.active_count < max_concurrent
    }

    pub fn is_idle(&self) -> bool {
        self.active_count == 0
    }

    /// Reserves a slot for a request about to be dispatched. Returns the
    /// previous `last_used_at` so the reservation can be undone.
    pub fn begin(&mut self, now: Instant) -> Option<Instant> {
        self.active_count += 1;
        self.total_count += 1;
        self.last_used_at.replace(now)
    }

    /// Undoes `begin` when the reservation found no request to run.
    pub fn cancel_reservation(&mut self, previous_use: Option<Instant>) {
        self.active_count = self.active_count.saturating_sub(1);
        self.total_count = self.total_count.saturating_sub(1);
        self.last_used_at = previous_use;
    }

    /// Ends an analysis that was cancelled or cut short by disposal. It
    /// says nothing about the engine, so only the slot is released.
    pub fn finish_uncounted(&mut self) {
        self.active_count = self.active_count.saturating_sub(1);
    }

    pub fn finish(&mut self, now: Instant, elapsed: Duration, failed: bool, error_window: Duration) {
        self.active_count = self.active_count.saturating_sub(1);
        if failed {
            self.error_count += 1;
            self.recent_errors.push_back(now);
        } else {
            let count = self.completed as f64;
            let elapsed_ms = elapsed.as_secs_f64() * 1_000.0;
            self.avg_response_time_ms = (self.avg_response_time_ms * count + elapsed_ms) / (count + 1.0);
            self.completed += 1;
        }
        self.prune_errors(now, error_window);
    }

    /// Dispatch failures inside the error window.
    pub fn recent_error_count(&mut self, now: Instant, error_window: Duration) -> usize {
        self.prune_errors(now, error_window);
        self.recent_errors.len()
    }

    fn prune_errors(&mut self, now: Instant, error_window: Duration) {
        while let Some(&at) = self.recent_errors.front() {
            if now.saturating_duration_since(at) <= error_window {
                break;
            }
            self.recent_errors.pop_front();
        }
    }

    pub fn health_inputs(&mut self, now: Instant, error_window: Duration) -> HealthInputs {
        let last_activity = match (self.last_used_at, self.session.last_interaction_at()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        HealthInputs {
            reported: self.session.health(),
            last_success: self.session.last_success_at(),
            last_activity,
            recent_errors: self.recent_error_count(now, error_window),
            created_at: self.created_at,
        }
    }

    pub fn candidate(&self) -> Candidate {
        Candidate {
            id: self.session.id(),
            active_count: self.active_count,
            total_count: self.total_count,
            last_used_at: self.last_used_at,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.session.id(),
            health: self.health.worst(self.session.health()),
            state: self.session.state(),
            active_count: self.active_count,
            total_count: self.total_count,
            avg_response_time_ms: self.avg_response_time_ms,
            error_count: self.error_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_common::SessionId;
    use engine_session::{SessionConfig, SimulatedSpawner};

    fn record() -> SessionRecord {
        let session = EngineSession::new(SessionId::new(), Arc::new(SimulatedSpawner::default()), SessionConfig::default());
        SessionRecord::new(Arc::new(session), Instant::now())
    }

    #[tokio::test(start_paused = true)]
    async fn test_reservation_accounting() {
        let mut record = record();
        assert!(record.is_dispatchable(1));

        let previous = record.begin(Instant::now());
        assert!(!record.is_dispatchable(1));
        assert!(record.is_dispatchable(2));

        record.cancel_reservation(previous);
        assert_eq!((record.active_count, record.total_count), (0, 0));
        assert_eq!(record.last_used_at, None);

        record.begin(Instant::now());
        record.finish(Instant::now(), Duration::from_millis(200), false, Duration::from_secs(60));
        record.begin(Instant::now());
        record.finish(Instant::now(), Duration::from_millis(400), false, Duration::from_secs(60));
        assert_eq!(record.avg_response_time_ms, 300.0);
        assert_eq!(record.completed, 2);
        assert!(record.is_idle());

        record.begin(Instant::now());
        record.finish_uncounted();
        assert_eq!(record.completed, 2);
        assert_eq!(record.total_count, 3);
        assert!(record.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recent_errors_expire() {
        let mut record = record();
        let window = Duration::from_secs(10);
        record.begin(Instant::now());
        record.finish(Instant::now(), Duration::from_millis(5), true, window);
        assert_eq!(record.recent_error_count(Instant::now(), window), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(record.recent_error_count(Instant::now(), window), 0);
        assert_eq!(record.error_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_draining_is_not_dispatchable() {
        let mut record = record();
        record.draining = true;
        assert!(!record.is_dispatchable(4));
        record.draining = false;
        record.health = HealthStatus::Degraded;
        assert!(!record.is_dispatchable(4));
    }
}
