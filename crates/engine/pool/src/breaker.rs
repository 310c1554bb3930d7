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

use engine_common::AnalysisError;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,   // Normal operation
    Open,     // Requests are rejected
    HalfOpen, // One probe request is let through
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

type TransitionObserver = Box<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Pool-wide breaker fed by dispatch outcomes.
pub struct CircuitBreaker {
    inner: Mutex<BreakerState>,
    failure_threshold: u32,
    cooldown: Duration,
    observer: Option<TransitionObserver>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("inner", &self.inner)
            .field("failure_threshold", &self.failure_threshold)
            .field("cooldown", &self.cooldown)
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            observer: None,
        }
    }

    /// Called with `(from, to)` on every state change.
    pub fn with_observer(mut self, observer: impl Fn(CircuitState, CircuitState) + Send + Sync + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Admits a request or fails fast with `CircuitOpen`.
    ///
    /// After the cooldown exactly one request is admitted as the half-open
    /// probe; everyone else keeps failing until it settles.
    pub fn try_acquire(self: &Arc<Self>) -> Result<BreakerPermit, AnalysisError> {
        let mut inner = self.inner.lock();
        let state = inner.state;
        let probe = match state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let cooled = inner.opened_at.is_none_or(|opened| opened.elapsed() >= self.cooldown);
                if !cooled {
                    return Err(AnalysisError::CircuitOpen);
                }
                inner.state = CircuitState::HalfOpen;
                inner.probe_in_flight = true;
                drop(inner);
                tracing::info!("Circuit breaker moved to HalfOpen state");
                self.notify(CircuitState::Open, CircuitState::HalfOpen);
                return Ok(BreakerPermit::new(self.clone(), true));
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(AnalysisError::CircuitOpen);
                }
                inner.probe_in_flight = true;
                true
            }
        };
        drop(inner);
        Ok(BreakerPermit::new(self.clone(), probe))
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;

        let state = inner.state;
        match state {
            CircuitState::Closed => {}
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.opened_at = None;
                inner.probe_in_flight = false;
                drop(inner);
                tracing::info!("Circuit breaker closed after successful probe");
                self.notify(CircuitState::HalfOpen, CircuitState::Closed);
            }
            CircuitState::Open => {
                // A request admitted before the breaker opened.
                tracing::debug!("Received success while circuit breaker is open");
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        let failure_count = inner.consecutive_failures;

        let state = inner.state;
        match state {
            CircuitState::Closed => {
                if failure_count >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    drop(inner);
                    tracing::warn!(failure_count, threshold = self.failure_threshold, "Circuit breaker opened due to failures");
                    self.notify(CircuitState::Closed, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
                drop(inner);
                tracing::warn!("Circuit breaker reopened due to failure in HalfOpen state");
                self.notify(CircuitState::HalfOpen, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Frees the probe slot without a verdict.
    fn rearm_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.probe_in_flight {
            inner.probe_in_flight = false;
            tracing::debug!("Half-open probe abandoned, slot re-armed");
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    pub fn get_stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.failure_threshold,
            cooldown_ms: self.cooldown.as_millis() as u64,
            open_for_ms: inner.opened_at.filter(|_| inner.state != CircuitState::Closed).map(|opened| opened.elapsed().as_millis() as u64),
        }
    }

    fn notify(&self, from: CircuitState, to: CircuitState) {
        if let Some(observer) = &self.observer {
            observer(from, to);
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub open_for_ms: Option<u64>,
}

/// Admission ticket carried by a request until its dispatch settles.
///
/// Dropping an unsettled probe permit re-arms the half-open slot.
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    probe: bool,
    settled: bool,
}

impl BreakerPermit {
    fn new(breaker: Arc<CircuitBreaker>, probe: bool) -> Self {
        Self { breaker, probe, settled: false }
    }

    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    /// Dispatch failures count against the breaker; anything else just
    /// releases the permit.
    pub fn fail(mut self, error: &AnalysisError) {
        if error.is_dispatch_failure() {
            self.settled = true;
            self.breaker.record_failure();
        }
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.rearm_probe();
        }
    }
}
