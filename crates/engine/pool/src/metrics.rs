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

//! Rolling response statistics and the pool metrics snapshot.

use crate::breaker::CircuitState;
use engine_common::{AnalysisError, HealthStatus, SessionId};
use engine_session::SessionState;
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct Sample {
    elapsed_ms: f64,
    failed: bool,
}

/// Sliding window over the last N completed analyses, plus lifetime counters.
#[derive(Debug)]
pub(crate) struct ResponseWindow {
    samples: VecDeque<Sample>,
    capacity: usize,
    completed: u64,
    failed: u64,
    rejected: u64,
    expired: u64,
}

impl ResponseWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            completed: 0,
            failed: 0,
            rejected: 0,
            expired: 0,
        }
    }

    /// Records the outcome of a dispatched analysis. Cancellations and
    /// disposal are not samples: they say nothing about engine latency.
    pub fn record(&mut self, elapsed: Duration, outcome: Result<(), &AnalysisError>) {
        let failed = match outcome {
            Ok(()) => false,
            Err(AnalysisError::Cancelled | AnalysisError::EngineDisposed) => {
                counter!("enginepool_analyses_total", 1, "outcome" => "cancelled");
                return;
            }
            Err(_) => true,
        };

        let elapsed_ms = elapsed.as_secs_f64() * 1_000.0;
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample { elapsed_ms, failed });

        if failed {
            self.failed += 1;
            counter!("enginepool_analyses_total", 1, "outcome" => "failed");
        } else {
            self.completed += 1;
            counter!("enginepool_analyses_total", 1, "outcome" => "completed");
        }
        histogram!("enginepool_analysis_duration_ms", elapsed_ms);
    }

    /// Admission refused by the breaker or a full queue.
    pub fn record_rejected(&mut self) {
        self.rejected += 1;
        counter!("enginepool_analyses_total", 1, "outcome" => "rejected");
    }

    pub fn record_expired(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.expired += count as u64;
        counter!("enginepool_analyses_total", count as u64, "outcome" => "expired");
    }

    pub fn avg_response_ms(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let total: f64 = self.samples.iter().map(|sample| sample.elapsed_ms).sum();
        Some(total / self.samples.len() as f64)
    }

    pub fn error_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let failed = self.samples.iter().filter(|sample| sample.failed).count();
        failed as f64 / self.samples.len() as f64
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn expired(&self) -> u64 {
        self.expired
    }
}

/// Point-in-time view of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub health: HealthStatus,
    pub state: SessionState,
    pub active_count: usize,
    pub total_count: u64,
    pub avg_response_time_ms: f64,
    pub error_count: u64,
}

/// Point-in-time view of the whole pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolMetrics {
    pub total_sessions: usize,
    pub healthy_sessions: usize,
    pub active_analyses: usize,
    pub queue_length: usize,
    /// Over the sliding window; `None` before the first completed analysis
    pub avg_response_time_ms: Option<f64>,
    pub error_rate: f64,
    /// 0 to 100
    pub performance_score: u8,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub expired: u64,
    pub sessions: Vec<SessionSnapshot>,
}

impl PoolMetrics {
    /// Publishes the gauges of this snapshot to the installed recorder.
    pub(crate) fn publish(&self) {
        gauge!("enginepool_sessions_total", self.total_sessions as f64);
        gauge!("enginepool_sessions_healthy", self.healthy_sessions as f64);
        gauge!("enginepool_active_analyses", self.active_analyses as f64);
        gauge!("enginepool_queue_length", self.queue_length as f64);
        gauge!("enginepool_error_rate", self.error_rate);
        gauge!("enginepool_performance_score", self.performance_score as f64);
    }
}

/// Combines the healthy ratio, latency against the target and the error
/// rate into a single 0..=100 figure. Latency does not count against the
/// score until something was measured.
pub fn performance_score(total_sessions: usize, healthy_sessions: usize, avg_response_ms: Option<f64>, target_ms: f64, error_rate: f64) -> u8 {
    if total_sessions == 0 {
        return 0;
    }
    let healthy_ratio = healthy_sessions as f64 / total_sessions as f64;
    let latency = match avg_response_ms {
        Some(avg) if avg > 0.0 => (target_ms / avg).min(1.0),
        _ => 1.0,
    };
    let score = 100.0 * healthy_ratio * latency * (1.0 - error_rate.clamp(0.0, 1.0));
    score.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_is_bounded() {
        let mut window = ResponseWindow::new(3);
        for ms in [100, 200, 300, 400] {
            window.record(Duration::from_millis(ms), Ok(()));
        }
        assert_eq!(window.avg_response_ms(), Some(300.0));
        assert_eq!(window.completed(), 4);
    }

    #[test]
    fn test_error_rate_and_ignored_outcomes() {
        let mut window = ResponseWindow::new(10);
        assert_eq!(window.avg_response_ms(), None);
        assert_eq!(window.error_rate(), 0.0);

        window.record(Duration::from_millis(10), Ok(()));
        window.record(Duration::from_millis(10), Err(&AnalysisError::AnalysisTimeout));
        window.record(Duration::from_millis(10), Err(&AnalysisError::Cancelled));
        window.record(Duration::from_millis(10), Err(&AnalysisError::EngineDisposed));
        window.record_rejected();
        window.record_expired(2);

        assert_eq!(window.error_rate(), 0.5);
        assert_eq!(window.failed(), 1);
        assert_eq!(window.rejected(), 1);
        assert_eq!(window.expired(), 2);
    }

    #[test]
    fn test_performance_score() {
        assert_eq!(performance_score(0, 0, None, 1_000.0, 0.0), 0);
        assert_eq!(performance_score(4, 4, None, 1_000.0, 0.0), 100);
        assert_eq!(performance_score(4, 2, Some(500.0), 1_000.0, 0.0), 50);
        assert_eq!(performance_score(2, 2, Some(2_000.0), 1_000.0, 0.5), 25);
    }
}
