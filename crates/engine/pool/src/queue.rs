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

use crate::breaker::BreakerPermit;
use engine_common::{AnalysisOptions, AnalysisPriority, AnalysisResult, Evaluation, EvaluationUpdate, PositionDescriptor, RequestId};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// A request waiting for a session, or on its way to one.
#[derive(Debug)]
pub(crate) struct QueuedRequest {
    pub id: RequestId,
    pub position: PositionDescriptor,
    pub options: AnalysisOptions,
    pub priority: AnalysisPriority,
    pub enqueued_at: Instant,
    pub sink: oneshot::Sender<AnalysisResult<Evaluation>>,
    pub progress: Option<mpsc::UnboundedSender<EvaluationUpdate>>,
    pub permit: BreakerPermit,
}

impl QueuedRequest {
    /// The caller stopped waiting for the result.
    pub fn is_abandoned(&self) -> bool {
        self.sink.is_closed()
    }
}

/// Statistics for monitoring queue behaviour
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dequeued: u64,
    /// Rejected because the queue was full
    pub rejected: u64,
    /// Removed after waiting longer than the queue timeout
    pub expired: u64,
    /// Removed because the caller went away
    pub abandoned: u64,
    /// Moving average wait time of dequeued requests
    pub avg_wait_ms: f64,
}

/// Priority queue of pending requests: critical first, FIFO within a tier.
///
/// Not internally synchronized; the pool keeps it behind a mutex.
#[derive(Debug)]
pub(crate) struct RequestQueue {
    entries: VecDeque<QueuedRequest>,
    capacity: usize,
    stats: QueueStats,
}

impl RequestQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1_024)),
            capacity,
            stats: QueueStats::default(),
        }
    }

    /// Adds a request behind every entry of equal or higher priority.
    /// Hands the request back when the queue is full.
    pub fn push(&mut self, request: QueuedRequest) -> Result<(), QueuedRequest> {
        self.prune_abandoned();
        if self.entries.len() >= self.capacity {
            self.stats.rejected += 1;
            return Err(request);
        }

        let priority = request.priority;
        if let Some(pos) = self.entries.iter().position(|entry| entry.priority < priority) {
            self.entries.insert(pos, request);
        } else {
            self.entries.push_back(request);
        }
        self.stats.enqueued += 1;
        Ok(())
    }

    /// Next request whose caller is still waiting.
    pub fn pop(&mut self) -> Option<QueuedRequest> {
        while let Some(request) = self.entries.pop_front() {
            if request.is_abandoned() {
                self.stats.abandoned += 1;
                continue;
            }

            let wait_ms = request.enqueued_at.elapsed().as_secs_f64() * 1_000.0;
            let count = self.stats.dequeued as f64;
            self.stats.avg_wait_ms = (self.stats.avg_wait_ms * count + wait_ms) / (count + 1.0);
            self.stats.dequeued += 1;
            return Some(request);
        }
        None
    }

    /// Removes requests that waited longer than `max_wait`.
    pub fn expire(&mut self, now: Instant, max_wait: Duration) -> Vec<QueuedRequest> {
        let mut expired = Vec::new();
        let mut kept = VecDeque::with_capacity(self.entries.len());
        for request in self.entries.drain(..) {
            if now.duration_since(request.enqueued_at) >= max_wait {
                expired.push(request);
            } else {
                kept.push_back(request);
            }
        }
        self.entries = kept;
        self.stats.expired += expired.len() as u64;
        expired
    }

    /// Drops requests whose callers went away. They are never counted.
    pub fn prune_abandoned(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|request| !request.is_abandoned());
        let removed = before - self.entries.len();
        self.stats.abandoned += removed as u64;
        removed
    }

    /// Takes every queued request, leaving the queue empty.
    pub fn drain_all(&mut self) -> Vec<QueuedRequest> {
        self.entries.drain(..).collect()
    }

    /// Requests still waiting for a session.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|request| !request.is_abandoned()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }
}
