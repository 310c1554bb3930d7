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

//! Pool-side health assessment of a session.

use engine_common::HealthStatus;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct HealthPolicy {
    pub freshness_window: Duration,
    pub activity_window: Duration,
    pub error_threshold: usize,
}

/// Observations about one session at assessment time.
#[derive(Debug, Clone, Copy)]
pub struct HealthInputs {
    /// What the session reports about itself
    pub reported: HealthStatus,
    pub last_success: Option<Instant>,
    /// Latest of last dispatch and last worker interaction
    pub last_activity: Option<Instant>,
    pub recent_errors: usize,
    pub created_at: Instant,
}

/// Healthy iff the last success is fresh, recent errors stay under the
/// threshold, and the session was active recently. A stale or failed
/// session is `Failed`; anything else short of healthy is `Degraded`.
pub fn assess(policy: &HealthPolicy, inputs: &HealthInputs, now: Instant) -> HealthStatus {
    if inputs.reported == HealthStatus::Failed {
        return HealthStatus::Failed;
    }

    let within = |at: Option<Instant>, window: Duration| at.is_some_and(|at| now.saturating_duration_since(at) <= window);
    if !within(inputs.last_success, policy.freshness_window) {
        return HealthStatus::Failed;
    }

    let active = within(inputs.last_activity.or(Some(inputs.created_at)), policy.activity_window);
    if !active || inputs.recent_errors >= policy.error_threshold {
        return HealthStatus::Degraded;
    }

    inputs.reported
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> HealthPolicy {
        HealthPolicy {
            freshness_window: Duration::from_secs(60),
            activity_window: Duration::from_secs(300),
            error_threshold: 3,
        }
    }

    fn inputs(now: Instant) -> HealthInputs {
        HealthInputs {
            reported: HealthStatus::Healthy,
            last_success: Some(now),
            last_activity: Some(now),
            recent_errors: 0,
            created_at: now,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_active_session_is_healthy() {
        let now = Instant::now();
        assert_eq!(assess(&policy(), &inputs(now), now), HealthStatus::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_success_fails() {
        let start = Instant::now();
        tokio::time::advance(Duration::from_secs(61)).await;
        let now = Instant::now();
        let inputs = HealthInputs {
            last_activity: Some(now),
            ..inputs(start)
        };
        assert_eq!(assess(&policy(), &inputs, now), HealthStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_threshold_degrades() {
        let now = Instant::now();
        let inputs = HealthInputs { recent_errors: 3, ..inputs(now) };
        assert_eq!(assess(&policy(), &inputs, now), HealthStatus::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactivity_degrades() {
        let start = Instant::now();
        tokio::time::advance(Duration::from_secs(301)).await;
        let now = Instant::now();
        let inputs = HealthInputs {
            last_success: Some(now),
            ..inputs(start)
        };
        assert_eq!(assess(&policy(), &inputs, now), HealthStatus::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reported_state_is_respected() {
        let now = Instant::now();
        let failed = HealthInputs {
            reported: HealthStatus::Failed,
            ..inputs(now)
        };
        let degraded = HealthInputs {
            reported: HealthStatus::Degraded,
            ..inputs(now)
        };
        assert_eq!(assess(&policy(), &failed, now), HealthStatus::Failed);
        assert_eq!(assess(&policy(), &degraded, now), HealthStatus::Degraded);
    }
}
