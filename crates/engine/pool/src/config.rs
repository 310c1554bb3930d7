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

//! Pool configuration

use crate::balancer::BalancingStrategy;
use engine_common::ConfigError;
use engine_session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine pool configuration. Durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min_pool_size: usize,
    pub max_pool_size: usize,
    /// Sessions started with the pool
    pub initial_pool_size: usize,
    pub max_concurrent_per_session: usize,
    pub strategy: BalancingStrategy,
    pub max_queue_length: usize,
    pub queue_drain_interval_ms: u64,
    /// Longest a request may wait in the queue
    pub queue_timeout_ms: u64,
    pub health_check_interval_ms: u64,
    /// A session must have completed an exchange this recently to be healthy
    pub freshness_window_ms: u64,
    /// A session must have been used or probed this recently to be healthy
    pub activity_window_ms: u64,
    /// Errors inside `error_window_ms` that make a session unhealthy
    pub error_threshold: usize,
    pub error_window_ms: u64,
    pub scaling_interval_ms: u64,
    /// Minimum time between two scaling events
    pub scaling_cooldown_ms: u64,
    pub target_response_time_ms: u64,
    /// Queue length above which the pool grows
    pub scale_up_queue_length: usize,
    /// Consecutive dispatch failures that open the circuit breaker
    pub failure_threshold: u32,
    pub breaker_cooldown_ms: u64,
    /// How long dispose waits for in-flight analyses before forcing teardown
    pub drain_timeout_ms: u64,
    /// Completed analyses kept for the rolling averages
    pub metrics_window: usize,
    pub event_capacity: usize,
    pub session: SessionConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: 1,
            max_pool_size: 4,
            initial_pool_size: 2,
            max_concurrent_per_session: 1,
            strategy: BalancingStrategy::LeastBusy,
            max_queue_length: 64,
            queue_drain_interval_ms: 100,
            queue_timeout_ms: 60_000,
            health_check_interval_ms: 10_000,
            freshness_window_ms: 60_000,
            activity_window_ms: 300_000,
            error_threshold: 5,
            error_window_ms: 60_000,
            scaling_interval_ms: 5_000,
            scaling_cooldown_ms: 30_000,
            target_response_time_ms: 2_000,
            scale_up_queue_length: 2,
            failure_threshold: 3,
            breaker_cooldown_ms: 30_000,
            drain_timeout_ms: 5_000,
            metrics_window: 100,
            event_capacity: 1_024,
            session: SessionConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Fixed-size pool.
    pub fn with_size(size: usize) -> Self {
        Self {
            min_pool_size: size,
            max_pool_size: size,
            initial_pool_size: size,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pool_size == 0 {
            return Err(ConfigError::invalid("max_pool_size", "must be at least 1"));
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(ConfigError::invalid(
                "min_pool_size",
                format!("{} exceeds max_pool_size {}", self.min_pool_size, self.max_pool_size),
            ));
        }
        if self.initial_pool_size < self.min_pool_size || self.initial_pool_size > self.max_pool_size {
            return Err(ConfigError::invalid(
                "initial_pool_size",
                format!("{} is outside {}..={}", self.initial_pool_size, self.min_pool_size, self.max_pool_size),
            ));
        }

        let nonzero_counts = [
            ("max_concurrent_per_session", self.max_concurrent_per_session),
            ("max_queue_length", self.max_queue_length),
            ("error_threshold", self.error_threshold),
            ("metrics_window", self.metrics_window),
            ("event_capacity", self.event_capacity),
        ];
        for (field, value) in nonzero_counts {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be at least 1"));
            }
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold", "must be at least 1"));
        }

        let nonzero_durations = [
            ("queue_drain_interval_ms", self.queue_drain_interval_ms),
            ("queue_timeout_ms", self.queue_timeout_ms),
            ("health_check_interval_ms", self.health_check_interval_ms),
            ("freshness_window_ms", self.freshness_window_ms),
            ("activity_window_ms", self.activity_window_ms),
            ("error_window_ms", self.error_window_ms),
            ("scaling_interval_ms", self.scaling_interval_ms),
            ("target_response_time_ms", self.target_response_time_ms),
        ];
        for (field, value) in nonzero_durations {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }

        self.session.validate()
    }

    pub fn queue_drain_interval(&self) -> Duration {
        Duration::from_millis(self.queue_drain_interval_ms)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn freshness_window(&self) -> Duration {
        Duration::from_millis(self.freshness_window_ms)
    }

    pub fn activity_window(&self) -> Duration {
        Duration::from_millis(self.activity_window_ms)
    }

    pub fn error_window(&self) -> Duration {
        Duration::from_millis(self.error_window_ms)
    }

    pub fn scaling_interval(&self) -> Duration {
        Duration::from_millis(self.scaling_interval_ms)
    }

    pub fn scaling_cooldown(&self) -> Duration {
        Duration::from_millis(self.scaling_cooldown_ms)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_millis(self.breaker_cooldown_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(PoolConfig::default().validate().is_ok());
        assert!(PoolConfig::with_size(3).validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let config = PoolConfig {
            min_pool_size: 5,
            max_pool_size: 2,
            ..PoolConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field: "min_pool_size", .. })));
    }

    #[test]
    fn test_rejects_zero_caps_and_intervals() {
        let config = PoolConfig {
            max_concurrent_per_session: 0,
            ..PoolConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field: "max_concurrent_per_session", .. })));

        let config = PoolConfig {
            queue_drain_interval_ms: 0,
            ..PoolConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field: "queue_drain_interval_ms", .. })));
    }

    #[test]
    fn test_nested_session_config_is_validated() {
        let mut config = PoolConfig::default();
        config.session.readiness_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PoolConfig = serde_json::from_str(r#"{ "max_pool_size": 8, "strategy": "round_robin", "session": { "cache_capacity": 16 } }"#).unwrap();
        assert_eq!(config.max_pool_size, 8);
        assert_eq!(config.strategy, BalancingStrategy::RoundRobin);
        assert_eq!(config.session.cache_capacity, 16);
        assert_eq!(config.min_pool_size, 1);
        assert_eq!(config.session.handshake_timeout_ms, 10_000);
    }
}
