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

//! Session configuration

use engine_common::{AnalysisOptions, ConfigError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Deadlines, cache bound, and default search options for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Deadline for `uciok` after `uci`
    pub handshake_timeout_ms: u64,
    /// Deadline for `readyok` after `isready`
    pub readiness_timeout_ms: u64,
    /// How long to wait for `bestmove` after sending `stop`
    pub stop_grace_ms: u64,
    /// Maximum cached evaluations; zero disables caching
    pub cache_capacity: usize,
    /// Two timeouts inside this window demote the session to degraded
    pub timeout_window_ms: u64,
    /// Buffered events per subscriber before it starts lagging
    pub event_capacity: usize,
    /// Options used when a caller supplies none
    pub defaults: AnalysisOptions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 10_000,
            readiness_timeout_ms: 5_000,
            stop_grace_ms: 1_000,
            cache_capacity: 256,
            timeout_window_ms: 60_000,
            event_capacity: 256,
            defaults: AnalysisOptions::default(),
        }
    }
}

impl SessionConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn timeout_window(&self) -> Duration {
        Duration::from_millis(self.timeout_window_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::invalid("handshake_timeout_ms", "must be greater than zero"));
        }
        if self.readiness_timeout_ms == 0 {
            return Err(ConfigError::invalid("readiness_timeout_ms", "must be greater than zero"));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::invalid("event_capacity", "must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.readiness_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_deadline_rejected() {
        let config = SessionConfig {
            readiness_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::invalid("readiness_timeout_ms", "must be greater than zero")));
    }
}
