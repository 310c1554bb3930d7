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

//! Error taxonomy visible to callers of sessions and pools.

use thiserror::Error;

/// Result type for analysis operations
pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Every failure an analysis call can surface.
///
/// Transport and protocol problems are classified at the session boundary,
/// so callers never see an unclassified error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("Engine did not acknowledge the handshake in time")]
    HandshakeTimeout,

    #[error("Engine did not report readiness in time")]
    ReadinessTimeout,

    #[error("Analysis exceeded its time budget")]
    AnalysisTimeout,

    #[error("Invalid engine output: {0}")]
    InvalidEngineOutput(String),

    #[error("Worker fault: {0}")]
    WorkerFault(String),

    #[error("Engine disposed")]
    EngineDisposed,

    #[error("Circuit breaker is open")]
    CircuitOpen,

    #[error("Analysis queue is full")]
    QueueOverflow,

    /// The search was stopped before it produced a usable evaluation.
    #[error("Analysis cancelled")]
    Cancelled,
}

impl AnalysisError {
    /// Failures that count against a session's health and the pool's circuit breaker.
    pub fn is_dispatch_failure(&self) -> bool {
        matches!(
            self,
            Self::HandshakeTimeout | Self::ReadinessTimeout | Self::AnalysisTimeout | Self::InvalidEngineOutput(_) | Self::WorkerFault(_)
        )
    }

    /// Whether resubmitting the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CircuitOpen | Self::QueueOverflow | Self::AnalysisTimeout | Self::Cancelled)
    }
}

/// Rejected configuration values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid { field, reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_failure_classification() {
        assert!(AnalysisError::AnalysisTimeout.is_dispatch_failure());
        assert!(AnalysisError::WorkerFault("eof".into()).is_dispatch_failure());
        assert!(AnalysisError::InvalidEngineOutput("bad".into()).is_dispatch_failure());
        assert!(!AnalysisError::CircuitOpen.is_dispatch_failure());
        assert!(!AnalysisError::QueueOverflow.is_dispatch_failure());
        assert!(!AnalysisError::EngineDisposed.is_dispatch_failure());
        assert!(!AnalysisError::Cancelled.is_dispatch_failure());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(AnalysisError::WorkerFault("pipe closed".into()).to_string(), "Worker fault: pipe closed");
        assert_eq!(
            ConfigError::invalid("max_pool_size", "must be >= min_pool_size").to_string(),
            "Invalid configuration for 'max_pool_size': must be >= min_pool_size"
        );
    }
}
