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

//! Pool lifecycle events published on a broadcast channel.

use crate::breaker::CircuitState;
use engine_common::{AnalysisPriority, HealthStatus, RequestId, SessionId};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    Unhealthy,
    ScaledDown,
    Disposed,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemovalReason::Unhealthy => write!(f, "unhealthy"),
            RemovalReason::ScaledDown => write!(f, "scaled_down"),
            RemovalReason::Disposed => write!(f, "disposed"),
        }
    }
}

/// Observable pool activity. Subscribers that fall behind lose the oldest events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolEvent {
    SessionAdded {
        session: SessionId,
    },
    SessionRemoved {
        session: SessionId,
        reason: RemovalReason,
    },
    HealthChanged {
        session: SessionId,
        from: HealthStatus,
        to: HealthStatus,
    },
    ScaledUp {
        size: usize,
    },
    ScaledDown {
        size: usize,
    },
    RequestQueued {
        request: RequestId,
        priority: AnalysisPriority,
        queue_length: usize,
    },
    RequestDispatched {
        request: RequestId,
        session: SessionId,
        priority: AnalysisPriority,
    },
    RequestFailed {
        request: RequestId,
        error: String,
    },
    CircuitStateChanged {
        from: CircuitState,
        to: CircuitState,
    },
    Error {
        message: String,
    },
}
