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

//! Pool of engine sessions.
//!
//! [`EnginePool`] fronts N [`engine_session::EngineSession`]s with a single
//! `analyze` call. Requests pass a circuit breaker, go straight to the best
//! free session or wait in a priority queue, and background loops keep the
//! sessions healthy and the pool sized to its load.

pub mod balancer;
pub mod breaker;
pub mod config;
pub mod events;
pub mod health;
pub mod metrics;
pub mod pool;
mod queue;
mod record;
pub mod scaling;

pub use balancer::BalancingStrategy;
pub use breaker::{CircuitBreaker, CircuitBreakerStats, CircuitState};
pub use config::PoolConfig;
pub use events::{PoolEvent, RemovalReason};
pub use crate::metrics::{PoolMetrics, SessionSnapshot};
pub use pool::EnginePool;
pub use queue::QueueStats;
