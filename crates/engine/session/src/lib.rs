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

//! Engine sessions.
//!
//! An [`EngineSession`] wraps one analysis worker: it spawns the worker
//! through a [`WorkerSpawner`], speaks the line protocol with it, caches
//! finished evaluations, and tracks its own health. Sessions are leaves;
//! the pool crate orchestrates many of them.

pub mod cache;
pub mod config;
pub mod events;
pub mod protocol;
mod search;
pub mod session;
pub mod simulated;
pub mod transport;

pub use cache::{CacheKey, CacheStats, EvaluationCache};
pub use config::SessionConfig;
pub use events::{SessionEvent, SessionEventKind, SessionState};
pub use session::{EngineIdentity, EngineSession, SearchToken};
pub use simulated::{SimulatedBehavior, SimulatedSpawner};
pub use transport::{ProcessSpawner, WorkerLink, WorkerSpawner, WorkerTerminator};
