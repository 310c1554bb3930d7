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

//! Shared data model for engine sessions and the engine pool.
//!
//! Both the session layer and the pool speak in terms of the types defined
//! here: an opaque [`PositionDescriptor`], immutable [`AnalysisOptions`], the
//! resulting [`Evaluation`], and the [`AnalysisError`] taxonomy every caller
//! branches on.

pub mod error;
pub mod health;
pub mod types;

pub use error::{AnalysisError, AnalysisResult, ConfigError};
pub use health::HealthStatus;
pub use types::{AnalysisOptions, AnalysisPriority, Evaluation, EvaluationUpdate, PositionDescriptor, RequestId, Score, SessionId, VariationLine};
