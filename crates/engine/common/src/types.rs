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

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Opaque, immutable description of a position to analyze.
///
/// The text is never interpreted as chess. It is only trimmed, used as a
/// cache and request key, and forwarded to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionDescriptor(String);

impl PositionDescriptor {
    /// The initial position, in the worker's own shorthand.
    pub const STARTPOS: &'static str = "startpos";

    /// Creates a descriptor. Blank text is treated as the initial position.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() { Self(Self::STARTPOS.to_string()) } else { Self(trimmed.to_string()) }
    }

    pub fn startpos() -> Self {
        Self(Self::STARTPOS.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Arguments following the `position` keyword on the wire.
    ///
    /// Descriptors already written in the worker's form (`startpos ...` or
    /// `fen ...`) pass through unchanged, anything else is sent as a FEN.
    pub fn position_args(&self) -> String {
        if self.0.starts_with(Self::STARTPOS) || self.0.starts_with("fen ") { self.0.clone() } else { format!("fen {}", self.0) }
    }
}

impl fmt::Display for PositionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PositionDescriptor {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PositionDescriptor {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Per-request search parameters.
///
/// A `depth` of zero requests a time-bounded search of `max_time_ms`.
/// Otherwise `max_time_ms` is the deadline for reaching `depth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    pub depth: u32,
    pub multi_pv: u32,
    pub threads: u32,
    pub hash_size_mb: u32,
    pub max_time_ms: u64,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            depth: 18,
            multi_pv: 1,
            threads: 1,
            hash_size_mb: 128,
            max_time_ms: 30_000,
        }
    }
}

impl AnalysisOptions {
    /// Options for a search bounded only by wall-clock time.
    pub fn time_only(max_time_ms: u64) -> Self {
        Self { depth: 0, max_time_ms, ..Self::default() }
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_multi_pv(mut self, multi_pv: u32) -> Self {
        self.multi_pv = multi_pv;
        self
    }

    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_hash_size_mb(mut self, hash_size_mb: u32) -> Self {
        self.hash_size_mb = hash_size_mb;
        self
    }

    pub fn with_max_time_ms(mut self, max_time_ms: u64) -> Self {
        self.max_time_ms = max_time_ms;
        self
    }

    /// Clamps every count to at least one. `depth` keeps zero as the
    /// time-bounded marker.
    pub fn normalized(self) -> Self {
        Self {
            depth: self.depth,
            multi_pv: self.multi_pv.max(1),
            threads: self.threads.max(1),
            hash_size_mb: self.hash_size_mb.max(1),
            max_time_ms: self.max_time_ms.max(1),
        }
    }

    pub fn is_time_bounded(&self) -> bool {
        self.depth == 0
    }

    pub fn max_time(&self) -> Duration {
        Duration::from_millis(self.max_time_ms)
    }
}

/// Queue placement priority. Does not preempt running analyses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisPriority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl fmt::Display for AnalysisPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(name)
    }
}

impl FromStr for AnalysisPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// Engine score from the side to move's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Score {
    Centipawns(i32),
    /// Moves to mate; negative when the side to move is getting mated.
    Mate(i32),
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Centipawns(cp) => write!(f, "{:+.2}", *cp as f64 / 100.0),
            Self::Mate(n) => write!(f, "#{n}"),
        }
    }
}

/// A secondary line reported when more than one principal variation is requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariationLine {
    pub rank: u32,
    pub depth: u32,
    pub score: Score,
    pub pv: Vec<String>,
}

/// Result of one completed analysis. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub depth: u32,
    pub seldepth: Option<u32>,
    pub score: Score,
    pub principal_variation: Vec<String>,
    pub best_move: Option<String>,
    pub ponder: Option<String>,
    pub nodes: u64,
    pub nodes_per_second: u64,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<VariationLine>,
}

impl Evaluation {
    pub fn is_mate(&self) -> bool {
        matches!(self.score, Score::Mate(_))
    }
}

/// Snapshot of an in-flight analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationUpdate {
    pub evaluation: Evaluation,
    /// 0..=100
    pub progress: u8,
}

/// Unique identifier of a session owned by a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionId {
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Unique identifier of an analysis request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestId {
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_descriptor_is_startpos() {
        assert_eq!(PositionDescriptor::new("   ").as_str(), "startpos");
        assert_eq!(PositionDescriptor::new(" 8/8/8/8/8/8/8/K6k w - - 0 1 ").as_str(), "8/8/8/8/8/8/8/K6k w - - 0 1");
    }

    #[test]
    fn test_position_args() {
        let fen = PositionDescriptor::new("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1");
        assert_eq!(fen.position_args(), "fen rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1");

        let moves = PositionDescriptor::new("startpos moves e2e4 e7e5");
        assert_eq!(moves.position_args(), "startpos moves e2e4 e7e5");

        let explicit = PositionDescriptor::new("fen 8/8/8/8/8/8/8/K6k w - - 0 1");
        assert_eq!(explicit.position_args(), "fen 8/8/8/8/8/8/8/K6k w - - 0 1");
    }

    #[test]
    fn test_priority_ordering() {
        assert!(AnalysisPriority::Critical > AnalysisPriority::High);
        assert!(AnalysisPriority::High > AnalysisPriority::Normal);
        assert!(AnalysisPriority::Normal > AnalysisPriority::Low);
        assert_eq!(AnalysisPriority::default(), AnalysisPriority::Normal);
        assert_eq!("CRITICAL".parse::<AnalysisPriority>().unwrap(), AnalysisPriority::Critical);
        assert!("urgent".parse::<AnalysisPriority>().is_err());
    }

    #[test]
    fn test_normalized_options() {
        let options = AnalysisOptions {
            depth: 0,
            multi_pv: 0,
            threads: 0,
            hash_size_mb: 0,
            max_time_ms: 0,
        }
        .normalized();

        assert_eq!(options.depth, 0);
        assert!(options.is_time_bounded());
        assert_eq!(options.multi_pv, 1);
        assert_eq!(options.threads, 1);
        assert_eq!(options.hash_size_mb, 1);
        assert_eq!(options.max_time_ms, 1);
    }

    #[test]
    fn test_score_serialization() {
        let json = serde_json::to_string(&Score::Mate(-3)).unwrap();
        assert_eq!(json, r#"{"kind":"mate","value":-3}"#);
        assert_eq!(Score::Centipawns(35).to_string(), "+0.35");
        assert_eq!(Score::Mate(2).to_string(), "#2");
    }

    #[test]
    fn test_ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert!(RequestId::new().to_string().starts_with("request-"));
    }
}
