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

//! Accumulates `info` lines of one search into an evaluation.

use crate::protocol::{InfoLine, SearchLimit};
use engine_common::{Evaluation, EvaluationUpdate, Score, VariationLine};
use std::collections::BTreeMap;
use tokio::time::Instant;

#[derive(Debug, Clone, Default)]
struct PartialLine {
    depth: Option<u32>,
    seldepth: Option<u32>,
    score: Option<Score>,
    pv: Vec<String>,
}

impl PartialLine {
    fn merge(&mut self, info: &InfoLine) {
        let Some(score) = info.score else {
            // Lines without a score (`currmove`, bare node counts) announce a
            // depth that has no result yet. Only a PV for the current depth sticks.
            if let Some(pv) = &info.pv {
                if info.depth.is_none() || info.depth == self.depth {
                    self.pv = pv.clone();
                }
            }
            return;
        };

        if let Some(depth) = info.depth {
            self.depth = Some(depth);
        }
        if let Some(seldepth) = info.seldepth {
            self.seldepth = Some(seldepth);
        }
        self.score = Some(score.score);
        if let Some(pv) = &info.pv {
            self.pv = pv.clone();
        }
    }

    fn scored(&self) -> Option<(u32, Score)> {
        Some((self.depth?, self.score?))
    }
}

/// Later fields overwrite earlier ones per `multipv` rank. Node counters
/// are search-wide and always take the latest report.
#[derive(Debug)]
pub(crate) struct SearchAccumulator {
    limit: SearchLimit,
    started: Instant,
    lines: BTreeMap<u32, PartialLine>,
    nodes: u64,
    nps: u64,
    time_ms: Option<u64>,
    reported_depth: Option<u32>,
}

impl SearchAccumulator {
    pub(crate) fn new(limit: SearchLimit) -> Self {
        Self {
            limit,
            started: Instant::now(),
            lines: BTreeMap::new(),
            nodes: 0,
            nps: 0,
            time_ms: None,
            reported_depth: None,
        }
    }

    /// Merges one info line. Returns an update when the principal line
    /// reached a new depth.
    pub(crate) fn apply(&mut self, info: &InfoLine) -> Option<EvaluationUpdate> {
        if let Some(nodes) = info.nodes {
            self.nodes = nodes;
        }
        if let Some(nps) = info.nps {
            self.nps = nps;
        }
        if let Some(time_ms) = info.time_ms {
            self.time_ms = Some(time_ms);
        }

        let rank = info.rank();
        self.lines.entry(rank).or_default().merge(info);

        if rank != 1 {
            return None;
        }

        let evaluation = self.snapshot()?;
        if self.reported_depth.is_some_and(|reported| evaluation.depth <= reported) {
            return None;
        }
        self.reported_depth = Some(evaluation.depth);

        let progress = self.progress(evaluation.depth);
        Some(EvaluationUpdate { evaluation, progress })
    }

    /// Current principal evaluation, if one with depth and score exists.
    pub(crate) fn snapshot(&self) -> Option<Evaluation> {
        let principal = self.lines.get(&1)?;
        let (depth, score) = principal.scored()?;

        let alternatives = self
            .lines
            .iter()
            .filter(|(rank, _)| **rank > 1)
            .filter_map(|(rank, line)| {
                let (depth, score) = line.scored()?;
                Some(VariationLine {
                    rank: *rank,
                    depth,
                    score,
                    pv: line.pv.clone(),
                })
            })
            .collect();

        Some(Evaluation {
            depth,
            seldepth: principal.seldepth,
            score,
            principal_variation: principal.pv.clone(),
            best_move: None,
            ponder: None,
            nodes: self.nodes,
            nodes_per_second: self.nps,
            elapsed_ms: self.elapsed_ms(),
            alternatives,
        })
    }

    /// Final evaluation once the worker announced its best move.
    pub(crate) fn finish(&self, best_move: Option<String>, ponder: Option<String>) -> Option<Evaluation> {
        let mut evaluation = self.snapshot()?;
        evaluation.best_move = best_move.or_else(|| evaluation.principal_variation.first().cloned());
        evaluation.ponder = ponder.or_else(|| evaluation.principal_variation.get(1).cloned());
        Some(evaluation)
    }

    fn elapsed_ms(&self) -> u64 {
        self.time_ms.unwrap_or_else(|| self.started.elapsed().as_millis() as u64)
    }

    fn progress(&self, depth: u32) -> u8 {
        let fraction = match self.limit {
            SearchLimit::Depth(target) if target > 0 => depth as f64 / target as f64,
            SearchLimit::Depth(_) => 1.0,
            SearchLimit::MoveTime(budget) if !budget.is_zero() => self.elapsed_ms() as f64 / budget.as_millis() as f64,
            SearchLimit::MoveTime(_) => 1.0,
        };
        (fraction.min(1.0) * 100.0).round() as u8
    }
}
