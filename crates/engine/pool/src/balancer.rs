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

use engine_common::SessionId;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::time::Instant;

/// How the pool picks a session for immediate dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancingStrategy {
    /// Fewest active analyses, ties broken by least recent use
    #[default]
    LeastBusy,
    /// Fewest analyses dispatched so far
    RoundRobin,
    Random,
}

impl fmt::Display for BalancingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BalancingStrategy::LeastBusy => "least_busy",
            BalancingStrategy::RoundRobin => "round_robin",
            BalancingStrategy::Random => "random",
        };
        f.write_str(name)
    }
}

impl FromStr for BalancingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "least_busy" => Ok(BalancingStrategy::LeastBusy),
            "round_robin" => Ok(BalancingStrategy::RoundRobin),
            "random" => Ok(BalancingStrategy::Random),
            other => Err(format!("unknown balancing strategy '{other}'")),
        }
    }
}

/// Load view of a session that can take a request right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub id: SessionId,
    pub active_count: usize,
    pub total_count: u64,
    /// `None` for sessions that never ran an analysis
    pub last_used_at: Option<Instant>,
}

impl BalancingStrategy {
    pub fn select(&self, candidates: &[Candidate]) -> Option<SessionId> {
        match self {
            BalancingStrategy::LeastBusy => candidates
                .iter()
                .min_by(|a, b| {
                    a.active_count
                        .cmp(&b.active_count)
                        .then_with(|| a.last_used_at.cmp(&b.last_used_at))
                        .then_with(|| a.id.cmp(&b.id))
                })
                .map(|candidate| candidate.id),
            BalancingStrategy::RoundRobin => candidates.iter().min_by_key(|candidate| (candidate.total_count, candidate.id)).map(|candidate| candidate.id),
            BalancingStrategy::Random => candidates.choose(&mut rand::thread_rng()).map(|candidate| candidate.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn candidate(id: u64, active_count: usize, total_count: u64, last_used_at: Option<Instant>) -> Candidate {
        Candidate {
            id: SessionId(id),
            active_count,
            total_count,
            last_used_at,
        }
    }

    #[test]
    fn test_least_busy_prefers_idle_then_least_recent() {
        let now = Instant::now();
        let earlier = now - Duration::from_secs(5);
        let candidates = [
            candidate(1, 1, 10, Some(earlier)),
            candidate(2, 0, 10, Some(now)),
            candidate(3, 0, 10, Some(earlier)),
        ];
        assert_eq!(BalancingStrategy::LeastBusy.select(&candidates), Some(SessionId(3)));

        let with_unused = [candidate(1, 0, 3, Some(earlier)), candidate(2, 0, 0, None)];
        assert_eq!(BalancingStrategy::LeastBusy.select(&with_unused), Some(SessionId(2)));
    }

    #[test]
    fn test_round_robin_uses_total_count() {
        let now = Instant::now();
        let candidates = [candidate(1, 0, 4, Some(now)), candidate(2, 1, 2, Some(now)), candidate(3, 0, 3, None)];
        assert_eq!(BalancingStrategy::RoundRobin.select(&candidates), Some(SessionId(2)));
    }

    #[test]
    fn test_random_picks_a_candidate() {
        let candidates = [candidate(7, 0, 0, None), candidate(9, 0, 0, None)];
        for _ in 0..20 {
            let picked = BalancingStrategy::Random.select(&candidates).unwrap();
            assert!(picked == SessionId(7) || picked == SessionId(9));
        }
    }

    #[test]
    fn test_empty_candidates() {
        assert_eq!(BalancingStrategy::LeastBusy.select(&[]), None);
        assert_eq!(BalancingStrategy::RoundRobin.select(&[]), None);
        assert_eq!(BalancingStrategy::Random.select(&[]), None);
    }

    #[test]
    fn test_parse() {
        assert_eq!("least-busy".parse::<BalancingStrategy>().unwrap(), BalancingStrategy::LeastBusy);
        assert_eq!("ROUND_ROBIN".parse::<BalancingStrategy>().unwrap(), BalancingStrategy::RoundRobin);
        assert!("fastest".parse::<BalancingStrategy>().is_err());
    }
}
