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

//! Bounded per-session evaluation cache.
//!
//! Eviction is strictly insertion order: when full, the entry inserted
//! first is dropped. Lookups do not refresh an entry's position. Entries
//! are never replaced once inserted.

use engine_common::{AnalysisOptions, Evaluation, PositionDescriptor};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// BLAKE3 digest of a position and its normalized options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    pub fn new(position: &PositionDescriptor, options: &AnalysisOptions) -> Self {
        let options = options.normalized();
        let mut hasher = blake3::Hasher::new();
        hasher.update(position.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(&options.depth.to_le_bytes());
        hasher.update(&options.multi_pv.to_le_bytes());
        hasher.update(&options.threads.to_le_bytes());
        hasher.update(&options.hash_size_mb.to_le_bytes());
        hasher.update(&options.max_time_ms.to_le_bytes());
        Self(*hasher.finalize().as_bytes())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub len: usize,
}

/// Not internally synchronized; the session wraps it in a mutex.
#[derive(Debug)]
pub struct EvaluationCache {
    capacity: usize,
    entries: HashMap<CacheKey, Arc<Evaluation>>,
    order: VecDeque<CacheKey>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl EvaluationCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<Arc<Evaluation>> {
        match self.entries.get(key) {
            Some(evaluation) => {
                self.hits += 1;
                Some(Arc::clone(evaluation))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Second lookup for a caller whose first `get` already counted the miss.
    /// Counts a hit when the entry appeared in the meantime, nothing otherwise.
    pub fn recheck(&mut self, key: &CacheKey) -> Option<Arc<Evaluation>> {
        let evaluation = self.entries.get(key).map(Arc::clone)?;
        self.hits += 1;
        Some(evaluation)
    }

    /// Inserts an evaluation unless the key is already present.
    pub fn insert(&mut self, key: CacheKey, evaluation: Arc<Evaluation>) {
        if self.capacity == 0 || self.entries.contains_key(&key) {
            return;
        }

        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
                self.evictions += 1;
            }
        }

        self.order.push_back(key);
        self.entries.insert(key, evaluation);
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            len: self.entries.len(),
        }
    }
}
