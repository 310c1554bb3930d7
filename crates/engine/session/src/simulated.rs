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

//! In-process demo worker.
//!
//! Speaks the same line protocol as a real engine and produces
//! deterministic pseudo-evaluations derived from a hash of the position.
//! Behaviour knobs let tests and the CLI reproduce misbehaving workers.

use crate::transport::{WorkerLink, WorkerSpawner, WorkerTerminator};
use async_trait::async_trait;
use engine_common::{AnalysisError, AnalysisResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

const CANDIDATE_MOVES: [&str; 12] = ["e2e4", "d2d4", "g1f3", "c2c4", "e7e5", "d7d5", "g8f6", "c7c5", "b1c3", "f1c4", "e7e6", "b8c6"];

/// How a simulated worker behaves. Read on every command, so changes
/// apply to workers that are already running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedBehavior {
    pub name: String,
    /// Simulated time to complete one depth
    pub depth_latency_ms: u64,
    /// Reply `uciok` to `uci`
    pub acknowledge_handshake: bool,
    /// Reply `readyok` to `isready`
    pub acknowledge_ready: bool,
    /// Emit well-formed `info` lines during a search
    pub emit_info: bool,
    /// Emit an `info` line with an unknown token at every depth
    pub emit_malformed_info: bool,
    /// Never answer `go`; a `stop` ends the search without a `bestmove`
    pub hang_on_go: bool,
    /// Exit on the `go` after this many searches
    pub exit_after_searches: Option<u32>,
    /// Fail to start at all
    pub fail_spawn: bool,
}

impl Default for SimulatedBehavior {
    fn default() -> Self {
        Self {
            name: "Simulated Engine".to_string(),
            depth_latency_ms: 5,
            acknowledge_handshake: true,
            acknowledge_ready: true,
            emit_info: true,
            emit_malformed_info: false,
            hang_on_go: false,
            exit_after_searches: None,
            fail_spawn: false,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    spawned: AtomicU64,
    searches: AtomicU64,
}

/// Spawns simulated workers sharing one mutable behaviour.
#[derive(Debug, Clone, Default)]
pub struct SimulatedSpawner {
    behavior: Arc<RwLock<SimulatedBehavior>>,
    counters: Arc<Counters>,
}

impl SimulatedSpawner {
    pub fn new(behavior: SimulatedBehavior) -> Self {
        Self {
            behavior: Arc::new(RwLock::new(behavior)),
            counters: Arc::default(),
        }
    }

    pub fn behavior(&self) -> SimulatedBehavior {
        self.behavior.read().clone()
    }

    pub fn set_behavior(&self, behavior: SimulatedBehavior) {
        *self.behavior.write() = behavior;
    }

    pub fn update_behavior(&self, update: impl FnOnce(&mut SimulatedBehavior)) {
        update(&mut self.behavior.write());
    }

    /// Workers started so far.
    pub fn spawned(&self) -> u64 {
        self.counters.spawned.load(Ordering::Relaxed)
    }

    /// `go` commands received across all workers.
    pub fn searches_started(&self) -> u64 {
        self.counters.searches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl WorkerSpawner for SimulatedSpawner {
    async fn spawn(&self) -> AnalysisResult<WorkerLink> {
        if self.behavior.read().fail_spawn {
            return Err(AnalysisError::WorkerFault("simulated worker failed to start".to_string()));
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();

        let worker = SimulatedWorker {
            behavior: self.behavior.clone(),
            counters: self.counters.clone(),
            output: output_tx,
            position: "startpos".to_string(),
            multi_pv: 1,
            searches: 0,
            search: None,
        };
        tokio::spawn(worker.run(command_rx, kill_rx));

        self.counters.spawned.fetch_add(1, Ordering::Relaxed);
        Ok(WorkerLink {
            commands: command_tx,
            output: output_rx,
            terminator: WorkerTerminator::new(kill_tx),
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Limit {
    Depth(u32),
    MoveTime(Duration),
}

struct RunningSearch {
    stop: Arc<Notify>,
    handle: JoinHandle<()>,
}

struct SimulatedWorker {
    behavior: Arc<RwLock<SimulatedBehavior>>,
    counters: Arc<Counters>,
    output: mpsc::UnboundedSender<String>,
    position: String,
    multi_pv: u32,
    searches: u32,
    search: Option<RunningSearch>,
}

impl SimulatedWorker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<String>, mut kill: oneshot::Receiver<()>) {
        loop {
            let line = tokio::select! {
                _ = &mut kill => break,
                line = commands.recv() => match line {
                    Some(line) => line,
                    None => break,
                },
            };

            if !self.handle(&line).await {
                break;
            }
        }

        if let Some(search) = self.search.take() {
            search.handle.abort();
        }
        debug!("Simulated worker exited");
    }

    /// Returns false when the worker should exit.
    async fn handle(&mut self, line: &str) -> bool {
        let behavior = self.behavior.read().clone();
        let mut words = line.split_whitespace();

        match words.next() {
            Some("uci") => {
                if behavior.acknowledge_handshake {
                    self.send(format!("id name {}", behavior.name));
                    self.send("id author Synerthink".to_string());
                    self.send("option name Hash type spin default 16 min 1 max 33554432".to_string());
                    self.send("option name Threads type spin default 1 min 1 max 1024".to_string());
                    self.send("option name MultiPV type spin default 1 min 1 max 256".to_string());
                    self.send("uciok".to_string());
                }
            }
            Some("isready") => {
                if behavior.acknowledge_ready {
                    self.send("readyok".to_string());
                }
            }
            Some("setoption") => {
                let rest: Vec<&str> = words.collect();
                if let [_, "MultiPV", _, value] = rest.as_slice() {
                    self.multi_pv = value.parse().unwrap_or(1).max(1);
                }
            }
            Some("position") => {
                self.position = words.collect::<Vec<_>>().join(" ");
            }
            Some("go") => {
                self.counters.searches.fetch_add(1, Ordering::Relaxed);
                if behavior.exit_after_searches.is_some_and(|limit| self.searches >= limit) {
                    return false;
                }
                self.searches += 1;

                let rest: Vec<&str> = words.collect();
                let limit = match rest.as_slice() {
                    ["movetime", ms] => Limit::MoveTime(Duration::from_millis(ms.parse().unwrap_or(1000))),
                    ["depth", depth] => Limit::Depth(depth.parse().unwrap_or(1)),
                    _ => Limit::Depth(1),
                };
                self.finish_search().await;
                self.start_search(limit, behavior);
            }
            Some("stop") => {
                if let Some(search) = &self.search {
                    search.stop.notify_one();
                }
                self.finish_search().await;
            }
            Some("quit") => return false,
            _ => {}
        }
        true
    }

    fn send(&self, line: String) {
        let _ = self.output.send(line);
    }

    async fn finish_search(&mut self) {
        if let Some(search) = self.search.take() {
            let _ = search.handle.await;
        }
    }

    fn start_search(&mut self, limit: Limit, behavior: SimulatedBehavior) {
        let stop = Arc::new(Notify::new());
        let seed = *blake3::hash(self.position.as_bytes()).as_bytes();
        let handle = tokio::spawn(search(self.output.clone(), seed, limit, self.multi_pv, behavior, stop.clone()));
        self.search = Some(RunningSearch { stop, handle });
    }
}

async fn search(output: mpsc::UnboundedSender<String>, seed: [u8; 32], limit: Limit, multi_pv: u32, behavior: SimulatedBehavior, stop: Arc<Notify>) {
    if behavior.hang_on_go {
        stop.notified().await;
        return;
    }

    let started = Instant::now();
    let latency = Duration::from_millis(behavior.depth_latency_ms.max(1));
    let base = i16::from_le_bytes([seed[0], seed[1]]) as i32 % 120;
    let mut nodes = 0u64;
    let mut depth = 0u32;

    loop {
        let done = match limit {
            Limit::Depth(target) => depth >= target.max(1),
            Limit::MoveTime(budget) => started.elapsed() >= budget,
        };
        if done {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(latency) => {}
            _ = stop.notified() => break,
        }

        depth += 1;
        nodes += 1_000 * depth as u64 + seed[2] as u64;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let nps = nodes * 1000 / elapsed_ms.max(1);

        if behavior.emit_malformed_info {
            let _ = output.send(format!("info depth {depth} score cp {base} flux 7"));
        }
        if behavior.emit_info {
            for rank in 1..=multi_pv {
                let score = base + (depth as i32 % 3) - 15 * (rank as i32 - 1);
                let pv = variation(&seed, rank, depth).join(" ");
                let _ = output.send(format!(
                    "info depth {depth} seldepth {} multipv {rank} score cp {score} nodes {nodes} nps {nps} time {elapsed_ms} pv {pv}",
                    depth + 2
                ));
            }
        }
    }

    let line = variation(&seed, 1, depth.max(2));
    let _ = output.send(format!("bestmove {} ponder {}", line[0], line[1]));
}

fn variation(seed: &[u8; 32], rank: u32, depth: u32) -> Vec<&'static str> {
    let length = depth.clamp(2, 8) as usize;
    (0..length)
        .map(|ply| {
            let byte = seed[(rank as usize * 3 + ply) % seed.len()] as usize;
            CANDIDATE_MOVES[(byte + rank as usize) % CANDIDATE_MOVES.len()]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_line(link: &mut WorkerLink) -> String {
        link.output.recv().await.expect("worker output closed")
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_and_search() {
        let spawner = SimulatedSpawner::default();
        let mut link = spawner.spawn().await.unwrap();

        link.commands.send("uci".to_string()).unwrap();
        let mut lines = Vec::new();
        loop {
            let line = next_line(&mut link).await;
            let done = line == "uciok";
            lines.push(line);
            if done {
                break;
            }
        }
        assert!(lines[0].starts_with("id name"));

        link.commands.send("position startpos".to_string()).unwrap();
        link.commands.send("go depth 3".to_string()).unwrap();
        let mut infos = 0;
        loop {
            let line = next_line(&mut link).await;
            if line.starts_with("bestmove") {
                break;
            }
            infos += 1;
        }
        assert_eq!(infos, 3);
        assert_eq!(spawner.searches_started(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evaluations_are_deterministic() {
        let spawner = SimulatedSpawner::default();
        let mut first = Vec::new();
        for _ in 0..2 {
            let mut link = spawner.spawn().await.unwrap();
            link.commands.send("position fen 8/8/8/8/8/8/8/K6k w - - 0 1".to_string()).unwrap();
            link.commands.send("go depth 2".to_string()).unwrap();
            let mut lines = Vec::new();
            loop {
                let line = next_line(&mut link).await;
                let done = line.starts_with("bestmove");
                // time and nps depend on the clock, keep the stable prefix
                lines.push(line.split(" nodes ").next().unwrap_or_default().to_string());
                if done {
                    break;
                }
            }
            if first.is_empty() {
                first = lines;
            } else {
                assert_eq!(first, lines);
            }
        }
        assert_eq!(spawner.spawned(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_answers_before_next_reply() {
        let spawner = SimulatedSpawner::new(SimulatedBehavior {
            depth_latency_ms: 1_000,
            ..SimulatedBehavior::default()
        });
        let mut link = spawner.spawn().await.unwrap();
        link.commands.send("go depth 30".to_string()).unwrap();
        link.commands.send("stop".to_string()).unwrap();
        link.commands.send("isready".to_string()).unwrap();

        assert!(next_line(&mut link).await.starts_with("bestmove"));
        assert_eq!(next_line(&mut link).await, "readyok");
    }

    #[tokio::test]
    async fn test_exit_after_searches_closes_output() {
        let spawner = SimulatedSpawner::new(SimulatedBehavior {
            exit_after_searches: Some(0),
            ..SimulatedBehavior::default()
        });
        let mut link = spawner.spawn().await.unwrap();
        link.commands.send("go depth 1".to_string()).unwrap();
        assert!(link.output.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_fail_spawn() {
        let spawner = SimulatedSpawner::new(SimulatedBehavior {
            fail_spawn: true,
            ..SimulatedBehavior::default()
        });
        assert!(matches!(spawner.spawn().await, Err(AnalysisError::WorkerFault(_))));
        assert_eq!(spawner.spawned(), 0);
    }
}
