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

//! Subcommand handlers. Each prints JSON to stdout.

use crate::config::CliConfig;
use anyhow::Result;
use engine_common::{AnalysisOptions, AnalysisPriority, PositionDescriptor, SessionId};
use engine_pool::EnginePool;
use engine_session::{EngineSession, WorkerSpawner};
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

/// Openings cycled through by `bench`.
const BENCH_POSITIONS: &[&str] = &[
    "startpos",
    "startpos moves e2e4",
    "startpos moves d2d4",
    "startpos moves c2c4",
    "startpos moves g1f3",
    "startpos moves e2e4 e7e5",
    "startpos moves e2e4 c7c5",
    "startpos moves d2d4 d7d5",
    "startpos moves d2d4 g8f6 c2c4",
    "startpos moves e2e4 e7e6 d2d4 d7d5",
];

/// Session defaults overridden by whatever the command line set.
pub fn analysis_options(config: &CliConfig, depth: Option<u32>, time_ms: Option<u64>, multi_pv: Option<u32>) -> AnalysisOptions {
    let mut options = config.pool.session.defaults;
    if let Some(time_ms) = time_ms {
        options = options.with_max_time_ms(time_ms);
        if depth.is_none() {
            options = options.with_depth(0);
        }
    }
    if let Some(depth) = depth {
        options = options.with_depth(depth);
    }
    if let Some(multi_pv) = multi_pv {
        options = options.with_multi_pv(multi_pv);
    }
    options.normalized()
}

pub async fn analyze(
    config: &CliConfig,
    spawner: Arc<dyn WorkerSpawner>,
    position: &str,
    options: AnalysisOptions,
    priority: AnalysisPriority,
    progress: bool,
) -> Result<()> {
    let pool = EnginePool::start(config.pool.clone(), spawner).await?;
    let position = PositionDescriptor::new(position);

    let result = if progress {
        let (sender, mut updates) = mpsc::unbounded_channel();
        let printer = tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                match serde_json::to_string(&update) {
                    Ok(line) => println!("{line}"),
                    Err(error) => warn!(%error, "Failed to encode update"),
                }
            }
        });
        let result = pool.analyze_with_progress(&position, &options, priority, sender).await;
        let _ = printer.await;
        result
    } else {
        pool.analyze(&position, &options, priority).await
    };

    pool.dispose().await;
    let evaluation = result?;
    println!("{}", serde_json::to_string_pretty(&evaluation)?);
    Ok(())
}

pub async fn bench(config: &CliConfig, spawner: Arc<dyn WorkerSpawner>, requests: usize, depth: u32, events: bool) -> Result<()> {
    let pool = EnginePool::start(config.pool.clone(), spawner).await?;
    let options = config.pool.session.defaults.with_depth(depth).normalized();

    let event_printer = events.then(|| {
        let mut receiver = pool.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = receiver.recv().await {
                if let Ok(line) = serde_json::to_string(&event) {
                    eprintln!("{line}");
                }
            }
        })
    });

    info!(requests, depth, size = pool.pool_size(), "Starting bench");
    let started = Instant::now();
    let results = join_all((0..requests).map(|n| {
        let pool = pool.clone();
        let position = PositionDescriptor::new(BENCH_POSITIONS[n % BENCH_POSITIONS.len()]);
        let priority = if n % 4 == 0 { AnalysisPriority::High } else { AnalysisPriority::Normal };
        async move { pool.analyze(&position, &options, priority).await }
    }))
    .await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let mut errors = serde_json::Map::new();
    for error in results.iter().filter_map(|result| result.as_ref().err()) {
        let count = errors.entry(error.to_string()).or_insert(json!(0));
        *count = json!(count.as_u64().unwrap_or(0) + 1);
    }
    let succeeded = results.iter().filter(|result| result.is_ok()).count();

    let report = json!({
        "requests": requests,
        "succeeded": succeeded,
        "errors": errors,
        "elapsed_ms": elapsed_ms,
        "metrics": pool.metrics(),
        "queue": {
            "avg_wait_ms": pool.queue_stats().avg_wait_ms,
            "rejected": pool.queue_stats().rejected,
            "expired": pool.queue_stats().expired,
        },
    });

    pool.dispose().await;
    if let Some(printer) = event_printer {
        printer.abort();
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn probe(config: &CliConfig, spawner: Arc<dyn WorkerSpawner>) -> Result<()> {
    let session = EngineSession::new(SessionId::new(), spawner, config.pool.session.clone());
    let started = Instant::now();
    let initialized = session.initialize().await;
    let handshake_ms = started.elapsed().as_millis() as u64;

    let report = match initialized {
        Ok(()) => {
            let ready_ms = session.ping().await?.map(|latency| latency.as_millis() as u64);
            json!({
                "ok": true,
                "identity": session.identity(),
                "handshake_ms": handshake_ms,
                "ready_ms": ready_ms,
                "health": session.health(),
                "state": session.state(),
            })
        }
        Err(error) => json!({
            "ok": false,
            "error": error.to_string(),
            "handshake_ms": handshake_ms,
        }),
    };

    session.dispose().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
