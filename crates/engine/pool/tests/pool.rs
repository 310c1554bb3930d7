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

use engine_common::{AnalysisError, AnalysisOptions, AnalysisPriority, HealthStatus, PositionDescriptor};
use engine_pool::{CircuitState, EnginePool, PoolConfig, PoolEvent, RemovalReason};
use engine_session::{SimulatedBehavior, SimulatedSpawner};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, sleep, sleep_until};

const HOUR_MS: u64 = 3_600_000;

/// Fixed-size pool with the health and scaling loops effectively off.
fn fixed(size: usize) -> PoolConfig {
    PoolConfig {
        health_check_interval_ms: HOUR_MS,
        scaling_interval_ms: HOUR_MS,
        ..PoolConfig::with_size(size)
    }
}

fn slow(depth_latency_ms: u64) -> SimulatedSpawner {
    SimulatedSpawner::new(SimulatedBehavior {
        depth_latency_ms,
        ..SimulatedBehavior::default()
    })
}

async fn start(config: PoolConfig, spawner: &SimulatedSpawner) -> EnginePool {
    EnginePool::start(config, Arc::new(spawner.clone())).await.unwrap()
}

fn position(n: usize) -> PositionDescriptor {
    PositionDescriptor::new(format!("startpos moves e2e4 {n}"))
}

fn collect(events: &mut broadcast::Receiver<PoolEvent>) -> Vec<PoolEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}

#[tokio::test(start_paused = true)]
async fn test_analyze_returns_evaluation() {
    let spawner = SimulatedSpawner::default();
    let pool = start(fixed(2), &spawner).await;
    assert_eq!(pool.pool_size(), 2);
    assert_eq!(spawner.spawned(), 2);

    let evaluation = pool
        .analyze(&PositionDescriptor::startpos(), &AnalysisOptions::default().with_depth(6), AnalysisPriority::Normal)
        .await
        .unwrap();
    assert_eq!(evaluation.depth, 6);
    assert!(evaluation.best_move.is_some());
    assert!(!evaluation.principal_variation.is_empty());

    let metrics = pool.metrics();
    assert_eq!(metrics.total_sessions, 2);
    assert_eq!(metrics.healthy_sessions, 2);
    assert_eq!(metrics.active_analyses, 0);
    assert_eq!(metrics.completed, 1);
    assert_eq!(metrics.error_rate, 0.0);
    assert_eq!(metrics.performance_score, 100);

    let json = serde_json::to_value(&metrics).unwrap();
    assert_eq!(json["circuit_state"], "closed");
    assert_eq!(json["sessions"].as_array().map(Vec::len), Some(2));

    pool.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_progress_is_streamed() {
    let spawner = SimulatedSpawner::default();
    let pool = start(fixed(1), &spawner).await;
    let (progress, mut updates) = mpsc::unbounded_channel();

    let evaluation = pool
        .analyze_with_progress(&position(1), &AnalysisOptions::default().with_depth(4), AnalysisPriority::High, progress)
        .await
        .unwrap();

    let mut received = Vec::new();
    while let Ok(update) = updates.try_recv() {
        received.push(update);
    }
    assert!(received.len() >= 2);
    assert!(received.windows(2).all(|pair| pair[0].evaluation.depth <= pair[1].evaluation.depth));
    let last = received.last().unwrap();
    assert_eq!(last.progress, 100);
    assert_eq!(last.evaluation, evaluation);

    pool.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_invalid_config_is_rejected() {
    let config = PoolConfig {
        min_pool_size: 3,
        max_pool_size: 2,
        ..PoolConfig::default()
    };
    let result = EnginePool::start(config, Arc::new(SimulatedSpawner::default())).await;
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_and_fails_fast() {
    let spawner = SimulatedSpawner::new(SimulatedBehavior {
        hang_on_go: true,
        ..SimulatedBehavior::default()
    });
    let config = PoolConfig {
        failure_threshold: 3,
        breaker_cooldown_ms: 5_000,
        ..fixed(2)
    };
    let pool = start(config, &spawner).await;
    let options = AnalysisOptions::default().with_depth(10).with_max_time_ms(100);

    for n in 0..3 {
        let error = pool.analyze(&position(n), &options, AnalysisPriority::Normal).await.unwrap_err();
        assert_eq!(error, AnalysisError::AnalysisTimeout);
    }
    assert_eq!(pool.circuit_state(), CircuitState::Open);

    let error = pool.analyze(&position(3), &options, AnalysisPriority::Critical).await.unwrap_err();
    assert_eq!(error, AnalysisError::CircuitOpen);
    assert_eq!(spawner.searches_started(), 3);

    let metrics = pool.metrics();
    assert_eq!(metrics.failed, 3);
    assert_eq!(metrics.rejected, 1);
    assert_eq!(metrics.consecutive_failures, 3);
    assert_eq!(metrics.error_rate, 1.0);

    pool.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_breaker_recovers_through_probe() {
    let spawner = SimulatedSpawner::new(SimulatedBehavior {
        hang_on_go: true,
        ..SimulatedBehavior::default()
    });
    let config = PoolConfig {
        failure_threshold: 3,
        breaker_cooldown_ms: 5_000,
        ..fixed(2)
    };
    let pool = start(config, &spawner).await;
    let mut events = pool.subscribe();
    let options = AnalysisOptions::default().with_depth(4).with_max_time_ms(100);

    for n in 0..3 {
        assert!(pool.analyze(&position(n), &options, AnalysisPriority::Normal).await.is_err());
    }
    assert_eq!(pool.circuit_state(), CircuitState::Open);

    sleep(Duration::from_secs(6)).await;
    spawner.update_behavior(|behavior| behavior.hang_on_go = false);

    let evaluation = pool.analyze(&position(10), &options, AnalysisPriority::Normal).await.unwrap();
    assert_eq!(evaluation.depth, 4);
    assert_eq!(pool.circuit_state(), CircuitState::Closed);
    assert_eq!(pool.metrics().consecutive_failures, 0);

    let transitions: Vec<_> = collect(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            PoolEvent::CircuitStateChanged { from, to } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        [
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );

    pool.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_critical_request_jumps_the_queue() {
    let spawner = slow(100);
    let pool = start(fixed(2), &spawner).await;
    let mut events = pool.subscribe();
    let options = AnalysisOptions::default().with_depth(5);

    let priorities = [AnalysisPriority::Normal, AnalysisPriority::Normal, AnalysisPriority::Normal, AnalysisPriority::Critical];
    let mut handles = Vec::new();
    for (n, priority) in priorities.into_iter().enumerate() {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move { pool.analyze(&position(n), &options, priority).await }));
        sleep(Duration::from_millis(5)).await;
    }

    let metrics = pool.metrics();
    assert_eq!(metrics.active_analyses, 2);
    assert_eq!(metrics.queue_length, 2);

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let events = collect(&mut events);
    let dispatched: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            PoolEvent::RequestDispatched { priority, .. } => Some(*priority),
            _ => None,
        })
        .collect();
    assert_eq!(
        dispatched,
        [AnalysisPriority::Normal, AnalysisPriority::Normal, AnalysisPriority::Critical, AnalysisPriority::Normal]
    );

    let queued: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            PoolEvent::RequestQueued { queue_length, .. } => Some(*queue_length),
            _ => None,
        })
        .collect();
    assert_eq!(queued, [1, 2]);
    assert_eq!(pool.metrics().queue_length, 0);

    pool.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_full_queue_overflows() {
    let spawner = slow(100);
    let config = PoolConfig {
        max_queue_length: 1,
        ..fixed(1)
    };
    let pool = start(config, &spawner).await;
    let options = AnalysisOptions::default().with_depth(5);

    let running = tokio::spawn({
        let pool = pool.clone();
        async move { pool.analyze(&position(1), &options, AnalysisPriority::Normal).await }
    });
    sleep(Duration::from_millis(5)).await;
    let queued = tokio::spawn({
        let pool = pool.clone();
        async move { pool.analyze(&position(2), &options, AnalysisPriority::Normal).await }
    });
    sleep(Duration::from_millis(5)).await;

    let error = pool.analyze(&position(3), &options, AnalysisPriority::Critical).await.unwrap_err();
    assert_eq!(error, AnalysisError::QueueOverflow);
    assert_eq!(pool.metrics().rejected, 1);
    assert_eq!(pool.circuit_state(), CircuitState::Closed);

    running.await.unwrap().unwrap();
    queued.await.unwrap().unwrap();
    assert_eq!(pool.queue_stats().rejected, 1);

    pool.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_queued_request_times_out() {
    let spawner = slow(100);
    let config = PoolConfig {
        queue_timeout_ms: 200,
        ..fixed(1)
    };
    let pool = start(config, &spawner).await;
    let options = AnalysisOptions::default().with_depth(10);

    let running = tokio::spawn({
        let pool = pool.clone();
        async move { pool.analyze(&position(1), &options, AnalysisPriority::Normal).await }
    });
    sleep(Duration::from_millis(5)).await;

    let error = pool.analyze(&position(2), &options, AnalysisPriority::Normal).await.unwrap_err();
    assert_eq!(error, AnalysisError::AnalysisTimeout);
    assert_eq!(pool.metrics().expired, 1);
    assert_eq!(pool.circuit_state(), CircuitState::Closed);
    assert_eq!(pool.metrics().consecutive_failures, 0);

    running.await.unwrap().unwrap();
    pool.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_dispose_rejects_pending_and_later_work() {
    let spawner = slow(100);
    let pool = start(fixed(1), &spawner).await;
    let mut events = pool.subscribe();
    let options = AnalysisOptions::default().with_depth(5);

    let running = tokio::spawn({
        let pool = pool.clone();
        async move { pool.analyze(&position(1), &options, AnalysisPriority::Normal).await }
    });
    sleep(Duration::from_millis(5)).await;
    let queued = tokio::spawn({
        let pool = pool.clone();
        async move { pool.analyze(&position(2), &options, AnalysisPriority::Normal).await }
    });
    sleep(Duration::from_millis(5)).await;

    pool.dispose().await;

    assert_eq!(queued.await.unwrap().unwrap_err(), AnalysisError::EngineDisposed);
    assert!(running.await.unwrap().is_ok());

    let error = pool.analyze(&position(3), &options, AnalysisPriority::Normal).await.unwrap_err();
    assert_eq!(error, AnalysisError::EngineDisposed);
    assert_eq!(pool.pool_size(), 0);
    assert_eq!(pool.metrics().active_analyses, 0);

    let removed = collect(&mut events).into_iter().any(|event| {
        matches!(
            event,
            PoolEvent::SessionRemoved {
                reason: RemovalReason::Disposed,
                ..
            }
        )
    });
    assert!(removed);

    // Idempotent.
    pool.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_scale_up_respects_bounds_and_cooldown() {
    let spawner = slow(100);
    let config = PoolConfig {
        min_pool_size: 1,
        max_pool_size: 3,
        initial_pool_size: 1,
        scaling_interval_ms: 100,
        scaling_cooldown_ms: 1_000,
        health_check_interval_ms: HOUR_MS,
        ..PoolConfig::default()
    };
    let started = Instant::now();
    let pool = start(config, &spawner).await;
    let options = AnalysisOptions::default().with_depth(30);

    let mut handles = Vec::new();
    for n in 0..6 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move { pool.analyze(&position(n), &options, AnalysisPriority::Normal).await }));
    }

    sleep_until(started + Duration::from_millis(500)).await;
    assert_eq!(pool.pool_size(), 2);
    sleep_until(started + Duration::from_millis(1_500)).await;
    assert_eq!(pool.pool_size(), 3);
    sleep_until(started + Duration::from_secs(5)).await;
    assert_eq!(pool.pool_size(), 3);

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    pool.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_scale_down_to_minimum() {
    let spawner = SimulatedSpawner::default();
    let config = PoolConfig {
        min_pool_size: 1,
        max_pool_size: 3,
        initial_pool_size: 3,
        scaling_interval_ms: 100,
        scaling_cooldown_ms: 1_000,
        health_check_interval_ms: HOUR_MS,
        ..PoolConfig::default()
    };
    let started = Instant::now();
    let pool = start(config, &spawner).await;
    let mut events = pool.subscribe();

    pool.analyze(&position(1), &AnalysisOptions::default().with_depth(2), AnalysisPriority::Normal)
        .await
        .unwrap();

    sleep_until(started + Duration::from_millis(500)).await;
    assert_eq!(pool.pool_size(), 2);
    sleep_until(started + Duration::from_millis(1_500)).await;
    assert_eq!(pool.pool_size(), 1);
    sleep_until(started + Duration::from_secs(3)).await;
    assert_eq!(pool.pool_size(), 1);

    let sizes: Vec<_> = collect(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            PoolEvent::ScaledDown { size } => Some(size),
            _ => None,
        })
        .collect();
    assert_eq!(sizes, [2, 1]);

    pool.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_session_is_evicted_and_replaced() {
    let spawner = SimulatedSpawner::new(SimulatedBehavior {
        exit_after_searches: Some(0),
        ..SimulatedBehavior::default()
    });
    let config = PoolConfig {
        health_check_interval_ms: 200,
        ..fixed(2)
    };
    let pool = start(config, &spawner).await;
    let mut events = pool.subscribe();

    let error = pool.analyze(&position(1), &AnalysisOptions::default().with_depth(3), AnalysisPriority::Normal).await.unwrap_err();
    assert!(matches!(error, AnalysisError::WorkerFault(_)));

    sleep(Duration::from_millis(300)).await;
    assert_eq!(spawner.spawned(), 3);
    assert_eq!(pool.pool_size(), 2);
    assert_eq!(pool.metrics().healthy_sessions, 2);

    let events = collect(&mut events);
    assert!(events.iter().any(|event| matches!(
        event,
        PoolEvent::HealthChanged {
            to: HealthStatus::Failed,
            ..
        }
    )));
    assert!(events.iter().any(|event| matches!(
        event,
        PoolEvent::SessionRemoved {
            reason: RemovalReason::Unhealthy,
            ..
        }
    )));
    assert!(events.iter().any(|event| matches!(event, PoolEvent::SessionAdded { .. })));

    pool.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_all_returns_partial_evaluation() {
    let spawner = slow(100);
    let pool = start(fixed(1), &spawner).await;

    let running = tokio::spawn({
        let pool = pool.clone();
        async move {
            pool.analyze(&position(1), &AnalysisOptions::default().with_depth(20), AnalysisPriority::Normal)
                .await
        }
    });
    sleep(Duration::from_millis(350)).await;
    pool.stop_all();

    let evaluation = running.await.unwrap().unwrap();
    assert!(evaluation.depth >= 1 && evaluation.depth < 20);
    assert_eq!(pool.metrics().active_analyses, 0);

    pool.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_request_frees_its_session() {
    let spawner = slow(100);
    let pool = start(fixed(1), &spawner).await;

    let abandoned = tokio::spawn({
        let pool = pool.clone();
        async move {
            pool.analyze(&position(1), &AnalysisOptions::default().with_depth(20), AnalysisPriority::Normal)
                .await
        }
    });
    sleep(Duration::from_millis(150)).await;
    abandoned.abort();
    sleep(Duration::from_millis(200)).await;
    assert_eq!(pool.metrics().active_analyses, 0);

    let evaluation = pool.analyze(&position(2), &AnalysisOptions::default().with_depth(2), AnalysisPriority::Normal).await.unwrap();
    assert_eq!(evaluation.depth, 2);

    pool.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_request_leaves_shared_session_search_alone() {
    let spawner = slow(100);
    let config = PoolConfig {
        max_concurrent_per_session: 2,
        ..fixed(1)
    };
    let pool = start(config, &spawner).await;
    let options = AnalysisOptions::default().with_depth(20);

    let running = tokio::spawn({
        let pool = pool.clone();
        async move { pool.analyze(&position(1), &options, AnalysisPriority::Normal).await }
    });
    sleep(Duration::from_millis(50)).await;

    // Shares the busy session and waits behind the running search.
    let abandoned = tokio::spawn({
        let pool = pool.clone();
        async move { pool.analyze(&position(2), &options, AnalysisPriority::Normal).await }
    });
    sleep(Duration::from_millis(300)).await;
    assert_eq!(pool.metrics().active_analyses, 2);
    abandoned.abort();

    let evaluation = running.await.unwrap().unwrap();
    assert_eq!(evaluation.depth, 20);

    sleep(Duration::from_millis(100)).await;
    assert_eq!(pool.metrics().active_analyses, 0);
    assert_eq!(spawner.searches_started(), 1);

    pool.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_queued_probe_rearms_breaker() {
    let spawner = slow(100);
    let config = PoolConfig {
        failure_threshold: 1,
        breaker_cooldown_ms: 500,
        ..fixed(2)
    };
    let pool = start(config, &spawner).await;
    let options = AnalysisOptions::default().with_depth(5);

    let running = tokio::spawn({
        let pool = pool.clone();
        async move { pool.analyze(&position(1), &AnalysisOptions::default().with_depth(20), AnalysisPriority::Normal).await }
    });
    sleep(Duration::from_millis(10)).await;

    // The second session's worker dies, leaving it undispatchable.
    spawner.update_behavior(|behavior| behavior.exit_after_searches = Some(0));
    let error = pool.analyze(&position(2), &options, AnalysisPriority::Normal).await.unwrap_err();
    assert!(matches!(error, AnalysisError::WorkerFault(_)));
    assert_eq!(pool.circuit_state(), CircuitState::Open);
    spawner.update_behavior(|behavior| behavior.exit_after_searches = None);

    sleep(Duration::from_millis(600)).await;
    let probe = tokio::spawn({
        let pool = pool.clone();
        async move { pool.analyze(&position(3), &options, AnalysisPriority::Normal).await }
    });
    sleep(Duration::from_millis(50)).await;
    assert_eq!(pool.circuit_state(), CircuitState::HalfOpen);
    assert_eq!(pool.metrics().queue_length, 1);
    probe.abort();

    sleep(Duration::from_millis(150)).await;
    assert_eq!(pool.metrics().queue_length, 0);

    let evaluation = pool.analyze(&position(4), &options, AnalysisPriority::Normal).await.unwrap();
    assert_eq!(evaluation.depth, 5);
    assert_eq!(pool.circuit_state(), CircuitState::Closed);
    assert_eq!(running.await.unwrap().unwrap().depth, 20);

    pool.dispose().await;
}
