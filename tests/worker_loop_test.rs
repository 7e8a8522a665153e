//! Worker 迴圈與認領協議的併發性質測試（記憶體後端，無需資料庫）。

mod common;

use backtest_orchestrator::storage::models::run::RunType;
use backtest_orchestrator::storage::repository::RunStore;
use backtest_orchestrator::worker::WorkerLoop;
use common::*;
use chrono::{TimeZone, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn test_series() -> Vec<backtest_orchestrator::storage::models::candle::Candle> {
    daily_candles(
        "BTC-USDT",
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
    )
}

#[tokio::test]
async fn concurrent_pollers_claim_each_run_exactly_once() {
    // 認領交易內帶 10ms 延遲，拉大競態視窗
    let store = InMemoryRunStore::with_claim_delay(Duration::from_millis(10));
    for _ in 0..4 {
        store
            .enqueue(queued_run(
                RunType::Backtest,
                "sma",
                serde_json::json!({}),
            ))
            .await
            .unwrap();
    }
    let store = Arc::new(store);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.fetch_next_queued(RunType::backtest_family()).await
        }));
    }

    let mut claimed = Vec::new();
    let mut empty = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            Some(run) => claimed.push(run.run_id),
            None => empty += 1,
        }
    }

    // 4 個任務恰被認領 4 次，其餘輪詢者拿到 None
    assert_eq!(claimed.len(), 4);
    assert_eq!(empty, 4);
    let distinct: HashSet<i64> = claimed.iter().copied().collect();
    assert_eq!(distinct.len(), 4, "同一任務被認領多次: {claimed:?}");
}

#[tokio::test]
async fn fetch_next_on_empty_backlog_returns_none() {
    let store = InMemoryRunStore::new();
    let claimed = store
        .fetch_next_queued(RunType::backtest_family())
        .await
        .unwrap();
    assert!(claimed.is_none());
}

#[tokio::test]
async fn worker_loops_drain_backlog_without_double_processing() {
    let harness = build_harness(
        InMemoryRunStore::with_claim_delay(Duration::from_millis(2)),
        Arc::new(StubEngine::new()),
        test_series(),
    );

    let mut run_ids = Vec::new();
    for _ in 0..12 {
        let run = harness
            .store
            .enqueue(queued_run(
                RunType::Backtest,
                "sma",
                serde_json::json!({"baseline": false}),
            ))
            .await
            .unwrap();
        run_ids.push(run.run_id);
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut loops = Vec::new();
    for worker_id in 0..4 {
        let worker = WorkerLoop::new(
            worker_id,
            harness.services.clone(),
            Duration::from_millis(10),
            stop_rx.clone(),
        );
        loops.push(tokio::spawn(worker.run()));
    }

    assert!(
        wait_until_terminal(&harness.store, &run_ids, Duration::from_secs(10)).await,
        "任務未在時限內全部完成"
    );
    stop_tx.send(true).unwrap();
    for handle in loops {
        handle.await.unwrap();
    }

    // 每個任務恰被認領一次且成功
    let claims = harness.store.claim_counts.lock().await;
    for id in &run_ids {
        assert_eq!(claims.get(id), Some(&1), "run {id} 認領次數異常");
        let run = harness.store.get_run(*id).await.unwrap().unwrap();
        assert_eq!(run.status, "succeeded");
        assert_eq!(run.progress, 100);
        assert!(run.ended_at.is_some());
    }
}

#[tokio::test]
async fn progress_is_monotonic_and_ends_at_100() {
    let harness = build_harness(
        InMemoryRunStore::new(),
        Arc::new(StubEngine::new()),
        test_series(),
    );
    let run = harness
        .store
        .enqueue(queued_run(
            RunType::Backtest,
            "sma",
            serde_json::json!({"baseline": false}),
        ))
        .await
        .unwrap();

    let (stop_tx, stop_rx) = watch::channel(false);
    let worker = WorkerLoop::new(
        0,
        harness.services.clone(),
        Duration::from_millis(10),
        stop_rx,
    );
    let handle = tokio::spawn(worker.run());

    assert!(wait_until_terminal(&harness.store, &[run.run_id], Duration::from_secs(5)).await);
    stop_tx.send(true).unwrap();
    handle.await.unwrap();

    let history = harness.store.progress_history.lock().await;
    let entries = history.get(&run.run_id).expect("應有進度記錄");
    let progresses: Vec<i32> = entries.iter().map(|(_, p)| *p).collect();
    assert!(
        progresses.windows(2).all(|w| w[0] <= w[1]),
        "進度序列遞減: {progresses:?}"
    );
    assert_eq!(*progresses.last().unwrap(), 100);
}

#[tokio::test]
async fn handler_failure_marks_run_failed_and_loop_continues() {
    let harness = build_harness(
        InMemoryRunStore::new(),
        Arc::new(StubEngine::failing_on("boom")),
        test_series(),
    );

    // 失敗任務先入列，確保先被認領
    let failing = harness
        .store
        .enqueue(queued_run(
            RunType::Backtest,
            "boom",
            serde_json::json!({"baseline": false}),
        ))
        .await
        .unwrap();
    let healthy = harness
        .store
        .enqueue(queued_run(
            RunType::Backtest,
            "sma",
            serde_json::json!({"baseline": false}),
        ))
        .await
        .unwrap();

    let (stop_tx, stop_rx) = watch::channel(false);
    let worker = WorkerLoop::new(
        0,
        harness.services.clone(),
        Duration::from_millis(10),
        stop_rx,
    );
    let handle = tokio::spawn(worker.run());

    assert!(
        wait_until_terminal(
            &harness.store,
            &[failing.run_id, healthy.run_id],
            Duration::from_secs(5)
        )
        .await
    );
    stop_tx.send(true).unwrap();
    handle.await.unwrap();

    let failed = harness.store.get_run(failing.run_id).await.unwrap().unwrap();
    assert_eq!(failed.status, "failed");
    assert_eq!(failed.progress, 100);
    let error = failed.error.expect("失敗任務應有錯誤訊息");
    assert!(!error.is_empty());
    assert!(error.contains("stub failure"));

    // 同一迴圈接著成功處理下一個任務：失敗被隔離
    let ok = harness.store.get_run(healthy.run_id).await.unwrap().unwrap();
    assert_eq!(ok.status, "succeeded");
}

#[tokio::test]
async fn unknown_status_update_is_loud() {
    let store = InMemoryRunStore::new();
    let err = store
        .update_status(
            999,
            backtest_orchestrator::storage::models::run::RunStatus::Failed,
            Some(100),
            Some("x".into()),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn backtest_handler_records_main_and_baseline_results() {
    let harness = build_harness(
        InMemoryRunStore::new(),
        Arc::new(StubEngine::new()),
        test_series(),
    );
    let run = harness
        .store
        .enqueue(queued_run(
            RunType::Backtest,
            "sma",
            serde_json::json!({"fast": 5, "slow": 20}),
        ))
        .await
        .unwrap();

    let (stop_tx, stop_rx) = watch::channel(false);
    let worker = WorkerLoop::new(
        0,
        harness.services.clone(),
        Duration::from_millis(10),
        stop_rx,
    );
    let handle = tokio::spawn(worker.run());
    assert!(wait_until_terminal(&harness.store, &[run.run_id], Duration::from_secs(5)).await);
    stop_tx.send(true).unwrap();
    handle.await.unwrap();

    let results = harness.results.results.lock().await;
    let labels: Vec<&str> = results.iter().map(|r| r.label.as_str()).collect();
    assert!(labels.contains(&"main"));
    assert!(labels.contains(&"baseline"));

    // 任務日誌應包含引擎輸出
    let logs = harness.logs.entries.lock().await;
    assert!(logs.iter().any(|l| l.run_id == run.run_id));
}

#[tokio::test]
async fn optimization_run_persists_variants_and_succeeds() {
    let harness = build_harness(
        InMemoryRunStore::new(),
        Arc::new(StubEngine::new()),
        test_series(),
    );
    let run = harness
        .store
        .enqueue(queued_run(
            RunType::Optimize,
            "sma",
            serde_json::json!({
                "grid_spec": "fast=5:10:1,slow=20:20:1",
                "constraint": "fast<slow",
            }),
        ))
        .await
        .unwrap();

    let (stop_tx, stop_rx) = watch::channel(false);
    let worker = WorkerLoop::new(
        0,
        harness.services.clone(),
        Duration::from_millis(10),
        stop_rx,
    );
    let handle = tokio::spawn(worker.run());
    assert!(wait_until_terminal(&harness.store, &[run.run_id], Duration::from_secs(5)).await);
    stop_tx.send(true).unwrap();
    handle.await.unwrap();

    let done = harness.store.get_run(run.run_id).await.unwrap().unwrap();
    assert_eq!(done.status, "succeeded");
    assert_eq!(done.progress, 100);

    // 6 個滿足約束的網格點全部落地
    let variants = harness.variants.variants.lock().await;
    assert_eq!(variants.len(), 6);
}

#[tokio::test]
async fn optimization_with_no_surviving_candidates_succeeds_with_note() {
    let harness = build_harness(
        InMemoryRunStore::new(),
        Arc::new(StubEngine::new()),
        test_series(),
    );
    let run = harness
        .store
        .enqueue(queued_run(
            RunType::Optimize,
            "sma",
            serde_json::json!({
                "grid_spec": "fast=5:10:1",
                "constraint": "fast>100",
            }),
        ))
        .await
        .unwrap();

    let (stop_tx, stop_rx) = watch::channel(false);
    let worker = WorkerLoop::new(
        0,
        harness.services.clone(),
        Duration::from_millis(10),
        stop_rx,
    );
    let handle = tokio::spawn(worker.run());
    assert!(wait_until_terminal(&harness.store, &[run.run_id], Duration::from_secs(5)).await);
    stop_tx.send(true).unwrap();
    handle.await.unwrap();

    // 空搜索空間是合法結果：succeeded 加說明，不是 failed
    let done = harness.store.get_run(run.run_id).await.unwrap().unwrap();
    assert_eq!(done.status, "succeeded");
    assert_eq!(done.error.as_deref(), Some("No results collected"));
    assert!(harness.variants.variants.lock().await.is_empty());
}

#[tokio::test]
async fn walk_forward_run_persists_folds_and_summary() {
    let series = daily_candles(
        "BTC-USDT",
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2021, 7, 1, 0, 0, 0).unwrap(),
    );
    let harness = build_harness(InMemoryRunStore::new(), Arc::new(StubEngine::new()), series);
    let run = harness
        .store
        .enqueue(queued_run(
            RunType::WalkForward,
            "sma",
            serde_json::json!({
                "grid_spec": "fast=5:10:1,slow=20:20:1",
                "constraint": "fast<slow",
                "objective": "final",
                "train_months": 12,
                "test_months": 3,
                "step_months": 3,
            }),
        ))
        .await
        .unwrap();

    let (stop_tx, stop_rx) = watch::channel(false);
    let worker = WorkerLoop::new(
        0,
        harness.services.clone(),
        Duration::from_millis(10),
        stop_rx,
    );
    let handle = tokio::spawn(worker.run());
    assert!(wait_until_terminal(&harness.store, &[run.run_id], Duration::from_secs(10)).await);
    stop_tx.send(true).unwrap();
    handle.await.unwrap();

    let done = harness.store.get_run(run.run_id).await.unwrap().unwrap();
    assert_eq!(done.status, "succeeded");

    let folds = harness.folds.folds.lock().await;
    assert_eq!(folds.len(), 2);
    assert_eq!(folds[0].fold_index, 0);
    assert_eq!(folds[1].fold_index, 1);

    // 摺疊總結寫入 run_results
    let results = harness.results.results.lock().await;
    assert!(results.iter().any(|r| r.label == "main"));
}
