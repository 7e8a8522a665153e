#![allow(dead_code)]
//! 測試共用支援：記憶體版儲存實現與固定行為的評估引擎。
//!
//! 記憶體版 RunStore 以 compare-and-swap 實現認領，與 skip-locked
//! 讀取提供相同的「每列至多一個認領者」保證，讓認領互斥與 Worker
//! 迴圈的併發性質不依賴外部 PostgreSQL 即可驗證。

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use backtest_orchestrator::engine::{
    CostModel, EngineError, Evaluation, EvaluationEngine, ParamSet, PerformanceMetrics,
};
use backtest_orchestrator::optimizer::{EvalSink, FoldOutcome, VariantOutcome};
use backtest_orchestrator::storage::models::candle::Candle;
use backtest_orchestrator::storage::models::optimization_variant::{
    OptimizationVariant, OptimizationVariantInsert,
};
use backtest_orchestrator::storage::models::run::{NewRun, Run, RunStatus, RunType};
use backtest_orchestrator::storage::models::run_log::{RunLog, RunLogInsert, RunLogLevel};
use backtest_orchestrator::storage::models::run_result::{RunResult, RunResultInsert};
use backtest_orchestrator::storage::models::wfo_fold::{WfoFold, WfoFoldInsert};
use backtest_orchestrator::storage::repository::{
    BacklogCounts, CandleRepository, OptimizationVariantRepository, Page, PageQuery,
    RunLogRepository, RunResultRepository, RunStore, TimeRange, WfoFoldRepository,
};
use backtest_orchestrator::worker::WorkerServices;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// 記憶體版任務儲存庫（CAS 認領）
pub struct InMemoryRunStore {
    runs: Mutex<Vec<Run>>,
    next_id: AtomicI64,
    /// 每個任務被認領的次數（認領互斥驗證用）
    pub claim_counts: Mutex<HashMap<i64, u32>>,
    /// 每個任務的 (status, progress) 寫入歷史
    pub progress_history: Mutex<HashMap<i64, Vec<(String, i32)>>>,
    /// 模擬認領交易內的延遲，拉大競態視窗
    pub claim_delay: Option<Duration>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self {
            runs: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
            claim_counts: Mutex::new(HashMap::new()),
            progress_history: Mutex::new(HashMap::new()),
            claim_delay: None,
        }
    }

    pub fn with_claim_delay(delay: Duration) -> Self {
        Self {
            claim_delay: Some(delay),
            ..Self::new()
        }
    }
}

impl Default for InMemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn enqueue(&self, new_run: NewRun) -> Result<Run> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let run = Run {
            run_id: id,
            run_type: new_run.run_type.as_str().to_string(),
            status: RunStatus::Queued.as_str().to_string(),
            progress: 0,
            strategy: new_run.strategy,
            instrument_id: new_run.instrument_id,
            timeframe: new_run.timeframe,
            params: new_run.params,
            cash: new_run.cash,
            commission: new_run.commission,
            slip_perc: new_run.slip_perc,
            slip_fixed: new_run.slip_fixed,
            slip_open: new_run.slip_open,
            notes: new_run.notes,
            error: None,
            // 提交順序以毫秒錯開，FIFO 排序可重現
            started_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + ChronoDuration::milliseconds(id),
            ended_at: None,
            created_at: Utc::now(),
        };
        self.runs.lock().await.push(run.clone());
        Ok(run)
    }

    async fn get_run(&self, run_id: i64) -> Result<Option<Run>> {
        Ok(self
            .runs
            .lock()
            .await
            .iter()
            .find(|r| r.run_id == run_id)
            .cloned())
    }

    async fn fetch_next_queued(&self, run_types: &[RunType]) -> Result<Option<Run>> {
        let names: Vec<&str> = run_types.iter().map(|t| t.as_str()).collect();
        let mut runs = self.runs.lock().await;

        // 延遲發生在「交易」內：鎖仍被持有，模擬認領競態
        if let Some(delay) = self.claim_delay {
            tokio::time::sleep(delay).await;
        }

        let candidate = runs
            .iter_mut()
            .filter(|r| r.status == "queued" && names.contains(&r.run_type.as_str()))
            .min_by_key(|r| r.started_at);

        match candidate {
            Some(run) => {
                run.status = RunStatus::Running.as_str().to_string();
                run.progress = 1;
                let claimed = run.clone();
                drop(runs);
                *self
                    .claim_counts
                    .lock()
                    .await
                    .entry(claimed.run_id)
                    .or_insert(0) += 1;
                Ok(Some(claimed))
            }
            None => Ok(None),
        }
    }

    async fn update_status(
        &self,
        run_id: i64,
        status: RunStatus,
        progress: Option<i32>,
        error: Option<String>,
    ) -> Result<Run> {
        let mut runs = self.runs.lock().await;
        let run = runs
            .iter_mut()
            .find(|r| r.run_id == run_id)
            .ok_or_else(|| anyhow!("run {} not found", run_id))?;

        run.status = status.as_str().to_string();
        if let Some(p) = progress {
            run.progress = p;
        }
        if let Some(e) = error {
            run.error = Some(e);
        }
        if status.is_terminal() {
            run.ended_at = Some(Utc::now());
        }
        let updated = run.clone();
        drop(runs);

        self.progress_history
            .lock()
            .await
            .entry(run_id)
            .or_default()
            .push((updated.status.clone(), updated.progress));
        Ok(updated)
    }

    async fn count_by_status(&self, run_types: &[RunType]) -> Result<BacklogCounts> {
        let names: Vec<&str> = run_types.iter().map(|t| t.as_str()).collect();
        let runs = self.runs.lock().await;
        let mut counts = BacklogCounts::default();
        for run in runs.iter().filter(|r| names.contains(&r.run_type.as_str())) {
            match run.status.as_str() {
                "queued" => counts.queued += 1,
                "running" => counts.running += 1,
                _ => {}
            }
        }
        Ok(counts)
    }

    async fn list_recent(&self, page: PageQuery) -> Result<Page<Run>> {
        let runs = self.runs.lock().await;
        let mut data: Vec<Run> = runs.clone();
        data.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        let total = data.len() as i64;
        let start = page.offset().min(total) as usize;
        let end = (start + page.page_size as usize).min(data.len());
        Ok(Page::new(data[start..end].to_vec(), total, page.page, page.page_size))
    }
}

/// 記錄式日誌儲存庫
#[derive(Default)]
pub struct RecordingLogRepo {
    pub entries: Mutex<Vec<RunLogInsert>>,
}

#[async_trait]
impl RunLogRepository for RecordingLogRepo {
    async fn append(&self, log: RunLogInsert) -> Result<()> {
        self.entries.lock().await.push(log);
        Ok(())
    }

    async fn list_by_run(&self, run_id: i64, page: PageQuery) -> Result<Page<RunLog>> {
        let entries = self.entries.lock().await;
        let logs: Vec<RunLog> = entries
            .iter()
            .filter(|e| e.run_id == run_id)
            .enumerate()
            .map(|(i, e)| RunLog {
                id: i as i64,
                run_id: e.run_id,
                ts: e.ts.unwrap_or_else(Utc::now),
                level: e.level.clone(),
                message: e.message.clone(),
            })
            .collect();
        let total = logs.len() as i64;
        Ok(Page::new(logs, total, page.page, page.page_size))
    }
}

/// 記錄式結果儲存庫
#[derive(Default)]
pub struct RecordingResultRepo {
    pub results: Mutex<Vec<RunResultInsert>>,
}

#[async_trait]
impl RunResultRepository for RecordingResultRepo {
    async fn add_result(&self, insert: RunResultInsert) -> Result<RunResult> {
        let mut results = self.results.lock().await;
        results.push(insert.clone());
        Ok(RunResult {
            id: results.len() as i64,
            run_id: insert.run_id,
            label: insert.label,
            params: insert.params,
            metrics: insert.metrics,
            artifact_path: insert.artifact_path,
            created_at: Utc::now(),
        })
    }

    async fn list_by_run(&self, run_id: i64) -> Result<Vec<RunResult>> {
        let results = self.results.lock().await;
        Ok(results
            .iter()
            .filter(|r| r.run_id == run_id)
            .enumerate()
            .map(|(i, r)| RunResult {
                id: i as i64,
                run_id: r.run_id,
                label: r.label.clone(),
                params: r.params.clone(),
                metrics: r.metrics.clone(),
                artifact_path: r.artifact_path.clone(),
                created_at: Utc::now(),
            })
            .collect())
    }
}

/// 記錄式優化變體儲存庫
#[derive(Default)]
pub struct RecordingVariantRepo {
    pub variants: Mutex<Vec<OptimizationVariantInsert>>,
}

#[async_trait]
impl OptimizationVariantRepository for RecordingVariantRepo {
    async fn add_variant(&self, insert: OptimizationVariantInsert) -> Result<OptimizationVariant> {
        let mut variants = self.variants.lock().await;
        variants.push(insert.clone());
        Ok(OptimizationVariant {
            id: variants.len() as i64,
            run_id: insert.run_id,
            variant_params: insert.variant_params,
            final_value: insert.final_value,
            sharpe: insert.sharpe,
            maxdd: insert.maxdd,
            winrate: insert.winrate,
            profit_factor: insert.profit_factor,
            sqn: insert.sqn,
            total_trades: insert.total_trades,
            created_at: Utc::now(),
        })
    }

    async fn list_by_run(
        &self,
        run_id: i64,
        _limit: Option<i64>,
    ) -> Result<Vec<OptimizationVariant>> {
        let variants = self.variants.lock().await;
        Ok(variants
            .iter()
            .filter(|v| v.run_id == run_id)
            .enumerate()
            .map(|(i, v)| OptimizationVariant {
                id: i as i64,
                run_id: v.run_id,
                variant_params: v.variant_params.clone(),
                final_value: v.final_value,
                sharpe: v.sharpe,
                maxdd: v.maxdd,
                winrate: v.winrate,
                profit_factor: v.profit_factor,
                sqn: v.sqn,
                total_trades: v.total_trades,
                created_at: Utc::now(),
            })
            .collect())
    }

    async fn best_by_run(&self, run_id: i64) -> Result<Option<OptimizationVariant>> {
        let mut all = self.list_by_run(run_id, None).await?;
        all.sort_by(|a, b| b.final_value.cmp(&a.final_value));
        Ok(all.into_iter().next())
    }

    async fn count_by_run(&self, run_id: i64) -> Result<i64> {
        Ok(self
            .variants
            .lock()
            .await
            .iter()
            .filter(|v| v.run_id == run_id)
            .count() as i64)
    }
}

/// 記錄式走向前摺疊儲存庫
#[derive(Default)]
pub struct RecordingFoldRepo {
    pub folds: Mutex<Vec<WfoFoldInsert>>,
}

#[async_trait]
impl WfoFoldRepository for RecordingFoldRepo {
    async fn add_fold(&self, insert: WfoFoldInsert) -> Result<WfoFold> {
        let mut folds = self.folds.lock().await;
        folds.push(insert.clone());
        Ok(WfoFold {
            id: folds.len() as i64,
            run_id: insert.run_id,
            fold_index: insert.fold_index,
            train_start: insert.train_start,
            train_end: insert.train_end,
            test_start: insert.test_start,
            test_end: insert.test_end,
            params: insert.params,
            train_objective: insert.train_objective,
            metrics: insert.metrics,
            created_at: Utc::now(),
        })
    }

    async fn list_by_run(&self, run_id: i64) -> Result<Vec<WfoFold>> {
        let folds = self.folds.lock().await;
        let mut out: Vec<WfoFold> = folds
            .iter()
            .filter(|f| f.run_id == run_id)
            .enumerate()
            .map(|(i, f)| WfoFold {
                id: i as i64,
                run_id: f.run_id,
                fold_index: f.fold_index,
                train_start: f.train_start,
                train_end: f.train_end,
                test_start: f.test_start,
                test_end: f.test_end,
                params: f.params.clone(),
                train_objective: f.train_objective,
                metrics: f.metrics.clone(),
                created_at: Utc::now(),
            })
            .collect();
        out.sort_by_key(|f| f.fold_index);
        Ok(out)
    }

    async fn count_by_run(&self, run_id: i64) -> Result<i64> {
        Ok(self
            .folds
            .lock()
            .await
            .iter()
            .filter(|f| f.run_id == run_id)
            .count() as i64)
    }
}

/// 固定序列的K線儲存庫
pub struct StaticCandleRepository {
    pub series: Vec<Candle>,
}

#[async_trait]
impl CandleRepository for StaticCandleRepository {
    async fn fetch_series(&self, instrument_id: &str, range: TimeRange) -> Result<Vec<Candle>> {
        Ok(self
            .series
            .iter()
            .filter(|c| {
                c.instrument_id == instrument_id && c.ts >= range.start && c.ts <= range.end
            })
            .cloned()
            .collect())
    }
}

/// 固定行為的評估引擎
///
/// 最終價值 = 10000 + Σ(數值參數)；`fail_strategy` 命中時回傳評估錯誤。
/// `constant_value` 設定時所有參數組同值（平手裁決測試用）。
pub struct StubEngine {
    pub fail_strategy: Option<String>,
    pub constant_value: Option<f64>,
}

impl StubEngine {
    pub fn new() -> Self {
        Self {
            fail_strategy: None,
            constant_value: None,
        }
    }

    pub fn failing_on(strategy: &str) -> Self {
        Self {
            fail_strategy: Some(strategy.to_string()),
            constant_value: None,
        }
    }

    pub fn constant(value: f64) -> Self {
        Self {
            fail_strategy: None,
            constant_value: Some(value),
        }
    }
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluationEngine for StubEngine {
    fn evaluate(
        &self,
        series: &[Candle],
        strategy: &str,
        params: &ParamSet,
        costs: &CostModel,
    ) -> Result<Evaluation, EngineError> {
        if series.is_empty() {
            return Err(EngineError::EmptySeries);
        }
        if self.fail_strategy.as_deref() == Some(strategy) {
            return Err(EngineError::Evaluation(format!(
                "stub failure for strategy {strategy}"
            )));
        }

        let final_value = self.constant_value.unwrap_or_else(|| {
            costs.cash
                + params
                    .values()
                    .filter_map(|v| v.as_f64())
                    .sum::<f64>()
        });

        Ok(Evaluation {
            final_value,
            metrics: PerformanceMetrics {
                final_value,
                pnl: final_value - costs.cash,
                sharpe: Some(1.0),
                profit_factor: Some(1.5),
                total_trades: 1,
                won_trades: 1,
                ..Default::default()
            },
            log_lines: vec![format!("evaluated {} bars", series.len())],
            equity_curve: None,
        })
    }
}

/// 記錄式 EvalSink（直接驅動優化器的測試用）
#[derive(Default)]
pub struct RecordingSink {
    pub logs: Mutex<Vec<(RunLogLevel, String)>>,
    pub progress: Mutex<Vec<f64>>,
    pub variants: Mutex<Vec<VariantOutcome>>,
    pub folds: Mutex<Vec<FoldOutcome>>,
}

#[async_trait]
impl EvalSink for RecordingSink {
    async fn log(&self, level: RunLogLevel, message: String) {
        self.logs.lock().await.push((level, message));
    }

    async fn progress(&self, fraction: f64) {
        self.progress.lock().await.push(fraction);
    }

    async fn variant(&self, outcome: &VariantOutcome) -> Result<()> {
        self.variants.lock().await.push(outcome.clone());
        Ok(())
    }

    async fn fold(&self, outcome: &FoldOutcome) -> Result<()> {
        self.folds.lock().await.push(outcome.clone());
        Ok(())
    }
}

/// 產生日線K線序列（兩端皆含）
pub fn daily_candles(
    instrument_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<Candle> {
    let mut out = Vec::new();
    let mut ts = start;
    let mut price = 100i64;
    while ts <= end {
        out.push(Candle {
            instrument_id: instrument_id.to_string(),
            ts,
            open: Decimal::from(price),
            high: Decimal::from(price + 1),
            low: Decimal::from(price - 1),
            close: Decimal::from(price),
            volume: Decimal::from(1000),
        });
        // 溫和的確定性鋸齒走勢
        price = 100 + ((out.len() as i64 * 7) % 40) - 20;
        ts += ChronoDuration::days(1);
    }
    out
}

/// 組出以記憶體實現為後端的 WorkerServices
pub struct TestHarness {
    pub store: Arc<InMemoryRunStore>,
    pub logs: Arc<RecordingLogRepo>,
    pub results: Arc<RecordingResultRepo>,
    pub variants: Arc<RecordingVariantRepo>,
    pub folds: Arc<RecordingFoldRepo>,
    pub services: WorkerServices,
}

pub fn build_harness(
    store: InMemoryRunStore,
    engine: Arc<dyn EvaluationEngine>,
    series: Vec<Candle>,
) -> TestHarness {
    let store = Arc::new(store);
    let logs = Arc::new(RecordingLogRepo::default());
    let results = Arc::new(RecordingResultRepo::default());
    let variants = Arc::new(RecordingVariantRepo::default());
    let folds = Arc::new(RecordingFoldRepo::default());
    let services = WorkerServices {
        store: store.clone(),
        logs: logs.clone(),
        results: results.clone(),
        variants: variants.clone(),
        folds: folds.clone(),
        candles: Arc::new(StaticCandleRepository { series }),
        engine,
        max_concurrency: 2,
    };
    TestHarness {
        store,
        logs,
        results,
        variants,
        folds,
        services,
    }
}

/// 建立一個排隊中的任務
pub fn queued_run(run_type: RunType, strategy: &str, params: serde_json::Value) -> NewRun {
    NewRun {
        run_type,
        strategy: strategy.to_string(),
        instrument_id: "BTC-USDT".to_string(),
        timeframe: "1d".to_string(),
        params: Some(sqlx::types::Json(params)),
        cash: None,
        commission: None,
        slip_perc: None,
        slip_fixed: None,
        slip_open: None,
        notes: None,
    }
}

/// 輪詢等待到指定任務全部進入終態
pub async fn wait_until_terminal(
    store: &InMemoryRunStore,
    run_ids: &[i64],
    timeout: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let mut all_done = true;
        for id in run_ids {
            let run = store.get_run(*id).await.unwrap();
            let terminal = run
                .map(|r| r.status == "succeeded" || r.status == "failed")
                .unwrap_or(false);
            if !terminal {
                all_done = false;
                break;
            }
        }
        if all_done {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
