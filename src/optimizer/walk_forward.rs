use crate::engine::types::{CostModel, Evaluation, EvaluationEngine, ParamSet};
use crate::optimizer::constraint::Constraint;
use crate::optimizer::grid::GridSpec;
use crate::optimizer::objective::Objective;
use crate::optimizer::search::{evaluation_stream, param_label};
use crate::optimizer::EvalSink;
use crate::storage::models::candle::Candle;
use crate::storage::models::run_log::RunLogLevel;
use anyhow::Result;
use chrono::{DateTime, Months, Utc};
use futures::stream::StreamExt;
use std::ops::Range;
use std::sync::Arc;

/// 一個訓練/測試視窗
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WfoWindow {
    pub train_start: DateTime<Utc>,
    pub train_end: DateTime<Utc>,
    pub test_start: DateTime<Utc>,
    pub test_end: DateTime<Utc>,
}

/// 自序列最早時間起推導連續的訓練/測試視窗
///
/// `train_end = train_start + train`，`test_start = train_end`，
/// `test_end = min(test_start + test, series_end)`；一旦 `train_start`
/// 或 `train_end` 觸及序列終點即停止。視窗長度以日曆月計算。
pub fn derive_windows(
    series_start: DateTime<Utc>,
    series_end: DateTime<Utc>,
    train_months: u32,
    test_months: u32,
    step_months: u32,
) -> Vec<WfoWindow> {
    let mut windows = Vec::new();
    if train_months == 0 || test_months == 0 || step_months == 0 {
        return windows;
    }

    let mut train_start = series_start;
    loop {
        let train_end = match train_start.checked_add_months(Months::new(train_months)) {
            Some(end) => end,
            None => break,
        };
        if train_start >= series_end || train_end >= series_end {
            break;
        }

        let test_start = train_end;
        let test_end = match test_start.checked_add_months(Months::new(test_months)) {
            Some(end) => end.min(series_end),
            None => series_end,
        };

        windows.push(WfoWindow {
            train_start,
            train_end,
            test_start,
            test_end,
        });

        train_start = match train_start.checked_add_months(Months::new(step_months)) {
            Some(next) => next,
            None => break,
        };
    }

    windows
}

/// 走向前優化請求
#[derive(Debug, Clone)]
pub struct WalkForwardRequest {
    pub strategy: String,
    pub grid: GridSpec,
    pub constraint: Constraint,
    pub objective: Objective,
    pub train_months: u32,
    pub test_months: u32,
    pub step_months: u32,
    pub costs: CostModel,
    pub top_n: usize,
}

/// 一個完成的摺疊成果
#[derive(Debug, Clone)]
pub struct FoldOutcome {
    pub fold_index: i32,
    pub window: WfoWindow,
    pub params: ParamSet,
    pub train_objective: f64,
    pub test_evaluation: Evaluation,
}

/// 摺疊的樣本外排名項
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TopFold {
    pub fold_index: i32,
    pub oos_objective: f64,
}

/// 走向前優化總結
#[derive(Debug, Clone, Default)]
pub struct WfoReport {
    pub fold_count: usize,
    /// 各摺疊樣本外目標值的平均；零摺疊時為 None
    pub mean_oos_objective: Option<f64>,
    /// 按樣本外結果排名的前 N 個摺疊
    pub top_folds: Vec<TopFold>,
}

/// 走向前優化器
///
/// 對每個視窗：以網格候選在訓練切片上選出目標值最大者（平手取
/// 先列舉者，列舉順序見 `GridSpec::candidates`），再於測試切片做
/// 一次樣本外評估並記錄摺疊。零摺疊是合法的可回報結果。
pub struct WalkForwardOptimizer {
    engine: Arc<dyn EvaluationEngine>,
    max_concurrency: usize,
}

impl WalkForwardOptimizer {
    pub fn new(engine: Arc<dyn EvaluationEngine>, max_concurrency: usize) -> Self {
        Self {
            engine,
            max_concurrency,
        }
    }

    pub async fn run(
        &self,
        series: Arc<Vec<Candle>>,
        req: &WalkForwardRequest,
        sink: &dyn EvalSink,
    ) -> Result<WfoReport> {
        if series.is_empty() {
            sink.log(
                RunLogLevel::Warn,
                "Series is empty, no folds to evaluate".to_string(),
            )
            .await;
            return Ok(WfoReport::default());
        }

        let series_start = series[0].ts;
        let series_end = series[series.len() - 1].ts;
        let windows = derive_windows(
            series_start,
            series_end,
            req.train_months,
            req.test_months,
            req.step_months,
        );

        let all = req.grid.candidates();
        let total_candidates = all.len();
        let candidates: Vec<ParamSet> = all
            .into_iter()
            .filter(|params| req.constraint.satisfied(params))
            .collect();

        sink.log(
            RunLogLevel::Info,
            format!(
                "Walk-forward: {} windows, {} candidates ({} filtered), objective={}",
                windows.len(),
                candidates.len(),
                total_candidates - candidates.len(),
                req.objective.as_str()
            ),
        )
        .await;

        let mut outcomes: Vec<FoldOutcome> = Vec::new();

        for (window_idx, window) in windows.iter().enumerate() {
            let train_range = slice_range(&series, window.train_start, window.train_end, false);
            // 最後一根K線恰在 test_end 時納入測試切片，其餘視窗半開
            let include_end = window.test_end >= series_end;
            let test_range = slice_range(&series, window.test_start, window.test_end, include_end);

            if train_range.is_empty() || test_range.is_empty() || candidates.is_empty() {
                sink.log(
                    RunLogLevel::Warn,
                    format!(
                        "Window {} skipped (train bars: {}, test bars: {}, candidates: {})",
                        window_idx,
                        train_range.len(),
                        test_range.len(),
                        candidates.len()
                    ),
                )
                .await;
                sink.progress((window_idx + 1) as f64 / windows.len() as f64)
                    .await;
                continue;
            }

            // 訓練階段：候選組全部評估，失敗者不參與選擇
            let train_results: Vec<_> = evaluation_stream(
                self.engine.clone(),
                series.clone(),
                train_range.clone(),
                req.strategy.clone(),
                candidates.clone(),
                req.costs.clone(),
                self.max_concurrency,
            )
            .collect()
            .await;

            let mut failed = 0usize;
            let mut best: Option<(&ParamSet, f64)> = None;
            for (params, result) in &train_results {
                match result {
                    Ok(evaluation) => {
                        for line in &evaluation.log_lines {
                            sink.log(RunLogLevel::Debug, line.clone()).await;
                        }
                        let value = req.objective.value(evaluation);
                        // 嚴格大於：平手保留先列舉的候選
                        if best.map(|(_, b)| value > b).unwrap_or(true) {
                            best = Some((params, value));
                        }
                    }
                    Err(_) => failed += 1,
                }
            }
            if failed > 0 {
                sink.log(
                    RunLogLevel::Warn,
                    format!("Window {window_idx}: {failed} candidate evaluations failed"),
                )
                .await;
            }

            let Some((best_params, train_objective)) = best else {
                sink.log(
                    RunLogLevel::Warn,
                    format!("Window {window_idx} skipped (no evaluable candidate)"),
                )
                .await;
                sink.progress((window_idx + 1) as f64 / windows.len() as f64)
                    .await;
                continue;
            };

            // 樣本外：最佳候選在測試切片上再評估一次
            let test_evaluation = {
                let engine = self.engine.clone();
                let series = series.clone();
                let strategy = req.strategy.clone();
                let params = best_params.clone();
                let costs = req.costs.clone();
                let range = test_range.clone();
                tokio::task::spawn_blocking(move || {
                    engine.evaluate(&series[range], &strategy, &params, &costs)
                })
                .await?
            };

            let test_evaluation = match test_evaluation {
                Ok(eval) => {
                    for line in &eval.log_lines {
                        sink.log(RunLogLevel::Debug, line.clone()).await;
                    }
                    eval
                }
                Err(err) => {
                    sink.log(
                        RunLogLevel::Warn,
                        format!("Window {window_idx} skipped (out-of-sample evaluation failed: {err})"),
                    )
                    .await;
                    sink.progress((window_idx + 1) as f64 / windows.len() as f64)
                        .await;
                    continue;
                }
            };

            let fold_index = outcomes.len() as i32;
            let outcome = FoldOutcome {
                fold_index,
                window: *window,
                params: best_params.clone(),
                train_objective,
                test_evaluation,
            };

            sink.fold(&outcome).await?;
            sink.log(
                RunLogLevel::Info,
                format!(
                    "Fold {}: train {}..{} test {}..{} best ({}) train_obj={:.4} oos={:.4}",
                    fold_index,
                    window.train_start.date_naive(),
                    window.train_end.date_naive(),
                    window.test_start.date_naive(),
                    window.test_end.date_naive(),
                    param_label(&outcome.params),
                    train_objective,
                    req.objective.value(&outcome.test_evaluation),
                ),
            )
            .await;

            outcomes.push(outcome);
            sink.progress((window_idx + 1) as f64 / windows.len() as f64)
                .await;
        }

        Ok(self.build_report(req.objective, &outcomes, req.top_n))
    }

    fn build_report(
        &self,
        objective: Objective,
        outcomes: &[FoldOutcome],
        top_n: usize,
    ) -> WfoReport {
        let oos: Vec<TopFold> = outcomes
            .iter()
            .map(|o| TopFold {
                fold_index: o.fold_index,
                oos_objective: objective.value(&o.test_evaluation),
            })
            .collect();

        let mean = if oos.is_empty() {
            None
        } else {
            Some(oos.iter().map(|t| t.oos_objective).sum::<f64>() / oos.len() as f64)
        };

        let mut top = oos.clone();
        // 穩定排序：同值摺疊維持 fold_index 順序
        top.sort_by(|a, b| {
            b.oos_objective
                .partial_cmp(&a.oos_objective)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        top.truncate(top_n);

        WfoReport {
            fold_count: outcomes.len(),
            mean_oos_objective: mean,
            top_folds: top,
        }
    }
}

/// 以二分搜尋取出 [start, end) 的索引區間；`include_end` 時含端點
fn slice_range(
    series: &[Candle],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    include_end: bool,
) -> Range<usize> {
    let lo = series.partition_point(|c| c.ts < start);
    let hi = if include_end {
        series.partition_point(|c| c.ts <= end)
    } else {
        series.partition_point(|c| c.ts < end)
    };
    lo..hi.max(lo)
}
