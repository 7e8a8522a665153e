use crate::engine::types::{CostModel, EngineError, Evaluation, EvaluationEngine, ParamSet};
use crate::optimizer::constraint::Constraint;
use crate::optimizer::grid::GridSpec;
use crate::optimizer::EvalSink;
use crate::storage::models::candle::Candle;
use crate::storage::models::run_log::RunLogLevel;
use anyhow::Result;
use futures::stream::{Stream, StreamExt};
use std::ops::Range;
use std::sync::Arc;

/// 一個已評估的網格點
#[derive(Debug, Clone)]
pub struct VariantOutcome {
    pub params: ParamSet,
    pub evaluation: Evaluation,
}

/// 參數組的可讀標籤，例如 `fast=5, slow=20`
pub fn param_label(params: &ParamSet) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// 以受限並行度評估一批候選參數組
///
/// 引擎為 CPU 密集的同步呼叫，逐一丟進 `spawn_blocking`；`buffered`
/// 保持與候選列舉一致的輸出順序，下游的平手裁決因此可重現。
pub(crate) fn evaluation_stream(
    engine: Arc<dyn EvaluationEngine>,
    series: Arc<Vec<Candle>>,
    range: Range<usize>,
    strategy: String,
    candidates: Vec<ParamSet>,
    costs: CostModel,
    max_concurrency: usize,
) -> impl Stream<Item = (ParamSet, Result<Evaluation, EngineError>)> {
    futures::stream::iter(candidates.into_iter())
        .map(move |params| {
            let engine = engine.clone();
            let series = series.clone();
            let range = range.clone();
            let strategy = strategy.clone();
            let costs = costs.clone();
            async move {
                let params_on_panic = params.clone();
                let joined = tokio::task::spawn_blocking(move || {
                    let result = engine.evaluate(&series[range], &strategy, &params, &costs);
                    (params, result)
                })
                .await;
                match joined {
                    Ok(outcome) => outcome,
                    Err(join_err) => (
                        params_on_panic,
                        Err(EngineError::Evaluation(format!(
                            "評估工作異常終止: {join_err}"
                        ))),
                    ),
                }
            }
        })
        .buffered(max_concurrency.max(1))
}

/// 平面網格搜索結果摘要
#[derive(Debug, Clone, Default)]
pub struct GridSearchSummary {
    /// 成功評估並記錄的變體數
    pub evaluated: usize,
    /// 被約束濾掉的候選數
    pub filtered: usize,
    /// 引擎評估失敗的候選數
    pub failed: usize,
    /// 最佳變體（按最終價值）
    pub best: Option<(ParamSet, f64)>,
}

/// 平面網格搜索：對整個請求區間逐一評估候選參數組
pub struct GridSearch {
    engine: Arc<dyn EvaluationEngine>,
    max_concurrency: usize,
}

impl GridSearch {
    pub fn new(engine: Arc<dyn EvaluationEngine>, max_concurrency: usize) -> Self {
        Self {
            engine,
            max_concurrency,
        }
    }

    /// 執行網格搜索
    ///
    /// 每個評估完成的變體立即經 `sink.variant` 交付（任務進行期間
    /// 僅追加），進度按已完成比例回報。候選全部被濾掉或全部失敗
    /// 是合法的空結果，不是錯誤。
    pub async fn run(
        &self,
        series: Arc<Vec<Candle>>,
        strategy: &str,
        grid: &GridSpec,
        constraint: &Constraint,
        costs: &CostModel,
        sink: &dyn EvalSink,
    ) -> Result<GridSearchSummary> {
        let all = grid.candidates();
        let total = all.len();
        let kept: Vec<ParamSet> = all
            .into_iter()
            .filter(|params| constraint.satisfied(params))
            .collect();
        let mut summary = GridSearchSummary {
            filtered: total - kept.len(),
            ..Default::default()
        };

        sink.log(
            RunLogLevel::Info,
            format!(
                "Grid expanded to {} candidates ({} filtered by constraint)",
                total, summary.filtered
            ),
        )
        .await;

        if kept.is_empty() {
            return Ok(summary);
        }

        let to_run = kept.len();
        let mut done = 0usize;
        let full_range = 0..series.len();
        let mut stream = Box::pin(evaluation_stream(
            self.engine.clone(),
            series,
            full_range,
            strategy.to_string(),
            kept,
            costs.clone(),
            self.max_concurrency,
        ));

        while let Some((params, result)) = stream.next().await {
            done += 1;
            match result {
                Ok(evaluation) => {
                    // 引擎的逐行輸出全部進日誌接收端（接收端負責去重）
                    for line in &evaluation.log_lines {
                        sink.log(RunLogLevel::Debug, line.clone()).await;
                    }
                    let outcome = VariantOutcome { params, evaluation };
                    sink.variant(&outcome).await?;
                    let value = outcome.evaluation.final_value;
                    let better = summary
                        .best
                        .as_ref()
                        .map(|(_, best)| value > *best)
                        .unwrap_or(true);
                    if better {
                        summary.best = Some((outcome.params, value));
                    }
                    summary.evaluated += 1;
                }
                Err(err) => {
                    summary.failed += 1;
                    sink.log(
                        RunLogLevel::Warn,
                        format!("Variant ({}) failed: {}", param_label(&params), err),
                    )
                    .await;
                }
            }
            sink.progress(done as f64 / to_run as f64).await;
        }

        Ok(summary)
    }
}
