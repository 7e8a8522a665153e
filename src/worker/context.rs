use crate::optimizer::search::VariantOutcome;
use crate::optimizer::walk_forward::FoldOutcome;
use crate::optimizer::EvalSink;
use crate::storage::models::optimization_variant::OptimizationVariantInsert;
use crate::storage::models::run_log::RunLogLevel;
use crate::storage::models::wfo_fold::WfoFoldInsert;
use crate::worker::logger::RunLogger;
use crate::worker::poller::WorkerServices;
use crate::worker::progress::ProgressReporter;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sqlx::types::Json;

/// 任務處理上下文
///
/// 明確傳遞的 run-id 關聯值：貫穿 handler → 優化器 → 日誌/儲存層
/// 的整條呼叫鏈，不依賴任何執行緒區域或環境狀態。
pub struct RunContext {
    run_id: i64,
    logger: RunLogger,
    progress: ProgressReporter,
    services: WorkerServices,
}

impl RunContext {
    pub fn new(run_id: i64, worker_id: u32, services: WorkerServices) -> Self {
        let logger = RunLogger::new(run_id, worker_id, services.logs.clone());
        // 地板取 handler 開頭的里程碑值 5：認領寫 1、handler 直寫 5，
        // 回報器只再接受嚴格更大的值，整條序列保持不遞減
        let progress = ProgressReporter::new(run_id, services.store.clone(), 5);
        Self {
            run_id,
            logger,
            progress,
            services,
        }
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    pub fn logger(&self) -> &RunLogger {
        &self.logger
    }

    pub fn progress_reporter(&self) -> &ProgressReporter {
        &self.progress
    }
}

fn to_decimal(value: f64) -> Option<Decimal> {
    if value.is_finite() {
        Decimal::from_f64(value)
    } else {
        None
    }
}

fn opt_decimal(value: Option<f64>) -> Option<Decimal> {
    value.and_then(to_decimal)
}

#[async_trait]
impl EvalSink for RunContext {
    async fn log(&self, level: RunLogLevel, message: String) {
        self.logger.log(level, &message).await;
    }

    async fn progress(&self, fraction: f64) {
        self.progress.report_fraction(fraction).await;
    }

    async fn variant(&self, outcome: &VariantOutcome) -> Result<()> {
        let m = &outcome.evaluation.metrics;
        self.services
            .variants
            .add_variant(OptimizationVariantInsert {
                run_id: self.run_id,
                variant_params: Json(serde_json::to_value(&outcome.params)?),
                final_value: to_decimal(outcome.evaluation.final_value),
                sharpe: opt_decimal(m.sharpe),
                maxdd: to_decimal(m.max_drawdown_pct),
                winrate: opt_decimal(m.win_rate),
                profit_factor: opt_decimal(m.profit_factor),
                sqn: opt_decimal(m.sqn),
                total_trades: Some(m.total_trades as i32),
            })
            .await?;
        Ok(())
    }

    async fn fold(&self, outcome: &FoldOutcome) -> Result<()> {
        self.services
            .folds
            .add_fold(WfoFoldInsert {
                run_id: self.run_id,
                fold_index: outcome.fold_index,
                train_start: outcome.window.train_start,
                train_end: outcome.window.train_end,
                test_start: outcome.window.test_start,
                test_end: outcome.window.test_end,
                params: Some(Json(serde_json::to_value(&outcome.params)?)),
                train_objective: to_decimal(outcome.train_objective),
                metrics: Some(Json(outcome.test_evaluation.metrics.to_json())),
            })
            .await?;
        Ok(())
    }
}
