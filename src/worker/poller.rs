use crate::engine::types::EvaluationEngine;
use crate::storage::models::run::{Run, RunStatus, RunType};
use crate::storage::repository::{
    CandleRepository, OptimizationVariantRepository, RunLogRepository, RunResultRepository,
    RunStore, WfoFoldRepository,
};
use crate::worker::context::RunContext;
use crate::worker::handlers;
use crate::storage::models::run_log::RunLogLevel;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// Worker 依賴束
///
/// 全部經由注入取得：輪詢迴圈與 handler 不持有任何模組級共享狀態。
#[derive(Clone)]
pub struct WorkerServices {
    pub store: Arc<dyn RunStore>,
    pub logs: Arc<dyn RunLogRepository>,
    pub results: Arc<dyn RunResultRepository>,
    pub variants: Arc<dyn OptimizationVariantRepository>,
    pub folds: Arc<dyn WfoFoldRepository>,
    pub candles: Arc<dyn CandleRepository>,
    pub engine: Arc<dyn EvaluationEngine>,
    /// 網格評估的最大並行度
    pub max_concurrency: usize,
}

/// 輪詢式 Worker 迴圈
///
/// 每輪：認領下一個排隊任務；沒有就睡一個輪詢間隔再試；有就同步
/// 分派給對應 handler。單一任務的失敗只會讓該任務轉為 failed，
/// 絕不終止迴圈或影響其他並行迴圈。
pub struct WorkerLoop {
    worker_id: u32,
    services: WorkerServices,
    poll_interval: Duration,
    stop: watch::Receiver<bool>,
}

impl WorkerLoop {
    pub fn new(
        worker_id: u32,
        services: WorkerServices,
        poll_interval: Duration,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            worker_id,
            services,
            poll_interval,
            stop,
        }
    }

    pub async fn run(mut self) {
        info!(
            "[worker-{}] started (poll={}ms)",
            self.worker_id,
            self.poll_interval.as_millis()
        );

        loop {
            if *self.stop.borrow() {
                break;
            }

            match self
                .services
                .store
                .fetch_next_queued(RunType::backtest_family())
                .await
            {
                Ok(Some(run)) => {
                    self.dispatch(run).await;
                }
                Ok(None) => {
                    if self.sleep_or_stop().await {
                        break;
                    }
                }
                Err(err) => {
                    // 儲存層錯誤對本輪是致命的，但迴圈要繼續
                    error!("[worker-{}] 認領失敗: {:#}", self.worker_id, err);
                    if self.sleep_or_stop().await {
                        break;
                    }
                }
            }
        }

        info!("[worker-{}] stopped", self.worker_id);
    }

    /// 睡一個輪詢間隔；回傳 true 表示收到停止信號
    async fn sleep_or_stop(&mut self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.poll_interval) => false,
            changed = self.stop.changed() => changed.is_err() || *self.stop.borrow(),
        }
    }

    /// 按任務類型分派；錯誤在此邊界一次性捕獲並轉為 failed 終態
    async fn dispatch(&self, run: Run) {
        let run_id = run.run_id;
        let ctx = RunContext::new(run_id, self.worker_id, self.services.clone());
        ctx.logger()
            .log(
                RunLogLevel::Info,
                &format!(
                    "Worker {} picked run_id={} type={}",
                    self.worker_id, run_id, run.run_type
                ),
            )
            .await;

        let result = match RunType::parse(&run.run_type) {
            Some(RunType::Optimize) => {
                handlers::process_optimization(&ctx, &self.services, &run).await
            }
            Some(RunType::WalkForward) => {
                handlers::process_walk_forward(&ctx, &self.services, &run).await
            }
            // 未知類型走預設的單次回測路徑
            Some(RunType::Backtest) | None => {
                handlers::process_backtest(&ctx, &self.services, &run).await
            }
        };

        if let Err(err) = result {
            // 錯誤訊息逐字寫入 error 欄位
            let message = format!("{:#}", err);
            ctx.logger()
                .log(
                    RunLogLevel::Error,
                    &format!("Worker {} failed run_id={}: {}", self.worker_id, run_id, message),
                )
                .await;
            if let Err(update_err) = self
                .services
                .store
                .update_status(run_id, RunStatus::Failed, Some(100), Some(message))
                .await
            {
                error!(
                    "[worker-{}] 無法標記失敗 (run={}): {:#}",
                    self.worker_id, run_id, update_err
                );
            }
        }
    }
}
