use crate::storage::models::run::RunStatus;
use crate::storage::repository::RunStore;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// 單調進度回報器
///
/// 只有算出的百分比嚴格大於上次已持久化的值時才寫入，任何單一
/// 任務的 progress 序列因此不遞減。寫入失敗不影響任務處理。
pub struct ProgressReporter {
    run_id: i64,
    store: Arc<dyn RunStore>,
    last_pct: Mutex<i32>,
}

impl ProgressReporter {
    pub fn new(run_id: i64, store: Arc<dyn RunStore>, initial_pct: i32) -> Self {
        Self {
            run_id,
            store,
            last_pct: Mutex::new(initial_pct),
        }
    }

    /// 回報完成比例（0.0..=1.0）
    pub async fn report_fraction(&self, fraction: f64) {
        let pct = (fraction.clamp(0.0, 1.0) * 100.0).floor() as i32;
        self.report_pct(pct).await;
    }

    /// 回報整數百分比
    pub async fn report_pct(&self, pct: i32) {
        {
            let mut last = self.last_pct.lock().await;
            if pct <= *last {
                return;
            }
            *last = pct;
        }

        if let Err(err) = self
            .store
            .update_status(self.run_id, RunStatus::Running, Some(pct), None)
            .await
        {
            warn!("進度更新失敗 (run={}): {}", self.run_id, err);
        }
    }
}
