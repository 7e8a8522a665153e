use crate::storage::models::run_log::{RunLogInsert, RunLogLevel};
use crate::storage::repository::RunLogRepository;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// 任務關聯日誌器
///
/// 把處理期間的每一行輸出寫進 run_logs，同時鏡射到 tracing。
/// 緊接重複的相同行會被去重，避免引擎逐行輸出灌爆日誌表。
/// 日誌寫入是盡力而為：儲存層失敗不影響任務處理。
pub struct RunLogger {
    run_id: i64,
    worker_id: u32,
    repo: Arc<dyn RunLogRepository>,
    last_line: Mutex<Option<String>>,
}

impl RunLogger {
    pub fn new(run_id: i64, worker_id: u32, repo: Arc<dyn RunLogRepository>) -> Self {
        Self {
            run_id,
            worker_id,
            repo,
            last_line: Mutex::new(None),
        }
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    /// 寫一行日誌；與前一行完全相同時丟棄
    pub async fn log(&self, level: RunLogLevel, message: &str) {
        let message = message.trim();
        if message.is_empty() {
            return;
        }

        {
            let mut last = self.last_line.lock().await;
            if last.as_deref() == Some(message) {
                return;
            }
            *last = Some(message.to_string());
        }

        match level {
            RunLogLevel::Debug => debug!("[worker-{}] run={} {}", self.worker_id, self.run_id, message),
            RunLogLevel::Info => info!("[worker-{}] run={} {}", self.worker_id, self.run_id, message),
            RunLogLevel::Warn => warn!("[worker-{}] run={} {}", self.worker_id, self.run_id, message),
            RunLogLevel::Error => error!("[worker-{}] run={} {}", self.worker_id, self.run_id, message),
        }

        let insert = RunLogInsert {
            run_id: self.run_id,
            ts: None,
            level: level.as_str().to_string(),
            message: message.to_string(),
        };
        if let Err(err) = self.repo.append(insert).await {
            warn!("寫入 run_logs 失敗 (run={}): {}", self.run_id, err);
        }
    }

    /// 轉送引擎的逐行輸出
    pub async fn forward_lines(&self, level: RunLogLevel, lines: &[String]) {
        for line in lines {
            self.log(level, line).await;
        }
    }
}
