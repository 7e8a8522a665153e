use crate::storage::models::run::{NewRun, Run, RunStatus, RunType};
use crate::storage::repository::{DbExecutor, Page, PageQuery};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;

/// 積壓計數
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BacklogCounts {
    pub queued: i64,
    pub running: i64,
}

/// 任務儲存庫特徵
///
/// 積壓與任務歷史的唯一事實來源。Worker 迴圈與 Supervisor 都以注入的
/// 句柄存取，不存在模組級共享狀態。
#[async_trait]
pub trait RunStore: Send + Sync {
    /// 入列新任務（status=queued, progress=0）
    async fn enqueue(&self, run: NewRun) -> Result<Run>;

    /// 根據ID獲取任務
    async fn get_run(&self, run_id: i64) -> Result<Option<Run>>;

    /// 認領下一個排隊中的任務
    ///
    /// skip-locked 選取：在給定任務類型中挑 `started_at` 最早且未被其他
    /// 並發呼叫者鎖定的列；全部被鎖定時回傳 None 而不等待。選取與
    /// queued→running(progress=1) 的轉移在同一個工作單元內提交，
    /// 第二個輪詢者不可能再看到它是 queued。
    async fn fetch_next_queued(&self, run_types: &[RunType]) -> Result<Option<Run>>;

    /// 更新任務狀態
    ///
    /// 目標ID不存在時必須回傳錯誤（靜默無操作會掩蓋分派路徑的bug）。
    /// 轉移到終態時設置 `ended_at`。
    async fn update_status(
        &self,
        run_id: i64,
        status: RunStatus,
        progress: Option<i32>,
        error: Option<String>,
    ) -> Result<Run>;

    /// 統計 queued / running 任務數（Supervisor 的積壓觀測）
    async fn count_by_status(&self, run_types: &[RunType]) -> Result<BacklogCounts>;

    /// 獲取最近提交的任務列表
    async fn list_recent(&self, page: PageQuery) -> Result<Page<Run>>;
}

/// PostgreSQL 任務儲存庫實現
pub struct PgRunStore {
    pool: Arc<PgPool>,
}

impl PgRunStore {
    /// 創建新的任務儲存庫
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

impl DbExecutor for PgRunStore {
    fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}

fn type_names(run_types: &[RunType]) -> Vec<String> {
    run_types.iter().map(|t| t.as_str().to_string()).collect()
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn enqueue(&self, run: NewRun) -> Result<Run> {
        let result = sqlx::query_as::<_, Run>(
            r#"
            INSERT INTO runs (
                run_type, status, progress, strategy, instrument_id, timeframe,
                params, cash, commission, slip_perc, slip_fixed, slip_open, notes
            ) VALUES (
                $1, 'queued', 0, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11
            )
            RETURNING *
            "#,
        )
        .bind(run.run_type.as_str())
        .bind(&run.strategy)
        .bind(&run.instrument_id)
        .bind(&run.timeframe)
        .bind(run.params)
        .bind(run.cash)
        .bind(run.commission)
        .bind(run.slip_perc)
        .bind(run.slip_fixed)
        .bind(run.slip_open)
        .bind(&run.notes)
        .fetch_one(DbExecutor::get_pool(self))
        .await?;

        Ok(result)
    }

    async fn get_run(&self, run_id: i64) -> Result<Option<Run>> {
        let result = sqlx::query_as::<_, Run>("SELECT * FROM runs WHERE run_id = $1")
            .bind(run_id)
            .fetch_optional(DbExecutor::get_pool(self))
            .await?;

        Ok(result)
    }

    async fn fetch_next_queued(&self, run_types: &[RunType]) -> Result<Option<Run>> {
        // 單一語句：FOR UPDATE SKIP LOCKED 選取 + 轉移為 running，
        // 隨語句提交原子生效。鎖定中的較舊列會被跳過（接受非嚴格FIFO）。
        let result = sqlx::query_as::<_, Run>(
            r#"
            WITH next_run AS (
                SELECT run_id
                FROM runs
                WHERE status = 'queued'
                  AND run_type = ANY($1)
                ORDER BY started_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE runs
            SET status = 'running', progress = 1
            FROM next_run
            WHERE runs.run_id = next_run.run_id
            RETURNING runs.*
            "#,
        )
        .bind(type_names(run_types))
        .fetch_optional(DbExecutor::get_pool(self))
        .await?;

        Ok(result)
    }

    async fn update_status(
        &self,
        run_id: i64,
        status: RunStatus,
        progress: Option<i32>,
        error: Option<String>,
    ) -> Result<Run> {
        let result = sqlx::query_as::<_, Run>(
            r#"
            UPDATE runs
            SET status   = $2,
                progress = COALESCE($3, progress),
                error    = COALESCE($4, error),
                ended_at = CASE WHEN $5 THEN now() ELSE ended_at END
            WHERE run_id = $1
            RETURNING *
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(progress)
        .bind(error)
        .bind(status.is_terminal())
        .fetch_optional(DbExecutor::get_pool(self))
        .await?;

        result.ok_or_else(|| anyhow!("run {} not found", run_id))
    }

    async fn count_by_status(&self, run_types: &[RunType]) -> Result<BacklogCounts> {
        let row: (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'queued'),
                COUNT(*) FILTER (WHERE status = 'running')
            FROM runs
            WHERE run_type = ANY($1)
            "#,
        )
        .bind(type_names(run_types))
        .fetch_one(DbExecutor::get_pool(self))
        .await?;

        Ok(BacklogCounts {
            queued: row.0,
            running: row.1,
        })
    }

    async fn list_recent(&self, page: PageQuery) -> Result<Page<Run>> {
        let runs = sqlx::query_as::<_, Run>(
            r#"
            SELECT * FROM runs
            ORDER BY started_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(page.page_size)
        .bind(page.offset())
        .fetch_all(DbExecutor::get_pool(self))
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM runs")
            .fetch_one(DbExecutor::get_pool(self))
            .await?;

        Ok(Page::new(runs, total, page.page, page.page_size))
    }
}
