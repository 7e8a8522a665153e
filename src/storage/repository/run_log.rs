use crate::storage::models::run_log::{RunLog, RunLogInsert};
use crate::storage::repository::{DbExecutor, Page, PageQuery};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;

/// 任務日誌儲存庫特徵
///
/// append-only 日誌接收端；依任務ID分頁查詢（最新在前）。
#[async_trait]
pub trait RunLogRepository: Send + Sync {
    /// 追加一筆日誌
    async fn append(&self, log: RunLogInsert) -> Result<()>;

    /// 根據任務ID分頁獲取日誌
    async fn list_by_run(&self, run_id: i64, page: PageQuery) -> Result<Page<RunLog>>;
}

/// PostgreSQL 任務日誌儲存庫實現
pub struct PgRunLogRepository {
    pool: Arc<PgPool>,
}

impl PgRunLogRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

impl DbExecutor for PgRunLogRepository {
    fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RunLogRepository for PgRunLogRepository {
    async fn append(&self, log: RunLogInsert) -> Result<()> {
        sqlx::query("INSERT INTO run_logs (run_id, ts, level, message) VALUES ($1, $2, $3, $4)")
            .bind(log.run_id)
            .bind(log.ts.unwrap_or_else(Utc::now))
            .bind(&log.level)
            .bind(&log.message)
            .execute(DbExecutor::get_pool(self))
            .await?;

        Ok(())
    }

    async fn list_by_run(&self, run_id: i64, page: PageQuery) -> Result<Page<RunLog>> {
        let logs = sqlx::query_as::<_, RunLog>(
            r#"
            SELECT * FROM run_logs
            WHERE run_id = $1
            ORDER BY ts DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(run_id)
        .bind(page.page_size)
        .bind(page.offset())
        .fetch_all(DbExecutor::get_pool(self))
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM run_logs WHERE run_id = $1")
            .bind(run_id)
            .fetch_one(DbExecutor::get_pool(self))
            .await?;

        Ok(Page::new(logs, total, page.page, page.page_size))
    }
}
