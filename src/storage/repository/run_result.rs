use crate::storage::models::run_result::{RunResult, RunResultInsert};
use crate::storage::repository::DbExecutor;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;

/// 任務結果儲存庫特徵
#[async_trait]
pub trait RunResultRepository: Send + Sync {
    /// 追加一筆帶標籤的結果
    async fn add_result(&self, result: RunResultInsert) -> Result<RunResult>;

    /// 根據任務ID獲取全部結果
    async fn list_by_run(&self, run_id: i64) -> Result<Vec<RunResult>>;
}

/// PostgreSQL 任務結果儲存庫實現
pub struct PgRunResultRepository {
    pool: Arc<PgPool>,
}

impl PgRunResultRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

impl DbExecutor for PgRunResultRepository {
    fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RunResultRepository for PgRunResultRepository {
    async fn add_result(&self, result: RunResultInsert) -> Result<RunResult> {
        let row = sqlx::query_as::<_, RunResult>(
            r#"
            INSERT INTO run_results (run_id, label, params, metrics, artifact_path)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(result.run_id)
        .bind(&result.label)
        .bind(result.params)
        .bind(result.metrics)
        .bind(&result.artifact_path)
        .fetch_one(DbExecutor::get_pool(self))
        .await?;

        Ok(row)
    }

    async fn list_by_run(&self, run_id: i64) -> Result<Vec<RunResult>> {
        let rows = sqlx::query_as::<_, RunResult>(
            "SELECT * FROM run_results WHERE run_id = $1 ORDER BY id ASC",
        )
        .bind(run_id)
        .fetch_all(DbExecutor::get_pool(self))
        .await?;

        Ok(rows)
    }
}
