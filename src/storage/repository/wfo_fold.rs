use crate::storage::models::wfo_fold::{WfoFold, WfoFoldInsert};
use crate::storage::repository::DbExecutor;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;

/// 走向前優化摺疊儲存庫特徵
#[async_trait]
pub trait WfoFoldRepository: Send + Sync {
    /// 追加一個摺疊
    async fn add_fold(&self, fold: WfoFoldInsert) -> Result<WfoFold>;

    /// 根據任務ID獲取全部摺疊，按 fold_index 升序
    async fn list_by_run(&self, run_id: i64) -> Result<Vec<WfoFold>>;

    /// 統計摺疊數量
    async fn count_by_run(&self, run_id: i64) -> Result<i64>;
}

/// PostgreSQL 走向前優化摺疊儲存庫實現
pub struct PgWfoFoldRepository {
    pool: Arc<PgPool>,
}

impl PgWfoFoldRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

impl DbExecutor for PgWfoFoldRepository {
    fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl WfoFoldRepository for PgWfoFoldRepository {
    async fn add_fold(&self, fold: WfoFoldInsert) -> Result<WfoFold> {
        let row = sqlx::query_as::<_, WfoFold>(
            r#"
            INSERT INTO wfo_folds (
                run_id, fold_index, train_start, train_end, test_start, test_end,
                params, train_objective, metrics
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9
            )
            RETURNING *
            "#,
        )
        .bind(fold.run_id)
        .bind(fold.fold_index)
        .bind(fold.train_start)
        .bind(fold.train_end)
        .bind(fold.test_start)
        .bind(fold.test_end)
        .bind(fold.params)
        .bind(fold.train_objective)
        .bind(fold.metrics)
        .fetch_one(DbExecutor::get_pool(self))
        .await?;

        Ok(row)
    }

    async fn list_by_run(&self, run_id: i64) -> Result<Vec<WfoFold>> {
        let rows = sqlx::query_as::<_, WfoFold>(
            "SELECT * FROM wfo_folds WHERE run_id = $1 ORDER BY fold_index ASC",
        )
        .bind(run_id)
        .fetch_all(DbExecutor::get_pool(self))
        .await?;

        Ok(rows)
    }

    async fn count_by_run(&self, run_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM wfo_folds WHERE run_id = $1")
            .bind(run_id)
            .fetch_one(DbExecutor::get_pool(self))
            .await?;

        Ok(count)
    }
}
