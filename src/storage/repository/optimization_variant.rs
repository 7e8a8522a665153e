use crate::storage::models::optimization_variant::{OptimizationVariant, OptimizationVariantInsert};
use crate::storage::repository::DbExecutor;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;

/// 優化變體儲存庫特徵
#[async_trait]
pub trait OptimizationVariantRepository: Send + Sync {
    /// 追加一個已評估的網格點
    async fn add_variant(&self, variant: OptimizationVariantInsert) -> Result<OptimizationVariant>;

    /// 根據任務ID獲取全部變體，按最終價值降序
    async fn list_by_run(
        &self,
        run_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<OptimizationVariant>>;

    /// 獲取最佳變體（最高最終價值）
    async fn best_by_run(&self, run_id: i64) -> Result<Option<OptimizationVariant>>;

    /// 統計變體數量
    async fn count_by_run(&self, run_id: i64) -> Result<i64>;
}

/// PostgreSQL 優化變體儲存庫實現
pub struct PgOptimizationVariantRepository {
    pool: Arc<PgPool>,
}

impl PgOptimizationVariantRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

impl DbExecutor for PgOptimizationVariantRepository {
    fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl OptimizationVariantRepository for PgOptimizationVariantRepository {
    async fn add_variant(&self, variant: OptimizationVariantInsert) -> Result<OptimizationVariant> {
        let row = sqlx::query_as::<_, OptimizationVariant>(
            r#"
            INSERT INTO optimization_variants (
                run_id, variant_params, final_value, sharpe, maxdd,
                winrate, profit_factor, sqn, total_trades
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9
            )
            RETURNING *
            "#,
        )
        .bind(variant.run_id)
        .bind(variant.variant_params)
        .bind(variant.final_value)
        .bind(variant.sharpe)
        .bind(variant.maxdd)
        .bind(variant.winrate)
        .bind(variant.profit_factor)
        .bind(variant.sqn)
        .bind(variant.total_trades)
        .fetch_one(DbExecutor::get_pool(self))
        .await?;

        Ok(row)
    }

    async fn list_by_run(
        &self,
        run_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<OptimizationVariant>> {
        let rows = sqlx::query_as::<_, OptimizationVariant>(
            r#"
            SELECT * FROM optimization_variants
            WHERE run_id = $1
            ORDER BY final_value DESC NULLS LAST
            LIMIT $2
            "#,
        )
        .bind(run_id)
        .bind(limit)
        .fetch_all(DbExecutor::get_pool(self))
        .await?;

        Ok(rows)
    }

    async fn best_by_run(&self, run_id: i64) -> Result<Option<OptimizationVariant>> {
        let row = sqlx::query_as::<_, OptimizationVariant>(
            r#"
            SELECT * FROM optimization_variants
            WHERE run_id = $1
            ORDER BY final_value DESC NULLS LAST
            LIMIT 1
            "#,
        )
        .bind(run_id)
        .fetch_optional(DbExecutor::get_pool(self))
        .await?;

        Ok(row)
    }

    async fn count_by_run(&self, run_id: i64) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM optimization_variants WHERE run_id = $1")
                .bind(run_id)
                .fetch_one(DbExecutor::get_pool(self))
                .await?;

        Ok(count)
    }
}
