use crate::storage::models::candle::Candle;
use crate::storage::repository::{DbExecutor, TimeRange};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;

/// K 線儲存庫特徵（唯讀）
///
/// 評估用的歷史序列由外部攝取管線維護，這裡只按區間讀取。
#[async_trait]
pub trait CandleRepository: Send + Sync {
    /// 讀取指定商品在時間區間內的序列，按時間升序
    async fn fetch_series(
        &self,
        instrument_id: &str,
        range: TimeRange,
    ) -> Result<Vec<Candle>>;
}

/// PostgreSQL K 線儲存庫實現
pub struct PgCandleRepository {
    pool: Arc<PgPool>,
}

impl PgCandleRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

impl DbExecutor for PgCandleRepository {
    fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CandleRepository for PgCandleRepository {
    async fn fetch_series(
        &self,
        instrument_id: &str,
        range: TimeRange,
    ) -> Result<Vec<Candle>> {
        let rows = sqlx::query_as::<_, Candle>(
            r#"
            SELECT instrument_id, ts, open, high, low, close, volume
            FROM candlesticks
            WHERE instrument_id = $1
              AND ts BETWEEN $2 AND $3
            ORDER BY ts ASC
            "#,
        )
        .bind(instrument_id)
        .bind(range.start)
        .bind(range.end)
        .fetch_all(DbExecutor::get_pool(self))
        .await?;

        Ok(rows)
    }
}
