use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

/// 優化變體模型
///
/// optimize 任務評估過的每個網格點一列，任務進行期間僅追加。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OptimizationVariant {
    pub id: i64,
    pub run_id: i64,
    pub variant_params: Json<serde_json::Value>,
    pub final_value: Option<Decimal>,
    pub sharpe: Option<Decimal>,
    pub maxdd: Option<Decimal>,
    pub winrate: Option<Decimal>,
    pub profit_factor: Option<Decimal>,
    pub sqn: Option<Decimal>,
    pub total_trades: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// 優化變體插入模型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationVariantInsert {
    pub run_id: i64,
    pub variant_params: Json<serde_json::Value>,
    pub final_value: Option<Decimal>,
    pub sharpe: Option<Decimal>,
    pub maxdd: Option<Decimal>,
    pub winrate: Option<Decimal>,
    pub profit_factor: Option<Decimal>,
    pub sqn: Option<Decimal>,
    pub total_trades: Option<i32>,
}
