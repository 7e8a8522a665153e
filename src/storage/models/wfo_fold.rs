use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

/// 走向前優化摺疊模型
///
/// 每個訓練/測試視窗一列，依 fold_index 排序，僅追加。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WfoFold {
    pub id: i64,
    pub run_id: i64,
    pub fold_index: i32,
    pub train_start: DateTime<Utc>,
    pub train_end: DateTime<Utc>,
    pub test_start: DateTime<Utc>,
    pub test_end: DateTime<Utc>,
    pub params: Option<Json<serde_json::Value>>,
    pub train_objective: Option<Decimal>,
    pub metrics: Option<Json<serde_json::Value>>,
    pub created_at: DateTime<Utc>,
}

/// 走向前優化摺疊插入模型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WfoFoldInsert {
    pub run_id: i64,
    pub fold_index: i32,
    pub train_start: DateTime<Utc>,
    pub train_end: DateTime<Utc>,
    pub test_start: DateTime<Utc>,
    pub test_end: DateTime<Utc>,
    pub params: Option<Json<serde_json::Value>>,
    pub train_objective: Option<Decimal>,
    pub metrics: Option<Json<serde_json::Value>>,
}
