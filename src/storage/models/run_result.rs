use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

/// 任務結果模型
///
/// 每個 Run 可有零或多筆帶標籤的結果（main、baseline、opt_variant...），
/// 隨所屬 Run 級聯刪除。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RunResult {
    pub id: i64,
    pub run_id: i64,
    pub label: String,
    pub params: Option<Json<serde_json::Value>>,
    pub metrics: Option<Json<serde_json::Value>>,
    pub artifact_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 任務結果插入模型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResultInsert {
    pub run_id: i64,
    pub label: String,
    pub params: Option<Json<serde_json::Value>>,
    pub metrics: Option<Json<serde_json::Value>>,
    pub artifact_path: Option<String>,
}
