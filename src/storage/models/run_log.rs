use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任務日誌模型
///
/// 與 Run 關聯的 append-only 日誌串流，worker 處理期間寫入。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RunLog {
    pub id: i64,
    pub run_id: i64,
    pub ts: DateTime<Utc>,
    pub level: String,
    pub message: String,
}

/// 任務日誌插入模型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogInsert {
    pub run_id: i64,
    pub ts: Option<DateTime<Utc>>,
    pub level: String,
    pub message: String,
}

/// 日誌級別枚舉
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunLogLevel {
    #[serde(rename = "DEBUG")]
    Debug,
    #[serde(rename = "INFO")]
    Info,
    #[serde(rename = "WARN")]
    Warn,
    #[serde(rename = "ERROR")]
    Error,
}

impl RunLogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunLogLevel::Debug => "DEBUG",
            RunLogLevel::Info => "INFO",
            RunLogLevel::Warn => "WARN",
            RunLogLevel::Error => "ERROR",
        }
    }
}

impl From<&str> for RunLogLevel {
    fn from(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "DEBUG" => RunLogLevel::Debug,
            "WARN" => RunLogLevel::Warn,
            "ERROR" => RunLogLevel::Error,
            _ => RunLogLevel::Info,
        }
    }
}
