use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

/// 任務記錄模型
///
/// 每個提交的回測/優化/走向前優化任務在 `runs` 表中一列，
/// 是積壓與歷史的唯一事實來源。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Run {
    pub run_id: i64,
    pub run_type: String,
    pub status: String,
    pub progress: i32,
    pub strategy: String,
    pub instrument_id: String,
    pub timeframe: String,
    pub params: Option<Json<serde_json::Value>>,
    pub cash: Option<Decimal>,
    pub commission: Option<Decimal>,
    pub slip_perc: Option<Decimal>,
    pub slip_fixed: Option<Decimal>,
    pub slip_open: Option<bool>,
    pub notes: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Run {
    /// 取出 params 文件；欄位為 NULL 時回傳空物件
    pub fn params_value(&self) -> serde_json::Value {
        self.params
            .as_ref()
            .map(|j| j.0.clone())
            .unwrap_or_else(|| serde_json::json!({}))
    }
}

/// 任務插入模型（入列時使用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRun {
    pub run_type: RunType,
    pub strategy: String,
    pub instrument_id: String,
    pub timeframe: String,
    pub params: Option<Json<serde_json::Value>>,
    pub cash: Option<Decimal>,
    pub commission: Option<Decimal>,
    pub slip_perc: Option<Decimal>,
    pub slip_fixed: Option<Decimal>,
    pub slip_open: Option<bool>,
    pub notes: Option<String>,
}

/// 任務類型枚舉
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunType {
    #[serde(rename = "backtest")]
    Backtest,
    #[serde(rename = "optimize")]
    Optimize,
    #[serde(rename = "walk_forward")]
    WalkForward,
}

impl RunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunType::Backtest => "backtest",
            RunType::Optimize => "optimize",
            RunType::WalkForward => "walk_forward",
        }
    }

    /// 回測家族的全部任務類型（worker 與 autoscaler 的認領範圍）
    pub fn backtest_family() -> &'static [RunType] {
        &[RunType::Backtest, RunType::Optimize, RunType::WalkForward]
    }

    pub fn parse(s: &str) -> Option<RunType> {
        match s {
            "backtest" => Some(RunType::Backtest),
            "optimize" => Some(RunType::Optimize),
            "walk_forward" => Some(RunType::WalkForward),
            _ => None,
        }
    }
}

/// 任務狀態枚舉
///
/// 狀態機：queued → running → {succeeded, failed}，不存在其他轉移。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "succeeded")]
    Succeeded,
    #[serde(rename = "failed")]
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }

    /// 終態判定；`ended_at` 僅在終態設置
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }

    pub fn parse(s: &str) -> Option<RunStatus> {
        match s {
            "queued" => Some(RunStatus::Queued),
            "running" => Some(RunStatus::Running),
            "succeeded" => Some(RunStatus::Succeeded),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}
