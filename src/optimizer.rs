//! 優化模組
//!
//! 包含網格/約束評估器與走向前優化器。兩者都透過評估引擎契約
//! 重複呼叫外部引擎，並經由 `EvalSink` 將日誌、進度與逐筆成果
//! 回報給呼叫方（worker 將其落地到儲存層）。

pub mod constraint;
pub mod grid;
pub mod objective;
pub mod search;
pub mod walk_forward;

// 重新導出主要類型和結構
pub use constraint::Constraint;
pub use grid::{GridParseError, GridSpec};
pub use objective::Objective;
pub use search::{GridSearch, GridSearchSummary, VariantOutcome};
pub use walk_forward::{
    derive_windows, FoldOutcome, WalkForwardOptimizer, WalkForwardRequest, WfoReport, WfoWindow,
};

use crate::storage::models::run_log::RunLogLevel;
use anyhow::Result;
use async_trait::async_trait;

/// 評估過程的回報接收端
///
/// 明確傳遞的上下文值（取代環境式的 run-id 關聯）：優化器經由它
/// 回報日誌與進度，並逐筆交付變體/摺疊成果。日誌與進度為盡力而為，
/// 失敗由實現方吞掉；成果交付失敗會中止當前任務。
#[async_trait]
pub trait EvalSink: Send + Sync {
    /// 回報一行日誌
    async fn log(&self, level: RunLogLevel, message: String);

    /// 回報完成比例（0.0..=1.0）；只有嚴格遞增時才會被持久化
    async fn progress(&self, fraction: f64);

    /// 交付一個已評估的優化變體
    async fn variant(&self, _outcome: &VariantOutcome) -> Result<()> {
        Ok(())
    }

    /// 交付一個完成的走向前摺疊
    async fn fold(&self, _outcome: &FoldOutcome) -> Result<()> {
        Ok(())
    }
}
