use crate::engine::types::Evaluation;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 未知目標名稱
#[derive(Error, Debug)]
#[error("未知目標 '{0}'，可用: final, sharpe, pf")]
pub struct UnknownObjective(pub String);

/// 網格候選的排名目標
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Objective {
    /// 最終投資組合價值
    #[serde(rename = "final")]
    FinalValue,
    /// 風險調整後收益（年化 Sharpe）
    #[serde(rename = "sharpe")]
    Sharpe,
    /// 獲利因子
    #[serde(rename = "pf")]
    ProfitFactor,
}

impl Objective {
    pub fn parse(s: &str) -> Result<Self, UnknownObjective> {
        match s.trim().to_lowercase().as_str() {
            "final" | "final_value" => Ok(Objective::FinalValue),
            "sharpe" => Ok(Objective::Sharpe),
            "pf" | "profit_factor" => Ok(Objective::ProfitFactor),
            other => Err(UnknownObjective(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Objective::FinalValue => "final",
            Objective::Sharpe => "sharpe",
            Objective::ProfitFactor => "pf",
        }
    }

    /// 從評估成果取出目標值
    ///
    /// 缺失或非有限值以負無窮代替，任何真實數值都會勝出。
    pub fn value(&self, eval: &Evaluation) -> f64 {
        let raw = match self {
            Objective::FinalValue => Some(eval.final_value),
            Objective::Sharpe => eval.metrics.sharpe,
            Objective::ProfitFactor => eval.metrics.profit_factor,
        };
        match raw {
            Some(v) if v.is_finite() => v,
            _ => f64::NEG_INFINITY,
        }
    }
}
