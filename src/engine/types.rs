use crate::engine::metrics::PerformanceMetrics;
use crate::storage::models::candle::Candle;
use std::collections::BTreeMap;
use thiserror::Error;

/// 策略參數組
///
/// BTreeMap 保證鍵序固定，參數組的列印與比較皆可重現。
pub type ParamSet = BTreeMap<String, serde_json::Value>;

/// 成本模型：初始資金、手續費率與滑價設定
#[derive(Debug, Clone, PartialEq)]
pub struct CostModel {
    pub cash: f64,
    pub commission: f64,
    pub slip_perc: f64,
    pub slip_fixed: f64,
    pub slip_open: bool,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            cash: 10_000.0,
            commission: 0.001,
            slip_perc: 0.0,
            slip_fixed: 0.0,
            slip_open: true,
        }
    }
}

/// 評估錯誤
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("未知策略 '{0}'，可用: {1}")]
    UnknownStrategy(String, String),

    #[error("序列切片為空，無法評估")]
    EmptySeries,

    #[error("無效的策略參數: {0}")]
    InvalidParams(String),

    #[error("評估失敗: {0}")]
    Evaluation(String),
}

/// 一次評估的成果
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// 最終投資組合價值
    pub final_value: f64,
    /// 績效指標文件
    pub metrics: PerformanceMetrics,
    /// 引擎逐行輸出（由 worker 轉送至任務日誌）
    pub log_lines: Vec<String>,
    /// 每根K線的權益值（選填）
    pub equity_curve: Option<Vec<f64>>,
}

/// 評估引擎特徵
///
/// 協調核心對此契約之外的行為一無所知；引擎錯誤由 Worker 迴圈映射為
/// failed 任務，核心不做重試。
pub trait EvaluationEngine: Send + Sync {
    fn evaluate(
        &self,
        series: &[Candle],
        strategy: &str,
        params: &ParamSet,
        costs: &CostModel,
    ) -> Result<Evaluation, EngineError>;
}

/// 從參數組讀取整數，缺少或型別不符時用預設值
pub fn param_i64(params: &ParamSet, key: &str, default: i64) -> i64 {
    params.get(key).and_then(|v| v.as_i64()).unwrap_or(default)
}

/// 從參數組讀取浮點數，缺少或型別不符時用預設值
pub fn param_f64(params: &ParamSet, key: &str, default: f64) -> f64 {
    params.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_helpers_fall_back() {
        let mut params = ParamSet::new();
        params.insert("fast".into(), serde_json::json!(7));
        params.insert("invest".into(), serde_json::json!(0.9));

        assert_eq!(param_i64(&params, "fast", 10), 7);
        assert_eq!(param_i64(&params, "slow", 20), 20);
        assert_eq!(param_f64(&params, "invest", 1.0), 0.9);
        assert_eq!(param_f64(&params, "fast", 0.0), 7.0);
    }

    #[test]
    fn test_default_cost_model() {
        let costs = CostModel::default();
        assert_eq!(costs.cash, 10_000.0);
        assert_eq!(costs.commission, 0.001);
        assert!(costs.slip_open);
    }
}
