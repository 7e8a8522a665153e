//! 評估引擎模組
//!
//! 對協調核心而言評估引擎是不透明的協作者：給定（序列切片、策略鍵、
//! 參數組、成本模型）回傳最終價值與績效指標，或拋出評估錯誤。
//! 策略一律經由靜態註冊表解析為編譯期實現，不在行程內載入使用者代碼。

pub mod backtester;
pub mod metrics;
pub mod registry;
pub mod types;

// 重新導出主要類型和結構
pub use backtester::BarBacktester;
pub use metrics::PerformanceMetrics;
pub use registry::{available_strategies, create_strategy, Strategy};
pub use types::{CostModel, EngineError, Evaluation, EvaluationEngine, ParamSet};
