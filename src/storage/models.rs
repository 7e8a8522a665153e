// 重新導出子模塊
pub mod candle;
pub mod optimization_variant;
pub mod run;
pub mod run_log;
pub mod run_result;
pub mod wfo_fold;

// 重新導出常用類型
pub use candle::Candle;
pub use optimization_variant::{OptimizationVariant, OptimizationVariantInsert};
pub use run::{NewRun, Run, RunStatus, RunType};
pub use run_log::{RunLog, RunLogInsert, RunLogLevel};
pub use run_result::{RunResult, RunResultInsert};
pub use wfo_fold::{WfoFold, WfoFoldInsert};
