//! 行程監督模組
//!
//! 獨立於 worker 的控制迴圈：觀測積壓深度，把 worker 行程數擴縮到
//! 配置的容量界限內。只管理 OS 層的行程數，從不觸碰任務狀態。

pub mod scaler;

// 重新導出主要類型和結構
pub use scaler::{desired_processes, Supervisor};
