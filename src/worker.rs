//! Worker 模組
//!
//! 一個 worker 行程內跑一到多個獨立的輪詢單元：認領任務、按類型
//! 分派、串流進度與日誌回儲存層、收尾狀態。正確性完全依賴認領
//! 協議，行程內不做任何額外協調。

pub mod context;
pub mod handlers;
pub mod logger;
pub mod poller;
pub mod progress;

// 重新導出主要類型和結構
pub use context::RunContext;
pub use logger::RunLogger;
pub use poller::{WorkerLoop, WorkerServices};
pub use progress::ProgressReporter;
