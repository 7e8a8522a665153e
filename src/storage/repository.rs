use chrono::{DateTime, Utc};
use sqlx::PgPool;

// 重新導出子模塊
pub mod candle;
pub mod optimization_variant;
pub mod run;
pub mod run_log;
pub mod run_result;
pub mod wfo_fold;

// 重新導出常用類型
pub use candle::CandleRepository;
pub use optimization_variant::OptimizationVariantRepository;
pub use run::{BacklogCounts, PgRunStore, RunStore};
pub use run_log::RunLogRepository;
pub use run_result::RunResultRepository;
pub use wfo_fold::WfoFoldRepository;

// 重新導出具體實現
pub use candle::PgCandleRepository;
pub use optimization_variant::PgOptimizationVariantRepository;
pub use run_log::PgRunLogRepository;
pub use run_result::PgRunResultRepository;
pub use wfo_fold::PgWfoFoldRepository;

/// 分頁結果
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, total: i64, page: i64, page_size: i64) -> Self {
        let total_pages = (total as f64 / page_size as f64).ceil() as i64;
        Self {
            data,
            total,
            page,
            page_size,
            total_pages,
        }
    }

    pub fn empty(page: i64, page_size: i64) -> Self {
        Self::new(Vec::new(), 0, page, page_size)
    }
}

/// 查詢分頁參數
#[derive(Debug, Clone, Copy)]
pub struct PageQuery {
    pub page: i64,
    pub page_size: i64,
}

impl PageQuery {
    pub fn new(page: i64, page_size: i64) -> Self {
        Self { page, page_size }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
        }
    }
}

/// 時間範圍查詢
#[derive(Debug, Clone, Copy)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// 返回一個表示無限時間範圍的 TimeRange
    ///
    /// 上下界取 PostgreSQL timestamptz 可表示的哨兵值，chrono 的
    /// MIN_UTC/MAX_UTC 超出其範圍，綁定參數時會被拒絕。
    pub fn all_time() -> Self {
        use chrono::TimeZone;
        Self {
            start: Utc.with_ymd_and_hms(1000, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap(),
        }
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::all_time()
    }
}

/// 通用的數據庫操作特性
pub trait DbExecutor {
    fn get_pool(&self) -> &PgPool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_computes_total_pages() {
        let page = Page::new(vec![1, 2, 3], 45, 1, 20);
        assert_eq!(page.total_pages, 3);

        let empty: Page<i32> = Page::empty(1, 20);
        assert_eq!(empty.total, 0);
        assert_eq!(empty.total_pages, 0);
    }

    #[test]
    fn test_page_query_offset() {
        assert_eq!(PageQuery::new(1, 50).offset(), 0);
        assert_eq!(PageQuery::new(3, 50).offset(), 100);
    }
}
