use crate::config::validation::{ValidationError, ValidationUtils, Validator};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 應用程序配置結構
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub database: DatabaseConfig,
    pub log: LogConfig,
    pub worker: WorkerConfig,
    pub manager: ManagerConfig,
}

impl Validator for ApplicationConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        // 驗證各個部分的配置
        self.database.validate()?;
        self.log.validate()?;
        self.worker.validate()?;
        self.manager.validate()?;

        Ok(())
    }
}

/// 數據庫配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub max_lifetime_secs: u64,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Validator for DatabaseConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::not_empty(&self.host, "database.host")?;
        ValidationUtils::not_empty(&self.username, "database.username")?;
        ValidationUtils::not_empty(&self.database, "database.database")?;
        ValidationUtils::in_range(self.port, 1, 65535, "database.port")?;
        ValidationUtils::in_range(
            self.max_connections,
            self.min_connections,
            1000,
            "database.max_connections",
        )?;

        Ok(())
    }
}

impl DatabaseConfig {
    /// 獲取最大生命週期持續時間
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }

    /// 獲取獲取連接超時持續時間
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// 獲取閒置超時持續時間
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// 日誌配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
}

impl Validator for LogConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        // 驗證日誌級別
        ValidationUtils::one_of(
            &self.level.to_lowercase(),
            &["trace", "debug", "info", "warn", "error"]
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<String>>(),
            "log.level",
        )?;

        // 驗證日誌格式
        ValidationUtils::one_of(
            &self.format.to_lowercase(),
            &["pretty", "json"]
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<String>>(),
            "log.format",
        )?;

        Ok(())
    }
}

/// Worker 行程配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// 單一行程內的輪詢迴圈數量
    pub concurrency: u32,
    /// 認領輪詢間隔（毫秒）
    pub poll_interval_ms: u64,
    /// 網格評估的最大並行度
    pub max_concurrency: u32,
    /// 迴圈啟動的錯開間隔（毫秒）
    pub start_stagger_ms: u64,
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn start_stagger(&self) -> Duration {
        Duration::from_millis(self.start_stagger_ms)
    }
}

impl Validator for WorkerConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::in_range(self.concurrency, 1, 64, "worker.concurrency")?;
        ValidationUtils::in_range(self.poll_interval_ms, 10, 60_000, "worker.poll_interval_ms")?;
        ValidationUtils::in_range(
            self.max_concurrency,
            1,
            num_cpus::get() as u32 * 4,
            "worker.max_concurrency",
        )?;

        Ok(())
    }
}

/// Manager（自動擴縮）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// 積壓觀測間隔（秒）
    pub poll_interval_secs: u64,
    /// 最少 worker 行程數
    pub min_processes: u32,
    /// 最多 worker 行程數
    pub max_processes: u32,
    /// 每個行程的處理容量（用於計算期望行程數）
    pub capacity_per_process: u32,
    /// 派發給每個 worker 行程的輪詢迴圈數
    pub worker_concurrency: u32,
    /// 派發給每個 worker 行程的輪詢間隔（毫秒）
    pub worker_poll_ms: u64,
    /// worker 可執行檔路徑
    pub worker_binary: String,
    /// 關閉時等待子行程退出的時限（秒）
    pub shutdown_timeout_secs: u64,
}

impl ManagerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Validator for ManagerConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::not_empty(&self.worker_binary, "manager.worker_binary")?;
        ValidationUtils::in_range(self.min_processes, 1, 64, "manager.min_processes")?;
        ValidationUtils::in_range(
            self.max_processes,
            self.min_processes,
            256,
            "manager.max_processes",
        )?;
        ValidationUtils::in_range(
            self.capacity_per_process,
            1,
            256,
            "manager.capacity_per_process",
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> ApplicationConfig {
        ApplicationConfig {
            database: DatabaseConfig {
                host: "localhost".into(),
                port: 5432,
                username: "user".into(),
                password: "pass".into(),
                database: "backtest".into(),
                max_connections: 10,
                min_connections: 1,
                max_lifetime_secs: 1800,
                acquire_timeout_secs: 10,
                idle_timeout_secs: 600,
            },
            log: LogConfig {
                level: "info".into(),
                format: "pretty".into(),
            },
            worker: WorkerConfig {
                concurrency: 2,
                poll_interval_ms: 1000,
                max_concurrency: 2,
                start_stagger_ms: 500,
            },
            manager: ManagerConfig {
                poll_interval_secs: 5,
                min_processes: 1,
                max_processes: 4,
                capacity_per_process: 2,
                worker_concurrency: 1,
                worker_poll_ms: 1000,
                worker_binary: "worker".into(),
                shutdown_timeout_secs: 5,
            },
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut cfg = sample_config();
        cfg.log.level = "verbose".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_max_below_min_processes_rejected() {
        let mut cfg = sample_config();
        cfg.manager.min_processes = 8;
        cfg.manager.max_processes = 2;
        assert!(cfg.validate().is_err());
    }
}
