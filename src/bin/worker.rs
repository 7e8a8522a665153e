use anyhow::{anyhow, Result};
use backtest_orchestrator::config;
use backtest_orchestrator::engine::BarBacktester;
use backtest_orchestrator::storage::repository::{
    PgCandleRepository, PgOptimizationVariantRepository, PgRunLogRepository,
    PgRunResultRepository, PgRunStore, PgWfoFoldRepository,
};
use backtest_orchestrator::storage::{self, database};
use backtest_orchestrator::worker::{WorkerLoop, WorkerServices};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化配置
    let app_config = config::init_config()?;

    // 初始化日誌系統
    init_logging(&app_config.log)?;

    // 獲取全局資料庫連線池
    let db_pool = database::get_pool(true).await?;

    // 執行資料庫遷移
    storage::run_migrations(db_pool).await?;

    let pool = Arc::new(db_pool.clone());
    let services = WorkerServices {
        store: Arc::new(PgRunStore::new(pool.clone())),
        logs: Arc::new(PgRunLogRepository::new(pool.clone())),
        results: Arc::new(PgRunResultRepository::new(pool.clone())),
        variants: Arc::new(PgOptimizationVariantRepository::new(pool.clone())),
        folds: Arc::new(PgWfoFoldRepository::new(pool.clone())),
        candles: Arc::new(PgCandleRepository::new(pool)),
        engine: Arc::new(BarBacktester::new()),
        max_concurrency: app_config.worker.max_concurrency as usize,
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut handles = Vec::new();

    // 錯開啟動多個輪詢迴圈
    for worker_id in 0..app_config.worker.concurrency {
        let worker_loop = WorkerLoop::new(
            worker_id,
            services.clone(),
            app_config.worker.poll_interval(),
            stop_rx.clone(),
        );
        handles.push(tokio::spawn(worker_loop.run()));
        tokio::time::sleep(app_config.worker.start_stagger()).await;
    }
    info!("All workers started (total={})", app_config.worker.concurrency);

    // 等待關閉信號
    shutdown_signal().await;
    info!("Stopping workers...");
    stop_tx.send(true).ok();

    for handle in handles {
        if let Err(err) = handle.await {
            error!("worker 迴圈異常結束: {err}");
        }
    }

    Ok(())
}

/// 等待 SIGINT 或 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("無法監聽 SIGINT");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("無法監聽 SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// 初始化日誌系統
fn init_logging(log_config: &config::LogConfig) -> Result<()> {
    let level = match log_config.level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO, // 默認為INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow!("設置日誌系統失敗: {}", e))?;

    Ok(())
}
