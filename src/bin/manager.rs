use anyhow::{anyhow, Result};
use backtest_orchestrator::config;
use backtest_orchestrator::storage::database;
use backtest_orchestrator::storage::repository::PgRunStore;
use backtest_orchestrator::supervisor::Supervisor;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化配置
    let app_config = config::init_config()?;

    // 初始化日誌系統
    init_logging(&app_config.log)?;

    // 獲取全局資料庫連線池
    let db_pool = database::get_pool(true).await?;
    let store = Arc::new(PgRunStore::new(Arc::new(db_pool.clone())));

    let (stop_tx, stop_rx) = watch::channel(false);

    // 關閉信號轉成停止旗標
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("接收到關閉信號，正在退出...");
        stop_tx.send(true).ok();
    });

    let mut supervisor = Supervisor::new(store, app_config.manager.clone());
    supervisor.run(stop_rx).await
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
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow!("設置日誌系統失敗: {}", e))?;

    Ok(())
}
