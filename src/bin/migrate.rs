use anyhow::{Context, Result};
use backtest_orchestrator::config;
use backtest_orchestrator::storage::{self, database};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "migrate", about = "backtest-orchestrator 數據庫遷移工具")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 運行所有未應用的遷移
    Run,

    /// 檢查遷移狀態
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    config::init_config()?;
    let pool = database::get_pool(true).await.context("無法連接資料庫")?;

    match cli.command {
        Commands::Run => {
            storage::run_migrations(pool).await?;
            info!("遷移執行完成");
        }
        Commands::Status => {
            let applied: Vec<(i64, String, DateTime<Utc>)> = sqlx::query_as(
                "SELECT version, description, installed_on FROM _sqlx_migrations ORDER BY version",
            )
            .fetch_all(pool)
            .await
            .context("無法讀取遷移狀態（資料庫可能尚未初始化）")?;

            if applied.is_empty() {
                println!("尚未應用任何遷移");
            }
            for (version, description, installed_on) in applied {
                println!("{version}  {description}  (applied {installed_on})");
            }
        }
    }

    Ok(())
}
