use anyhow::{bail, Context, Result};
use backtest_orchestrator::config;
use backtest_orchestrator::engine::available_strategies;
use backtest_orchestrator::optimizer::{Constraint, GridSpec, Objective};
use backtest_orchestrator::storage::database;
use backtest_orchestrator::storage::models::run::{NewRun, RunType};
use backtest_orchestrator::storage::repository::{PgRunStore, RunStore};
use backtest_orchestrator::storage::PageQuery;
use clap::{Args, Parser, Subcommand};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sqlx::types::Json;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "enqueue", about = "backtest-orchestrator 任務提交工具")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// 商品ID，例如 BTC-USDT
    #[arg(long, default_value = "BTC-USDT")]
    inst: String,

    /// 時間框架：1m,5m,15m,1h,4h,1d
    #[arg(long, default_value = "1h")]
    tf: String,

    /// 策略鍵
    #[arg(long, default_value = "sma")]
    strategy: String,

    /// 起始時間 (ISO/date/epoch)
    #[arg(long)]
    since: Option<String>,

    /// 結束時間 (ISO/date/epoch)
    #[arg(long)]
    until: Option<String>,

    /// 初始資金
    #[arg(long, default_value_t = 10_000.0)]
    cash: f64,

    /// 手續費率（0.001 = 0.1%）
    #[arg(long, default_value_t = 0.001)]
    commission: f64,

    /// 滑價比例
    #[arg(long, default_value_t = 0.0)]
    slip_perc: f64,

    /// 固定滑價
    #[arg(long, default_value_t = 0.0)]
    slip_fixed: f64,
}

#[derive(Subcommand)]
enum Commands {
    /// 提交單次回測
    Backtest {
        #[command(flatten)]
        common: CommonArgs,

        /// 逗號分隔的策略參數 (key=value)，例如 fast=10,slow=20
        #[arg(long, default_value = "")]
        sp: String,

        /// 停用買入持有基準
        #[arg(long)]
        no_baseline: bool,
    },

    /// 提交網格優化
    Optimize {
        #[command(flatten)]
        common: CommonArgs,

        /// 網格規格，例如 fast=5:10:1,slow=20:30:5
        #[arg(long)]
        grid: String,

        /// 約束表達式，例如 "fast<slow"
        #[arg(long, default_value = "")]
        constraint: String,

        /// 網格評估並行度
        #[arg(long, default_value_t = 1)]
        maxcpus: u32,
    },

    /// 提交走向前優化
    WalkForward {
        #[command(flatten)]
        common: CommonArgs,

        /// 網格規格，例如 fast=5:10:1,slow=20:30:5
        #[arg(long)]
        grid: String,

        /// 約束表達式，例如 "fast<slow"
        #[arg(long, default_value = "")]
        constraint: String,

        /// 排名目標：final | sharpe | pf
        #[arg(long, default_value = "final")]
        objective: String,

        /// 訓練視窗（月）
        #[arg(long, default_value_t = 12)]
        train_months: u32,

        /// 測試視窗（月）
        #[arg(long, default_value_t = 3)]
        test_months: u32,

        /// 步長（月）
        #[arg(long, default_value_t = 3)]
        step_months: u32,

        /// 網格評估並行度
        #[arg(long, default_value_t = 1)]
        maxcpus: u32,
    },

    /// 列出最近提交的任務
    List {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// 列出可用策略
    Strategies,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    config::init_config()?;
    let pool = database::get_pool(true).await?;
    let store = PgRunStore::new(Arc::new(pool.clone()));

    match cli.command {
        Commands::Backtest {
            common,
            sp,
            no_baseline,
        } => {
            validate_strategy(&common.strategy)?;
            let mut params = common_params(&common);
            for (key, value) in parse_kv_pairs(&sp) {
                params.insert(key, value);
            }
            params.insert("baseline".into(), serde_json::json!(!no_baseline));
            let run = store
                .enqueue(new_run(RunType::Backtest, &common, params)?)
                .await?;
            println!("enqueued backtest run_id={}", run.run_id);
        }

        Commands::Optimize {
            common,
            grid,
            constraint,
            maxcpus,
        } => {
            validate_strategy(&common.strategy)?;
            GridSpec::parse(&grid).context("grid 規格無效")?;
            Constraint::parse(&constraint).context("constraint 無效")?;
            let mut params = common_params(&common);
            params.insert("grid_spec".into(), serde_json::json!(grid));
            params.insert("constraint".into(), serde_json::json!(constraint));
            params.insert("maxcpus".into(), serde_json::json!(maxcpus));
            let run = store
                .enqueue(new_run(RunType::Optimize, &common, params)?)
                .await?;
            println!("enqueued optimization run_id={}", run.run_id);
        }

        Commands::WalkForward {
            common,
            grid,
            constraint,
            objective,
            train_months,
            test_months,
            step_months,
            maxcpus,
        } => {
            validate_strategy(&common.strategy)?;
            GridSpec::parse(&grid).context("grid 規格無效")?;
            Constraint::parse(&constraint).context("constraint 無效")?;
            Objective::parse(&objective)?;
            if train_months == 0 || test_months == 0 || step_months == 0 {
                bail!("train/test/step months 必須為正數");
            }
            let mut params = common_params(&common);
            params.insert("grid_spec".into(), serde_json::json!(grid));
            params.insert("constraint".into(), serde_json::json!(constraint));
            params.insert("objective".into(), serde_json::json!(objective));
            params.insert("train_months".into(), serde_json::json!(train_months));
            params.insert("test_months".into(), serde_json::json!(test_months));
            params.insert("step_months".into(), serde_json::json!(step_months));
            params.insert("maxcpus".into(), serde_json::json!(maxcpus));
            let run = store
                .enqueue(new_run(RunType::WalkForward, &common, params)?)
                .await?;
            println!("enqueued walk-forward run_id={}", run.run_id);
        }

        Commands::List { limit } => {
            let page = store.list_recent(PageQuery::new(1, limit)).await?;
            for run in page.data {
                println!(
                    "{:>6}  {:<12} {:<10} {:>4}%  {} {} {}  {}",
                    run.run_id,
                    run.run_type,
                    run.status,
                    run.progress,
                    run.strategy,
                    run.instrument_id,
                    run.timeframe,
                    run.started_at
                );
            }
        }

        Commands::Strategies => {
            println!("Available strategies: {}", available_strategies().join(", "));
        }
    }

    Ok(())
}

/// 入列前的策略鍵驗證
fn validate_strategy(name: &str) -> Result<()> {
    let key = name.trim().to_lowercase();
    if !available_strategies().contains(&key.as_str()) {
        bail!(
            "未知策略 '{}'，可用: {}",
            name,
            available_strategies().join(", ")
        );
    }
    Ok(())
}

fn common_params(common: &CommonArgs) -> serde_json::Map<String, serde_json::Value> {
    let mut params = serde_json::Map::new();
    if let Some(since) = &common.since {
        params.insert("start_ts".into(), serde_json::json!(since));
    }
    if let Some(until) = &common.until {
        params.insert("end_ts".into(), serde_json::json!(until));
    }
    params
}

fn new_run(
    run_type: RunType,
    common: &CommonArgs,
    params: serde_json::Map<String, serde_json::Value>,
) -> Result<NewRun> {
    Ok(NewRun {
        run_type,
        strategy: common.strategy.trim().to_lowercase(),
        instrument_id: common.inst.clone(),
        timeframe: common.tf.clone(),
        params: Some(Json(serde_json::Value::Object(params))),
        cash: Decimal::from_f64(common.cash),
        commission: Decimal::from_f64(common.commission),
        slip_perc: Decimal::from_f64(common.slip_perc),
        slip_fixed: Decimal::from_f64(common.slip_fixed),
        slip_open: Some(true),
        notes: None,
    })
}

/// 解析逗號分隔的 key=value 參數，數字與布林做基本型別轉換
fn parse_kv_pairs(pairs: &str) -> Vec<(String, serde_json::Value)> {
    let mut out = Vec::new();
    for item in pairs.split(',') {
        let Some((key, value)) = item.split_once('=') else {
            continue;
        };
        let key = key.trim().to_string();
        let value = value.trim();
        if key.is_empty() || value.is_empty() {
            continue;
        }
        let parsed = match value.to_lowercase().as_str() {
            "true" => serde_json::json!(true),
            "false" => serde_json::json!(false),
            _ => {
                if let Ok(int) = value.parse::<i64>() {
                    serde_json::json!(int)
                } else if let Ok(float) = value.parse::<f64>() {
                    serde_json::json!(float)
                } else {
                    serde_json::json!(value)
                }
            }
        };
        out.push((key, parsed));
    }
    out
}
