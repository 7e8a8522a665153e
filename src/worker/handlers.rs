use crate::engine::types::{CostModel, ParamSet};
use crate::optimizer::constraint::Constraint;
use crate::optimizer::grid::GridSpec;
use crate::optimizer::objective::Objective;
use crate::optimizer::search::GridSearch;
use crate::optimizer::walk_forward::{WalkForwardOptimizer, WalkForwardRequest};
use crate::optimizer::EvalSink;
use crate::storage::models::run::{Run, RunStatus};
use crate::storage::models::run_log::RunLogLevel;
use crate::storage::models::run_result::RunResultInsert;
use crate::storage::repository::TimeRange;
use crate::worker::context::RunContext;
use crate::worker::poller::WorkerServices;
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use sqlx::types::Json;
use std::sync::Arc;

/// 與業務參數混放在 params 文件裡的協調用鍵，取策略參數時剔除
const META_KEYS: &[&str] = &[
    "strategy_id",
    "instrument_id",
    "bar",
    "start_ts",
    "end_ts",
    "cash",
    "commission",
    "stake",
    "plot",
    "refresh",
    "use_sizer",
    "coc",
    "baseline",
    "parallel_baseline",
    "slip_perc",
    "slip_fixed",
    "slip_open",
    "strategy",
    "strategy_name",
    "params",
    "type",
    "run_id",
    "data",
    "grid_spec",
    "constraint",
    "objective",
    "train_months",
    "test_months",
    "step_months",
    "maxcpus",
    "top_n",
];

/// 解析時間字串：epoch 秒/毫秒、YYYY-MM-DD、帶時分秒或 RFC3339
pub fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    let txt = value.trim();
    if txt.is_empty() {
        bail!("時間字串為空");
    }

    if txt.chars().all(|c| c.is_ascii_digit()) {
        let mut raw: i64 = txt.parse()?;
        if txt.len() <= 10 {
            raw *= 1000;
        }
        return Utc
            .timestamp_millis_opt(raw)
            .single()
            .ok_or_else(|| anyhow!("epoch 超出範圍: {value}"));
    }

    if let Ok(date) = NaiveDate::parse_from_str(txt, "%Y-%m-%d") {
        let dt = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow!("無效日期: {value}"))?;
        return Ok(Utc.from_utc_datetime(&dt));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(txt) {
        return Ok(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(txt, fmt) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
    }

    bail!("Unsupported time format: {value}")
}

/// 從 params 文件取出評估時間範圍；start_ts/end_ts 缺省時不設界
fn time_range(params: &serde_json::Value) -> Result<TimeRange> {
    let mut range = TimeRange::all_time();
    if let Some(start) = params.get("start_ts").and_then(|v| v.as_str()) {
        range.start = parse_time(start).context("start_ts 無法解析")?;
    }
    if let Some(end) = params.get("end_ts").and_then(|v| v.as_str()) {
        range.end = parse_time(end).context("end_ts 無法解析")?;
    }
    Ok(range)
}

/// 成本模型：欄位優先，params 文件退補，最後取預設值
fn cost_model(run: &Run, params: &serde_json::Value) -> CostModel {
    let defaults = CostModel::default();

    let from_doc = |key: &str| params.get(key).and_then(|v| v.as_f64());

    CostModel {
        cash: run
            .cash
            .and_then(|d| d.to_f64())
            .or_else(|| from_doc("cash"))
            .unwrap_or(defaults.cash),
        commission: run
            .commission
            .and_then(|d| d.to_f64())
            .or_else(|| from_doc("commission"))
            .unwrap_or(defaults.commission),
        slip_perc: run
            .slip_perc
            .and_then(|d| d.to_f64())
            .or_else(|| from_doc("slip_perc"))
            .unwrap_or(defaults.slip_perc),
        slip_fixed: run
            .slip_fixed
            .and_then(|d| d.to_f64())
            .or_else(|| from_doc("slip_fixed"))
            .unwrap_or(defaults.slip_fixed),
        slip_open: run
            .slip_open
            .or_else(|| params.get("slip_open").and_then(|v| v.as_bool()))
            .unwrap_or(defaults.slip_open),
    }
}

/// 策略參數：巢狀 "params" 與平鋪鍵合併後剔除協調用鍵
fn strategy_params(params: &serde_json::Value) -> ParamSet {
    let mut merged = ParamSet::new();
    if let Some(obj) = params.as_object() {
        for (k, v) in obj {
            merged.insert(k.clone(), v.clone());
        }
    }
    if let Some(nested) = params.get("params").and_then(|v| v.as_object()) {
        for (k, v) in nested {
            merged.insert(k.clone(), v.clone());
        }
    }
    merged.retain(|k, _| !META_KEYS.contains(&k.as_str()));
    merged
}

fn param_u32(params: &serde_json::Value, key: &str, default: u32) -> u32 {
    params
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as u32)
        .unwrap_or(default)
}

/// 解析約束；解析失敗視為「約束滿足」並記 WARN（每個任務一次）
async fn lenient_constraint(ctx: &RunContext, params: &serde_json::Value) -> Constraint {
    let raw = params
        .get("constraint")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    match Constraint::parse(raw) {
        Ok(constraint) => constraint,
        Err(err) => {
            ctx.log(
                RunLogLevel::Warn,
                format!("Constraint '{raw}' invalid ({err}), treating all candidates as satisfied"),
            )
            .await;
            Constraint::accept_all()
        }
    }
}

/// 網格評估並行度：params 的 maxcpus 覆寫配置值
fn effective_concurrency(services: &WorkerServices, params: &serde_json::Value) -> usize {
    params
        .get("maxcpus")
        .and_then(|v| v.as_u64())
        .map(|v| v.max(1) as usize)
        .unwrap_or(services.max_concurrency)
}

async fn load_series(
    ctx: &RunContext,
    services: &WorkerServices,
    run: &Run,
    params: &serde_json::Value,
) -> Result<Arc<Vec<crate::storage::models::candle::Candle>>> {
    let range = time_range(params)?;
    let series = services
        .candles
        .fetch_series(&run.instrument_id, range)
        .await
        .context("讀取K線序列失敗")?;
    if series.is_empty() {
        bail!("no candle data for given range");
    }
    ctx.log(
        RunLogLevel::Info,
        format!(
            "Loaded {} bars from {} to {}",
            series.len(),
            series[0].ts,
            series[series.len() - 1].ts
        ),
    )
    .await;
    Ok(Arc::new(series))
}

/// 單次回測 handler
pub async fn process_backtest(
    ctx: &RunContext,
    services: &WorkerServices,
    run: &Run,
) -> Result<()> {
    services
        .store
        .update_status(run.run_id, RunStatus::Running, Some(5), None)
        .await
        .context("Failed to mark running")?;
    ctx.log(
        RunLogLevel::Info,
        format!("Backtest started (run_id={})", run.run_id),
    )
    .await;

    let params = run.params_value();
    let series = load_series(ctx, services, run, &params).await?;
    ctx.progress_reporter().report_pct(20).await;

    let strat_params = strategy_params(&params);
    let costs = cost_model(run, &params);
    ctx.log(
        RunLogLevel::Info,
        format!(
            "Running backtest for strategy={}, strat_params={}",
            run.strategy,
            serde_json::to_string(&strat_params).unwrap_or_default()
        ),
    )
    .await;

    let evaluation = {
        let engine = services.engine.clone();
        let series = series.clone();
        let strategy = run.strategy.clone();
        let eval_params = strat_params.clone();
        let eval_costs = costs.clone();
        tokio::task::spawn_blocking(move || {
            engine.evaluate(&series, &strategy, &eval_params, &eval_costs)
        })
        .await??
    };
    ctx.logger()
        .forward_lines(RunLogLevel::Info, &evaluation.log_lines)
        .await;
    ctx.progress_reporter().report_pct(90).await;

    services
        .results
        .add_result(RunResultInsert {
            run_id: run.run_id,
            label: "main".to_string(),
            params: Some(Json(serde_json::to_value(&strat_params)?)),
            metrics: Some(Json(evaluation.metrics.to_json())),
            artifact_path: None,
        })
        .await?;

    // 買入持有基準；基準失敗不拖垮主結果
    let want_baseline = params
        .get("baseline")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    if want_baseline {
        let baseline = {
            let engine = services.engine.clone();
            let series = series.clone();
            let eval_costs = costs.clone();
            tokio::task::spawn_blocking(move || {
                engine.evaluate(&series, "buyhold", &ParamSet::new(), &eval_costs)
            })
            .await?
        };
        match baseline {
            Ok(eval) => {
                services
                    .results
                    .add_result(RunResultInsert {
                        run_id: run.run_id,
                        label: "baseline".to_string(),
                        params: None,
                        metrics: Some(Json(eval.metrics.to_json())),
                        artifact_path: None,
                    })
                    .await?;
            }
            Err(err) => {
                ctx.log(
                    RunLogLevel::Warn,
                    format!("Baseline evaluation failed: {err}"),
                )
                .await;
            }
        }
    }

    services
        .store
        .update_status(run.run_id, RunStatus::Succeeded, Some(100), None)
        .await?;
    ctx.log(
        RunLogLevel::Info,
        format!("Backtest finished (final={:.2})", evaluation.final_value),
    )
    .await;
    Ok(())
}

/// 網格優化 handler
pub async fn process_optimization(
    ctx: &RunContext,
    services: &WorkerServices,
    run: &Run,
) -> Result<()> {
    services
        .store
        .update_status(run.run_id, RunStatus::Running, Some(5), None)
        .await
        .context("Failed to mark running")?;
    ctx.log(
        RunLogLevel::Info,
        format!("Optimization started (run_id={})", run.run_id),
    )
    .await;

    let params = run.params_value();
    let grid_spec = params
        .get("grid_spec")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("missing required optimization parameter: grid_spec"))?;
    let grid = GridSpec::parse(grid_spec).context("grid_spec 無法解析")?;
    let constraint = lenient_constraint(ctx, &params).await;
    let costs = cost_model(run, &params);

    ctx.log(
        RunLogLevel::Info,
        format!(
            "Running optimization for strategy={}, grid={}",
            run.strategy, grid_spec
        ),
    )
    .await;

    let series = load_series(ctx, services, run, &params).await?;
    let search = GridSearch::new(
        services.engine.clone(),
        effective_concurrency(services, &params),
    );
    let summary = search
        .run(series, &run.strategy, &grid, &constraint, &costs, ctx)
        .await?;

    if summary.evaluated == 0 {
        // 約束濾光或全數失敗：任務本身成功，附註說明
        ctx.log(
            RunLogLevel::Warn,
            "Optimization completed but no results collected (possibly due to constraint or failures)"
                .to_string(),
        )
        .await;
        services
            .store
            .update_status(
                run.run_id,
                RunStatus::Succeeded,
                Some(100),
                Some("No results collected".to_string()),
            )
            .await?;
        return Ok(());
    }

    if let Some((best_params, best_value)) = &summary.best {
        ctx.log(
            RunLogLevel::Info,
            format!(
                "Best variant ({}) final={:.2} ({} evaluated, {} failed)",
                crate::optimizer::search::param_label(best_params),
                best_value,
                summary.evaluated,
                summary.failed
            ),
        )
        .await;
    }

    services
        .store
        .update_status(run.run_id, RunStatus::Succeeded, Some(100), None)
        .await?;
    Ok(())
}

/// 走向前優化 handler
pub async fn process_walk_forward(
    ctx: &RunContext,
    services: &WorkerServices,
    run: &Run,
) -> Result<()> {
    services
        .store
        .update_status(run.run_id, RunStatus::Running, Some(5), None)
        .await
        .context("Failed to mark running")?;
    ctx.log(
        RunLogLevel::Info,
        format!("WFO started (run_id={})", run.run_id),
    )
    .await;

    let params = run.params_value();
    let grid_spec = params
        .get("grid_spec")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("missing required WFO parameter: grid_spec"))?;
    let grid = GridSpec::parse(grid_spec).context("grid_spec 無法解析")?;
    let constraint = lenient_constraint(ctx, &params).await;
    let objective = Objective::parse(
        params
            .get("objective")
            .and_then(|v| v.as_str())
            .unwrap_or("final"),
    )?;

    let train_months = param_u32(&params, "train_months", 12);
    let test_months = param_u32(&params, "test_months", 3);
    let step_months = param_u32(&params, "step_months", 3);
    if train_months == 0 || test_months == 0 || step_months == 0 {
        bail!("train/test/step months 必須為正數");
    }

    ctx.log(
        RunLogLevel::Info,
        format!(
            "Running WFO for strategy={}, grid={}, train={}m test={}m step={}m obj={}",
            run.strategy,
            grid_spec,
            train_months,
            test_months,
            step_months,
            objective.as_str()
        ),
    )
    .await;

    let series = load_series(ctx, services, run, &params).await?;
    let request = WalkForwardRequest {
        strategy: run.strategy.clone(),
        grid,
        constraint,
        objective,
        train_months,
        test_months,
        step_months,
        costs: cost_model(run, &params),
        top_n: param_u32(&params, "top_n", 5) as usize,
    };

    let optimizer = WalkForwardOptimizer::new(
        services.engine.clone(),
        effective_concurrency(services, &params),
    );
    let report = optimizer.run(series, &request, ctx).await?;

    if report.fold_count == 0 {
        ctx.log(
            RunLogLevel::Warn,
            "WFO completed but no folds produced (check date ranges and window sizes)".to_string(),
        )
        .await;
        services
            .store
            .update_status(
                run.run_id,
                RunStatus::Succeeded,
                Some(100),
                Some("No folds produced".to_string()),
            )
            .await?;
        return Ok(());
    }

    let summary = serde_json::json!({
        "objective": objective.as_str(),
        "fold_count": report.fold_count,
        "mean_oos_objective": report.mean_oos_objective,
        "top_folds": report
            .top_folds
            .iter()
            .map(|t| serde_json::json!({"fold_index": t.fold_index, "oos_objective": t.oos_objective}))
            .collect::<Vec<_>>(),
    });
    services
        .results
        .add_result(RunResultInsert {
            run_id: run.run_id,
            label: "main".to_string(),
            params: None,
            metrics: Some(Json(summary)),
            artifact_path: None,
        })
        .await?;

    ctx.log(
        RunLogLevel::Info,
        format!(
            "WFO finished: {} folds, mean OOS {}={:.4}",
            report.fold_count,
            objective.as_str(),
            report.mean_oos_objective.unwrap_or(f64::NAN)
        ),
    )
    .await;
    services
        .store
        .update_status(run.run_id, RunStatus::Succeeded, Some(100), None)
        .await?;
    Ok(())
}
