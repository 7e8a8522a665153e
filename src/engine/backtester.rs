use crate::engine::metrics;
use crate::engine::registry::create_strategy;
use crate::engine::types::{CostModel, EngineError, Evaluation, EvaluationEngine, ParamSet};
use crate::storage::models::candle::Candle;
use rust_decimal::prelude::ToPrimitive;

/// 逐根K線回測引擎
///
/// 評估引擎契約的參考實現：市價單在K線收盤成交，計入手續費與滑價，
/// 逐根記錄權益，最後由權益曲線與平倉損益計算績效指標。
pub struct BarBacktester;

impl BarBacktester {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BarBacktester {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluationEngine for BarBacktester {
    fn evaluate(
        &self,
        series: &[Candle],
        strategy: &str,
        params: &ParamSet,
        costs: &CostModel,
    ) -> Result<Evaluation, EngineError> {
        if series.is_empty() {
            return Err(EngineError::EmptySeries);
        }

        let mut strat = create_strategy(strategy, params)?;

        let mut log_lines = vec![format!(
            "Loaded {} bars from {} to {}",
            series.len(),
            series[0].ts,
            series[series.len() - 1].ts
        )];
        log_lines.push(format!("Starting Portfolio Value: {:.2}", costs.cash));

        let mut cash = costs.cash;
        let mut qty = 0.0_f64;
        let mut entry_cost = 0.0_f64;
        let mut equity_curve = Vec::with_capacity(series.len());
        let mut trade_pnls = Vec::new();

        for idx in 0..series.len() {
            let close = series[idx]
                .close
                .to_f64()
                .ok_or_else(|| EngineError::Evaluation(format!("無法轉換收盤價 (bar {idx})")))?;
            if close <= 0.0 {
                return Err(EngineError::Evaluation(format!(
                    "收盤價非正值 (bar {idx}: {close})"
                )));
            }

            let want = strat.target_position(idx, series);

            if want && qty == 0.0 {
                // 進場：滑價墊高買價，手續費從現金扣除
                let fill = close * (1.0 + costs.slip_perc) + costs.slip_fixed;
                let afford = cash / (fill * (1.0 + costs.commission));
                if afford > 0.0 {
                    qty = afford;
                    entry_cost = cash;
                    cash = 0.0;
                    log_lines.push(format!("BUY {:.6} @ {:.2}", qty, fill));
                }
            } else if !want && qty > 0.0 {
                // 出場：滑價壓低賣價，回收現金並記錄平倉損益
                let fill = (close * (1.0 - costs.slip_perc) - costs.slip_fixed).max(0.0);
                let proceeds = qty * fill * (1.0 - costs.commission);
                trade_pnls.push(proceeds - entry_cost);
                log_lines.push(format!("SELL {:.6} @ {:.2}", qty, fill));
                cash = proceeds;
                qty = 0.0;
            }

            equity_curve.push(cash + qty * close);
        }

        // 未平倉部位以最後收盤價估值，不強制平倉
        let m = metrics::compute(&equity_curve, &trade_pnls, costs.cash);
        log_lines.push(format!("Final Portfolio Value: {:.2}", m.final_value));

        Ok(Evaluation {
            final_value: m.final_value,
            metrics: m,
            log_lines,
            equity_curve: Some(equity_curve),
        })
    }
}
