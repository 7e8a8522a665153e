use serde::{Deserialize, Serialize};

/// 年化係數：以日線等效波動折算 Sharpe
const ANNUALIZATION_PERIODS: f64 = 252.0;

/// 績效指標文件
///
/// 寫入 run_results / optimization_variants / wfo_folds 的 metrics 欄位。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub final_value: f64,
    pub pnl: f64,
    pub return_pct: f64,
    pub sharpe: Option<f64>,
    pub max_drawdown_pct: f64,
    pub sqn: Option<f64>,
    pub win_rate: Option<f64>,
    pub profit_factor: Option<f64>,
    pub total_trades: u32,
    pub won_trades: u32,
    pub lost_trades: u32,
}

impl PerformanceMetrics {
    /// 轉成 JSON 文件（儲存層的 metrics 欄位格式）
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// 由權益曲線與已平倉交易損益計算績效指標
pub fn compute(equity_curve: &[f64], trade_pnls: &[f64], starting_cash: f64) -> PerformanceMetrics {
    let final_value = equity_curve.last().copied().unwrap_or(starting_cash);
    let pnl = final_value - starting_cash;
    let return_pct = if starting_cash > 0.0 {
        pnl / starting_cash * 100.0
    } else {
        0.0
    };

    let total_trades = trade_pnls.len() as u32;
    let won: Vec<f64> = trade_pnls.iter().copied().filter(|p| *p > 0.0).collect();
    let lost: Vec<f64> = trade_pnls.iter().copied().filter(|p| *p < 0.0).collect();

    let win_rate = if total_trades > 0 {
        Some(won.len() as f64 / total_trades as f64)
    } else {
        None
    };

    let gross_profit: f64 = won.iter().sum();
    let gross_loss: f64 = lost.iter().map(|p| p.abs()).sum();
    let profit_factor = if gross_loss > 0.0 {
        Some(gross_profit / gross_loss)
    } else {
        None
    };

    PerformanceMetrics {
        final_value,
        pnl,
        return_pct,
        sharpe: sharpe_ratio(equity_curve),
        max_drawdown_pct: max_drawdown(equity_curve),
        sqn: sqn(trade_pnls),
        win_rate,
        profit_factor,
        total_trades,
        won_trades: won.len() as u32,
        lost_trades: lost.len() as u32,
    }
}

/// 權益曲線的最大回撤（百分比，正值）
pub fn max_drawdown(equity_curve: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0_f64;
    for &value in equity_curve {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let dd = (peak - value) / peak * 100.0;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

/// 年化 Sharpe（無風險利率取 0）；樣本不足或零波動時為 None
pub fn sharpe_ratio(equity_curve: &[f64]) -> Option<f64> {
    if equity_curve.len() < 3 {
        return None;
    }
    let returns: Vec<f64> = equity_curve
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect();
    let (mean, std) = mean_std(&returns)?;
    if std == 0.0 {
        return None;
    }
    Some(mean / std * ANNUALIZATION_PERIODS.sqrt())
}

/// System Quality Number：sqrt(n) * mean(pnl) / std(pnl)
pub fn sqn(trade_pnls: &[f64]) -> Option<f64> {
    let (mean, std) = mean_std(trade_pnls)?;
    if std == 0.0 {
        return None;
    }
    Some((trade_pnls.len() as f64).sqrt() * mean / std)
}

fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some((mean, var.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_drawdown_of_monotone_curve_is_zero() {
        assert_eq!(max_drawdown(&[100.0, 110.0, 120.0]), 0.0);
    }

    #[test]
    fn test_max_drawdown_measures_worst_peak_to_trough() {
        // 峰值 200，谷值 100 → 50%
        let dd = max_drawdown(&[100.0, 200.0, 100.0, 150.0]);
        assert!((dd - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_profit_factor_and_win_rate() {
        let m = compute(&[10_000.0, 10_300.0], &[200.0, -100.0, 100.0], 10_000.0);
        assert_eq!(m.total_trades, 3);
        assert_eq!(m.won_trades, 2);
        assert_eq!(m.lost_trades, 1);
        assert!((m.win_rate.unwrap() - 2.0 / 3.0).abs() < 1e-9);
        assert!((m.profit_factor.unwrap() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_flat_curve_has_no_sharpe() {
        assert!(sharpe_ratio(&[100.0, 100.0, 100.0]).is_none());
    }

    #[test]
    fn test_empty_trades_give_no_trade_stats() {
        let m = compute(&[10_000.0, 10_100.0], &[], 10_000.0);
        assert_eq!(m.total_trades, 0);
        assert!(m.win_rate.is_none());
        assert!(m.sqn.is_none());
    }
}
