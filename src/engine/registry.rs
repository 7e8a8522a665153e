use crate::engine::types::{param_f64, param_i64, EngineError, ParamSet};
use crate::storage::models::candle::Candle;
use rust_decimal::prelude::ToPrimitive;

/// 策略特徵：逐根K線決定目標持倉（true = 持有多頭）
///
/// 策略全部為編譯期實現；不支援在行程內載入使用者提交的代碼，
/// 未知的策略鍵在入列時與評估時都會被拒絕。
pub trait Strategy: Send + std::fmt::Debug {
    fn target_position(&mut self, idx: usize, series: &[Candle]) -> bool;
}

/// 可用策略鍵列表（入列時驗證用）
pub fn available_strategies() -> &'static [&'static str] {
    &["sma", "buyhold", "rsi"]
}

/// 靜態策略註冊表：策略鍵 → 編譯期實現
pub fn create_strategy(name: &str, params: &ParamSet) -> Result<Box<dyn Strategy>, EngineError> {
    match name.trim().to_lowercase().as_str() {
        "sma" => Ok(Box::new(SmaCross::from_params(params)?)),
        "buyhold" => Ok(Box::new(BuyHold)),
        "rsi" => Ok(Box::new(RsiCross::from_params(params)?)),
        other => Err(EngineError::UnknownStrategy(
            other.to_string(),
            available_strategies().join(", "),
        )),
    }
}

fn close_f64(candle: &Candle) -> f64 {
    candle.close.to_f64().unwrap_or(0.0)
}

/// 區間收盤價簡單移動平均；樣本不足時為 None
fn sma(series: &[Candle], idx: usize, period: usize) -> Option<f64> {
    if period == 0 || idx + 1 < period {
        return None;
    }
    let window = &series[idx + 1 - period..=idx];
    Some(window.iter().map(close_f64).sum::<f64>() / period as f64)
}

/// 雙均線交叉策略：快線在慢線之上時持有
#[derive(Debug)]
pub struct SmaCross {
    fast: usize,
    slow: usize,
}

impl SmaCross {
    fn from_params(params: &ParamSet) -> Result<Self, EngineError> {
        let fast = param_i64(params, "fast", 10);
        let slow = param_i64(params, "slow", 20);
        if fast < 1 || slow < 1 {
            return Err(EngineError::InvalidParams(format!(
                "fast/slow 必須為正數 (fast={fast}, slow={slow})"
            )));
        }
        Ok(Self {
            fast: fast as usize,
            slow: slow as usize,
        })
    }
}

impl Strategy for SmaCross {
    fn target_position(&mut self, idx: usize, series: &[Candle]) -> bool {
        match (sma(series, idx, self.fast), sma(series, idx, self.slow)) {
            (Some(fast), Some(slow)) => fast > slow,
            _ => false,
        }
    }
}

/// 買入持有基準策略
#[derive(Debug)]
pub struct BuyHold;

impl Strategy for BuyHold {
    fn target_position(&mut self, _idx: usize, _series: &[Candle]) -> bool {
        true
    }
}

/// RSI 交叉策略：跌破下限進場，突破上限出場
#[derive(Debug)]
pub struct RsiCross {
    period: usize,
    lower: f64,
    upper: f64,
    holding: bool,
}

impl RsiCross {
    fn from_params(params: &ParamSet) -> Result<Self, EngineError> {
        let period = param_i64(params, "period", 14);
        if period < 2 {
            return Err(EngineError::InvalidParams(format!(
                "period 必須 >= 2 (period={period})"
            )));
        }
        Ok(Self {
            period: period as usize,
            lower: param_f64(params, "lower", 30.0),
            upper: param_f64(params, "upper", 70.0),
            holding: false,
        })
    }

    /// 簡單平均版 RSI；樣本不足時為 None
    fn rsi(&self, idx: usize, series: &[Candle]) -> Option<f64> {
        if idx < self.period {
            return None;
        }
        let mut gains = 0.0;
        let mut losses = 0.0;
        for i in idx + 1 - self.period..=idx {
            let change = close_f64(&series[i]) - close_f64(&series[i - 1]);
            if change >= 0.0 {
                gains += change;
            } else {
                losses -= change;
            }
        }
        if gains + losses == 0.0 {
            return Some(50.0);
        }
        if losses == 0.0 {
            return Some(100.0);
        }
        let rs = gains / losses;
        Some(100.0 - 100.0 / (1.0 + rs))
    }
}

impl Strategy for RsiCross {
    fn target_position(&mut self, idx: usize, series: &[Candle]) -> bool {
        if let Some(rsi) = self.rsi(idx, series) {
            if !self.holding && rsi < self.lower {
                self.holding = true;
            } else if self.holding && rsi > self.upper {
                self.holding = false;
            }
        }
        self.holding
    }
}
