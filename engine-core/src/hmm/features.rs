use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One closed OHLCV bar (spec.md §6.1 `get_ohlc`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub closed_at: DateTime<Utc>,
}

/// Four real-valued observations per candle (spec.md §4.6 "Features"):
/// MACD-histogram slope, EMA-spread %, RSI zone, volume ratio.
pub type FeatureVector = [f64; 4];

const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;
const SPREAD_FAST: usize = 10;
const SPREAD_SLOW: usize = 50;
const RSI_PERIOD: usize = 14;
const VOLUME_LOOKBACK: usize = 20;

fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev = values[0];
    out.push(prev);
    for &v in &values[1..] {
        prev += alpha * (v - prev);
        out.push(prev);
    }
    out
}

fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![50.0; closes.len()];
    if closes.len() < 2 {
        return out;
    }
    let mut gains = vec![0.0; closes.len()];
    let mut losses = vec![0.0; closes.len()];
    for i in 1..closes.len() {
        let delta = closes[i] - closes[i - 1];
        gains[i] = delta.max(0.0);
        losses[i] = (-delta).max(0.0);
    }
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..closes.len() {
        if i <= period {
            avg_gain += gains[i] / period as f64;
            avg_loss += losses[i] / period as f64;
        } else {
            avg_gain = (avg_gain * (period as f64 - 1.0) + gains[i]) / period as f64;
            avg_loss = (avg_loss * (period as f64 - 1.0) + losses[i]) / period as f64;
        }
        let rs = if avg_loss > 1e-12 { avg_gain / avg_loss } else { f64::INFINITY };
        out[i] = 100.0 - 100.0 / (1.0 + rs);
    }
    out
}

/// Bucket RSI into {oversold: −1, neutral: 0, overbought: +1}.
fn rsi_zone(rsi: f64) -> f64 {
    if rsi < 30.0 {
        -1.0
    } else if rsi > 70.0 {
        1.0
    } else {
        0.0
    }
}

/// Extract one feature vector per candle. Needs enough history to seed the
/// slow EMA/RSI/volume lookback; early candles degrade gracefully (EMAs
/// seeded from the first close, RSI defaults to neutral).
pub fn extract_features(candles: &[Candle]) -> Vec<FeatureVector> {
    if candles.is_empty() {
        return Vec::new();
    }
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

    let ema_fast_macd = ema_series(&closes, MACD_FAST);
    let ema_slow_macd = ema_series(&closes, MACD_SLOW);
    let macd: Vec<f64> = ema_fast_macd
        .iter()
        .zip(ema_slow_macd.iter())
        .map(|(f, s)| f - s)
        .collect();
    let signal = ema_series(&macd, MACD_SIGNAL);
    let hist: Vec<f64> = macd.iter().zip(signal.iter()).map(|(m, s)| m - s).collect();

    let ema_spread_fast = ema_series(&closes, SPREAD_FAST);
    let ema_spread_slow = ema_series(&closes, SPREAD_SLOW);

    let rsi = rsi_series(&closes, RSI_PERIOD);

    let mut out = Vec::with_capacity(candles.len());
    for i in 0..candles.len() {
        let hist_slope = if i == 0 { 0.0 } else { hist[i] - hist[i - 1] };
        let spread_slow = ema_spread_slow[i];
        let ema_spread_pct = if spread_slow.abs() > 1e-12 {
            (ema_spread_fast[i] - spread_slow) / spread_slow * 100.0
        } else {
            0.0
        };
        let zone = rsi_zone(rsi[i]);
        let window_start = i.saturating_sub(VOLUME_LOOKBACK - 1);
        let avg_volume = volumes[window_start..=i].iter().sum::<f64>() / (i - window_start + 1) as f64;
        let volume_ratio = if avg_volume > 1e-12 { volumes[i] / avg_volume } else { 1.0 };

        out.push([hist_slope, ema_spread_pct, zone, volume_ratio]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(close: f64, volume: f64, at: DateTime<Utc>) -> Candle {
        Candle { open: close, high: close, low: close, close, volume, closed_at: at }
    }

    #[test]
    fn extract_features_matches_candle_count() {
        let now = Utc::now();
        let candles: Vec<Candle> = (0..40)
            .map(|i| candle(100.0 + i as f64, 10.0, now + chrono::Duration::minutes(i)))
            .collect();
        let features = extract_features(&candles);
        assert_eq!(features.len(), candles.len());
    }

    #[test]
    fn uptrend_produces_positive_ema_spread() {
        let now = Utc::now();
        let candles: Vec<Candle> = (0..80)
            .map(|i| candle(100.0 + i as f64 * 0.5, 10.0, now + chrono::Duration::minutes(i)))
            .collect();
        let features = extract_features(&candles);
        let last = features.last().unwrap();
        assert!(last[1] > 0.0);
    }
}
