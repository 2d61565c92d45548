use crate::config::EngineConfig;
use crate::model::{Side, TradeLeg};

/// Round `value` to `decimals` fractional digits (spec.md boundary scenario
/// 1 uses `round_6`; `decimals` is `cfg.price_decimals`/`cfg.volume_decimals`
/// depending on call site).
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Exit price formula, bit-exact per spec.md §4.1.4:
///
/// - exit side sell: `max(entry·(1+p), market·(1+e))`
/// - exit side buy:  `min(entry·(1−p), market·(1−e))`
///
/// where `p = profit_pct_runtime/100` and `e = entry_pct/100` for the leg.
/// Post-rounded to `price_decimals`.
pub fn exit_price(
    entry_fill: f64,
    market: f64,
    exit_side: Side,
    leg: TradeLeg,
    cfg: &EngineConfig,
    profit_pct_runtime: f64,
) -> f64 {
    let p = profit_pct_runtime / 100.0;
    let e = cfg.entry_pct_for_leg(leg) / 100.0;
    let raw = match exit_side {
        Side::Sell => (entry_fill * (1.0 + p)).max(market * (1.0 + e)),
        Side::Buy => (entry_fill * (1.0 - p)).min(market * (1.0 - e)),
    };
    round_to(raw, cfg.price_decimals)
}

/// Refresh/bootstrap entry price: `round(market·(1 ∓ p_eff))` where
/// `p_eff = base_entry_pct_for_leg · backoff_multiplier(losses) / 100`
/// (spec.md §4.1.2). Sell entries sit above market, buy entries below.
pub fn refresh_entry_price(
    market: f64,
    entry_side: Side,
    leg: TradeLeg,
    cfg: &EngineConfig,
    consecutive_losses: u32,
) -> f64 {
    let p_eff = cfg.entry_pct_for_leg(leg) * cfg.backoff_multiplier(consecutive_losses) / 100.0;
    let raw = match entry_side {
        Side::Sell => market * (1.0 + p_eff),
        Side::Buy => market * (1.0 - p_eff),
    };
    round_to(raw, cfg.price_decimals)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_scenario_1_sell_entry_buy_exit() {
        let cfg = EngineConfig {
            entry_pct: 0.2,
            profit_pct: 1.0,
            ..EngineConfig::default()
        };
        let px = exit_price(0.1000, 0.1000, Side::Buy, TradeLeg::A, &cfg, cfg.profit_pct);
        assert_eq!(px, 0.099000);
    }

    #[test]
    fn round_to_matches_decimals() {
        assert_eq!(round_to(0.0989995, 6), 0.099);
        assert_eq!(round_to(12.3456, 2), 12.35);
    }
}
