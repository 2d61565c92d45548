use chrono::{DateTime, Duration, Utc};

use crate::config::EngineConfig;
use crate::model::{Action, OrderState, PairState, RefreshDirection, Role};

use super::pricing::refresh_entry_price;

/// `PriceTick` handling (spec.md §4.1.2): update market price/clock, then
/// scan entries for a stale-price refresh. At most one refresh fires per
/// tick.
pub fn handle_price_tick(
    state: &mut PairState,
    cfg: &EngineConfig,
    price: f64,
    at: DateTime<Utc>,
) -> Vec<Action> {
    state.market_price = price;
    state.now = at;
    state.last_price_update_at = Some(at);

    let mut actions = Vec::new();
    if price <= 0.0 {
        return actions;
    }

    let entry_indices: Vec<usize> = state
        .orders
        .iter()
        .enumerate()
        .filter(|(_, o)| o.role == Role::Entry)
        .map(|(i, _)| i)
        .collect();

    for idx in entry_indices {
        let order: OrderState = state.orders[idx].clone();
        let leg = order.trade_id;

        let drift_pct = (order.price - price).abs() / price * 100.0;
        if drift_pct <= cfg.refresh_pct {
            continue;
        }

        // Per-leg refresh cooldown: still active -> skip; just expired ->
        // reset the streak before evaluating the burst guard.
        if let Some(cooldown_until) = state.leg_state(leg).refresh_cooldown_until {
            if at < cooldown_until {
                continue;
            }
            let ls = state.leg_state_mut(leg);
            ls.consecutive_refresh = 0;
            ls.refresh_cooldown_until = None;
        }

        if state.leg_state(leg).consecutive_refresh >= cfg.max_consecutive_refreshes {
            let ls = state.leg_state_mut(leg);
            ls.refresh_cooldown_until = Some(at + Duration::seconds(cfg.refresh_cooldown_sec));
            break; // no placement this tick
        }

        let consecutive_losses = state.leg_state(leg).consecutive_losses;
        let new_price = refresh_entry_price(price, order.side, leg, cfg, consecutive_losses);
        let direction = if new_price >= order.price {
            RefreshDirection::Up
        } else {
            RefreshDirection::Down
        };

        state.orders.remove(idx);
        let new_id = state.allocate_order_id();
        state.orders.push(OrderState {
            local_id: new_id,
            side: order.side,
            role: Role::Entry,
            price: new_price,
            volume: order.volume,
            trade_id: leg,
            cycle: order.cycle,
            txid: String::new(),
            placed_at: at,
            entry_price: 0.0,
            entry_fee: 0.0,
            entry_filled_at: None,
            regime_at_entry: order.regime_at_entry,
        });

        actions.push(Action::CancelOrder {
            local_id: order.local_id,
            txid: order.txid.clone(),
            reason: "stale_refresh".to_string(),
        });
        actions.push(Action::PlaceOrder {
            local_id: new_id,
            side: order.side,
            price: new_price,
            volume: order.volume,
            trade_id: leg,
            is_entry: true,
        });

        let ls = state.leg_state_mut(leg);
        if ls.last_refresh_direction == Some(direction) {
            ls.consecutive_refresh += 1;
        } else {
            ls.consecutive_refresh = 1;
            ls.last_refresh_direction = Some(direction);
        }
        break; // at most one refresh per PriceTick
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Side, TradeLeg};
    use chrono::Utc;

    fn entry(price: f64) -> OrderState {
        OrderState {
            local_id: 1,
            side: Side::Sell,
            role: Role::Entry,
            price,
            volume: 10.0,
            trade_id: TradeLeg::A,
            cycle: 1,
            txid: "tx1".to_string(),
            placed_at: Utc::now(),
            entry_price: 0.0,
            entry_fee: 0.0,
            entry_filled_at: None,
            regime_at_entry: None,
        }
    }

    #[test]
    fn no_refresh_within_band() {
        let cfg = EngineConfig::default();
        let mut state = PairState::new(Utc::now(), 1.0);
        state.orders.push(entry(0.1001));
        let actions = handle_price_tick(&mut state, &cfg, 0.1000, Utc::now());
        assert!(actions.is_empty());
    }

    #[test]
    fn refresh_fires_past_threshold() {
        let cfg = EngineConfig {
            refresh_pct: 0.5,
            ..EngineConfig::default()
        };
        let mut state = PairState::new(Utc::now(), 1.0);
        state.orders.push(entry(0.1020));
        let actions = handle_price_tick(&mut state, &cfg, 0.1000, Utc::now());
        assert_eq!(actions.len(), 2);
        assert_eq!(state.leg_a.consecutive_refresh, 1);
    }

    #[test]
    fn at_most_one_refresh_per_tick() {
        let cfg = EngineConfig {
            refresh_pct: 0.5,
            ..EngineConfig::default()
        };
        let mut state = PairState::new(Utc::now(), 1.0);
        state.orders.push(entry(0.1020));
        let mut second = entry(0.1030);
        second.local_id = 2;
        second.trade_id = TradeLeg::B;
        second.side = Side::Buy;
        state.orders.push(second);
        let actions = handle_price_tick(&mut state, &cfg, 0.1000, Utc::now());
        assert_eq!(actions.len(), 2);
    }
}
