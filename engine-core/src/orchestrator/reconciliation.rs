use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use crate::config::constants;
use crate::error::GatewayError;
use crate::gateway::{ExchangeGateway, OrderStatus};
use crate::model::Event;

use super::budget::ApiBudget;
use super::Slot;

/// Startup reconciliation (spec.md §4.3.1): drop unbound locals (never
/// acknowledged by the exchange), intersect tracked txids with exchange-open
/// ones, and for the complement pull trade history to synthesize the fills
/// that happened while the process was down. Every emitted fill registers
/// in `seen_fill_txids` before the caller runs it through the reducer, so a
/// crash mid-reconciliation can never double-book a cycle.
pub async fn reconcile_on_startup(
    gateway: &dyn ExchangeGateway,
    slots: &mut [Slot],
    seen_fill_txids: &mut HashSet<String>,
    budget: &mut ApiBudget,
    now: DateTime<Utc>,
) -> Result<Vec<(u64, Event)>, GatewayError> {
    for slot in slots.iter_mut() {
        slot.state.orders.retain(|o| o.has_txid());
    }

    let all_txids: Vec<String> = slots
        .iter()
        .flat_map(|slot| slot.state.orders.iter().map(|o| o.txid.clone()))
        .collect();
    if all_txids.is_empty() {
        return Ok(Vec::new());
    }

    budget.spend()?;
    let statuses = gateway.query_orders(&all_txids).await?;
    let open: HashSet<String> = statuses
        .into_iter()
        .filter(|(_, status)| *status == OrderStatus::Open)
        .map(|(txid, _)| txid)
        .collect();

    budget.spend()?;
    let since = now - Duration::days(constants::TRADE_HISTORY_LOOKBACK_DAYS);
    let history = gateway.get_trade_history(since).await?;
    let fills_by_txid: HashMap<String, _> = history.into_iter().map(|f| (f.txid.clone(), f)).collect();

    let mut synthetic_events = Vec::new();
    for slot in slots.iter() {
        for order in &slot.state.orders {
            if open.contains(&order.txid) || seen_fill_txids.contains(&order.txid) {
                continue;
            }
            if let Some(fill) = fills_by_txid.get(&order.txid) {
                seen_fill_txids.insert(order.txid.clone());
                synthetic_events.push((
                    slot.id,
                    Event::FillEvent {
                        local_id: order.local_id,
                        fill_price: fill.fill_price,
                        fee: fill.fee,
                        at: fill.filled_at,
                    },
                ));
            }
        }
    }

    Ok(synthetic_events)
}
