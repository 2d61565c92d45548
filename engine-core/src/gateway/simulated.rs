//! In-memory `ExchangeGateway` used by tests and dry-run mode. Fills
//! immediately at the requested price; never rejects.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::GatewayError;
use crate::hmm::Candle;

use super::{AggregatedFill, Balance, ExchangeGateway, OrderStatus, PlaceOrderRequest};

struct OpenOrder {
    txid: String,
    req: PlaceOrderRequest,
    placed_at: DateTime<Utc>,
}

/// Deterministic in-memory gateway: every placed order sits "open" until
/// [`SimulatedGateway::fill`] or [`SimulatedGateway::cancel_all`] resolves
/// it, and price is whatever was last set with [`SimulatedGateway::set_price`].
pub struct SimulatedGateway {
    next_txid: AtomicU64,
    price: Mutex<(f64, DateTime<Utc>)>,
    balance: Mutex<Balance>,
    open: Mutex<Vec<OpenOrder>>,
    fills: Mutex<Vec<AggregatedFill>>,
    candles: Mutex<Vec<Candle>>,
}

impl SimulatedGateway {
    pub fn new(price: f64, balance: Balance, at: DateTime<Utc>) -> Self {
        Self {
            next_txid: AtomicU64::new(1),
            price: Mutex::new((price, at)),
            balance: Mutex::new(balance),
            open: Mutex::new(Vec::new()),
            fills: Mutex::new(Vec::new()),
            candles: Mutex::new(Vec::new()),
        }
    }

    pub fn set_price(&self, price: f64, at: DateTime<Utc>) {
        *self.price.lock() = (price, at);
    }

    pub fn push_candle(&self, candle: Candle) {
        self.candles.lock().push(candle);
    }

    /// Immediately resolve the given open order as filled at its own price,
    /// recording an `AggregatedFill` that `get_trade_history` will surface.
    pub fn fill(&self, txid: &str, fee: f64, at: DateTime<Utc>) -> bool {
        let mut open = self.open.lock();
        let Some(pos) = open.iter().position(|o| o.txid == txid) else { return false };
        let order = open.remove(pos);
        self.fills.lock().push(AggregatedFill {
            txid: order.txid,
            fill_price: order.req.price,
            fee,
            filled_at: at,
        });
        true
    }
}

#[async_trait]
impl ExchangeGateway for SimulatedGateway {
    async fn get_balance(&self) -> Result<Balance, GatewayError> {
        Ok(*self.balance.lock())
    }

    async fn get_price(&self) -> Result<(f64, DateTime<Utc>), GatewayError> {
        Ok(*self.price.lock())
    }

    async fn place_order(&self, req: PlaceOrderRequest) -> Result<String, GatewayError> {
        let id = self.next_txid.fetch_add(1, Ordering::SeqCst);
        let txid = format!("sim-{id}");
        let (_, now) = *self.price.lock();
        self.open.lock().push(OpenOrder { txid: txid.clone(), req, placed_at: now });
        Ok(txid)
    }

    async fn cancel_order(&self, txid: &str) -> Result<(), GatewayError> {
        self.open.lock().retain(|o| o.txid != txid);
        Ok(())
    }

    async fn query_orders(&self, txids: &[String]) -> Result<Vec<(String, OrderStatus)>, GatewayError> {
        let open = self.open.lock();
        let filled: Vec<String> = self.fills.lock().iter().map(|f| f.txid.clone()).collect();
        Ok(txids
            .iter()
            .map(|txid| {
                let status = if open.iter().any(|o| &o.txid == txid) {
                    OrderStatus::Open
                } else if filled.contains(txid) {
                    OrderStatus::Filled
                } else {
                    OrderStatus::Unknown
                };
                (txid.clone(), status)
            })
            .collect())
    }

    async fn get_trade_history(&self, since: DateTime<Utc>) -> Result<Vec<AggregatedFill>, GatewayError> {
        Ok(self.fills.lock().iter().filter(|f| f.filled_at >= since).cloned().collect())
    }

    async fn get_ohlc(&self, _interval_sec: i64, since: DateTime<Utc>) -> Result<Vec<Candle>, GatewayError> {
        Ok(self.candles.lock().iter().filter(|c| c.closed_at >= since).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::OrderRole;
    use crate::model::Side;

    fn gateway() -> SimulatedGateway {
        SimulatedGateway::new(100.0, Balance { base: 1.0, quote: 1000.0 }, Utc::now())
    }

    #[tokio::test]
    async fn place_then_query_reports_open() {
        let gw = gateway();
        let txid = gw
            .place_order(PlaceOrderRequest { side: Side::Buy, role: OrderRole::Entry, price: 99.0, volume: 1.0, post_only: true })
            .await
            .unwrap();
        let statuses = gw.query_orders(&[txid]).await.unwrap();
        assert_eq!(statuses[0].1, OrderStatus::Open);
    }

    #[tokio::test]
    async fn fill_then_query_reports_filled_and_in_history() {
        let gw = gateway();
        let txid = gw
            .place_order(PlaceOrderRequest { side: Side::Buy, role: OrderRole::Entry, price: 99.0, volume: 1.0, post_only: true })
            .await
            .unwrap();
        let now = Utc::now();
        assert!(gw.fill(&txid, 0.1, now));
        let statuses = gw.query_orders(&[txid.clone()]).await.unwrap();
        assert_eq!(statuses[0].1, OrderStatus::Filled);
        let history = gw.get_trade_history(now - chrono::Duration::seconds(1)).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].txid, txid);
    }

    #[tokio::test]
    async fn cancel_removes_from_open_set() {
        let gw = gateway();
        let txid = gw
            .place_order(PlaceOrderRequest { side: Side::Sell, role: OrderRole::Exit, price: 101.0, volume: 1.0, post_only: true })
            .await
            .unwrap();
        gw.cancel_order(&txid).await.unwrap();
        let statuses = gw.query_orders(&[txid]).await.unwrap();
        assert_eq!(statuses[0].1, OrderStatus::Unknown);
    }
}
