//! Exchange gateway boundary (spec.md §6.1). The orchestrator is the only
//! caller; the reducer never sees this trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::hmm::Candle;
use crate::model::Side;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Balance {
    pub base: f64,
    pub quote: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderRole {
    Entry,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaceOrderRequest {
    pub side: Side,
    pub role: OrderRole,
    pub price: f64,
    pub volume: f64,
    pub post_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatedFill {
    pub txid: String,
    pub fill_price: f64,
    pub fee: f64,
    pub filled_at: DateTime<Utc>,
}

/// Opaque exchange boundary (spec.md §6.1). Implementations own their own
/// auth/REST/WS plumbing; the orchestrator only ever sees this surface.
/// Every call is expected to draw from the caller-supplied per-loop budget
/// before it is made — the trait itself doesn't meter calls.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn get_balance(&self) -> Result<Balance, GatewayError>;
    async fn get_price(&self) -> Result<(f64, DateTime<Utc>), GatewayError>;
    async fn place_order(&self, req: PlaceOrderRequest) -> Result<String, GatewayError>;
    async fn cancel_order(&self, txid: &str) -> Result<(), GatewayError>;
    async fn query_orders(&self, txids: &[String]) -> Result<Vec<(String, OrderStatus)>, GatewayError>;
    async fn get_trade_history(&self, since: DateTime<Utc>) -> Result<Vec<AggregatedFill>, GatewayError>;
    async fn get_ohlc(&self, interval_sec: i64, since: DateTime<Utc>) -> Result<Vec<Candle>, GatewayError>;
}

pub mod simulated;
pub use simulated::SimulatedGateway;
