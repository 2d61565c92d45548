//! Core data model (spec.md §3).
//!
//! Small `Copy` enums for tags, explicit structs for the richer records, no
//! open class hierarchy — events and actions are closed sum types matched
//! exhaustively in the reducer (spec.md §9).

mod events;
mod orders;
mod pair_state;

pub use events::{Action, Event};
pub use orders::{CycleRecord, OrderState, RecoveryOrder};
pub use pair_state::{LegState, PairState};
// RefreshDirection is defined below and re-exported implicitly (same module).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Which way a stale-entry refresh moved the order price
/// (spec.md §4.1.2: "direction is recorded; consecutive_refresh increments
/// when direction repeats, else resets to 1").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshDirection {
    Up,
    Down,
}

/// Role an order plays within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Entry,
    Exit,
}

/// Which leg of the paired strategy an order/cycle belongs to.
///
/// A is the short leg (sell to open, buy to close); B is the long leg (buy
/// to open, sell to close).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeLeg {
    A,
    B,
}

impl fmt::Display for TradeLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeLeg::A => write!(f, "A"),
            TradeLeg::B => write!(f, "B"),
        }
    }
}

impl TradeLeg {
    /// Side an *entry* order takes for this leg.
    pub fn entry_side(self) -> Side {
        match self {
            TradeLeg::A => Side::Sell,
            TradeLeg::B => Side::Buy,
        }
    }

    /// Side an *exit* order takes for this leg (always entry's opposite).
    pub fn exit_side(self) -> Side {
        self.entry_side().opposite()
    }
}

/// Structural phase, derived from a slot's orders — never stored directly
/// (spec.md §4.1.1, invariant 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// No exits: waiting to establish entries (shape depends on mode flags).
    S0,
    /// One buy-exit and one buy-entry (A leg orphaned/refreshed into
    /// re-entry while B's exit stands).
    S1a,
    /// One sell-exit and one sell-entry.
    S1b,
    /// One buy-exit and one sell-exit, no entries: both legs hedged.
    S2,
}

/// Why a degraded single-leg S0 shape is currently active
/// (spec.md §4.1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ModeSource {
    #[default]
    None,
    Balance,
    Regime,
}

/// Derive the structural phase from a slot's active orders and mode flags
/// (spec.md §3 invariant 2). Phase is never stored — always recomputed.
pub fn derive_phase(orders: &[OrderState], long_only: bool, short_only: bool) -> Phase {
    let buy_exit = orders.iter().any(|o| o.role == Role::Exit && o.side == Side::Buy);
    let sell_exit = orders.iter().any(|o| o.role == Role::Exit && o.side == Side::Sell);
    let buy_entry = orders.iter().any(|o| o.role == Role::Entry && o.side == Side::Buy);
    let sell_entry = orders.iter().any(|o| o.role == Role::Entry && o.side == Side::Sell);

    if buy_exit && sell_exit {
        return Phase::S2;
    }
    if buy_exit && buy_entry {
        return Phase::S1a;
    }
    if sell_exit && sell_entry {
        return Phase::S1b;
    }
    let _ = (long_only, short_only);
    Phase::S0
}
