//! Exchange-side snapshots consumed by reconciliation.

use serde::{Deserialize, Serialize};

use super::enums::TradeDirection;

/// One open position as reported by the exchange.
///
/// The position-query layer filters out zero-amount entries before these
/// reach the core, so `position_amt` is always non-zero here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: String,
    /// Signed position amount: positive = long, negative = short.
    pub position_amt: f64,
    #[serde(default)]
    pub entry_price: f64,
    pub position_side: TradeDirection,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
}

fn default_leverage() -> u32 {
    1
}

impl ExchangePosition {
    /// Direction inferred from the signed amount when the exchange omits the
    /// position side.
    pub fn direction_from_amount(amt: f64) -> TradeDirection {
        if amt >= 0.0 { TradeDirection::Long } else { TradeDirection::Short }
    }
}
