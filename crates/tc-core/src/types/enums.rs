//! Enumerations used throughout the trust core.
//!
//! All enums serialize to the SCREAMING_SNAKE_CASE string vocabulary used in
//! the on-disk ledger logs, so records written by earlier runs replay
//! unchanged.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Order enums
// ---------------------------------------------------------------------------

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Position side on the exchange (hedge mode uses LONG/SHORT, one-way BOTH).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSide {
    Long,
    Short,
    #[default]
    Both,
}

/// Direction of a held position or a trading signal key — LONG or SHORT only.
///
/// Distinct from [`PositionSide`]: the exchange's one-way `BOTH` mode never
/// appears on ledger positions or edge-statistics keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeDirection {
    Long,
    Short,
}

impl std::fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    #[default]
    Market,
    Limit,
    StopMarket,
    TakeProfitMarket,
    TrailingStopMarket,
}

/// Order lifecycle status.
///
/// `PENDING → SUBMITTED → {PARTIALLY_FILLED → FILLED | CANCELED | REJECTED |
/// FAILED}`. Terminal states stop further mutation and evict the order from
/// the pending index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Pending,
    Submitted,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Failed,
}

impl OrderStatus {
    /// Whether this status ends the order's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Rejected | Self::Failed)
    }
}

// ---------------------------------------------------------------------------
// Position / trade enums
// ---------------------------------------------------------------------------

/// Position lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    #[default]
    Open,
    Closed,
}

/// Margin type for futures positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarginType {
    #[default]
    Isolated,
    Cross,
}

/// Why a round-trip trade was exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    MaxLossLimit,
    Manual,
    BacktestEnd,
    Timeout,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StopLoss => "stop_loss",
            Self::TakeProfit => "take_profit",
            Self::TrailingStop => "trailing_stop",
            Self::MaxLossLimit => "max_loss_limit",
            Self::Manual => "manual",
            Self::BacktestEnd => "backtest_end",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Signal enums
// ---------------------------------------------------------------------------

/// Directional decision produced by the signal source each evaluation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalAction {
    #[default]
    Hold,
    Long,
    Short,
}

impl SignalAction {
    /// The position direction this action opens, or `None` for HOLD.
    pub fn direction(self) -> Option<TradeDirection> {
        match self {
            Self::Hold => None,
            Self::Long => Some(TradeDirection::Long),
            Self::Short => Some(TradeDirection::Short),
        }
    }
}
