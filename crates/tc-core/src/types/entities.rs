//! Ledger entities — orders, fills, positions, and round-trip trades.
//!
//! Each entity is a fixed, versioned struct persisted as one JSON line per
//! record in the append-only ledger logs. Optional fields carry
//! `#[serde(default)]` so records written by older runs (with fewer fields)
//! still parse — unknown or missing fields default, they never fail the
//! replay.
//!
//! Timestamps are `chrono::DateTime<Utc>` and serialize as ISO-8601.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{
    ExitReason, MarginType, OrderStatus, OrderType, PositionSide, PositionStatus, Side,
    TradeDirection,
};

fn unix_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// An order — the intent to trade.
///
/// Created when the trading loop decides to act, mutated by order status
/// callbacks, immutable once a terminal status is reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Locally-generated identifier (`ord_<uuid>`); assigned by the ledger
    /// when empty.
    #[serde(default)]
    pub order_id: String,
    /// Exchange-assigned identifier, once known.
    #[serde(default)]
    pub exchange_order_id: Option<String>,

    pub symbol: String,
    pub side: Side,
    #[serde(default)]
    pub position_side: PositionSide,
    #[serde(default)]
    pub order_type: OrderType,

    /// Requested base quantity.
    #[serde(default)]
    pub quantity: f64,
    /// Requested notional (quote-asset) size, if sized by notional.
    #[serde(default)]
    pub quote_quantity: Option<f64>,
    /// Limit price (market orders leave this unset).
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub stop_price: Option<f64>,

    #[serde(default)]
    pub status: OrderStatus,

    // Execution details
    #[serde(default)]
    pub filled_quantity: f64,
    #[serde(default)]
    pub avg_fill_price: f64,
    #[serde(default)]
    pub commission: f64,
    #[serde(default)]
    pub commission_asset: String,

    // Context
    #[serde(default = "unix_epoch")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub strategy_version: Option<String>,
    /// Free-form decision metadata captured at order time.
    #[serde(default)]
    pub signal_context: Option<serde_json::Value>,

    // Error tracking
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
}

impl Order {
    /// A market order with the minimum required fields set.
    pub fn market(symbol: &str, side: Side, quantity: f64) -> Self {
        Self {
            order_id: String::new(),
            exchange_order_id: None,
            symbol: symbol.to_string(),
            side,
            position_side: PositionSide::Both,
            order_type: OrderType::Market,
            quantity,
            quote_quantity: None,
            price: None,
            stop_price: None,
            status: OrderStatus::Pending,
            filled_quantity: 0.0,
            avg_fill_price: 0.0,
            commission: 0.0,
            commission_asset: String::new(),
            timestamp: Utc::now(),
            run_id: None,
            strategy_version: None,
            signal_context: None,
            error_message: None,
            retry_count: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Fill
// ---------------------------------------------------------------------------

/// A fill — one execution event belonging to an [`Order`].
///
/// Immutable once recorded. An order may have many fills (partial execution).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    /// Locally-generated identifier (`fill_<uuid>`).
    #[serde(default)]
    pub fill_id: String,
    /// Owning order identifier.
    pub order_id: String,
    #[serde(default)]
    pub exchange_trade_id: Option<String>,

    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,

    #[serde(default)]
    pub commission: f64,
    #[serde(default)]
    pub commission_asset: String,

    #[serde(default = "unix_epoch")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_maker: bool,

    /// Price the decision assumed, for slippage accounting.
    #[serde(default)]
    pub expected_price: Option<f64>,
    /// |actual − expected| / expected × 10 000; derived on write when
    /// `expected_price` is present.
    #[serde(default)]
    pub slippage_bps: Option<f64>,
}

impl Fill {
    /// Slippage in basis points against `expected_price`, if set.
    pub fn computed_slippage_bps(&self) -> Option<f64> {
        let expected = self.expected_price?;
        if expected <= 0.0 || self.price <= 0.0 {
            return None;
        }
        Some(((self.price - expected) / expected).abs() * 10_000.0)
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// A position — the current holding for one symbol.
///
/// At most one OPEN position exists per symbol at any time; the ledger's
/// open-position index is keyed by symbol to enforce this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Locally-generated identifier (`pos_<uuid>`).
    #[serde(default)]
    pub position_id: String,
    pub symbol: String,
    pub side: TradeDirection,

    /// Base quantity; always > 0 while the position is OPEN.
    pub quantity: f64,
    pub entry_price: f64,
    #[serde(default)]
    pub current_price: f64,

    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default)]
    pub margin_type: MarginType,

    #[serde(default)]
    pub unrealized_pnl: f64,
    #[serde(default)]
    pub realized_pnl: f64,

    // Risk parameters
    #[serde(default)]
    pub stop_loss_price: Option<f64>,
    #[serde(default)]
    pub take_profit_price: Option<f64>,
    #[serde(default)]
    pub trailing_stop_pct: Option<f64>,
    /// Direction-dependent price extremum since entry: the HIGHEST price seen
    /// for a LONG position, the LOWEST for a SHORT. One field, not two — the
    /// trailing-stop comparison is symmetric and reads it through
    /// [`Position::trailing_extremum`].
    #[serde(default)]
    pub extremum_price_since_entry: Option<f64>,

    // Lifecycle
    #[serde(default = "unix_epoch")]
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: PositionStatus,

    // Traceability
    #[serde(default)]
    pub open_order_id: Option<String>,
    #[serde(default)]
    pub close_order_id: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
    /// Annotation for out-of-band lifecycle events (adoption source,
    /// stale-close marker). Corrections are appended records, so the note
    /// travels with the record that introduced it.
    #[serde(default)]
    pub note: Option<String>,
}

fn default_leverage() -> u32 {
    1
}

impl Position {
    /// A new OPEN position with risk parameters left unset.
    pub fn new(symbol: &str, side: TradeDirection, quantity: f64, entry_price: f64) -> Self {
        Self {
            position_id: String::new(),
            symbol: symbol.to_string(),
            side,
            quantity,
            entry_price,
            current_price: entry_price,
            leverage: 1,
            margin_type: MarginType::Isolated,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            stop_loss_price: None,
            take_profit_price: None,
            trailing_stop_pct: None,
            extremum_price_since_entry: None,
            opened_at: Utc::now(),
            closed_at: None,
            status: PositionStatus::Open,
            open_order_id: None,
            close_order_id: None,
            run_id: None,
            note: None,
        }
    }

    /// The trailing-stop reference extremum: highest price since entry for a
    /// LONG, lowest for a SHORT. `None` until the first favourable move is
    /// observed.
    pub fn trailing_extremum(&self) -> Option<f64> {
        self.extremum_price_since_entry
    }

    /// Advance the trailing extremum if `price` is more favourable than the
    /// recorded one (higher for LONG, lower for SHORT).
    pub fn advance_trailing_extremum(&mut self, price: f64) {
        let better = match (self.side, self.extremum_price_since_entry) {
            (_, None) => true,
            (TradeDirection::Long, Some(ext)) => price > ext,
            (TradeDirection::Short, Some(ext)) => price < ext,
        };
        if better {
            self.extremum_price_since_entry = Some(price);
        }
    }

    /// Mark-to-market PnL at `price`, direction-aware.
    pub fn pnl_at(&self, price: f64) -> f64 {
        match self.side {
            TradeDirection::Long => (price - self.entry_price) * self.quantity,
            TradeDirection::Short => (self.entry_price - price) * self.quantity,
        }
    }
}

// ---------------------------------------------------------------------------
// Trade
// ---------------------------------------------------------------------------

/// A trade — one completed round trip (entry + exit), derived from a closed
/// position and its closing fill.
///
/// Created once and never mutated; the canonical unit consumed by downstream
/// performance analytics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Locally-generated identifier (`trade_<uuid>`).
    #[serde(default)]
    pub trade_id: String,
    pub symbol: String,
    pub side: TradeDirection,

    // Entry
    pub entry_quantity: f64,
    pub entry_price: f64,
    #[serde(default = "unix_epoch")]
    pub entry_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub entry_order_id: Option<String>,

    // Exit — exit_timestamp is always >= entry_timestamp for a valid trade.
    #[serde(default)]
    pub exit_quantity: f64,
    #[serde(default)]
    pub exit_price: f64,
    #[serde(default)]
    pub exit_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_order_id: Option<String>,
    #[serde(default)]
    pub exit_reason: Option<ExitReason>,

    // P&L
    #[serde(default)]
    pub gross_pnl: f64,
    #[serde(default)]
    pub commission_total: f64,
    #[serde(default)]
    pub net_pnl: f64,
    #[serde(default)]
    pub pnl_pct: f64,

    #[serde(default)]
    pub hold_duration_sec: Option<f64>,

    // Context
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub strategy_version: Option<String>,
    /// Snapshot of the feature vector at entry time.
    #[serde(default)]
    pub entry_features: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_compat_parse_with_missing_fields() {
        // A record written by an older run: only the fields that existed then.
        let line = r#"{"symbol":"BTCUSDT","side":"LONG","quantity":0.5,"entry_price":50000.0}"#;
        let pos: Position = serde_json::from_str(line).unwrap();
        assert_eq!(pos.symbol, "BTCUSDT");
        assert_eq!(pos.status, PositionStatus::Open);
        assert_eq!(pos.leverage, 1);
        assert!(pos.extremum_price_since_entry.is_none());
        assert!(pos.run_id.is_none());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let line = r#"{"order_id":"ord_1","symbol":"ETHUSDT","side":"BUY","some_future_field":42}"#;
        let order: Order = serde_json::from_str(line).unwrap();
        assert_eq!(order.order_id, "ord_1");
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[test]
    fn trailing_extremum_long_tracks_high() {
        let mut pos = Position::new("BTCUSDT", TradeDirection::Long, 1.0, 100.0);
        pos.advance_trailing_extremum(105.0);
        pos.advance_trailing_extremum(103.0); // lower, ignored
        assert_eq!(pos.trailing_extremum(), Some(105.0));
    }

    #[test]
    fn trailing_extremum_short_tracks_low() {
        let mut pos = Position::new("BTCUSDT", TradeDirection::Short, 1.0, 100.0);
        pos.advance_trailing_extremum(95.0);
        pos.advance_trailing_extremum(98.0); // higher, ignored
        assert_eq!(pos.trailing_extremum(), Some(95.0));
    }

    #[test]
    fn pnl_is_direction_aware() {
        let long = Position::new("X", TradeDirection::Long, 2.0, 100.0);
        assert_eq!(long.pnl_at(110.0), 20.0);
        let short = Position::new("X", TradeDirection::Short, 2.0, 100.0);
        assert_eq!(short.pnl_at(110.0), -20.0);
    }

    #[test]
    fn fill_slippage_derivation() {
        let mut fill = Fill {
            fill_id: String::new(),
            order_id: "ord_1".into(),
            exchange_trade_id: None,
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            quantity: 1.0,
            price: 100.1,
            commission: 0.0,
            commission_asset: String::new(),
            timestamp: Utc::now(),
            is_maker: false,
            expected_price: Some(100.0),
            slippage_bps: None,
        };
        let bps = fill.computed_slippage_bps().unwrap();
        assert!((bps - 10.0).abs() < 1e-6);
        fill.expected_price = None;
        assert!(fill.computed_slippage_bps().is_none());
    }
}
