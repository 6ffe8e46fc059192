//! # tc-edge
//!
//! Edge-based admission control for trade entries.
//!
//! - **EdgeStats** (`stats`) — rolling per-(symbol, direction, timeframe)
//!   windows of historical net-edge observations, with percentile-rank
//!   lookups. Only compares like with like: a BTCUSDT LONG 15m signal is
//!   ranked against BTCUSDT LONG 15m history, nothing else.
//! - **Edge Gate** (`gate`) — a pure decision function mapping
//!   (net_edge, confidence, percentile) to BLOCK / PROBE / FULL with a
//!   position-size multiplier.
//! - **Diagnostics** (`diagnostics`) — decision counters and a best-effort
//!   JSONL sink, for tuning thresholds when the gate blocks everything.
//!
//! Edges are recorded at decision time, before the trade outcome is known.
//! Recording on outcome would leak the future into the percentile baseline.

pub mod diagnostics;
pub mod gate;
pub mod stats;

pub use diagnostics::{DecisionRecord, DiagnosticsSummary, GateDiagnostics};
pub use gate::{net_edge, required_gross_edge, EdgeGate, GateDecision, GateState};
pub use stats::{EdgeContext, EdgeKey, EdgeRecord, EdgeStats, EdgeSummary};
