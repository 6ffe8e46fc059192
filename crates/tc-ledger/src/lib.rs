//! # tc-ledger
//!
//! The local source of truth for all trading activity, plus the protocol
//! that checks it against the exchange.
//!
//! - **Ledger store** (`store`) — append-only JSONL logs for orders, fills,
//!   positions, and trades, with in-memory indices for the open-position and
//!   pending-order hot paths.
//! - **Reconciliation** (`recon`) — the startup state machine that compares
//!   ledger positions against the exchange snapshot and derives the
//!   operating mode (NORMAL / CLOSE_ONLY / EMERGENCY_STOP / OPEN_WITH_RISK).
//!
//! ## Persistence contract
//!
//! Every append is durable before the call returns: the serialized line is
//! staged in a journal file (fsync), then appended to the main log (fsync),
//! then the journal is removed. Logs are never rewritten in place —
//! corrections are new appended records for the same identifier, and readers
//! replay the log taking the last record per identifier or symbol as current
//! ("last-write-wins log replay").

pub mod recon;
pub mod store;

pub use recon::{PositionSource, ReconcileMode, ReconcileReport, ReconciliationEngine};
pub use store::{LedgerStore, OrderStatusUpdate, PositionComparison, QuantityMismatch};
