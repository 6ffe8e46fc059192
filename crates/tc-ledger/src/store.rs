//! Append-only trade ledger with JSONL persistence.
//!
//! One log file per entity type (orders, fills, positions, trades), one JSON
//! object per line. The store is the exclusive owner of order/position/trade
//! lifecycle transitions; in-memory indices (open positions by symbol,
//! pending orders by id) serve the hot path and are rebuilt from the logs on
//! startup via last-write-wins replay.
//!
//! # Error policy
//!
//! - I/O failures on append propagate as [`TrustError::Storage`] — callers
//!   decide retry vs. fatal, the ledger never swallows them.
//! - "Missing entity" conditions (unknown order id, closing a symbol with no
//!   open position) log a warning and no-op: a late order callback after a
//!   restart is expected, not a crash.
//! - Single unparseable log lines during replay are logged and skipped;
//!   replay keeps going. A missing log file reads as empty.
//!
//! # Single-writer contract
//!
//! The on-disk files belong to the process owning the run. All mutation goes
//! through `&mut self` on one control task; concurrent external writers are
//! unsupported and must be excluded at deployment level.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use ahash::AHashMap;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use tc_core::config::LedgerConfig;
use tc_core::error::TrustError;
use tc_core::types::{ExchangePosition, Fill, Order, OrderStatus, Position, PositionStatus, Trade};

/// Quantities closer than this are considered equal during reconciliation.
const QTY_TOLERANCE: f64 = 0.001;

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// Optional fields applied by [`LedgerStore::update_order_status`].
#[derive(Debug, Clone, Default)]
pub struct OrderStatusUpdate {
    pub exchange_order_id: Option<String>,
    pub filled_quantity: Option<f64>,
    pub avg_fill_price: Option<f64>,
    pub error_message: Option<String>,
}

/// A quantity mismatch between a local and an exchange position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantityMismatch {
    pub symbol: String,
    pub local_qty: f64,
    pub exchange_qty: f64,
    pub diff: f64,
}

/// Result of comparing local OPEN positions against the exchange snapshot.
///
/// Every symbol appearing on either side lands in exactly one of the four
/// categories.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionComparison {
    /// Present on both sides with matching quantity (within tolerance).
    pub matches: Vec<String>,
    /// Ledger believes open, exchange disagrees (local ghosts).
    pub local_only: Vec<String>,
    /// Exchange holds it, ledger doesn't know (most dangerous).
    pub exchange_only: Vec<String>,
    /// Both sides hold it, quantities differ beyond tolerance.
    pub discrepancies: Vec<QuantityMismatch>,
    /// True iff all categories except `matches` are empty.
    pub is_consistent: bool,
}

// ---------------------------------------------------------------------------
// LedgerStore
// ---------------------------------------------------------------------------

/// Append-only ledger over four JSONL entity logs.
pub struct LedgerStore {
    base_dir: PathBuf,
    orders_file: PathBuf,
    fills_file: PathBuf,
    positions_file: PathBuf,
    trades_file: PathBuf,

    // Hot-path indices; rebuilt from the logs on startup.
    open_positions: AHashMap<String, Position>,
    pending_orders: AHashMap<String, Order>,

    run_id: String,
}

impl LedgerStore {
    /// Open (or create) the ledger directory, generate a run id, and write
    /// the run manifest.
    ///
    /// `config_snapshot` is the effective configuration to freeze into the
    /// manifest for later audit.
    pub fn open(cfg: &LedgerConfig, config_snapshot: serde_json::Value) -> Result<Self, TrustError> {
        let base_dir = PathBuf::from(&cfg.base_dir);
        fs::create_dir_all(&base_dir)
            .map_err(|e| TrustError::Storage(format!("create {}: {e}", base_dir.display())))?;

        let run_id = generate_run_id();
        let store = Self {
            orders_file: base_dir.join("orders.jsonl"),
            fills_file: base_dir.join("fills.jsonl"),
            positions_file: base_dir.join("positions.jsonl"),
            trades_file: base_dir.join("trades.jsonl"),
            base_dir,
            open_positions: AHashMap::new(),
            pending_orders: AHashMap::new(),
            run_id,
        };
        store.write_run_manifest(&config_snapshot)?;
        info!(run_id = %store.run_id, dir = %store.base_dir.display(), "ledger opened");
        Ok(store)
    }

    /// The identifier stamped onto every record written by this run.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn write_run_manifest(&self, snapshot: &serde_json::Value) -> Result<(), TrustError> {
        let manifest = serde_json::json!({
            "run_id": self.run_id,
            "started_at": Utc::now().to_rfc3339(),
            "config": snapshot,
            "config_hash": config_hash(snapshot),
        });
        let path = self.base_dir.join(format!("{}_manifest.json", self.run_id));
        let body = serde_json::to_string_pretty(&manifest)
            .map_err(|e| TrustError::Storage(format!("manifest serialize: {e}")))?;
        write_atomic(&path, body.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Durable append
    // -----------------------------------------------------------------------

    /// Append one record to a JSONL log.
    ///
    /// The line is staged in a journal file and fsynced before the main-log
    /// append (also fsynced), so a crash mid-write never leaves a readable
    /// log in a corrupt state. Appends per entity type are strictly ordered:
    /// this call returns only after the record is on disk.
    fn append_jsonl<T: Serialize>(&self, path: &Path, entity: &T) -> Result<(), TrustError> {
        let mut line = serde_json::to_string(entity)
            .map_err(|e| TrustError::Storage(format!("serialize for {}: {e}", path.display())))?;
        line.push('\n');

        let journal = path.with_extension("jsonl.tmp");
        let stage = |p: &Path| -> std::io::Result<()> {
            let mut f = File::create(p)?;
            f.write_all(line.as_bytes())?;
            f.sync_all()
        };
        stage(&journal)
            .map_err(|e| TrustError::Storage(format!("journal {}: {e}", journal.display())))?;

        let append = |p: &Path| -> std::io::Result<()> {
            let mut f = OpenOptions::new().create(true).append(true).open(p)?;
            f.write_all(line.as_bytes())?;
            f.flush()?;
            f.sync_data()
        };
        append(path)
            .map_err(|e| TrustError::Storage(format!("append {}: {e}", path.display())))?;

        // Journal is only a crash-recovery staging area; removal is best-effort.
        let _ = fs::remove_file(&journal);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    /// Record a new order. Assigns an identifier and run id if absent,
    /// stamps the timestamp, appends, and indexes it as pending.
    pub fn record_order(&mut self, mut order: Order) -> Result<String, TrustError> {
        if order.order_id.is_empty() {
            order.order_id = format!("ord_{}", Uuid::new_v4().simple());
        }
        if order.run_id.is_none() {
            order.run_id = Some(self.run_id.clone());
        }
        order.timestamp = Utc::now();

        self.append_jsonl(&self.orders_file, &order)?;
        let id = order.order_id.clone();
        self.pending_orders.insert(id.clone(), order);
        Ok(id)
    }

    /// Update a pending order's status and re-append the full record.
    ///
    /// Unknown order ids are a non-fatal condition (e.g. a late callback
    /// after restart): logged as a warning, no-op. Terminal statuses evict
    /// the order from the pending index.
    pub fn update_order_status(
        &mut self,
        order_id: &str,
        status: OrderStatus,
        update: OrderStatusUpdate,
    ) -> Result<(), TrustError> {
        let Some(order) = self.pending_orders.get_mut(order_id) else {
            warn!(order_id, ?status, "order not found in pending index; ignoring update");
            return Ok(());
        };

        order.status = status;
        if let Some(xid) = update.exchange_order_id {
            order.exchange_order_id = Some(xid);
        }
        if let Some(qty) = update.filled_quantity {
            if qty > 0.0 {
                order.filled_quantity = qty;
            }
        }
        if let Some(px) = update.avg_fill_price {
            if px > 0.0 {
                order.avg_fill_price = px;
            }
        }
        if let Some(msg) = update.error_message {
            order.error_message = Some(msg);
        }

        let snapshot = order.clone();
        self.append_jsonl(&self.orders_file, &snapshot)?;

        if status.is_terminal() {
            self.pending_orders.remove(order_id);
        }
        Ok(())
    }

    /// Pending (non-terminal) orders currently indexed.
    pub fn pending_orders(&self) -> Vec<&Order> {
        self.pending_orders.values().collect()
    }

    // -----------------------------------------------------------------------
    // Fills
    // -----------------------------------------------------------------------

    /// Record a fill. Pure append — positions are updated independently via
    /// [`update_position`](Self::update_position) /
    /// [`close_position`](Self::close_position), since a fill may be partial.
    pub fn record_fill(&mut self, mut fill: Fill) -> Result<String, TrustError> {
        if fill.fill_id.is_empty() {
            fill.fill_id = format!("fill_{}", Uuid::new_v4().simple());
        }
        fill.timestamp = Utc::now();
        fill.slippage_bps = fill.computed_slippage_bps();

        self.append_jsonl(&self.fills_file, &fill)?;
        Ok(fill.fill_id)
    }

    // -----------------------------------------------------------------------
    // Positions
    // -----------------------------------------------------------------------

    /// Open a new position: assign id and run id, stamp the open time,
    /// append, and register in the open-position index.
    ///
    /// Caller contract: no OPEN position may already exist for the symbol.
    /// The index is keyed by symbol and would silently overwrite — the
    /// trading loop must check [`get_open_position`](Self::get_open_position)
    /// first.
    pub fn open_position(&mut self, mut position: Position) -> Result<String, TrustError> {
        if position.position_id.is_empty() {
            position.position_id = format!("pos_{}", Uuid::new_v4().simple());
        }
        if position.run_id.is_none() {
            position.run_id = Some(self.run_id.clone());
        }
        position.opened_at = Utc::now();
        position.status = PositionStatus::Open;

        if self.open_positions.contains_key(&position.symbol) {
            warn!(symbol = %position.symbol, "open_position over existing open position; index overwritten");
        }

        self.append_jsonl(&self.positions_file, &position)?;
        let id = position.position_id.clone();
        self.open_positions.insert(position.symbol.clone(), position);
        Ok(id)
    }

    /// Mark an open position to the latest price, recomputing unrealized PnL
    /// (direction-aware) unless the caller supplies it, and advancing the
    /// trailing extremum when a trailing stop is armed.
    ///
    /// In-memory only — the durable record is written at open and close.
    /// No-op when the symbol has no open position.
    pub fn update_position(&mut self, symbol: &str, current_price: f64, unrealized_pnl: Option<f64>) {
        let Some(pos) = self.open_positions.get_mut(symbol) else {
            return;
        };
        pos.current_price = current_price;
        pos.unrealized_pnl = unrealized_pnl.unwrap_or_else(|| pos.pnl_at(current_price));
        if pos.trailing_stop_pct.is_some() {
            pos.advance_trailing_extremum(current_price);
        }
    }

    /// Close an open position: remove from the index, compute realized PnL
    /// if not supplied, stamp CLOSED + close time, and append the final
    /// record. Returns `None` (with a warning) when no open position exists.
    pub fn close_position(
        &mut self,
        symbol: &str,
        close_price: f64,
        close_order_id: Option<String>,
        realized_pnl: Option<f64>,
    ) -> Result<Option<Position>, TrustError> {
        let Some(mut pos) = self.open_positions.remove(symbol) else {
            warn!(symbol, "no open position to close");
            return Ok(None);
        };

        pos.current_price = close_price;
        pos.closed_at = Some(Utc::now());
        pos.status = PositionStatus::Closed;
        pos.close_order_id = close_order_id;
        pos.realized_pnl = realized_pnl.unwrap_or_else(|| pos.pnl_at(close_price));

        self.append_jsonl(&self.positions_file, &pos)?;
        Ok(Some(pos))
    }

    /// Open position for a symbol, from the in-memory index. Never touches
    /// disk.
    pub fn get_open_position(&self, symbol: &str) -> Option<&Position> {
        self.open_positions.get(symbol)
    }

    /// All open positions, from the in-memory index. Never touches disk.
    pub fn get_all_open_positions(&self) -> Vec<Position> {
        self.open_positions.values().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Trades
    // -----------------------------------------------------------------------

    /// Record a completed round trip. Derives `hold_duration_sec`,
    /// `gross_pnl`, and `pnl_pct` from the supplied fields. Pure append.
    pub fn record_trade(&mut self, mut trade: Trade) -> Result<String, TrustError> {
        if trade.trade_id.is_empty() {
            trade.trade_id = format!("trade_{}", Uuid::new_v4().simple());
        }
        if trade.run_id.is_none() {
            trade.run_id = Some(self.run_id.clone());
        }

        if let Some(exit_ts) = trade.exit_timestamp {
            trade.hold_duration_sec =
                Some(tc_core::time_util::elapsed_secs(&trade.entry_timestamp, &exit_ts));
        }
        if trade.entry_quantity > 0.0 && trade.entry_price > 0.0 {
            trade.gross_pnl = trade.net_pnl + trade.commission_total;
            trade.pnl_pct = trade.net_pnl / (trade.entry_price * trade.entry_quantity);
        }

        self.append_jsonl(&self.trades_file, &trade)?;
        Ok(trade.trade_id)
    }

    // -----------------------------------------------------------------------
    // Replay / recovery
    // -----------------------------------------------------------------------

    /// Full scan of the position log. Startup/reconciliation only — not a
    /// hot-path read. A missing file reads as empty; unparseable lines are
    /// logged and skipped.
    pub fn load_all_positions(&self) -> Result<Vec<Position>, TrustError> {
        read_jsonl(&self.positions_file)
    }

    /// Latest on-disk record per symbol, kept only if its status is OPEN —
    /// the "last-write-wins" view reconciliation compares against.
    pub fn load_open_positions(&self) -> Result<AHashMap<String, Position>, TrustError> {
        let mut latest: AHashMap<String, Position> = AHashMap::new();
        for pos in self.load_all_positions()? {
            latest.insert(pos.symbol.clone(), pos);
        }
        latest.retain(|_, p| p.status == PositionStatus::Open);
        Ok(latest)
    }

    /// Rebuild the in-memory open-position index from the log.
    ///
    /// Idempotent: replaying the same log any number of times yields the same
    /// index.
    pub fn recover_open_positions(&mut self) -> Result<usize, TrustError> {
        let open = self.load_open_positions()?;
        let count = open.len();
        self.open_positions = open;
        if count > 0 {
            info!(count, "recovered open positions from ledger");
        }
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Corrective actions (used by reconciliation)
    // -----------------------------------------------------------------------

    /// Adopt a position the exchange holds but the ledger doesn't know about,
    /// treating the exchange as source of truth.
    ///
    /// Idempotent: no-op (returns `None`) when the symbol already has an open
    /// position.
    pub fn adopt_exchange_position(
        &mut self,
        exchange_pos: &ExchangePosition,
        source: &str,
    ) -> Result<Option<String>, TrustError> {
        if self.open_positions.contains_key(&exchange_pos.symbol) {
            return Ok(None);
        }

        let mut pos = Position::new(
            &exchange_pos.symbol,
            exchange_pos.position_side,
            exchange_pos.position_amt.abs(),
            exchange_pos.entry_price,
        );
        pos.leverage = exchange_pos.leverage;
        pos.note = Some(source.to_string());

        let id = self.open_position(pos)?;
        info!(symbol = %exchange_pos.symbol, position_id = %id, source, "adopted exchange position");
        Ok(Some(id))
    }

    /// Mark a local-only ghost position stale: close it at its entry price
    /// with zero realized PnL and the given note. There is no trustworthy
    /// mark for a position the exchange no longer holds.
    ///
    /// Idempotent: returns `false` when no open record remains for the
    /// symbol (in memory or on disk).
    pub fn mark_position_stale(&mut self, symbol: &str, note: &str) -> Result<bool, TrustError> {
        // The ghost may predate this run: fall back to the on-disk view.
        if !self.open_positions.contains_key(symbol) {
            let disk = self.load_open_positions()?;
            match disk.get(symbol) {
                Some(pos) => {
                    self.open_positions.insert(symbol.to_string(), pos.clone());
                }
                None => return Ok(false),
            }
        }

        let Some(mut pos) = self.open_positions.remove(symbol) else {
            return Ok(false);
        };
        pos.current_price = pos.entry_price;
        pos.closed_at = Some(Utc::now());
        pos.status = PositionStatus::Closed;
        pos.realized_pnl = 0.0;
        pos.note = Some(note.to_string());

        self.append_jsonl(&self.positions_file, &pos)?;
        info!(symbol, note, "marked local position stale");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Reconciliation comparison
    // -----------------------------------------------------------------------

    /// Compare the latest on-disk OPEN positions against the exchange
    /// snapshot.
    ///
    /// Pure classification — no state is mutated. Every symbol on either
    /// side lands in exactly one category; quantities are compared as
    /// absolute values with a tolerance of 0.001.
    pub fn reconcile_positions(
        &self,
        exchange_positions: &[ExchangePosition],
    ) -> Result<PositionComparison, TrustError> {
        let local = self.load_open_positions()?;
        let exchange: AHashMap<&str, &ExchangePosition> =
            exchange_positions.iter().map(|p| (p.symbol.as_str(), p)).collect();

        let mut cmp = PositionComparison::default();

        for (symbol, local_pos) in &local {
            match exchange.get(symbol.as_str()) {
                Some(exch_pos) => {
                    let local_qty = local_pos.quantity.abs();
                    let exch_qty = exch_pos.position_amt.abs();
                    if (local_qty - exch_qty).abs() < QTY_TOLERANCE {
                        cmp.matches.push(symbol.clone());
                    } else {
                        cmp.discrepancies.push(QuantityMismatch {
                            symbol: symbol.clone(),
                            local_qty,
                            exchange_qty: exch_qty,
                            diff: local_qty - exch_qty,
                        });
                    }
                }
                None => cmp.local_only.push(symbol.clone()),
            }
        }

        for exch_pos in exchange_positions {
            if !local.contains_key(&exch_pos.symbol) {
                cmp.exchange_only.push(exch_pos.symbol.clone());
            }
        }

        // Deterministic report ordering.
        cmp.matches.sort();
        cmp.local_only.sort();
        cmp.exchange_only.sort();
        cmp.discrepancies.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        cmp.is_consistent =
            cmp.local_only.is_empty() && cmp.exchange_only.is_empty() && cmp.discrepancies.is_empty();
        Ok(cmp)
    }
}

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

fn generate_run_id() -> String {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("run_{stamp}_{}", &suffix[..8])
}

fn config_hash(snapshot: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(snapshot.to_string().as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Write a whole file atomically: temp file + fsync + rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), TrustError> {
    let tmp = path.with_extension("tmp");
    let write = || -> std::io::Result<()> {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        fs::rename(&tmp, path)
    };
    write().map_err(|e| TrustError::Storage(format!("write {}: {e}", path.display())))
}

/// Read every parseable record from a JSONL file; missing file reads empty.
fn read_jsonl<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>, TrustError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path)
        .map_err(|e| TrustError::Storage(format!("open {}: {e}", path.display())))?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line =
            line.map_err(|e| TrustError::Storage(format!("read {}: {e}", path.display())))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(&line) {
            Ok(rec) => records.push(rec),
            Err(e) => {
                warn!(file = %path.display(), line = line_no + 1, %e, "skipping unparseable record");
            }
        }
    }
    Ok(records)
}
