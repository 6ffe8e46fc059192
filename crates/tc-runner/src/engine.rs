//! The round-based trading loop.
//!
//! Each round fans per-symbol market data out to a bounded prefetch pool,
//! then processes symbols sequentially on the control task. Only the
//! prefetch is concurrent; every ledger and edge-stats mutation happens on
//! this one task, so the in-memory indices need no locking.
//!
//! Per symbol, per round:
//! - an open position is marked to the latest price and checked against its
//!   stop-loss / take-profit / trailing-stop levels (closes are allowed in
//!   NORMAL and CLOSE_ONLY);
//! - otherwise an entry is considered: operating mode and warmup gate first,
//!   then the signal, the net-edge computation, the percentile lookup, and
//!   the admission gate. The edge is recorded at decision time, before any
//!   outcome exists.

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use tracing::{debug, error, info, warn};

use tc_core::config::{CostModel, EdgeConfig, RunnerConfig};
use tc_core::error::TrustError;
use tc_core::types::{
    ExitReason, Fill, Order, OrderStatus, Position, Side, Trade, TradeDirection,
};
use tc_edge::gate::{net_edge, GateState};
use tc_edge::{EdgeContext, EdgeGate, EdgeKey, EdgeStats, GateDiagnostics};
use tc_ledger::{LedgerStore, OrderStatusUpdate, ReconcileMode};

use crate::exchange::{MarketData, OrderRouter};
use crate::signal::{compute_features, Features, SignalSource};

/// Klines fetched per symbol per round.
const KLINE_LOOKBACK: usize = 50;

/// PROBE entries run a stop at this fraction of the configured distance.
const PROBE_STOP_FACTOR: f64 = 0.7;

// ---------------------------------------------------------------------------
// Paper execution
// ---------------------------------------------------------------------------

/// Simulated execution: fills at the decision mark and charges the estimated
/// taker fee on the notional.
pub struct PaperRouter {
    costs: CostModel,
}

impl PaperRouter {
    pub fn new(costs: CostModel) -> Self {
        Self { costs }
    }
}

#[async_trait]
impl OrderRouter for PaperRouter {
    async fn execute_market(
        &self,
        _symbol: &str,
        _side: Side,
        quantity: f64,
        _reduce_only: bool,
        expected_price: f64,
    ) -> Result<crate::exchange::ExecutionReport, TrustError> {
        Ok(crate::exchange::ExecutionReport {
            exchange_order_id: None,
            fill_price: expected_price,
            commission: expected_price * quantity * self.costs.taker_fee_pct,
        })
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct SymbolPack {
    price: f64,
    features: Features,
}

/// Owns the ledger, edge state, and the per-round control flow.
pub struct TradingEngine {
    cfg: RunnerConfig,
    costs: CostModel,
    ledger: LedgerStore,
    stats: EdgeStats,
    gate: EdgeGate,
    diagnostics: GateDiagnostics,
    mode: ReconcileMode,
    market: Arc<dyn MarketData>,
    signal: Arc<dyn SignalSource>,
    router: Arc<dyn OrderRouter>,
    started_at: DateTime<Utc>,
    round: u64,
}

impl TradingEngine {
    /// `mode` must come from a completed reconciliation pass (or the paper
    /// default); entries are never evaluated before a mode exists.
    pub fn new(
        cfg: RunnerConfig,
        edge_cfg: &EdgeConfig,
        ledger: LedgerStore,
        mode: ReconcileMode,
        market: Arc<dyn MarketData>,
        signal: Arc<dyn SignalSource>,
        router: Arc<dyn OrderRouter>,
    ) -> Self {
        Self {
            costs: edge_cfg.costs.clone(),
            stats: EdgeStats::new(edge_cfg),
            gate: EdgeGate::new(edge_cfg.gate.clone()),
            diagnostics: GateDiagnostics::new(edge_cfg.diagnostics_path.as_deref()),
            cfg,
            ledger,
            mode,
            market,
            signal,
            router,
            started_at: Utc::now(),
            round: 0,
        }
    }

    pub fn mode(&self) -> ReconcileMode {
        self.mode
    }

    /// Run one full round: prefetch, then sequential per-symbol handling.
    pub async fn run_round(&mut self) {
        self.round += 1;
        let round = self.round;
        debug!(round, "round started");

        let packs = self.prefetch().await;

        let elapsed_min = (Utc::now() - self.started_at).num_seconds() as f64 / 60.0;
        let in_warmup = elapsed_min < self.cfg.warmup_minutes as f64;
        if in_warmup {
            info!(round, elapsed_min, "warmup window; monitoring only, no new entries");
        }

        for symbol in self.cfg.symbols.clone() {
            let Some(pack) = packs.get(&symbol) else {
                continue; // fetch failed or timed out; skipped this round
            };
            if let Err(e) = self.handle_symbol(&symbol, pack, in_warmup).await {
                error!(symbol, %e, "symbol handling failed");
            }
        }
        debug!(round, symbols = packs.len(), "round finished");
    }

    /// Persist edge history and report gate statistics. Called on shutdown.
    pub fn shutdown(&self) {
        self.stats.save_snapshot();
        let summary = self.diagnostics.summary();
        info!(
            total = summary.total_decisions,
            blocks = summary.block_count,
            probes = summary.probe_count,
            fulls = summary.full_count,
            "gate decision summary"
        );
    }

    // -----------------------------------------------------------------------
    // Prefetch
    // -----------------------------------------------------------------------

    /// Fan per-symbol fetches out to a bounded pool with a per-symbol
    /// timeout. A failed or timed-out symbol is skipped for the round and
    /// never blocks the batch.
    async fn prefetch(&self) -> AHashMap<String, SymbolPack> {
        let timeout = Duration::from_secs(self.cfg.fetch_timeout_secs);
        let interval = self.cfg.timeframe.clone();

        let fetches = self.cfg.symbols.iter().cloned().map(|symbol| {
            let market = Arc::clone(&self.market);
            let interval = interval.clone();
            async move {
                let result =
                    tokio::time::timeout(timeout, fetch_pack(market.as_ref(), &symbol, &interval))
                        .await;
                (symbol, result)
            }
        });

        let mut packs = AHashMap::new();
        let mut results = stream::iter(fetches).buffer_unordered(self.cfg.batch_concurrency.max(1));
        while let Some((symbol, result)) = results.next().await {
            match result {
                Ok(Ok(pack)) => {
                    packs.insert(symbol, pack);
                }
                Ok(Err(e)) => warn!(symbol, %e, "prefetch failed; skipping symbol this round"),
                Err(_) => warn!(symbol, "prefetch timed out; skipping symbol this round"),
            }
        }
        packs
    }

    // -----------------------------------------------------------------------
    // Per-symbol handling
    // -----------------------------------------------------------------------

    async fn handle_symbol(
        &mut self,
        symbol: &str,
        pack: &SymbolPack,
        in_warmup: bool,
    ) -> Result<(), TrustError> {
        if self.ledger.get_open_position(symbol).is_some() {
            self.manage_open_position(symbol, pack.price).await
        } else {
            self.consider_entry(symbol, pack, in_warmup).await
        }
    }

    async fn manage_open_position(&mut self, symbol: &str, price: f64) -> Result<(), TrustError> {
        self.ledger.update_position(symbol, price, None);

        if !self.mode.can_close_positions() {
            warn!(symbol, mode = %self.mode, "exit execution suspended by operating mode");
            return Ok(());
        }

        let Some(pos) = self.ledger.get_open_position(symbol) else {
            return Ok(());
        };
        let Some(reason) = check_exit(pos, price) else {
            return Ok(());
        };
        let pos = pos.clone();
        info!(symbol, reason = %reason, price, entry = pos.entry_price, "exit condition met");
        self.close_position(&pos, price, reason).await
    }

    async fn close_position(
        &mut self,
        pos: &Position,
        price: f64,
        reason: ExitReason,
    ) -> Result<(), TrustError> {
        let close_side = match pos.side {
            TradeDirection::Long => Side::Sell,
            TradeDirection::Short => Side::Buy,
        };

        let mut order = Order::market(&pos.symbol, close_side, pos.quantity);
        order.signal_context = Some(serde_json::json!({ "exit_reason": reason }));
        let order_id = self.ledger.record_order(order)?;

        let report = match self
            .router
            .execute_market(&pos.symbol, close_side, pos.quantity, true, price)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                self.ledger.update_order_status(
                    &order_id,
                    OrderStatus::Failed,
                    OrderStatusUpdate { error_message: Some(e.to_string()), ..Default::default() },
                )?;
                return Err(e);
            }
        };

        self.ledger.update_order_status(
            &order_id,
            OrderStatus::Filled,
            OrderStatusUpdate {
                exchange_order_id: report.exchange_order_id.clone(),
                filled_quantity: Some(pos.quantity),
                avg_fill_price: Some(report.fill_price),
                ..Default::default()
            },
        )?;
        self.record_fill(&pos.symbol, close_side, &order_id, pos.quantity, price, &report)?;

        let realized = pos.pnl_at(report.fill_price);
        let Some(closed) = self.ledger.close_position(
            &pos.symbol,
            report.fill_price,
            Some(order_id.clone()),
            Some(realized),
        )?
        else {
            return Ok(());
        };

        let trade = Trade {
            trade_id: String::new(),
            symbol: closed.symbol.clone(),
            side: closed.side,
            entry_quantity: closed.quantity,
            entry_price: closed.entry_price,
            entry_timestamp: closed.opened_at,
            entry_order_id: closed.open_order_id.clone(),
            exit_quantity: closed.quantity,
            exit_price: report.fill_price,
            exit_timestamp: closed.closed_at,
            exit_order_id: Some(order_id),
            exit_reason: Some(reason),
            gross_pnl: 0.0,
            commission_total: report.commission,
            net_pnl: realized - report.commission,
            pnl_pct: 0.0,
            hold_duration_sec: None,
            leverage: closed.leverage,
            run_id: None,
            strategy_version: None,
            entry_features: None,
        };
        self.ledger.record_trade(trade)?;
        info!(symbol = %closed.symbol, reason = %reason, realized, "position closed");
        Ok(())
    }

    async fn consider_entry(
        &mut self,
        symbol: &str,
        pack: &SymbolPack,
        in_warmup: bool,
    ) -> Result<(), TrustError> {
        if !self.mode.can_open_new_positions() {
            debug!(symbol, mode = %self.mode, "entries disabled by operating mode");
            return Ok(());
        }
        if in_warmup {
            return Ok(());
        }

        let signal = self.signal.decide(&pack.features);
        let Some(direction) = signal.action.direction() else {
            return Ok(());
        };

        // Gross expectation is the confidence-weighted size of the move in
        // the traded direction; estimated costs come off before the gate
        // sees it.
        let gross_edge = signal.confidence * pack.features.price_change.abs();
        let edge = net_edge(gross_edge, &self.costs);

        let key = EdgeKey::new(symbol, direction, &self.cfg.timeframe);
        let percentile = self.stats.get_edge_percentile(&key, edge);
        let decision = self.gate.evaluate_with_history(edge, signal.confidence, percentile);
        self.diagnostics.record_decision(symbol, &decision);
        // Recorded at decision time: the trade outcome must never feed back
        // into the percentile baseline.
        self.stats.record_edge(
            &key,
            edge,
            EdgeContext {
                signal_type: Some("rule_momentum".to_string()),
                metadata: Some(serde_json::json!({
                    "confidence": signal.confidence,
                    "gate_state": decision.state,
                    "position_multiplier": decision.position_multiplier,
                    "edge_percentile": percentile,
                })),
                timestamp: None,
            },
        );

        if decision.is_blocked() {
            info!(symbol, reason = %decision.reason, "entry blocked");
            return Ok(());
        }

        let price = pack.price;
        let quantity =
            self.cfg.amount_usdt * decision.position_multiplier * self.cfg.leverage as f64 / price;
        if quantity <= 0.0 {
            return Ok(());
        }

        let entry_side = match direction {
            TradeDirection::Long => Side::Buy,
            TradeDirection::Short => Side::Sell,
        };
        let mut order = Order::market(symbol, entry_side, quantity);
        order.signal_context = Some(serde_json::json!({
            "gate_state": decision.state,
            "net_edge": edge,
            "confidence": signal.confidence,
            "edge_percentile": percentile,
            "position_multiplier": decision.position_multiplier,
        }));
        let order_id = self.ledger.record_order(order)?;

        let report = match self
            .router
            .execute_market(symbol, entry_side, quantity, false, price)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                self.ledger.update_order_status(
                    &order_id,
                    OrderStatus::Failed,
                    OrderStatusUpdate { error_message: Some(e.to_string()), ..Default::default() },
                )?;
                return Err(e);
            }
        };

        self.ledger.update_order_status(
            &order_id,
            OrderStatus::Filled,
            OrderStatusUpdate {
                exchange_order_id: report.exchange_order_id.clone(),
                filled_quantity: Some(quantity),
                avg_fill_price: Some(report.fill_price),
                ..Default::default()
            },
        )?;
        self.record_fill(symbol, entry_side, &order_id, quantity, price, &report)?;

        let mut pos = Position::new(symbol, direction, quantity, report.fill_price);
        pos.leverage = self.cfg.leverage;
        pos.open_order_id = Some(order_id);
        pos.trailing_stop_pct = self.cfg.trailing_stop_pct;

        let (mut stop_loss, take_profit) =
            protective_levels(direction, report.fill_price, &self.cfg);
        if decision.state == GateState::Probe {
            stop_loss =
                stop_loss.map(|sl| tighten_stop(direction, report.fill_price, sl));
        }
        pos.stop_loss_price = stop_loss;
        pos.take_profit_price = take_profit;

        self.ledger.open_position(pos)?;
        info!(
            symbol,
            side = %direction,
            quantity,
            price = report.fill_price,
            state = %decision.state,
            multiplier = decision.position_multiplier,
            "position opened"
        );
        Ok(())
    }

    fn record_fill(
        &mut self,
        symbol: &str,
        side: Side,
        order_id: &str,
        quantity: f64,
        expected_price: f64,
        report: &crate::exchange::ExecutionReport,
    ) -> Result<(), TrustError> {
        self.ledger.record_fill(Fill {
            fill_id: String::new(),
            order_id: order_id.to_string(),
            exchange_trade_id: None,
            symbol: symbol.to_string(),
            side,
            quantity,
            price: report.fill_price,
            commission: report.commission,
            commission_asset: "USDT".to_string(),
            timestamp: Utc::now(),
            is_maker: false,
            expected_price: Some(expected_price),
            slippage_bps: None,
        })?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

async fn fetch_pack(
    market: &dyn MarketData,
    symbol: &str,
    interval: &str,
) -> Result<SymbolPack, TrustError> {
    let price = market.fetch_price(symbol).await?;
    let klines = market.fetch_klines(symbol, interval, KLINE_LOOKBACK).await?;
    let features = compute_features(&klines)
        .ok_or_else(|| TrustError::Exchange(format!("{symbol}: not enough klines")))?;
    Ok(SymbolPack { price, features })
}

/// Direction-aware exit check against the position's protective levels.
fn check_exit(pos: &Position, price: f64) -> Option<ExitReason> {
    match pos.side {
        TradeDirection::Long => {
            if pos.stop_loss_price.is_some_and(|sl| price <= sl) {
                return Some(ExitReason::StopLoss);
            }
            if pos.take_profit_price.is_some_and(|tp| price >= tp) {
                return Some(ExitReason::TakeProfit);
            }
            if let (Some(pct), Some(ext)) = (pos.trailing_stop_pct, pos.trailing_extremum()) {
                if price <= ext * (1.0 - pct) {
                    return Some(ExitReason::TrailingStop);
                }
            }
        }
        TradeDirection::Short => {
            if pos.stop_loss_price.is_some_and(|sl| price >= sl) {
                return Some(ExitReason::StopLoss);
            }
            if pos.take_profit_price.is_some_and(|tp| price <= tp) {
                return Some(ExitReason::TakeProfit);
            }
            if let (Some(pct), Some(ext)) = (pos.trailing_stop_pct, pos.trailing_extremum()) {
                if price >= ext * (1.0 + pct) {
                    return Some(ExitReason::TrailingStop);
                }
            }
        }
    }
    None
}

fn protective_levels(
    direction: TradeDirection,
    entry: f64,
    cfg: &RunnerConfig,
) -> (Option<f64>, Option<f64>) {
    let stop_loss = cfg.stop_loss_pct.map(|p| match direction {
        TradeDirection::Long => entry * (1.0 - p),
        TradeDirection::Short => entry * (1.0 + p),
    });
    let take_profit = cfg.take_profit_pct.map(|p| match direction {
        TradeDirection::Long => entry * (1.0 + p),
        TradeDirection::Short => entry * (1.0 - p),
    });
    (stop_loss, take_profit)
}

fn tighten_stop(direction: TradeDirection, entry: f64, stop_loss: f64) -> f64 {
    match direction {
        TradeDirection::Long => entry - (entry - stop_loss) * PROBE_STOP_FACTOR,
        TradeDirection::Short => entry + (stop_loss - entry) * PROBE_STOP_FACTOR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Kline;
    use crate::signal::Signal;
    use std::sync::Mutex;
    use tc_core::config::LedgerConfig;
    use tc_core::types::SignalAction;

    struct MockMarket {
        price: Mutex<f64>,
        price_change: f64,
        delay: Option<Duration>,
    }

    impl MockMarket {
        fn new(price: f64, price_change: f64) -> Self {
            Self { price: Mutex::new(price), price_change, delay: None }
        }

        fn set_price(&self, price: f64) {
            *self.price.lock().unwrap() = price;
        }
    }

    #[async_trait]
    impl MarketData for MockMarket {
        async fn fetch_price(&self, _symbol: &str) -> Result<f64, TrustError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(*self.price.lock().unwrap())
        }

        async fn fetch_klines(
            &self,
            _symbol: &str,
            _interval: &str,
            _limit: usize,
        ) -> Result<Vec<Kline>, TrustError> {
            let price = *self.price.lock().unwrap();
            let prev = price / (1.0 + self.price_change);
            Ok(vec![
                Kline { open: prev, high: prev, low: prev, close: prev, volume: 100.0 },
                Kline {
                    open: prev,
                    high: price.max(prev),
                    low: price.min(prev),
                    close: price,
                    volume: 100.0,
                },
            ])
        }
    }

    struct FixedSignal(Signal);

    impl SignalSource for FixedSignal {
        fn decide(&self, _features: &Features) -> Signal {
            self.0
        }
    }

    fn temp_ledger() -> LedgerStore {
        let dir = std::env::temp_dir()
            .join("tc-engine-tests")
            .join(uuid::Uuid::new_v4().simple().to_string());
        let cfg = LedgerConfig { base_dir: dir.to_string_lossy().into_owned() };
        LedgerStore::open(&cfg, serde_json::json!({})).unwrap()
    }

    fn engine(
        market: Arc<MockMarket>,
        signal: Signal,
        mode: ReconcileMode,
        tune: impl FnOnce(&mut RunnerConfig),
    ) -> TradingEngine {
        let mut cfg = RunnerConfig {
            symbols: vec!["BTCUSDT".to_string()],
            warmup_minutes: 0,
            amount_usdt: 100.0,
            ..Default::default()
        };
        tune(&mut cfg);
        let edge_cfg = EdgeConfig::default();
        TradingEngine::new(
            cfg,
            &edge_cfg,
            temp_ledger(),
            mode,
            market,
            Arc::new(FixedSignal(signal)),
            Arc::new(PaperRouter::new(edge_cfg.costs.clone())),
        )
    }

    fn long_signal(confidence: f64) -> Signal {
        Signal { action: SignalAction::Long, confidence }
    }

    #[tokio::test]
    async fn cold_start_entry_opens_a_small_probe() {
        // No edge history: the gate forces a 0.10x probe trial.
        let market = Arc::new(MockMarket::new(100.0, 0.005));
        let mut eng = engine(market, long_signal(0.8), ReconcileMode::Normal, |_| {});

        eng.run_round().await;

        let pos = eng.ledger.get_open_position("BTCUSDT").expect("position opened");
        assert_eq!(pos.side, TradeDirection::Long);
        // 100 USDT * 0.10 multiplier at price 100.
        assert!((pos.quantity - 0.1).abs() < 1e-9);
        assert_eq!(eng.diagnostics.summary().probe_count, 1);

        // Edge recorded for the key at decision time, carrying the decision
        // context on the record.
        let key = EdgeKey::new("BTCUSDT", TradeDirection::Long, &eng.cfg.timeframe);
        assert_eq!(eng.stats.sample_count(&key), 1);
        let records = eng.stats.recent_records(&key, 1);
        let meta = records[0].metadata.as_ref().unwrap();
        assert_eq!(meta["gate_state"], "PROBE");
        assert_eq!(meta["confidence"], 0.8);
    }

    #[tokio::test]
    async fn warmup_monitors_without_entering() {
        let market = Arc::new(MockMarket::new(100.0, 0.005));
        let mut eng = engine(market, long_signal(0.8), ReconcileMode::Normal, |cfg| {
            cfg.warmup_minutes = 5;
        });

        eng.run_round().await;
        assert!(eng.ledger.get_open_position("BTCUSDT").is_none());
        // Nothing reached the gate either.
        assert_eq!(eng.diagnostics.summary().total_decisions, 0);
    }

    #[tokio::test]
    async fn close_only_mode_blocks_entries() {
        let market = Arc::new(MockMarket::new(100.0, 0.005));
        let mut eng = engine(market, long_signal(0.8), ReconcileMode::CloseOnly, |_| {});

        eng.run_round().await;
        assert!(eng.ledger.get_open_position("BTCUSDT").is_none());
    }

    #[tokio::test]
    async fn blocked_decision_still_records_the_edge() {
        // Confidence below the gate minimum: blocked, but the observation
        // still enters the history so the key can eventually warm up.
        let market = Arc::new(MockMarket::new(100.0, 0.005));
        let mut eng = engine(market, long_signal(0.2), ReconcileMode::Normal, |_| {});

        eng.run_round().await;

        assert!(eng.ledger.get_open_position("BTCUSDT").is_none());
        assert_eq!(eng.diagnostics.summary().block_count, 1);
        let key = EdgeKey::new("BTCUSDT", TradeDirection::Long, &eng.cfg.timeframe);
        assert_eq!(eng.stats.sample_count(&key), 1);
    }

    #[tokio::test]
    async fn stop_loss_closes_and_records_the_trade() {
        let market = Arc::new(MockMarket::new(100.0, 0.005));
        let mut eng =
            engine(Arc::clone(&market), long_signal(0.8), ReconcileMode::Normal, |cfg| {
                cfg.stop_loss_pct = Some(0.02);
            });

        eng.run_round().await;
        assert!(eng.ledger.get_open_position("BTCUSDT").is_some());

        // Probe entries tighten the stop to 70% of the distance: 98.6.
        market.set_price(98.5);
        eng.run_round().await;

        assert!(eng.ledger.get_open_position("BTCUSDT").is_none());
        let positions = eng.ledger.load_all_positions().unwrap();
        let last = positions.last().unwrap();
        assert_eq!(last.status, tc_core::types::PositionStatus::Closed);
        assert!(last.realized_pnl < 0.0);
    }

    #[tokio::test]
    async fn exits_still_run_in_close_only_mode() {
        let market = Arc::new(MockMarket::new(100.0, 0.005));
        let mut eng =
            engine(Arc::clone(&market), long_signal(0.8), ReconcileMode::Normal, |cfg| {
                cfg.take_profit_pct = Some(0.01);
            });

        eng.run_round().await;
        assert!(eng.ledger.get_open_position("BTCUSDT").is_some());

        eng.mode = ReconcileMode::CloseOnly;
        market.set_price(102.0);
        eng.run_round().await;
        assert!(eng.ledger.get_open_position("BTCUSDT").is_none());
    }

    #[tokio::test]
    async fn emergency_stop_suspends_exits_too() {
        let market = Arc::new(MockMarket::new(100.0, 0.005));
        let mut eng =
            engine(Arc::clone(&market), long_signal(0.8), ReconcileMode::Normal, |cfg| {
                cfg.stop_loss_pct = Some(0.02);
            });

        eng.run_round().await;
        eng.mode = ReconcileMode::EmergencyStop;
        market.set_price(50.0);
        eng.run_round().await;

        // Still open: EMERGENCY_STOP permits no trading at all.
        assert!(eng.ledger.get_open_position("BTCUSDT").is_some());
    }

    #[tokio::test]
    async fn trailing_stop_follows_the_extremum() {
        let market = Arc::new(MockMarket::new(100.0, 0.005));
        let mut eng =
            engine(Arc::clone(&market), long_signal(0.8), ReconcileMode::Normal, |cfg| {
                cfg.trailing_stop_pct = Some(0.02);
            });

        eng.run_round().await;
        assert!(eng.ledger.get_open_position("BTCUSDT").is_some());

        // Run up: extremum advances, no exit.
        market.set_price(110.0);
        eng.run_round().await;
        let pos = eng.ledger.get_open_position("BTCUSDT").unwrap();
        assert_eq!(pos.trailing_extremum(), Some(110.0));

        // Retrace beyond 2% of the high: trailing stop fires.
        market.set_price(107.0);
        eng.run_round().await;
        assert!(eng.ledger.get_open_position("BTCUSDT").is_none());
    }

    #[tokio::test]
    async fn prefetch_timeout_skips_the_symbol() {
        let market = Arc::new(MockMarket {
            price: Mutex::new(100.0),
            price_change: 0.005,
            delay: Some(Duration::from_millis(200)),
        });
        let mut eng = engine(market, long_signal(0.8), ReconcileMode::Normal, |cfg| {
            cfg.fetch_timeout_secs = 0;
        });

        eng.run_round().await;
        assert!(eng.ledger.get_open_position("BTCUSDT").is_none());
        assert_eq!(eng.diagnostics.summary().total_decisions, 0);
    }
}
