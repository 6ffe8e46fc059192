//! Startup state reconciliation between the local ledger and the exchange.
//!
//! The engine compares the ledger's open positions against the exchange
//! snapshot and derives an operating mode the trading loop must consult
//! before acting:
//!
//! - `NORMAL` — consistent, open and close freely.
//! - `CLOSE_ONLY` — inconsistency detected, only closes permitted.
//! - `EMERGENCY_STOP` — exchange query failed, a corrective action failed,
//!   or strict policy is violated. No trading at all.
//! - `OPEN_WITH_RISK` — residual inconsistency explicitly acknowledged by
//!   the operator; opens re-permitted. Never silently equivalent to NORMAL.
//!
//! Any failure to establish ground truth fails closed: an unanswerable
//! exchange query is EMERGENCY_STOP, never a shrugged-off NORMAL.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use tc_core::config::ReconcilePolicy;
use tc_core::error::TrustError;
use tc_core::types::ExchangePosition;

use crate::store::{LedgerStore, PositionComparison};

const ADOPT_NOTE: &str = "reconciliation_auto_adopt";
const STALE_NOTE: &str = "RECONCILE_STALE";

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

/// Operating mode derived from reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcileMode {
    #[default]
    Normal,
    CloseOnly,
    EmergencyStop,
    OpenWithRisk,
}

impl ReconcileMode {
    /// New entries are permitted only when consistent or explicitly
    /// overridden.
    pub fn can_open_new_positions(self) -> bool {
        matches!(self, Self::Normal | Self::OpenWithRisk)
    }

    /// Closes are permitted in NORMAL and CLOSE_ONLY. EMERGENCY_STOP permits
    /// neither direction.
    pub fn can_close_positions(self) -> bool {
        matches!(self, Self::Normal | Self::CloseOnly)
    }
}

impl std::fmt::Display for ReconcileMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Normal => "NORMAL",
            Self::CloseOnly => "CLOSE_ONLY",
            Self::EmergencyStop => "EMERGENCY_STOP",
            Self::OpenWithRisk => "OPEN_WITH_RISK",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Position source
// ---------------------------------------------------------------------------

/// Supplier of the exchange's current position snapshot.
///
/// Implementations must return only positions with a nonzero amount; flat
/// symbols are omitted.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn fetch_positions(&self) -> Result<Vec<ExchangePosition>, TrustError>;
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Structured outcome of one reconciliation pass, for logging and alerting.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub mode: ReconcileMode,
    pub timestamp: DateTime<Utc>,
    pub local_positions: usize,
    pub exchange_positions: usize,
    /// Final comparison, after any corrective actions.
    pub comparison: PositionComparison,
    /// Symbols adopted from the exchange into the ledger.
    pub adopted: Vec<String>,
    /// Local ghost symbols closed as stale.
    pub closed_stale: Vec<String>,
    pub error: Option<String>,
}

impl ReconcileReport {
    fn failed(error: String, local_positions: usize) -> Self {
        Self {
            mode: ReconcileMode::EmergencyStop,
            timestamp: Utc::now(),
            local_positions,
            exchange_positions: 0,
            comparison: PositionComparison::default(),
            adopted: Vec::new(),
            closed_stale: Vec::new(),
            error: Some(error),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Runs the reconciliation protocol and holds the resulting mode.
pub struct ReconciliationEngine {
    policy: ReconcilePolicy,
    mode: ReconcileMode,
    last_report: Option<ReconcileReport>,
}

impl ReconciliationEngine {
    pub fn new(policy: ReconcilePolicy) -> Self {
        Self { policy, mode: ReconcileMode::Normal, last_report: None }
    }

    pub fn mode(&self) -> ReconcileMode {
        self.mode
    }

    pub fn last_report(&self) -> Option<&ReconcileReport> {
        self.last_report.as_ref()
    }

    pub fn can_open_new_positions(&self) -> bool {
        self.mode.can_open_new_positions()
    }

    pub fn can_close_positions(&self) -> bool {
        self.mode.can_close_positions()
    }

    /// Run one full reconciliation pass and derive the operating mode.
    ///
    /// Never returns an error: every failure path collapses into an
    /// EMERGENCY_STOP report, so the caller always has a mode to act on.
    pub async fn perform(
        &mut self,
        ledger: &mut LedgerStore,
        source: &dyn PositionSource,
    ) -> ReconcileReport {
        info!("starting state reconciliation");

        // Step 1: rebuild the ledger's open-position view from disk.
        let local_count = match ledger.recover_open_positions() {
            Ok(n) => n,
            Err(e) => {
                return self.fail_closed(format!("ledger replay failed: {e}"), 0);
            }
        };
        info!(local_count, "local open positions loaded");

        // Step 2: query the exchange, bounded by the policy timeout.
        let timeout = Duration::from_secs(self.policy.query_timeout_secs);
        let exchange_positions =
            match tokio::time::timeout(timeout, source.fetch_positions()).await {
                Ok(Ok(positions)) => positions,
                Ok(Err(e)) => {
                    return self.fail_closed(
                        format!("exchange position query failed: {e}"),
                        local_count,
                    );
                }
                Err(_) => {
                    return self.fail_closed(
                        format!("exchange position query timed out after {timeout:?}"),
                        local_count,
                    );
                }
            };
        info!(count = exchange_positions.len(), "exchange open positions fetched");

        // Step 3: compare and derive the initial mode.
        let comparison = match ledger.reconcile_positions(&exchange_positions) {
            Ok(cmp) => cmp,
            Err(e) => {
                return self.fail_closed(format!("position comparison failed: {e}"), local_count);
            }
        };
        let mut mode = self.classify(&comparison);

        let mut report = ReconcileReport {
            mode,
            timestamp: Utc::now(),
            local_positions: local_count,
            exchange_positions: exchange_positions.len(),
            comparison,
            adopted: Vec::new(),
            closed_stale: Vec::new(),
            error: None,
        };

        // Step 4: corrective actions, then re-compare.
        if matches!(mode, ReconcileMode::CloseOnly | ReconcileMode::OpenWithRisk) {
            if let Err(e) = self.apply_corrective_actions(ledger, &exchange_positions, &mut report)
            {
                return self.fail_closed(format!("corrective action failed: {e}"), local_count);
            }

            match ledger.reconcile_positions(&exchange_positions) {
                Ok(cmp) => {
                    if cmp.is_consistent {
                        mode = ReconcileMode::Normal;
                        info!("corrective actions achieved consistency; mode NORMAL");
                    } else if self.policy.strict {
                        mode = ReconcileMode::EmergencyStop;
                        report.error = Some("strict reconciliation failed".to_string());
                        error!("strict policy violated; inconsistency remains; EMERGENCY_STOP");
                    }
                    report.comparison = cmp;
                }
                Err(e) => {
                    return self.fail_closed(format!("re-comparison failed: {e}"), local_count);
                }
            }
        }

        // Step 5: explicit override relaxes the entry hard-block one level.
        // It never claims the state is consistent.
        if mode == ReconcileMode::CloseOnly && self.policy.allow_open_override {
            mode = ReconcileMode::OpenWithRisk;
            warn!("open override enabled; switching to OPEN_WITH_RISK");
        }

        report.mode = mode;
        self.mode = mode;
        info!(mode = %mode, consistent = report.comparison.is_consistent, "reconciliation complete");
        self.last_report = Some(report.clone());
        report
    }

    fn fail_closed(&mut self, error: String, local_positions: usize) -> ReconcileReport {
        error!(%error, "reconciliation failed; EMERGENCY_STOP");
        let report = ReconcileReport::failed(error, local_positions);
        self.mode = report.mode;
        self.last_report = Some(report.clone());
        report
    }

    /// Inconsistency severity is ordered: unknown exchange positions are the
    /// most dangerous, then local ghosts, then quantity mismatches. All three
    /// land in CLOSE_ONLY, the ordering only drives what gets reported first.
    fn classify(&self, cmp: &PositionComparison) -> ReconcileMode {
        if cmp.is_consistent {
            info!("ledger and exchange state is consistent");
            return ReconcileMode::Normal;
        }
        if !cmp.exchange_only.is_empty() {
            warn!(symbols = ?cmp.exchange_only, "exchange holds unknown positions; CLOSE_ONLY");
        } else if !cmp.local_only.is_empty() {
            warn!(symbols = ?cmp.local_only, "ledger holds positions not on exchange; CLOSE_ONLY");
        } else {
            warn!(discrepancies = ?cmp.discrepancies, "quantity discrepancies; CLOSE_ONLY");
        }
        ReconcileMode::CloseOnly
    }

    /// Exchange is the source of truth: adopt what it holds and we don't,
    /// stale-close what we hold and it doesn't. Both actions are idempotent,
    /// so a crash between action and re-comparison is safe to replay.
    fn apply_corrective_actions(
        &self,
        ledger: &mut LedgerStore,
        exchange_positions: &[ExchangePosition],
        report: &mut ReconcileReport,
    ) -> Result<(), TrustError> {
        if self.policy.auto_adopt {
            for symbol in &report.comparison.exchange_only {
                let Some(pos) = exchange_positions.iter().find(|p| &p.symbol == symbol) else {
                    continue;
                };
                if ledger.adopt_exchange_position(pos, ADOPT_NOTE)?.is_some() {
                    report.adopted.push(symbol.clone());
                    info!(symbol, "adopted exchange position into ledger");
                }
            }
        }

        if self.policy.auto_close_stale {
            for symbol in &report.comparison.local_only {
                if ledger.mark_position_stale(symbol, STALE_NOTE)? {
                    report.closed_stale.push(symbol.clone());
                    info!(symbol, "closed stale local position");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_core::config::LedgerConfig;
    use tc_core::types::{Position, PositionStatus, TradeDirection};
    use uuid::Uuid;

    struct MockSource {
        positions: Vec<ExchangePosition>,
        fail: bool,
    }

    impl MockSource {
        fn with(positions: Vec<ExchangePosition>) -> Self {
            Self { positions, fail: false }
        }

        fn failing() -> Self {
            Self { positions: Vec::new(), fail: true }
        }
    }

    #[async_trait]
    impl PositionSource for MockSource {
        async fn fetch_positions(&self) -> Result<Vec<ExchangePosition>, TrustError> {
            if self.fail {
                return Err(TrustError::Exchange("position endpoint unavailable".into()));
            }
            Ok(self.positions.clone())
        }
    }

    fn temp_ledger() -> LedgerStore {
        let dir = std::env::temp_dir()
            .join("tc-recon-tests")
            .join(Uuid::new_v4().simple().to_string());
        let cfg = LedgerConfig { base_dir: dir.to_string_lossy().into_owned() };
        LedgerStore::open(&cfg, serde_json::json!({})).unwrap()
    }

    fn exch(symbol: &str, amt: f64) -> ExchangePosition {
        ExchangePosition {
            symbol: symbol.to_string(),
            position_amt: amt,
            entry_price: 100.0,
            position_side: ExchangePosition::direction_from_amount(amt),
            leverage: 1,
        }
    }

    fn passive_policy() -> ReconcilePolicy {
        ReconcilePolicy { auto_adopt: false, auto_close_stale: false, ..Default::default() }
    }

    #[tokio::test]
    async fn consistent_state_yields_normal() {
        let mut ledger = temp_ledger();
        ledger.open_position(Position::new("BTCUSDT", TradeDirection::Long, 0.5, 100.0)).unwrap();

        let mut engine = ReconciliationEngine::new(ReconcilePolicy::default());
        let source = MockSource::with(vec![exch("BTCUSDT", 0.5)]);
        let report = engine.perform(&mut ledger, &source).await;

        assert_eq!(report.mode, ReconcileMode::Normal);
        assert!(report.comparison.is_consistent);
        assert!(engine.can_open_new_positions());
        assert!(engine.can_close_positions());
    }

    #[tokio::test]
    async fn query_failure_fails_closed_to_emergency_stop() {
        let mut ledger = temp_ledger();
        let mut engine = ReconciliationEngine::new(ReconcilePolicy::default());

        let report = engine.perform(&mut ledger, &MockSource::failing()).await;

        assert_eq!(report.mode, ReconcileMode::EmergencyStop);
        assert!(report.error.is_some());
        assert!(!engine.can_open_new_positions());
        assert!(!engine.can_close_positions());
    }

    #[tokio::test]
    async fn exchange_only_position_is_adopted_then_normal() {
        let mut ledger = temp_ledger();
        let mut engine = ReconciliationEngine::new(ReconcilePolicy::default());
        let source = MockSource::with(vec![exch("ETHUSDT", -2.0)]);

        let report = engine.perform(&mut ledger, &source).await;

        assert_eq!(report.mode, ReconcileMode::Normal);
        assert_eq!(report.adopted, vec!["ETHUSDT"]);
        assert!(report.comparison.is_consistent);

        let adopted = ledger.get_open_position("ETHUSDT").unwrap();
        assert_eq!(adopted.side, TradeDirection::Short);
        assert_eq!(adopted.quantity, 2.0);
        assert_eq!(adopted.note.as_deref(), Some(ADOPT_NOTE));
    }

    #[tokio::test]
    async fn local_ghost_is_stale_closed_then_normal() {
        let mut ledger = temp_ledger();
        ledger.open_position(Position::new("SOLUSDT", TradeDirection::Long, 5.0, 200.0)).unwrap();

        let mut engine = ReconciliationEngine::new(ReconcilePolicy::default());
        let report = engine.perform(&mut ledger, &MockSource::with(vec![])).await;

        assert_eq!(report.mode, ReconcileMode::Normal);
        assert_eq!(report.closed_stale, vec!["SOLUSDT"]);
        assert!(ledger.get_open_position("SOLUSDT").is_none());

        let last = ledger.load_all_positions().unwrap().pop().unwrap();
        assert_eq!(last.status, PositionStatus::Closed);
        assert_eq!(last.realized_pnl, 0.0);
        assert_eq!(last.note.as_deref(), Some(STALE_NOTE));
    }

    #[tokio::test]
    async fn corrective_actions_disabled_stays_close_only() {
        let mut ledger = temp_ledger();
        let mut engine = ReconciliationEngine::new(passive_policy());
        let report = engine.perform(&mut ledger, &MockSource::with(vec![exch("BTCUSDT", 1.0)])).await;

        assert_eq!(report.mode, ReconcileMode::CloseOnly);
        assert!(report.adopted.is_empty());
        assert!(!engine.can_open_new_positions());
        assert!(engine.can_close_positions());
    }

    #[tokio::test]
    async fn strict_policy_escalates_to_emergency_stop() {
        let mut ledger = temp_ledger();
        let policy = ReconcilePolicy { strict: true, ..passive_policy() };
        let mut engine = ReconciliationEngine::new(policy);

        let report = engine.perform(&mut ledger, &MockSource::with(vec![exch("BTCUSDT", 1.0)])).await;

        assert_eq!(report.mode, ReconcileMode::EmergencyStop);
        assert_eq!(report.error.as_deref(), Some("strict reconciliation failed"));
    }

    #[tokio::test]
    async fn open_override_yields_open_with_risk() {
        let mut ledger = temp_ledger();
        let policy = ReconcilePolicy { allow_open_override: true, ..passive_policy() };
        let mut engine = ReconciliationEngine::new(policy);

        let report = engine.perform(&mut ledger, &MockSource::with(vec![exch("BTCUSDT", 1.0)])).await;

        assert_eq!(report.mode, ReconcileMode::OpenWithRisk);
        // Override relaxes opens only. It never claims consistency.
        assert!(!report.comparison.is_consistent);
        assert!(engine.can_open_new_positions());
        assert!(!engine.can_close_positions());
    }

    #[tokio::test]
    async fn quantity_discrepancy_has_no_corrective_action() {
        let mut ledger = temp_ledger();
        ledger.open_position(Position::new("BTCUSDT", TradeDirection::Long, 1.0, 100.0)).unwrap();

        let mut engine = ReconciliationEngine::new(ReconcilePolicy::default());
        let report = engine.perform(&mut ledger, &MockSource::with(vec![exch("BTCUSDT", 1.5)])).await;

        // Neither adoption nor stale-close applies to a quantity mismatch.
        assert_eq!(report.mode, ReconcileMode::CloseOnly);
        assert_eq!(report.comparison.discrepancies.len(), 1);
        assert!(report.adopted.is_empty());
        assert!(report.closed_stale.is_empty());
    }

    #[tokio::test]
    async fn reconciliation_is_idempotent_across_runs() {
        let mut ledger = temp_ledger();
        ledger.open_position(Position::new("GHOST", TradeDirection::Long, 1.0, 10.0)).unwrap();

        let mut engine = ReconciliationEngine::new(ReconcilePolicy::default());
        let source = MockSource::with(vec![exch("NEW", 0.3)]);

        let first = engine.perform(&mut ledger, &source).await;
        assert_eq!(first.mode, ReconcileMode::Normal);
        assert_eq!(first.adopted, vec!["NEW"]);
        assert_eq!(first.closed_stale, vec!["GHOST"]);

        // Second pass finds nothing left to correct.
        let second = engine.perform(&mut ledger, &source).await;
        assert_eq!(second.mode, ReconcileMode::Normal);
        assert!(second.adopted.is_empty());
        assert!(second.closed_stale.is_empty());
        assert!(second.comparison.is_consistent);
    }
}
