//! Configuration parsing for the trust-core runner.
//!
//! All components read their settings from a single JSON config file passed
//! on the command line. There are no process-wide mutable globals: the parsed
//! [`AppConfig`] (or a section of it) is handed into each constructor at
//! startup.
//!
//! # Example config
//!
//! ```json
//! {
//!   "runner": { "symbols": ["BTCUSDT", "ETHUSDT"], "timeframe": "15m" },
//!   "ledger": { "base_dir": "logs/ledger" },
//!   "reconcile": { "strict": false, "auto_adopt": true },
//!   "edge": { "max_window": 1000, "min_sample": 50 },
//!   "exchange": { "base_url": "https://fapi.binance.com", "api_key": "..." }
//! }
//! ```

use serde::{Deserialize, Serialize};

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub reconcile: ReconcilePolicy,
    #[serde(default)]
    pub edge: EdgeConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
}

/// Trading-loop settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// Symbols evaluated each round.
    #[serde(default)]
    pub symbols: Vec<String>,

    /// Signal timeframe label (e.g. `"15m"`) — part of the edge-stats key.
    #[serde(default = "default_timeframe")]
    pub timeframe: String,

    /// Seconds between trading rounds.
    #[serde(default = "default_round_interval")]
    pub round_interval_secs: u64,

    /// Monitoring-only window after startup; no new entries until it passes.
    #[serde(default = "default_warmup")]
    pub warmup_minutes: u64,

    /// Bound on concurrent per-symbol data prefetches.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,

    /// Per-symbol prefetch timeout; a timed-out symbol is skipped for the
    /// round, never blocking the batch.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Full position notional in quote asset; scaled by the gate multiplier.
    #[serde(default = "default_amount")]
    pub amount_usdt: f64,

    /// Leverage stamped onto opened positions.
    #[serde(default = "default_leverage")]
    pub leverage: u32,

    /// Stop-loss distance as a fraction of entry price.
    #[serde(default)]
    pub stop_loss_pct: Option<f64>,

    /// Take-profit distance as a fraction of entry price.
    #[serde(default)]
    pub take_profit_pct: Option<f64>,

    /// Trailing-stop retracement as a fraction of the tracked extremum.
    #[serde(default)]
    pub trailing_stop_pct: Option<f64>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            timeframe: default_timeframe(),
            round_interval_secs: default_round_interval(),
            warmup_minutes: default_warmup(),
            batch_concurrency: default_batch_concurrency(),
            fetch_timeout_secs: default_fetch_timeout(),
            amount_usdt: default_amount(),
            leverage: default_leverage(),
            stop_loss_pct: None,
            take_profit_pct: None,
            trailing_stop_pct: None,
        }
    }
}

fn default_timeframe() -> String {
    "15m".to_string()
}
fn default_round_interval() -> u64 {
    900
}
fn default_warmup() -> u64 {
    5
}
fn default_batch_concurrency() -> usize {
    10
}
fn default_fetch_timeout() -> u64 {
    10
}
fn default_amount() -> f64 {
    100.0
}
fn default_leverage() -> u32 {
    1
}

/// Ledger persistence settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Directory holding the per-entity JSONL logs and run manifests.
    #[serde(default = "default_ledger_dir")]
    pub base_dir: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { base_dir: default_ledger_dir() }
    }
}

fn default_ledger_dir() -> String {
    "logs/ledger".to_string()
}

/// Reconciliation behaviour toggles. Safety-first defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilePolicy {
    /// Escalate to EMERGENCY_STOP when inconsistency survives corrective
    /// action.
    #[serde(default)]
    pub strict: bool,

    /// Adopt exchange-only positions into the ledger (exchange is truth).
    #[serde(default = "default_true")]
    pub auto_adopt: bool,

    /// Mark local-only ghost positions stale/closed.
    #[serde(default = "default_true")]
    pub auto_close_stale: bool,

    /// Explicit operator override: permit opens despite remaining
    /// inconsistency.
    /// Never claims consistency — it relaxes the entry hard-block one level
    /// (CLOSE_ONLY → OPEN_WITH_RISK).
    #[serde(default)]
    pub allow_open_override: bool,

    /// Bound on the exchange position query; expiry fails closed.
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            strict: false,
            auto_adopt: true,
            auto_close_stale: true,
            allow_open_override: false,
            query_timeout_secs: default_query_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_query_timeout() -> u64 {
    15
}

/// Edge statistics, admission gate, and cost-model settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EdgeConfig {
    /// Rolling-window capacity per (symbol, direction, timeframe) key.
    #[serde(default = "default_max_window")]
    pub max_window: usize,

    /// Minimum observations before a percentile is reported.
    #[serde(default = "default_min_sample")]
    pub min_sample: usize,

    /// Snapshot file for warm restarts; disabled when unset.
    #[serde(default)]
    pub snapshot_path: Option<String>,

    /// JSONL sink for gate decisions; disabled when unset.
    #[serde(default)]
    pub diagnostics_path: Option<String>,

    #[serde(default)]
    pub gate: GateThresholds,

    #[serde(default)]
    pub costs: CostModel,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            max_window: default_max_window(),
            min_sample: default_min_sample(),
            snapshot_path: None,
            diagnostics_path: None,
            gate: GateThresholds::default(),
            costs: CostModel::default(),
        }
    }
}

fn default_max_window() -> usize {
    1000
}
fn default_min_sample() -> usize {
    50
}

/// Admission-gate thresholds. Lower-inclusive percentile boundaries.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GateThresholds {
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_pct_probe_small")]
    pub percentile_probe_small: f64,
    #[serde(default = "default_pct_probe_medium")]
    pub percentile_probe_medium: f64,
    #[serde(default = "default_pct_full")]
    pub percentile_full: f64,
    #[serde(default = "default_mult_small")]
    pub probe_small_multiplier: f64,
    #[serde(default = "default_mult_medium")]
    pub probe_medium_multiplier: f64,
    #[serde(default = "default_mult_full")]
    pub full_multiplier: f64,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            percentile_probe_small: default_pct_probe_small(),
            percentile_probe_medium: default_pct_probe_medium(),
            percentile_full: default_pct_full(),
            probe_small_multiplier: default_mult_small(),
            probe_medium_multiplier: default_mult_medium(),
            full_multiplier: default_mult_full(),
        }
    }
}

fn default_min_confidence() -> f64 {
    0.55
}
fn default_pct_probe_small() -> f64 {
    0.60
}
fn default_pct_probe_medium() -> f64 {
    0.75
}
fn default_pct_full() -> f64 {
    0.90
}
fn default_mult_small() -> f64 {
    0.10
}
fn default_mult_medium() -> f64 {
    0.25
}
fn default_mult_full() -> f64 {
    1.0
}

/// Estimated trading costs subtracted from gross edge.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CostModel {
    #[serde(default = "default_taker_fee")]
    pub taker_fee_pct: f64,
    #[serde(default = "default_slippage")]
    pub slippage_pct: f64,
    #[serde(default = "default_safety_margin")]
    pub safety_margin_pct: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            taker_fee_pct: default_taker_fee(),
            slippage_pct: default_slippage(),
            safety_margin_pct: default_safety_margin(),
        }
    }
}

fn default_taker_fee() -> f64 {
    0.0004
}
fn default_slippage() -> f64 {
    0.0002
}
fn default_safety_margin() -> f64 {
    0.0002
}

/// Exchange REST settings for the position query.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub secret_key: String,
    /// `recvWindow` for signed requests (ms).
    #[serde(default = "default_recv_window")]
    pub recv_window: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            secret_key: String::new(),
            recv_window: default_recv_window(),
        }
    }
}

fn default_base_url() -> String {
    "https://fapi.binance.com".to_string()
}
fn default_recv_window() -> u64 {
    5000
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    Ok(config)
}
