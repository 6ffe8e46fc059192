//! Gate decision diagnostics.
//!
//! Every decision is counted in memory and appended to a JSONL sink, so an
//! operator staring at a runner that hasn't placed an order in hours can see
//! exactly which rule is doing the blocking. The sink is best-effort: a
//! failed write is logged and trading continues.

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::gate::{GateDecision, GateState};

/// Recent-decision buffer capacity.
const MAX_RECENT: usize = 1000;

/// One decision as written to the JSONL sink and the recent buffer.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub state: GateState,
    pub reason: String,
    pub net_edge: f64,
    pub confidence: f64,
    pub edge_percentile: f64,
    pub position_multiplier: f64,
}

/// Aggregate view for operators and tests.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsSummary {
    pub total_decisions: u64,
    pub block_count: u64,
    pub probe_count: u64,
    pub full_count: u64,
    pub block_rate: f64,
    pub probe_rate: f64,
    pub full_rate: f64,
    /// Block counts bucketed by rule label.
    pub block_reasons: Vec<(String, u64)>,
}

/// Counts gate decisions and streams them to an optional JSONL file.
pub struct GateDiagnostics {
    log_path: Option<PathBuf>,
    block_count: u64,
    probe_count: u64,
    full_count: u64,
    // Reason strings embed formatted inputs; bucket by the leading label.
    block_reasons: AHashMap<String, u64>,
    recent: VecDeque<DecisionRecord>,
}

impl GateDiagnostics {
    /// `log_path`, when set, receives one JSON line per decision.
    pub fn new(log_path: Option<&str>) -> Self {
        Self {
            log_path: log_path.map(PathBuf::from),
            block_count: 0,
            probe_count: 0,
            full_count: 0,
            block_reasons: AHashMap::new(),
            recent: VecDeque::new(),
        }
    }

    /// Record one decision: update counters, retain it in the recent buffer,
    /// and append it to the sink.
    pub fn record_decision(&mut self, symbol: &str, decision: &GateDecision) {
        match decision.state {
            GateState::Block => {
                self.block_count += 1;
                *self.block_reasons.entry(reason_label(&decision.reason)).or_insert(0) += 1;
            }
            GateState::Probe => self.probe_count += 1,
            GateState::Full => self.full_count += 1,
        }

        let record = DecisionRecord {
            timestamp: Utc::now(),
            symbol: symbol.to_string(),
            state: decision.state,
            reason: decision.reason.clone(),
            net_edge: decision.net_edge,
            confidence: decision.confidence,
            edge_percentile: decision.edge_percentile,
            position_multiplier: decision.position_multiplier,
        };

        self.recent.push_back(record.clone());
        while self.recent.len() > MAX_RECENT {
            self.recent.pop_front();
        }

        self.append_to_sink(&record);
    }

    pub fn summary(&self) -> DiagnosticsSummary {
        let total = self.block_count + self.probe_count + self.full_count;
        let rate = |n: u64| if total > 0 { n as f64 / total as f64 } else { 0.0 };

        let mut block_reasons: Vec<(String, u64)> =
            self.block_reasons.iter().map(|(k, v)| (k.clone(), *v)).collect();
        block_reasons.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        DiagnosticsSummary {
            total_decisions: total,
            block_count: self.block_count,
            probe_count: self.probe_count,
            full_count: self.full_count,
            block_rate: rate(self.block_count),
            probe_rate: rate(self.probe_count),
            full_rate: rate(self.full_count),
            block_reasons,
        }
    }

    /// The most recent BLOCK decisions, oldest first.
    pub fn recent_blocks(&self, limit: usize) -> Vec<DecisionRecord> {
        let blocks: Vec<DecisionRecord> =
            self.recent.iter().filter(|d| d.state == GateState::Block).cloned().collect();
        let skip = blocks.len().saturating_sub(limit);
        blocks.into_iter().skip(skip).collect()
    }

    fn append_to_sink(&self, record: &DecisionRecord) {
        let Some(path) = &self.log_path else {
            return;
        };
        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let line = serde_json::to_string(record)?;
            let mut f = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(f, "{line}")
        })();
        if let Err(e) = result {
            warn!(path = %path.display(), %e, "gate diagnostics write failed");
        }
    }
}

/// Leading token of a reason string, e.g. `"confidence_too_low"` from
/// `"confidence_too_low (confidence=0.400 < 0.550)"`.
fn reason_label(reason: &str) -> String {
    reason.split_whitespace().next().unwrap_or(reason).to_string()
}
