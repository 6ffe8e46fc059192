//! Three-state admission gate for trade entries.
//!
//! Classifies a candidate into BLOCK / PROBE / FULL through ordered threshold
//! checks, first match wins:
//!
//! 1. `net_edge <= 0`                          → BLOCK
//! 2. `confidence < min_confidence`            → BLOCK
//! 3. `percentile < percentile_probe_small`    → BLOCK
//! 4. `percentile < percentile_probe_medium`   → PROBE, small multiplier
//! 5. `percentile < percentile_full`           → PROBE, medium multiplier
//! 6. otherwise                                → FULL
//!
//! Percentile boundaries are lower-inclusive: exactly 0.60 is already a small
//! PROBE, exactly 0.90 is already FULL.
//!
//! The gate itself is pure: configuration in, decision out, no mutable state.

use serde::Serialize;

use tc_core::config::{CostModel, GateThresholds};

/// Percentile assumed while a key has too little history to rank against.
pub const INSUFFICIENT_SAMPLES_PERCENTILE: f64 = 0.60;
/// Floor applied to the edge during cold start so a trial PROBE can run.
pub const INSUFFICIENT_SAMPLES_MIN_EDGE: f64 = 0.0001;

/// Gate outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateState {
    Block,
    Probe,
    Full,
}

impl std::fmt::Display for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Block => "BLOCK",
            Self::Probe => "PROBE",
            Self::Full => "FULL",
        };
        f.write_str(s)
    }
}

/// One gate decision, with the inputs echoed for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct GateDecision {
    pub state: GateState,
    /// Fraction of the full position size to deploy; 0.0 when blocked.
    pub position_multiplier: f64,
    pub reason: String,
    pub net_edge: f64,
    pub confidence: f64,
    /// Percentile the rules actually ran against (the cold-start fallback
    /// when history was insufficient).
    pub edge_percentile: f64,
}

impl GateDecision {
    pub fn is_blocked(&self) -> bool {
        self.state == GateState::Block
    }
}

/// The admission gate. Holds thresholds only.
pub struct EdgeGate {
    thresholds: GateThresholds,
}

impl EdgeGate {
    pub fn new(thresholds: GateThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &GateThresholds {
        &self.thresholds
    }

    /// Apply the six ordered rules to a fully-known input.
    pub fn evaluate(&self, net_edge: f64, confidence: f64, edge_percentile: f64) -> GateDecision {
        let t = &self.thresholds;
        let decision = |state, position_multiplier, reason| GateDecision {
            state,
            position_multiplier,
            reason,
            net_edge,
            confidence,
            edge_percentile,
        };

        if net_edge <= 0.0 {
            return decision(
                GateState::Block,
                0.0,
                format!("net_edge_non_positive (net_edge={net_edge:.6} <= 0)"),
            );
        }
        if confidence < t.min_confidence {
            return decision(
                GateState::Block,
                0.0,
                format!(
                    "confidence_too_low (confidence={confidence:.3} < {:.3})",
                    t.min_confidence
                ),
            );
        }
        if edge_percentile < t.percentile_probe_small {
            return decision(
                GateState::Block,
                0.0,
                format!(
                    "edge_percentile_too_low (percentile={edge_percentile:.3} < {:.3})",
                    t.percentile_probe_small
                ),
            );
        }
        if edge_percentile < t.percentile_probe_medium {
            return decision(
                GateState::Probe,
                t.probe_small_multiplier,
                format!(
                    "probe_small (percentile={edge_percentile:.3} in [{:.2}, {:.2}))",
                    t.percentile_probe_small, t.percentile_probe_medium
                ),
            );
        }
        if edge_percentile < t.percentile_full {
            return decision(
                GateState::Probe,
                t.probe_medium_multiplier,
                format!(
                    "probe_medium (percentile={edge_percentile:.3} in [{:.2}, {:.2}))",
                    t.percentile_probe_medium, t.percentile_full
                ),
            );
        }
        decision(
            GateState::Full,
            t.full_multiplier,
            format!(
                "full_position (percentile={edge_percentile:.3} >= {:.2})",
                t.percentile_full
            ),
        )
    }

    /// Evaluate against an optional percentile from history.
    ///
    /// When history is insufficient (`None`), the key must still gather data:
    /// the edge is floored to a small positive value, the fallback percentile
    /// is assumed, and anything that survives is forced down to a small
    /// PROBE. The floor deliberately bypasses the non-positive-edge rule;
    /// the confidence rule still blocks.
    pub fn evaluate_with_history(
        &self,
        net_edge: f64,
        confidence: f64,
        edge_percentile: Option<f64>,
    ) -> GateDecision {
        match edge_percentile {
            Some(p) => self.evaluate(net_edge, confidence, p),
            None => {
                let floored = net_edge.max(INSUFFICIENT_SAMPLES_MIN_EDGE);
                let mut decision =
                    self.evaluate(floored, confidence, INSUFFICIENT_SAMPLES_PERCENTILE);
                if decision.state != GateState::Block {
                    decision.state = GateState::Probe;
                    decision.position_multiplier = self.thresholds.probe_small_multiplier;
                    decision.reason =
                        "insufficient_samples_probe_trial (samples below minimum)".to_string();
                }
                // Echo the true input, not the floor.
                decision.net_edge = net_edge;
                decision
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Cost model helpers
// ---------------------------------------------------------------------------

/// Net expected edge: gross prediction minus estimated taker fee and
/// slippage. This is the value the gate ranks and rules on.
pub fn net_edge(gross_edge: f64, costs: &CostModel) -> f64 {
    gross_edge - costs.taker_fee_pct - costs.slippage_pct
}

/// Smallest gross edge that still clears costs plus the safety margin.
pub fn required_gross_edge(costs: &CostModel) -> f64 {
    costs.taker_fee_pct + costs.slippage_pct + costs.safety_margin_pct
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> EdgeGate {
        EdgeGate::new(GateThresholds::default())
    }

    #[test]
    fn non_positive_edge_blocks_first() {
        let d = gate().evaluate(0.0, 0.99, 0.99);
        assert_eq!(d.state, GateState::Block);
        assert_eq!(d.position_multiplier, 0.0);
        assert!(d.reason.starts_with("net_edge_non_positive"));

        let d = gate().evaluate(-0.001, 0.99, 0.99);
        assert!(d.is_blocked());
    }

    #[test]
    fn low_confidence_blocks() {
        let d = gate().evaluate(0.001, 0.54, 0.99);
        assert_eq!(d.state, GateState::Block);
        assert!(d.reason.starts_with("confidence_too_low"));

        // Boundary is lower-inclusive on the pass side.
        let d = gate().evaluate(0.001, 0.55, 0.99);
        assert_ne!(d.state, GateState::Block);
    }

    #[test]
    fn percentile_bands_are_lower_inclusive() {
        let g = gate();

        let d = g.evaluate(0.001, 0.9, 0.599);
        assert_eq!(d.state, GateState::Block);
        assert!(d.reason.starts_with("edge_percentile_too_low"));

        let d = g.evaluate(0.001, 0.9, 0.60);
        assert_eq!(d.state, GateState::Probe);
        assert_eq!(d.position_multiplier, 0.10);
        assert!(d.reason.starts_with("probe_small"));

        let d = g.evaluate(0.001, 0.9, 0.75);
        assert_eq!(d.state, GateState::Probe);
        assert_eq!(d.position_multiplier, 0.25);
        assert!(d.reason.starts_with("probe_medium"));

        let d = g.evaluate(0.001, 0.9, 0.899);
        assert_eq!(d.position_multiplier, 0.25);

        let d = g.evaluate(0.001, 0.9, 0.90);
        assert_eq!(d.state, GateState::Full);
        assert_eq!(d.position_multiplier, 1.0);
        assert!(d.reason.starts_with("full_position"));
    }

    #[test]
    fn cold_start_forces_small_probe() {
        let d = gate().evaluate_with_history(0.002, 0.9, None);
        assert_eq!(d.state, GateState::Probe);
        assert_eq!(d.position_multiplier, 0.10);
        assert!(d.reason.starts_with("insufficient_samples_probe_trial"));
        assert_eq!(d.net_edge, 0.002);
        assert_eq!(d.edge_percentile, INSUFFICIENT_SAMPLES_PERCENTILE);
    }

    #[test]
    fn cold_start_floor_bypasses_the_edge_rule() {
        // A negative edge with no history still runs a trial probe; the
        // floor exists exactly so cold keys can gather observations.
        let d = gate().evaluate_with_history(-0.0005, 0.9, None);
        assert_eq!(d.state, GateState::Probe);
        assert_eq!(d.position_multiplier, 0.10);
        assert_eq!(d.net_edge, -0.0005);
    }

    #[test]
    fn cold_start_still_blocks_on_confidence() {
        let d = gate().evaluate_with_history(0.002, 0.40, None);
        assert_eq!(d.state, GateState::Block);
        assert!(d.reason.starts_with("confidence_too_low"));
    }

    #[test]
    fn known_percentile_is_passed_through() {
        let d = gate().evaluate_with_history(0.002, 0.9, Some(0.95));
        assert_eq!(d.state, GateState::Full);
    }

    #[test]
    fn cost_model_arithmetic() {
        let costs = CostModel::default();
        assert!((net_edge(0.001, &costs) - 0.0004).abs() < 1e-12);
        assert!(net_edge(0.0005, &costs) < 0.0);
        assert!((required_gross_edge(&costs) - 0.0008).abs() < 1e-12);
    }
}
