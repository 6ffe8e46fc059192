//! Signal generation seam.
//!
//! The trust core does not invent trading signals: it consumes an
//! (action, confidence) pair per evaluation cycle from whatever sits behind
//! [`SignalSource`]. The bundled [`RuleSignal`] is a deterministic
//! momentum-vs-volatility rule suitable for paper runs and tests.

use tc_core::types::SignalAction;

use crate::exchange::Kline;

/// Feature vector computed from the latest klines.
#[derive(Debug, Clone, Copy)]
pub struct Features {
    /// Last close vs. previous close, fractional.
    pub price_change: f64,
    /// Last volume vs. previous volume, fractional.
    pub volume_change: f64,
    /// Last candle range over its open, fractional.
    pub volatility: f64,
    pub close: f64,
    pub volume: f64,
}

/// Compute features from chronological klines. Needs at least two candles.
pub fn compute_features(klines: &[Kline]) -> Option<Features> {
    let [.., prev, curr] = klines else {
        return None;
    };
    Some(Features {
        price_change: (curr.close - prev.close) / prev.close.max(1e-9),
        volume_change: (curr.volume - prev.volume) / prev.volume.max(1e-9),
        volatility: (curr.high - curr.low) / curr.open.max(1e-9),
        close: curr.close,
        volume: curr.volume,
    })
}

/// One evaluation-cycle verdict.
#[derive(Debug, Clone, Copy)]
pub struct Signal {
    pub action: SignalAction,
    /// Signal strength in [0, 1].
    pub confidence: f64,
}

impl Signal {
    pub const HOLD: Signal = Signal { action: SignalAction::Hold, confidence: 0.0 };
}

/// Supplier of per-cycle trading signals.
pub trait SignalSource: Send + Sync {
    fn decide(&self, features: &Features) -> Signal;
}

/// Deterministic rule: follow short-term momentum unless the last candle is
/// too volatile, with confidence scaled by the size of the move.
pub struct RuleSignal {
    /// Minimum absolute price change worth acting on.
    pub min_price_change: f64,
    /// Maximum candle volatility before standing aside.
    pub max_volatility: f64,
}

impl Default for RuleSignal {
    fn default() -> Self {
        Self { min_price_change: 0.001, max_volatility: 0.01 }
    }
}

impl SignalSource for RuleSignal {
    fn decide(&self, features: &Features) -> Signal {
        if features.price_change.abs() < self.min_price_change {
            return Signal::HOLD;
        }
        if features.volatility > self.max_volatility {
            return Signal::HOLD;
        }

        let confidence =
            (features.price_change.abs() / self.min_price_change * 0.5).min(0.8);
        let action = if features.price_change > 0.0 {
            SignalAction::Long
        } else {
            SignalAction::Short
        };
        Signal { action, confidence }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kline(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Kline {
        Kline { open, high, low, close, volume }
    }

    fn features(price_change: f64, volatility: f64) -> Features {
        Features { price_change, volume_change: 0.0, volatility, close: 100.0, volume: 1.0 }
    }

    #[test]
    fn features_from_last_two_candles() {
        let klines = vec![
            kline(90.0, 95.0, 89.0, 94.0, 100.0),
            kline(94.0, 96.0, 93.0, 100.0, 100.0),
            kline(100.0, 103.0, 99.0, 102.0, 150.0),
        ];
        let f = compute_features(&klines).unwrap();
        assert!((f.price_change - 0.02).abs() < 1e-12);
        assert!((f.volume_change - 0.5).abs() < 1e-12);
        assert!((f.volatility - 0.04).abs() < 1e-12);
        assert_eq!(f.close, 102.0);
    }

    #[test]
    fn features_need_two_candles() {
        assert!(compute_features(&[]).is_none());
        assert!(compute_features(&[kline(1.0, 1.0, 1.0, 1.0, 1.0)]).is_none());
    }

    #[test]
    fn small_moves_and_high_volatility_hold() {
        let rule = RuleSignal::default();
        assert_eq!(rule.decide(&features(0.0005, 0.005)).action, SignalAction::Hold);
        assert_eq!(rule.decide(&features(0.005, 0.02)).action, SignalAction::Hold);
    }

    #[test]
    fn momentum_sets_direction_and_confidence() {
        let rule = RuleSignal::default();

        let up = rule.decide(&features(0.001, 0.005));
        assert_eq!(up.action, SignalAction::Long);
        assert!((up.confidence - 0.5).abs() < 1e-12);

        let down = rule.decide(&features(-0.002, 0.005));
        assert_eq!(down.action, SignalAction::Short);
        assert!((down.confidence - 0.8).abs() < 1e-12); // capped

        assert_eq!(rule.decide(&features(0.01, 0.005)).confidence, 0.8);
    }
}
