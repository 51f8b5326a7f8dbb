use crate::config::LearningConfig;
use crate::models::{Signal, TradeRecord};
use crate::signals::Feature;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-feature weights, keyed by feature name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightVector(BTreeMap<String, f64>);

impl Default for WeightVector {
    fn default() -> Self {
        Self(
            Feature::ALL
                .iter()
                .map(|feature| (feature.as_str().to_string(), feature.default_weight()))
                .collect(),
        )
    }
}

impl WeightVector {
    /// Stored weight, falling back to the feature's default and then to zero
    /// for names the policy does not know.
    pub fn get(&self, feature: &str) -> f64 {
        self.0.get(feature).copied().unwrap_or_else(|| {
            feature
                .parse::<Feature>()
                .map(|known| known.default_weight())
                .unwrap_or(0.0)
        })
    }

    pub fn set(&mut self, feature: &str, weight: f64) {
        self.0.insert(feature.to_string(), weight);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(name, weight)| (name.as_str(), *weight))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightAdjustment {
    pub feature: String,
    pub before: f64,
    pub after: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LearningUpdate {
    pub trade_id: String,
    pub outcome_sign: f64,
    pub adjustments: Vec<WeightAdjustment>,
}

impl LearningUpdate {
    pub fn is_noop(&self) -> bool {
        self.adjustments.is_empty()
    }
}

/// Bounded feedback loop over closed trades: features that backed a winning
/// trade gain weight, features that backed a losing one lose it.
#[derive(Debug, Clone)]
pub struct AdaptiveWeighting {
    config: LearningConfig,
    weights: WeightVector,
}

impl AdaptiveWeighting {
    pub fn new(config: LearningConfig, weights: WeightVector) -> Self {
        Self { config, weights }
    }

    pub fn weights(&self) -> &WeightVector {
        &self.weights
    }

    pub fn learn_from_outcome(&mut self, signal: &Signal, trade: &TradeRecord) -> LearningUpdate {
        let action_sign = signal.action.direction();
        if action_sign == 0.0 {
            return LearningUpdate {
                trade_id: trade.id.clone(),
                ..LearningUpdate::default()
            };
        }

        let outcome_sign = if trade.is_win() { 1.0 } else { -1.0 };
        let max_weight = self.config.max_weight;
        let mut adjustments = Vec::with_capacity(signal.reasons.len());

        for reason in &signal.reasons {
            // Only features that argued for the side taken share its outcome.
            if !reason.score.is_finite() || reason.score * action_sign <= 0.0 {
                continue;
            }
            let before = self.weights.get(&reason.feature);
            let delta = self.config.learning_rate * outcome_sign * reason.score.abs();
            let after = (before + delta).clamp(-max_weight, max_weight);
            self.weights.set(&reason.feature, after);
            adjustments.push(WeightAdjustment {
                feature: reason.feature.clone(),
                before,
                after,
            });
        }

        debug!(
            "Learned from trade {} (outcome {:+}): {} weights adjusted",
            trade.id,
            outcome_sign,
            adjustments.len()
        );

        LearningUpdate {
            trade_id: trade.id.clone(),
            outcome_sign,
            adjustments,
        }
    }

    /// Replay every closed trade that kept its entry signal. Returns the
    /// number of trades learned from.
    pub fn learn_from_history(&mut self, trades: &[TradeRecord]) -> usize {
        let mut learned = 0;
        for trade in trades {
            if let Some(signal) = &trade.entry_signal {
                if !self.learn_from_outcome(signal, trade).is_noop() {
                    learned += 1;
                }
            }
        }
        learned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExitReason, IndicatorSnapshot, SignalAction, SignalReason, Side};
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn signal(action: SignalAction, reasons: Vec<(&str, f64)>) -> Signal {
        let timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Signal {
            action,
            confidence: 0.8,
            weighted_sum: 0.4,
            reasons: reasons
                .into_iter()
                .map(|(feature, score)| SignalReason {
                    feature: feature.to_string(),
                    score,
                    contribution: score * 0.2,
                    note: feature.to_string(),
                })
                .collect(),
            timestamp,
            snapshot: IndicatorSnapshot {
                instrument: "ETH".to_string(),
                price: 3000.0,
                rsi: 25.0,
                ema_fast: 3010.0,
                ema_slow: 3000.0,
                bollinger_pos: 0.2,
                volume: 1000.0,
                avg_volume: 1000.0,
                funding_rate: 0.0,
                timestamp,
                source: "test".to_string(),
                stale: false,
            },
        }
    }

    fn trade(net_pnl: Decimal) -> TradeRecord {
        let opened_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        TradeRecord {
            id: "trade".to_string(),
            instrument: "ETH".to_string(),
            side: Side::Long,
            entry_price: dec!(3000),
            exit_price: dec!(3000),
            size_usd: dec!(100),
            leverage: dec!(1),
            opened_at,
            closed_at: opened_at,
            stop_loss: dec!(2940),
            take_profit: dec!(3120),
            entry_fee: dec!(0.10),
            exit_fee: dec!(0.10),
            funding: Decimal::ZERO,
            price_pnl: net_pnl,
            realized_pnl: net_pnl,
            net_pnl,
            exit_reason: ExitReason::Manual,
            entry_signal: None,
        }
    }

    fn learner() -> AdaptiveWeighting {
        AdaptiveWeighting::new(LearningConfig::default(), WeightVector::default())
    }

    #[test]
    fn winning_long_reinforces_supporting_features() {
        let mut learner = learner();
        let update = learner.learn_from_outcome(
            &signal(SignalAction::Long, vec![("rsi_oversold", 0.5), ("bollinger", -0.2)]),
            &trade(dec!(3.80)),
        );

        assert_eq!(update.outcome_sign, 1.0);
        assert_eq!(update.adjustments.len(), 1);
        assert!((learner.weights().get("rsi_oversold") - 0.225).abs() < 1e-9);
        assert!((learner.weights().get("bollinger") - 0.15).abs() < 1e-9);
    }

    #[test]
    fn opposing_features_are_left_alone_on_a_loss() {
        let mut learner = learner();
        let update = learner.learn_from_outcome(
            &signal(
                SignalAction::Short,
                vec![("rsi_overbought", -0.6), ("rsi_oversold", 0.17)],
            ),
            &trade(dec!(-2.20)),
        );
        assert_eq!(update.adjustments.len(), 1);
        assert!((learner.weights().get("rsi_overbought") - 0.17).abs() < 1e-9);
        assert!((learner.weights().get("rsi_oversold") - 0.2).abs() < 1e-9);
    }

    #[test]
    fn losing_short_penalises_bearish_features() {
        let mut learner = learner();
        learner.learn_from_outcome(
            &signal(SignalAction::Short, vec![("rsi_overbought", -0.6)]),
            &trade(dec!(-2.20)),
        );
        assert!((learner.weights().get("rsi_overbought") - 0.17).abs() < 1e-9);
    }

    #[test]
    fn hold_signal_is_noop() {
        let mut learner = learner();
        let update = learner.learn_from_outcome(
            &signal(SignalAction::Hold, vec![("rsi_oversold", 0.5)]),
            &trade(dec!(-2.20)),
        );
        assert!(update.is_noop());
        assert_eq!(learner.weights(), &WeightVector::default());
    }

    #[test]
    fn weights_stay_bounded() {
        let mut learner = AdaptiveWeighting::new(
            LearningConfig {
                learning_rate: 0.5,
                max_weight: 1.0,
            },
            WeightVector::default(),
        );
        for _ in 0..20 {
            learner.learn_from_outcome(
                &signal(SignalAction::Long, vec![("ema_trend", 1.0)]),
                &trade(dec!(1)),
            );
        }
        assert_eq!(learner.weights().get("ema_trend"), 1.0);
    }

    #[test]
    fn empty_history_is_noop() {
        let mut learner = learner();
        assert_eq!(learner.learn_from_history(&[]), 0);
        assert_eq!(learner.weights(), &WeightVector::default());

        // Trades without their entry signal carry nothing to learn from.
        assert_eq!(learner.learn_from_history(&[trade(dec!(5))]), 0);
    }

    #[test]
    fn unknown_features_default_to_zero() {
        let weights = WeightVector::default();
        assert_eq!(weights.get("macd"), 0.0);
        assert_eq!(weights.get("rule_confluence"), 0.3);
        assert_eq!(weights.len(), Feature::ALL.len());
    }
}
