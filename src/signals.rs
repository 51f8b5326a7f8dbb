use crate::config::PolicyConfig;
use crate::learning::WeightVector;
use crate::models::{IndicatorSnapshot, Signal, SignalAction, SignalReason};
use crate::strategy_utils::{clamp_score, meets_confidence_threshold, squash};
use anyhow::anyhow;
use std::fmt;
use std::str::FromStr;

/// Normalised inputs the policy weighs. Positive scores favour LONG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Feature {
    RsiOversold,
    RsiOverbought,
    EmaTrend,
    Bollinger,
    VolumeSpike,
    FundingRate,
    RuleConfluence,
}

impl Feature {
    pub const ALL: [Feature; 7] = [
        Feature::RsiOversold,
        Feature::RsiOverbought,
        Feature::EmaTrend,
        Feature::Bollinger,
        Feature::VolumeSpike,
        Feature::FundingRate,
        Feature::RuleConfluence,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::RsiOversold => "rsi_oversold",
            Feature::RsiOverbought => "rsi_overbought",
            Feature::EmaTrend => "ema_trend",
            Feature::Bollinger => "bollinger",
            Feature::VolumeSpike => "volume_spike",
            Feature::FundingRate => "funding_rate",
            Feature::RuleConfluence => "rule_confluence",
        }
    }

    pub fn default_weight(&self) -> f64 {
        match self {
            Feature::RsiOversold => 0.2,
            Feature::RsiOverbought => 0.2,
            Feature::EmaTrend => 0.15,
            Feature::Bollinger => 0.15,
            Feature::VolumeSpike => 0.1,
            Feature::FundingRate => 0.1,
            Feature::RuleConfluence => 0.3,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Feature::ALL
            .iter()
            .copied()
            .find(|feature| feature.as_str() == s.trim())
            .ok_or_else(|| anyhow!("Unknown feature '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureScore {
    pub feature: Feature,
    pub score: f64,
    pub note: String,
}

/// Score every feature for `snapshot`. Features whose inputs are missing or
/// non-finite score zero.
pub fn feature_scores(snapshot: &IndicatorSnapshot, config: &PolicyConfig) -> Vec<FeatureScore> {
    let rsi = snapshot.rsi;
    let rsi_known = rsi.is_finite();
    let ema_gap = if snapshot.ema_slow.is_finite()
        && snapshot.ema_fast.is_finite()
        && snapshot.ema_slow > 0.0
    {
        (snapshot.ema_fast - snapshot.ema_slow) / snapshot.ema_slow
    } else {
        0.0
    };
    let trend = if ema_gap > 0.0 {
        1.0
    } else if ema_gap < 0.0 {
        -1.0
    } else {
        0.0
    };
    let volume_ratio = if snapshot.avg_volume.is_finite()
        && snapshot.avg_volume > 0.0
        && snapshot.volume.is_finite()
    {
        snapshot.volume / snapshot.avg_volume
    } else {
        0.0
    };
    let volume_spike = volume_ratio >= config.volume_spike_ratio;

    let mut scores = Vec::with_capacity(Feature::ALL.len());

    let oversold = if rsi_known && rsi < config.rsi_oversold {
        (config.rsi_oversold - rsi) / config.rsi_oversold
    } else {
        0.0
    };
    scores.push(FeatureScore {
        feature: Feature::RsiOversold,
        score: clamp_score(oversold),
        note: format!("RSI oversold ({:.1})", rsi),
    });

    let overbought = if rsi_known && rsi > config.rsi_overbought {
        -(rsi - config.rsi_overbought) / (100.0 - config.rsi_overbought)
    } else {
        0.0
    };
    scores.push(FeatureScore {
        feature: Feature::RsiOverbought,
        score: clamp_score(overbought),
        note: format!("RSI overbought ({:.1})", rsi),
    });

    scores.push(FeatureScore {
        feature: Feature::EmaTrend,
        score: clamp_score(ema_gap * config.ema_scale),
        note: if ema_gap >= 0.0 {
            "Fast EMA above slow EMA".to_string()
        } else {
            "Fast EMA below slow EMA".to_string()
        },
    });

    let bollinger = if snapshot.bollinger_pos.is_finite() {
        1.0 - 2.0 * snapshot.bollinger_pos
    } else {
        0.0
    };
    scores.push(FeatureScore {
        feature: Feature::Bollinger,
        score: clamp_score(bollinger),
        note: if bollinger >= 0.0 {
            "Price near lower Bollinger band".to_string()
        } else {
            "Price near upper Bollinger band".to_string()
        },
    });

    scores.push(FeatureScore {
        feature: Feature::VolumeSpike,
        score: if volume_spike { trend } else { 0.0 },
        note: format!("Volume spike ({:.1}x average) with the trend", volume_ratio),
    });

    let funding = if config.funding_scale > 0.0 {
        -snapshot.funding_rate / config.funding_scale
    } else {
        0.0
    };
    scores.push(FeatureScore {
        feature: Feature::FundingRate,
        score: clamp_score(funding),
        note: if snapshot.funding_rate >= 0.0 {
            format!(
                "Positive funding ({:.4}%) crowds longs",
                snapshot.funding_rate * 100.0
            )
        } else {
            format!(
                "Negative funding ({:.4}%) crowds shorts",
                snapshot.funding_rate * 100.0
            )
        },
    });

    let (confluence, confluence_note) =
        if rsi_known && rsi < config.rsi_oversold && trend > 0.0 && volume_spike {
            (1.0, "Oversold bounce with rising EMA and volume spike")
        } else if rsi_known && rsi > config.rsi_overbought && trend < 0.0 {
            (-1.0, "Overbought with falling EMA")
        } else {
            (0.0, "No rule confluence")
        };
    scores.push(FeatureScore {
        feature: Feature::RuleConfluence,
        score: confluence,
        note: confluence_note.to_string(),
    });

    scores
}

/// Maps indicator snapshots to LONG/SHORT/HOLD recommendations.
#[derive(Debug, Clone)]
pub struct SignalPolicy {
    config: PolicyConfig,
}

impl SignalPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Deterministic in `(snapshot, weights)`: the signal is stamped with the
    /// snapshot time, not the wall clock.
    pub fn evaluate(&self, snapshot: &IndicatorSnapshot, weights: &WeightVector) -> Signal {
        let mut weighted_sum = 0.0;
        let mut reasons = Vec::new();

        for scored in feature_scores(snapshot, &self.config) {
            if scored.score == 0.0 {
                continue;
            }
            let contribution = weights.get(scored.feature.as_str()) * scored.score;
            weighted_sum += contribution;
            reasons.push(SignalReason {
                feature: scored.feature.as_str().to_string(),
                score: scored.score,
                contribution,
                note: scored.note,
            });
        }

        reasons.sort_by(|a, b| {
            b.contribution
                .abs()
                .total_cmp(&a.contribution.abs())
                .then_with(|| a.feature.cmp(&b.feature))
        });

        let long_probability = squash(weighted_sum, self.config.confidence_gain);
        let short_probability = 1.0 - long_probability;
        let action = if meets_confidence_threshold(long_probability, self.config.signal_threshold) {
            SignalAction::Long
        } else if meets_confidence_threshold(short_probability, self.config.signal_threshold) {
            SignalAction::Short
        } else {
            SignalAction::Hold
        };

        Signal {
            action,
            confidence: long_probability.max(short_probability),
            weighted_sum,
            reasons,
            timestamp: snapshot.timestamp,
            snapshot: snapshot.clone(),
        }
    }
}
