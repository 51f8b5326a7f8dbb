use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }

    /// +1 for long, -1 for short.
    pub fn direction(&self) -> Decimal {
        match self {
            Side::Long => Decimal::ONE,
            Side::Short => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "long" | "buy" => Ok(Side::Long),
            "short" | "sell" => Ok(Side::Short),
            other => Err(anyhow!("Unknown position side '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Liquidation,
    Manual,
    SignalReversal,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::Liquidation => "liquidation",
            ExitReason::Manual => "manual",
            ExitReason::SignalReversal => "signal_reversal",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Long,
    Short,
    Hold,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Long => "LONG",
            SignalAction::Short => "SHORT",
            SignalAction::Hold => "HOLD",
        }
    }

    pub fn side(&self) -> Option<Side> {
        match self {
            SignalAction::Long => Some(Side::Long),
            SignalAction::Short => Some(Side::Short),
            SignalAction::Hold => None,
        }
    }

    /// +1 for LONG, -1 for SHORT, 0 for HOLD.
    pub fn direction(&self) -> f64 {
        self.side().map(|side| side.sign()).unwrap_or(0.0)
    }
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "long" | "buy" => Ok(SignalAction::Long),
            "short" | "sell" => Ok(SignalAction::Short),
            "hold" => Ok(SignalAction::Hold),
            other => Err(anyhow!("Unknown signal action '{}'", other)),
        }
    }
}

/// Point-in-time indicator values for one instrument.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndicatorSnapshot {
    pub instrument: String,
    pub price: f64,
    pub rsi: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    /// Price position inside the Bollinger bands: 0 at the lower band, 1 at the upper band.
    pub bollinger_pos: f64,
    pub volume: f64,
    #[serde(default)]
    pub avg_volume: f64,
    pub funding_rate: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub stale: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalReason {
    pub feature: String,
    pub score: f64,
    pub contribution: f64,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub action: SignalAction,
    /// Always on the 0..=1 scale.
    pub confidence: f64,
    pub weighted_sum: f64,
    pub reasons: Vec<SignalReason>,
    pub timestamp: DateTime<Utc>,
    pub snapshot: IndicatorSnapshot,
}

impl Signal {
    pub fn is_actionable(&self) -> bool {
        !matches!(self.action, SignalAction::Hold)
    }

    pub fn justification(&self) -> String {
        let notes: Vec<&str> = self
            .reasons
            .iter()
            .filter(|reason| reason.contribution != 0.0)
            .map(|reason| reason.note.as_str())
            .collect();
        let body = if notes.is_empty() {
            "Balanced market conditions".to_string()
        } else {
            notes.join(", ")
        };
        format!(
            "{} {}: {}. Confidence {:.1}%",
            self.snapshot.instrument,
            self.action,
            body,
            self.confidence * 100.0
        )
    }
}

/// Read-only view handed to the natural-language recommendation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub instrument: String,
    pub action: SignalAction,
    pub confidence: f64,
    pub reasons: Vec<SignalReason>,
    pub justification: String,
    pub timestamp: DateTime<Utc>,
    pub stale: bool,
}

impl From<&Signal> for Recommendation {
    fn from(signal: &Signal) -> Self {
        Self {
            instrument: signal.snapshot.instrument.clone(),
            action: signal.action,
            confidence: signal.confidence,
            reasons: signal.reasons.clone(),
            justification: signal.justification(),
            timestamp: signal.timestamp,
            stale: signal.snapshot.stale,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub id: String,
    pub instrument: String,
    pub side: Side,
    pub entry_price: Decimal,
    /// Margin committed, in USD.
    pub size_usd: Decimal,
    pub leverage: Decimal,
    pub opened_at: DateTime<Utc>,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub liquidation_price: Decimal,
    pub entry_fee: Decimal,
    pub funding_rate: Decimal,
    pub funding_accrued: Decimal,
    pub funding_accrued_through: DateTime<Utc>,
    #[serde(default)]
    pub last_price: Option<Decimal>,
    #[serde(default)]
    pub unrealized_pnl: Decimal,
    #[serde(default)]
    pub entry_signal: Option<Signal>,
}

impl Position {
    pub fn notional(&self) -> Decimal {
        self.size_usd * self.leverage
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub id: String,
    pub instrument: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub size_usd: Decimal,
    pub leverage: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub entry_fee: Decimal,
    pub exit_fee: Decimal,
    pub funding: Decimal,
    pub price_pnl: Decimal,
    /// Price PnL after exit fee and funding.
    pub realized_pnl: Decimal,
    /// Realized PnL after the entry fee as well; the trade's total profit.
    pub net_pnl: Decimal,
    pub exit_reason: ExitReason,
    #[serde(default)]
    pub entry_signal: Option<Signal>,
}

impl TradeRecord {
    pub fn is_win(&self) -> bool {
        self.net_pnl > Decimal::ZERO
    }

    pub fn fees(&self) -> Decimal {
        self.entry_fee + self.exit_fee
    }

    pub fn holding_hours(&self) -> f64 {
        (self.closed_at - self.opened_at).num_seconds().max(0) as f64 / 3600.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioSummary {
    pub balance: Decimal,
    pub total_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub equity: Decimal,
    pub win_rate: f64,
    pub open_count: usize,
    pub total_trades: usize,
    pub roi: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            instrument: "ETH".to_string(),
            price: 3000.0,
            rsi: 25.0,
            ema_fast: 3010.0,
            ema_slow: 2990.0,
            bollinger_pos: 0.1,
            volume: 2000.0,
            avg_volume: 1000.0,
            funding_rate: 0.0001,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            source: "test".to_string(),
            stale: false,
        }
    }

    #[test]
    fn parses_actions_and_sides_case_insensitively() {
        assert_eq!("long".parse::<SignalAction>().unwrap(), SignalAction::Long);
        assert_eq!(" SELL ".parse::<SignalAction>().unwrap(), SignalAction::Short);
        assert_eq!("Hold".parse::<SignalAction>().unwrap(), SignalAction::Hold);
        assert!("flat".parse::<SignalAction>().is_err());
        assert_eq!("Short".parse::<Side>().unwrap(), Side::Short);
        assert_eq!(Side::Short.opposite(), Side::Long);
    }

    #[test]
    fn recommendation_only_exposes_signal_view() {
        let signal = Signal {
            action: SignalAction::Long,
            confidence: 0.82,
            weighted_sum: 0.4,
            reasons: vec![SignalReason {
                feature: "rsi_oversold".to_string(),
                score: 0.2,
                contribution: 0.04,
                note: "RSI oversold (25.0)".to_string(),
            }],
            timestamp: snapshot().timestamp,
            snapshot: snapshot(),
        };

        let recommendation = Recommendation::from(&signal);
        assert_eq!(recommendation.action, SignalAction::Long);
        assert_eq!(recommendation.reasons.len(), 1);
        assert_eq!(
            recommendation.justification,
            "ETH LONG: RSI oversold (25.0). Confidence 82.0%"
        );

        let json = serde_json::to_value(&recommendation).unwrap();
        assert_eq!(json["action"], "LONG");
    }
}
