use crate::errors::EngineError;
use crate::models::{ExitReason, Side};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

const SECONDS_PER_HOUR: i64 = 3600;

/// Round a booked money amount to cents.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Convert a provider price into a `Decimal`, rejecting values no order could
/// execute at.
pub fn price_to_decimal(price: f64, field: &str) -> Result<Decimal, EngineError> {
    if !price.is_finite() || price <= 0.0 {
        return Err(EngineError::InvalidOrder {
            reason: format!("{} must be a positive finite number (value: {})", field, price),
        });
    }
    Decimal::from_f64(price)
        .map(|value| value.normalize())
        .ok_or_else(|| EngineError::InvalidOrder {
            reason: format!("{} is out of range (value: {})", field, price),
        })
}

pub fn notional(size_usd: Decimal, leverage: Decimal) -> Decimal {
    size_usd * leverage
}

pub fn trade_fee(notional: Decimal, fee_rate: Decimal) -> Decimal {
    round_money(notional * fee_rate)
}

/// Notional at the exit price; the position's exposure scales with price.
pub fn exit_notional(notional: Decimal, entry_price: Decimal, exit_price: Decimal) -> Decimal {
    if entry_price.is_zero() {
        return notional;
    }
    notional * exit_price / entry_price
}

/// Unrounded price PnL of a leveraged position.
pub fn price_pnl(
    side: Side,
    entry_price: Decimal,
    current_price: Decimal,
    size_usd: Decimal,
    leverage: Decimal,
) -> Decimal {
    if entry_price.is_zero() {
        return Decimal::ZERO;
    }
    (current_price - entry_price) * side.direction() * leverage * size_usd / entry_price
}

/// Funding paid (positive) or received (negative) over `[from, to)` at a
/// constant rate per funding interval. Longs pay a positive rate.
pub fn funding_cost(
    side: Side,
    notional: Decimal,
    rate: Decimal,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    interval_hours: Decimal,
) -> Decimal {
    let elapsed_seconds = (to - from).num_seconds();
    if elapsed_seconds <= 0 || interval_hours <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let elapsed_hours = Decimal::from(elapsed_seconds) / Decimal::from(SECONDS_PER_HOUR);
    notional * rate * elapsed_hours / interval_hours * side.direction()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProtectiveLevels {
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub liquidation: Decimal,
}

pub fn protective_levels(
    side: Side,
    entry_price: Decimal,
    stop_loss_pct: Decimal,
    take_profit_pct: Decimal,
    leverage: Decimal,
) -> ProtectiveLevels {
    let liquidation_move = if leverage > Decimal::ZERO {
        Decimal::ONE / leverage
    } else {
        Decimal::ONE
    };
    match side {
        Side::Long => ProtectiveLevels {
            stop_loss: entry_price * (Decimal::ONE - stop_loss_pct),
            take_profit: entry_price * (Decimal::ONE + take_profit_pct),
            liquidation: entry_price * (Decimal::ONE - liquidation_move),
        },
        Side::Short => ProtectiveLevels {
            stop_loss: entry_price * (Decimal::ONE + stop_loss_pct),
            take_profit: entry_price * (Decimal::ONE - take_profit_pct),
            liquidation: entry_price * (Decimal::ONE + liquidation_move),
        },
    }
}

/// Which protective level, if any, the traded range `[low, high]` reached.
///
/// Adverse levels win over take-profit when both are inside the range, and
/// between the two adverse levels the one closer to entry is hit first.
pub fn exit_trigger(
    side: Side,
    levels: &ProtectiveLevels,
    low: Decimal,
    high: Decimal,
) -> Option<ExitReason> {
    let (stop_hit, liquidation_hit, take_profit_hit) = match side {
        Side::Long => (
            low <= levels.stop_loss,
            low <= levels.liquidation,
            high >= levels.take_profit,
        ),
        Side::Short => (
            high >= levels.stop_loss,
            high >= levels.liquidation,
            low <= levels.take_profit,
        ),
    };

    match (stop_hit, liquidation_hit) {
        (true, true) => {
            let stop_first = match side {
                Side::Long => levels.stop_loss >= levels.liquidation,
                Side::Short => levels.stop_loss <= levels.liquidation,
            };
            if stop_first {
                Some(ExitReason::StopLoss)
            } else {
                Some(ExitReason::Liquidation)
            }
        }
        (true, false) => Some(ExitReason::StopLoss),
        (false, true) => Some(ExitReason::Liquidation),
        (false, false) if take_profit_hit => Some(ExitReason::TakeProfit),
        (false, false) => None,
    }
}
