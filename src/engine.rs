use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::models::*;
use crate::portfolio::Portfolio;
use crate::trading_rules::{
    exit_notional, exit_trigger, funding_cost, notional, price_pnl, price_to_decimal,
    protective_levels, round_money, trade_fee, ProtectiveLevels,
};
use chrono::{DateTime, Utc};
use log::{debug, info};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Everything needed to open a position.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub instrument: String,
    pub side: Side,
    pub size_usd: Decimal,
    pub leverage: Decimal,
    pub price: f64,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    /// Funding rate in force at entry.
    pub funding_rate: f64,
    pub opened_at: DateTime<Utc>,
    pub entry_signal: Option<Signal>,
}

/// Paper trading engine. Every operation either applies fully or leaves the
/// portfolio untouched.
pub struct Engine {
    pub config: EngineConfig,
    portfolio: Portfolio,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let portfolio = Portfolio::new(config.initial_balance);
        Self { config, portfolio }
    }

    /// Resume from a previously persisted portfolio.
    pub fn with_portfolio(config: EngineConfig, portfolio: Portfolio) -> Self {
        Self { config, portfolio }
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn position(&self, instrument: &str) -> Option<&Position> {
        self.portfolio.position(instrument)
    }

    pub fn open_position(&mut self, request: OpenRequest) -> Result<Position, EngineError> {
        let OpenRequest {
            instrument,
            side,
            size_usd,
            leverage,
            price,
            stop_loss_pct,
            take_profit_pct,
            funding_rate,
            opened_at,
            entry_signal,
        } = request;

        let entry_price = price_to_decimal(price, "price")?;
        let size_usd = round_money(size_usd);
        validate_order(
            &instrument,
            side,
            size_usd,
            leverage,
            stop_loss_pct,
            take_profit_pct,
        )?;
        let funding_rate = funding_rate_to_decimal(funding_rate)?;

        if self.portfolio.position(&instrument).is_some() {
            return Err(EngineError::PositionAlreadyOpen { instrument });
        }

        if leverage > self.config.max_leverage {
            return Err(EngineError::ExceedsRiskLimit {
                reason: format!(
                    "leverage {} exceeds maximum {}",
                    leverage, self.config.max_leverage
                ),
            });
        }
        let position_notional = notional(size_usd, leverage);
        let notional_limit = self.portfolio.balance * self.config.max_leverage;
        if position_notional > notional_limit {
            return Err(EngineError::ExceedsRiskLimit {
                reason: format!(
                    "notional {} exceeds balance x max leverage ({})",
                    position_notional, notional_limit
                ),
            });
        }

        let entry_fee = trade_fee(position_notional, self.config.fee_rate);
        let required = size_usd + entry_fee;
        if required > self.portfolio.balance {
            return Err(EngineError::InsufficientBalance {
                required,
                available: self.portfolio.balance,
            });
        }

        let ProtectiveLevels {
            stop_loss,
            take_profit,
            liquidation,
        } = protective_levels(side, entry_price, stop_loss_pct, take_profit_pct, leverage);

        let position = Position {
            id: Uuid::new_v4().to_string(),
            instrument,
            side,
            entry_price,
            size_usd,
            leverage,
            opened_at,
            stop_loss,
            take_profit,
            liquidation_price: liquidation,
            entry_fee,
            funding_rate,
            funding_accrued: Decimal::ZERO,
            funding_accrued_through: opened_at,
            last_price: Some(entry_price),
            unrealized_pnl: Decimal::ZERO,
            entry_signal,
        };

        self.portfolio.balance -= required;
        self.portfolio.open_positions.push(position.clone());

        info!(
            "Opened {} {} margin {} x{} at {} (SL {}, TP {}, fee {})",
            position.side,
            position.instrument,
            position.size_usd,
            position.leverage,
            position.entry_price,
            position.stop_loss,
            position.take_profit,
            position.entry_fee
        );

        Ok(position)
    }

    /// Unrealized price PnL at `current_price`. Only the position's cached
    /// reporting fields change.
    pub fn mark_to_market(
        &mut self,
        instrument: &str,
        current_price: f64,
    ) -> Result<Decimal, EngineError> {
        let index = self.position_index(instrument)?;
        let price = price_to_decimal(current_price, "current price")?;
        let position = &mut self.portfolio.open_positions[index];
        let pnl = price_pnl(
            position.side,
            position.entry_price,
            price,
            position.size_usd,
            position.leverage,
        );
        position.last_price = Some(price);
        position.unrealized_pnl = round_money(pnl);
        Ok(pnl)
    }

    pub fn check_exit_conditions(&self, instrument: &str, current_price: f64) -> Option<ExitReason> {
        self.check_exit_range(instrument, current_price, current_price)
    }

    /// Exit check over a traded range, for ticks that gap through several
    /// levels at once.
    pub fn check_exit_range(&self, instrument: &str, low: f64, high: f64) -> Option<ExitReason> {
        let position = self.portfolio.position(instrument)?;
        let (low, high) = match (
            price_to_decimal(low, "low"),
            price_to_decimal(high, "high"),
        ) {
            (Ok(low), Ok(high)) => (low.min(high), low.max(high)),
            _ => {
                debug!("Ignoring exit check for {} on invalid prices", instrument);
                return None;
            }
        };
        let levels = ProtectiveLevels {
            stop_loss: position.stop_loss,
            take_profit: position.take_profit,
            liquidation: position.liquidation_price,
        };
        exit_trigger(position.side, &levels, low, high)
    }

    /// Accrue funding at the previous rate up to `at`, then switch to `rate`.
    /// A no-op when the instrument has no open position.
    pub fn observe_funding_rate(
        &mut self,
        instrument: &str,
        rate: f64,
        at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let Some(index) = self.portfolio.position_index(instrument) else {
            return Ok(());
        };
        let rate = funding_rate_to_decimal(rate)?;
        let interval_hours = self.config.funding_interval_hours;
        let position = &mut self.portfolio.open_positions[index];
        if at > position.funding_accrued_through {
            position.funding_accrued += funding_cost(
                position.side,
                position.notional(),
                position.funding_rate,
                position.funding_accrued_through,
                at,
                interval_hours,
            );
            position.funding_accrued_through = at;
        }
        position.funding_rate = rate;
        Ok(())
    }

    pub fn close_position(
        &mut self,
        instrument: &str,
        price: f64,
        reason: ExitReason,
        closed_at: DateTime<Utc>,
    ) -> Result<TradeRecord, EngineError> {
        let index = self.position_index(instrument)?;
        let exit_price = price_to_decimal(price, "exit price")?;

        let position = &self.portfolio.open_positions[index];
        let pending_funding = funding_cost(
            position.side,
            position.notional(),
            position.funding_rate,
            position.funding_accrued_through,
            closed_at,
            self.config.funding_interval_hours,
        );
        let funding = round_money(position.funding_accrued + pending_funding);
        let gross = price_pnl(
            position.side,
            position.entry_price,
            exit_price,
            position.size_usd,
            position.leverage,
        );
        let exit_fee = trade_fee(
            exit_notional(position.notional(), position.entry_price, exit_price),
            self.config.fee_rate,
        );
        // Isolated margin: the loss stops at the committed margin.
        let realized_pnl = round_money(gross - exit_fee - funding).max(-position.size_usd);
        let net_pnl = realized_pnl - position.entry_fee;

        let position = self.portfolio.open_positions.remove(index);
        let record = TradeRecord {
            id: position.id,
            instrument: position.instrument,
            side: position.side,
            entry_price: position.entry_price,
            exit_price,
            size_usd: position.size_usd,
            leverage: position.leverage,
            opened_at: position.opened_at,
            closed_at,
            stop_loss: position.stop_loss,
            take_profit: position.take_profit,
            entry_fee: position.entry_fee,
            exit_fee,
            funding,
            price_pnl: round_money(gross),
            realized_pnl,
            net_pnl,
            exit_reason: reason,
            entry_signal: position.entry_signal,
        };

        self.portfolio.balance += record.size_usd + realized_pnl;
        self.portfolio.cumulative_realized_pnl += net_pnl;
        self.portfolio.trade_history.push(record.clone());

        info!(
            "Closed {} {} at {} ({}): realized {}, net {}, balance {}",
            record.side,
            record.instrument,
            record.exit_price,
            record.exit_reason,
            record.realized_pnl,
            record.net_pnl,
            self.portfolio.balance
        );

        Ok(record)
    }

    pub fn get_portfolio_summary(&self) -> PortfolioSummary {
        self.portfolio.summary()
    }

    fn position_index(&self, instrument: &str) -> Result<usize, EngineError> {
        self.portfolio
            .position_index(instrument)
            .ok_or_else(|| EngineError::NoSuchPosition {
                instrument: instrument.to_string(),
            })
    }
}

fn validate_order(
    instrument: &str,
    side: Side,
    size_usd: Decimal,
    leverage: Decimal,
    stop_loss_pct: Decimal,
    take_profit_pct: Decimal,
) -> Result<(), EngineError> {
    let invalid = |reason: String| -> Result<(), EngineError> {
        Err(EngineError::InvalidOrder { reason })
    };

    if instrument.trim().is_empty() {
        return invalid("instrument must not be empty".to_string());
    }
    if size_usd <= Decimal::ZERO {
        return invalid(format!("size must be positive (value: {})", size_usd));
    }
    if leverage < Decimal::ONE {
        return invalid(format!("leverage must be >= 1 (value: {})", leverage));
    }
    if stop_loss_pct <= Decimal::ZERO || stop_loss_pct >= Decimal::ONE {
        return invalid(format!(
            "stop-loss percentage must be within (0, 1) (value: {})",
            stop_loss_pct
        ));
    }
    if take_profit_pct <= Decimal::ZERO
        || (side == Side::Short && take_profit_pct >= Decimal::ONE)
    {
        return invalid(format!(
            "take-profit percentage out of range for a {} (value: {})",
            side, take_profit_pct
        ));
    }
    Ok(())
}

fn funding_rate_to_decimal(rate: f64) -> Result<Decimal, EngineError> {
    if !rate.is_finite() {
        return Err(EngineError::InvalidOrder {
            reason: format!("funding rate must be finite (value: {})", rate),
        });
    }
    Decimal::from_f64(rate)
        .map(|value| value.normalize())
        .ok_or_else(|| EngineError::InvalidOrder {
            reason: format!("funding rate is out of range (value: {})", rate),
        })
}
