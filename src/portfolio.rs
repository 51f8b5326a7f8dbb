use crate::models::{Position, PortfolioSummary, TradeRecord};
use crate::trading_rules::round_money;
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The paper account: cash balance, open positions and closed trades.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Portfolio {
    pub initial_balance: Decimal,
    pub balance: Decimal,
    #[serde(default)]
    pub cumulative_realized_pnl: Decimal,
    #[serde(default)]
    pub open_positions: Vec<Position>,
    #[serde(default)]
    pub trade_history: Vec<TradeRecord>,
}

impl Portfolio {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            initial_balance,
            balance: initial_balance,
            cumulative_realized_pnl: Decimal::ZERO,
            open_positions: Vec::new(),
            trade_history: Vec::new(),
        }
    }

    pub fn position(&self, instrument: &str) -> Option<&Position> {
        self.open_positions
            .iter()
            .find(|position| position.instrument == instrument)
    }

    pub(crate) fn position_index(&self, instrument: &str) -> Option<usize> {
        self.open_positions
            .iter()
            .position(|position| position.instrument == instrument)
    }

    pub fn open_count(&self) -> usize {
        self.open_positions.len()
    }

    /// Sum of the cached mark-to-market values.
    pub fn unrealized_pnl(&self) -> Decimal {
        self.open_positions
            .iter()
            .map(|position| position.unrealized_pnl)
            .sum()
    }

    pub fn locked_margin(&self) -> Decimal {
        self.open_positions
            .iter()
            .map(|position| position.size_usd)
            .sum()
    }

    pub fn equity(&self) -> Decimal {
        self.balance + self.locked_margin() + self.unrealized_pnl()
    }

    /// Distance from `balance + Σ(margin + entry fee) == initial + realized`.
    /// Zero whenever every mutation went through the engine.
    pub fn ledger_discrepancy(&self) -> Decimal {
        let committed: Decimal = self
            .open_positions
            .iter()
            .map(|position| position.size_usd + position.entry_fee)
            .sum();
        self.balance + committed - (self.initial_balance + self.cumulative_realized_pnl)
    }

    /// Entries opened on `date`, closed or still open.
    pub fn trades_opened_on(&self, date: NaiveDate) -> usize {
        let closed = self
            .trade_history
            .iter()
            .filter(|trade| trade.opened_at.date_naive() == date)
            .count();
        let open = self
            .open_positions
            .iter()
            .filter(|position| position.opened_at.date_naive() == date)
            .count();
        closed + open
    }

    pub fn summary(&self) -> PortfolioSummary {
        let total_trades = self.trade_history.len();
        let wins = self
            .trade_history
            .iter()
            .filter(|trade| trade.is_win())
            .count();
        let win_rate = if total_trades > 0 {
            wins as f64 / total_trades as f64
        } else {
            0.0
        };
        let roi = if self.initial_balance > Decimal::ZERO {
            (self.cumulative_realized_pnl / self.initial_balance)
                .to_f64()
                .unwrap_or(0.0)
        } else {
            0.0
        };
        let unrealized_pnl = self.unrealized_pnl();

        PortfolioSummary {
            balance: self.balance,
            total_pnl: self.cumulative_realized_pnl,
            unrealized_pnl,
            equity: self.balance + self.locked_margin() + unrealized_pnl,
            win_rate,
            open_count: self.open_count(),
            total_trades,
            roi,
        }
    }

    /// Copy with every money field rounded to cents, as stored on disk.
    pub fn rounded(&self) -> Self {
        let mut copy = self.clone();
        copy.balance = round_money(copy.balance);
        copy.cumulative_realized_pnl = round_money(copy.cumulative_realized_pnl);
        for position in &mut copy.open_positions {
            position.funding_accrued = round_money(position.funding_accrued);
            position.unrealized_pnl = round_money(position.unrealized_pnl);
        }
        copy
    }
}
