use crate::models::TradeRecord;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use statrs::statistics::Statistics;
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_net_pnl: Decimal,
    pub average_win: f64,
    pub average_loss: f64,
    pub median_pnl: f64,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
    pub total_fees: Decimal,
    pub total_funding: Decimal,
    pub max_drawdown: f64,
    pub max_drawdown_percent: f64,
    /// Mean over standard deviation of per-trade returns on margin. Not annualised.
    pub sharpe_ratio: f64,
    pub average_holding_hours: f64,
    pub exits_by_reason: BTreeMap<String, usize>,
}

struct DrawdownInfo {
    max_drawdown: f64,
    max_drawdown_percent: f64,
}

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    pub fn calculate(trades: &[TradeRecord], initial_balance: Decimal) -> PerformanceReport {
        let mut ordered: Vec<&TradeRecord> = trades.iter().collect();
        ordered.sort_by_key(|trade| trade.closed_at);

        let mut trade_pnls = Vec::with_capacity(ordered.len());
        let mut trade_returns = Vec::with_capacity(ordered.len());
        let mut winning_trade_pnls = Vec::new();
        let mut losing_trade_pnls = Vec::new();
        let mut holding_hours = Vec::with_capacity(ordered.len());
        let mut exits_by_reason = BTreeMap::new();

        let mut total_net_pnl = Decimal::ZERO;
        let mut total_fees = Decimal::ZERO;
        let mut total_funding = Decimal::ZERO;
        let mut largest_win = Decimal::ZERO;
        let mut largest_loss = Decimal::ZERO;

        let initial = initial_balance.to_f64().unwrap_or(0.0);
        let mut equity_curve = Vec::with_capacity(ordered.len() + 1);
        equity_curve.push(initial);

        for trade in ordered.iter().copied() {
            let pnl = trade.net_pnl.to_f64().unwrap_or(0.0);
            let margin = trade.size_usd.to_f64().unwrap_or(0.0);

            trade_pnls.push(pnl);
            trade_returns.push(if margin > 0.0 { pnl / margin } else { 0.0 });
            holding_hours.push(trade.holding_hours());

            if trade.net_pnl > Decimal::ZERO {
                winning_trade_pnls.push(pnl);
            } else if trade.net_pnl < Decimal::ZERO {
                losing_trade_pnls.push(pnl);
            }

            total_net_pnl += trade.net_pnl;
            total_fees += trade.fees();
            total_funding += trade.funding;
            largest_win = largest_win.max(trade.net_pnl);
            largest_loss = largest_loss.min(trade.net_pnl);
            *exits_by_reason
                .entry(trade.exit_reason.as_str().to_string())
                .or_insert(0) += 1;

            equity_curve.push(initial + total_net_pnl.to_f64().unwrap_or(0.0));
        }

        let total_trades = ordered.len();
        let win_rate = if total_trades > 0 {
            winning_trade_pnls.len() as f64 / total_trades as f64
        } else {
            0.0
        };
        let drawdown = Self::calculate_max_drawdown(&equity_curve);

        PerformanceReport {
            total_trades,
            winning_trades: winning_trade_pnls.len(),
            losing_trades: losing_trade_pnls.len(),
            win_rate,
            total_net_pnl,
            average_win: Self::average(&winning_trade_pnls),
            average_loss: Self::average(&losing_trade_pnls),
            median_pnl: Self::median(&trade_pnls),
            largest_win,
            largest_loss,
            total_fees,
            total_funding,
            max_drawdown: drawdown.max_drawdown,
            max_drawdown_percent: drawdown.max_drawdown_percent,
            sharpe_ratio: Self::calculate_sharpe_ratio(&trade_returns),
            average_holding_hours: Self::average(&holding_hours),
            exits_by_reason,
        }
    }

    fn average(values: &[f64]) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;

        for value in values.iter().copied() {
            if value.is_finite() {
                sum += value;
                count += 1;
            }
        }

        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    fn median(values: &[f64]) -> f64 {
        let mut filtered: Vec<f64> = values
            .iter()
            .copied()
            .filter(|value| value.is_finite())
            .collect();

        if filtered.is_empty() {
            return 0.0;
        }

        filtered.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let mid = filtered.len() / 2;

        if filtered.len() % 2 == 0 {
            (filtered[mid - 1] + filtered[mid]) / 2.0
        } else {
            filtered[mid]
        }
    }

    pub fn calculate_sharpe_ratio(trade_returns: &[f64]) -> f64 {
        if trade_returns.len() < 2 {
            return 0.0;
        }

        let mean_return = trade_returns.mean();
        let std_dev = trade_returns.std_dev();

        if !std_dev.is_finite() || std_dev == 0.0 {
            return 0.0;
        }

        mean_return / std_dev
    }

    fn calculate_max_drawdown(equity_curve: &[f64]) -> DrawdownInfo {
        let Some(first) = equity_curve.first().copied() else {
            return DrawdownInfo {
                max_drawdown: 0.0,
                max_drawdown_percent: 0.0,
            };
        };

        let mut max_drawdown = 0.0;
        let mut max_drawdown_percent = 0.0;
        let mut peak_value = first;

        for value in equity_curve.iter().copied() {
            if value > peak_value {
                peak_value = value;
            } else {
                let drawdown = peak_value - value;
                let drawdown_percent = if peak_value > 0.0 {
                    (drawdown / peak_value) * 100.0
                } else {
                    0.0
                };

                if drawdown > max_drawdown {
                    max_drawdown = drawdown;
                }
                if drawdown_percent > max_drawdown_percent {
                    max_drawdown_percent = drawdown_percent;
                }
            }
        }

        DrawdownInfo {
            max_drawdown,
            max_drawdown_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExitReason, Side};
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn trade(hour: i64, net_pnl: Decimal, exit_reason: ExitReason) -> TradeRecord {
        let opened_at = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + Duration::hours(hour);
        TradeRecord {
            id: format!("trade-{}", hour),
            instrument: "ETH".to_string(),
            side: Side::Long,
            entry_price: dec!(3000),
            exit_price: dec!(3000),
            size_usd: dec!(100),
            leverage: dec!(1),
            opened_at,
            closed_at: opened_at + Duration::hours(2),
            stop_loss: dec!(2940),
            take_profit: dec!(3120),
            entry_fee: dec!(0.10),
            exit_fee: dec!(0.10),
            funding: dec!(0.01),
            price_pnl: net_pnl,
            realized_pnl: net_pnl,
            net_pnl,
            exit_reason,
            entry_signal: None,
        }
    }

    #[test]
    fn empty_history_reports_zeroes() {
        let report = PerformanceCalculator::calculate(&[], dec!(10000));
        assert_eq!(report.total_trades, 0);
        assert_eq!(report.win_rate, 0.0);
        assert_eq!(report.sharpe_ratio, 0.0);
        assert_eq!(report.max_drawdown, 0.0);
        assert!(report.exits_by_reason.is_empty());
    }

    #[test]
    fn summarises_wins_losses_and_drawdown() {
        let trades = vec![
            trade(0, dec!(3.80), ExitReason::TakeProfit),
            trade(3, dec!(-2.20), ExitReason::StopLoss),
            trade(6, dec!(-2.20), ExitReason::StopLoss),
            trade(9, dec!(5.00), ExitReason::SignalReversal),
        ];
        let report = PerformanceCalculator::calculate(&trades, dec!(1000));

        assert_eq!(report.total_trades, 4);
        assert_eq!(report.winning_trades, 2);
        assert_eq!(report.losing_trades, 2);
        assert!((report.win_rate - 0.5).abs() < 1e-9);
        assert_eq!(report.total_net_pnl, dec!(4.40));
        assert!((report.average_win - 4.4).abs() < 1e-9);
        assert!((report.average_loss + 2.2).abs() < 1e-9);
        assert_eq!(report.largest_win, dec!(5.00));
        assert_eq!(report.largest_loss, dec!(-2.20));
        assert_eq!(report.total_fees, dec!(0.80));
        assert_eq!(report.total_funding, dec!(0.04));
        assert!((report.max_drawdown - 4.4).abs() < 1e-9);
        assert!((report.average_holding_hours - 2.0).abs() < 1e-9);
        assert_eq!(report.exits_by_reason.get("stop_loss"), Some(&2));
        assert!(report.sharpe_ratio > 0.0);
    }

    #[test]
    fn sharpe_needs_dispersion() {
        assert_eq!(PerformanceCalculator::calculate_sharpe_ratio(&[0.01]), 0.0);
        assert_eq!(
            PerformanceCalculator::calculate_sharpe_ratio(&[0.02, 0.02, 0.02]),
            0.0
        );
    }
}
