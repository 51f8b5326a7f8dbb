use crate::context::AppContext;
use anyhow::Result;

pub async fn run(app: &AppContext, limit: Option<usize>) -> Result<()> {
    let state = app.load_state()?;
    let trades = &state.portfolio.trade_history;
    if trades.is_empty() {
        println!("No closed trades.");
        return Ok(());
    }

    let limit = limit.unwrap_or(trades.len());
    println!(
        "{:<20} {:<6} {:<5} {:>10} {:>10} {:>8} {:>9}  {}",
        "closed", "inst", "side", "entry", "exit", "size", "net", "reason"
    );
    for trade in trades.iter().rev().take(limit) {
        println!(
            "{:<20} {:<6} {:<5} {:>10} {:>10} {:>8} {:>9}  {}",
            trade.closed_at.format("%Y-%m-%d %H:%M"),
            trade.instrument,
            trade.side,
            trade.entry_price.round_dp(2),
            trade.exit_price.round_dp(2),
            trade.size_usd,
            trade.net_pnl,
            trade.exit_reason
        );
    }
    if limit < trades.len() {
        println!("({} of {} trades shown)", limit, trades.len());
    }
    Ok(())
}
