use crate::context::AppContext;
use crate::performance::PerformanceCalculator;
use anyhow::Result;

pub async fn run(app: &AppContext) -> Result<()> {
    let state = app.load_state()?;
    let portfolio = &state.portfolio;
    let summary = portfolio.summary();
    let report = PerformanceCalculator::calculate(&portfolio.trade_history, portfolio.initial_balance);

    println!("Paper account ({})", if state.auto_approve { "auto" } else { "manual" });
    println!("  Balance:         {} USD", summary.balance);
    println!("  Equity:          {} USD", summary.equity);
    println!("  Realized PnL:    {} USD", summary.total_pnl);
    println!("  Unrealized PnL:  {} USD", summary.unrealized_pnl);
    println!("  ROI:             {:.2}%", summary.roi * 100.0);
    println!("  Open positions:  {}", summary.open_count);
    for position in &portfolio.open_positions {
        println!(
            "    {} {} ${} x{} @ {} (SL {}, TP {}, unrealized {})",
            position.instrument,
            position.side,
            position.size_usd,
            position.leverage,
            position.entry_price,
            position.stop_loss,
            position.take_profit,
            position.unrealized_pnl
        );
    }

    if report.total_trades == 0 {
        println!("No closed trades yet.");
        return Ok(());
    }

    println!("Performance over {} closed trade(s)", report.total_trades);
    println!(
        "  Win rate:        {:.1}% ({} won, {} lost)",
        report.win_rate * 100.0,
        report.winning_trades,
        report.losing_trades
    );
    println!(
        "  Avg win / loss:  {:.2} / {:.2} USD",
        report.average_win, report.average_loss
    );
    println!(
        "  Largest win / loss: {} / {} USD",
        report.largest_win, report.largest_loss
    );
    println!("  Median trade:    {:.2} USD", report.median_pnl);
    println!(
        "  Fees / funding:  {} / {} USD",
        report.total_fees, report.total_funding
    );
    println!(
        "  Max drawdown:    {:.2} USD ({:.2}%)",
        report.max_drawdown, report.max_drawdown_percent
    );
    println!("  Sharpe (per trade): {:.3}", report.sharpe_ratio);
    println!("  Avg holding:     {:.1} h", report.average_holding_hours);
    for (reason, count) in &report.exits_by_reason {
        println!("  Exits by {}: {}", reason, count);
    }
    Ok(())
}
