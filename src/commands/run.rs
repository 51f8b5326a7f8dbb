use crate::commands::ApprovalMode;
use crate::config::MIN_CYCLE_INTERVAL_SECS;
use crate::context::AppContext;
use anyhow::{bail, Result};
use log::{info, warn};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub async fn run(
    app: &AppContext,
    mode: Option<ApprovalMode>,
    once: bool,
    interval_secs: Option<u64>,
) -> Result<()> {
    let interval = interval_secs.map(cycle_interval).transpose()?;
    let source = app.live_source()?;
    let mut session = app.session(source)?;

    if let Some(mode) = mode {
        info!("Approval mode for this run: {}", mode.label());
        session.set_auto_approve(mode.is_auto());
    }
    if let Some(interval) = interval {
        session.config_mut().cycle_interval = interval;
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Stop requested; finishing the current cycle");
                signal_token.cancel();
            }
            Err(err) => warn!("Failed to listen for Ctrl+C: {}", err),
        }
    });

    let max_cycles = once.then_some(1);
    let summary = session.run(shutdown, max_cycles).await;

    let portfolio = session.engine().get_portfolio_summary();
    println!(
        "Ran {} cycle(s): {} opened, {} closed. Balance {} USD, total PnL {} USD, {} open.",
        summary.cycles,
        summary.opened,
        summary.closed,
        portfolio.balance,
        portfolio.total_pnl,
        portfolio.open_count
    );
    if !session.is_durable() {
        warn!(
            "Last save to {} failed; changes from this run may be lost",
            app.settings().state_file.display()
        );
    }
    Ok(())
}

/// `--interval` obeys the same floor as CYCLE_INTERVAL_SECS.
fn cycle_interval(secs: u64) -> Result<Duration> {
    if secs < MIN_CYCLE_INTERVAL_SECS {
        bail!(
            "--interval must be >= {} (value: {})",
            MIN_CYCLE_INTERVAL_SECS,
            secs
        );
    }
    Ok(Duration::from_secs(secs))
}
