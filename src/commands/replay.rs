use crate::approval::AutoApprove;
use crate::context::AppContext;
use crate::runner::CycleOutcome;
use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::path::Path;
use std::time::Duration;

/// Drives the cycle over recorded snapshots, one cycle per snapshot, with
/// every actionable signal approved. The live state file is left alone
/// unless `--state-file` was passed.
pub async fn run(app: &AppContext, file: &Path, instrument: &str) -> Result<()> {
    let instrument = instrument.trim().to_ascii_uppercase();
    let (source, available) = app.replay_source(file, &instrument)?;
    if available == 0 {
        bail!("{} has no snapshots for {}", file.display(), instrument);
    }

    let mut session = app
        .replay_session(source)?
        .with_approver(Box::new(AutoApprove));
    {
        let config = session.config_mut();
        config.instruments = vec![instrument.clone()];
        config.cycle_interval = Duration::ZERO;
    }
    info!(
        "Replaying {} snapshot(s) for {} from {}",
        available,
        instrument,
        file.display()
    );

    let pb = ProgressBar::new(available as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("invalid progress bar template")?
            .progress_chars("#>-"),
    );

    let mut opened = 0usize;
    let mut closed = 0usize;
    let mut rejected = 0usize;
    for _ in 0..available {
        let report = session.run_cycle().await;
        opened += report.opened();
        closed += report.closed();
        rejected += report
            .instruments
            .iter()
            .filter(|entry| matches!(entry.outcome, CycleOutcome::Rejected { .. }))
            .count();
        pb.set_message(format!("{} opened, {} closed", opened, closed));
        pb.inc(1);
    }
    pb.finish_and_clear();
    session.persist().await;

    let summary = session.engine().get_portfolio_summary();
    println!(
        "Replayed {} snapshot(s): {} opened, {} closed, {} rejected.",
        available, opened, closed, rejected
    );
    println!(
        "Balance {} USD, total PnL {} USD, win rate {:.1}%, {} open.",
        summary.balance,
        summary.total_pnl,
        summary.win_rate * 100.0,
        summary.open_count
    );
    Ok(())
}
