use crate::context::AppContext;
use anyhow::Result;
use log::info;

pub async fn run(app: &AppContext, instrument: &str) -> Result<()> {
    let instrument = instrument.trim().to_ascii_uppercase();
    let source = app.live_source()?;
    let mut session = app.session(source)?;
    let trade = session.close_manually(&instrument).await?;
    info!("Closed {} manually at {}", trade.instrument, trade.exit_price);
    println!(
        "Closed {} {} at {}: net {} USD (fees {}, funding {})",
        trade.side,
        trade.instrument,
        trade.exit_price.round_dp(2),
        trade.net_pnl,
        trade.fees(),
        trade.funding
    );
    Ok(())
}
