use crate::context::AppContext;
use crate::models::Recommendation;
use anyhow::{Context, Result};

/// Prints the recommendation an external language layer would read. Does not
/// touch the portfolio or save state.
pub async fn run(app: &AppContext, instrument: &str) -> Result<()> {
    let source = app.live_source()?;
    let mut session = app.session(source)?;
    let signal = session.recommend(instrument).await?;
    let recommendation = Recommendation::from(&signal);
    let rendered = serde_json::to_string_pretty(&recommendation)
        .context("Failed to serialize recommendation")?;
    println!("{}", rendered);
    Ok(())
}
