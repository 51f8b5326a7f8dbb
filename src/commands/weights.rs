use crate::context::AppContext;
use anyhow::Result;

pub async fn run(app: &AppContext) -> Result<()> {
    let state = app.load_state()?;
    let max_weight = app.settings().learning.max_weight;
    println!("Feature weights (bounded to +/-{})", max_weight);
    for (feature, weight) in state.weights.iter() {
        println!("  {:<16} {:>8.4}", feature, weight);
    }
    Ok(())
}
