use crate::commands::ApprovalMode;
use crate::context::AppContext;
use anyhow::Result;
use log::info;

pub async fn run(app: &AppContext, mode: ApprovalMode) -> Result<()> {
    let mut state = app.load_state()?;
    state.auto_approve = mode.is_auto();
    app.store().save(&state).await?;
    info!(
        "Approval mode set to {} in {}",
        mode.label(),
        app.settings().state_file.display()
    );
    println!("Mode: {}", mode.label());
    Ok(())
}
