use crate::models::Side;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;
use rust_decimal::Decimal;
use std::io::{self, BufRead, Write};

/// A trade the runner wants to place, shown to whoever approves it.
#[derive(Debug, Clone)]
pub struct TradeProposal {
    pub instrument: String,
    pub side: Side,
    pub size_usd: Decimal,
    pub leverage: Decimal,
    pub price: f64,
    pub confidence: f64,
    pub justification: String,
}

#[async_trait]
pub trait TradeApprover: Send + Sync {
    async fn approve(&self, proposal: &TradeProposal) -> Result<bool>;
}

/// Auto mode: every actionable signal is traded.
pub struct AutoApprove;

#[async_trait]
impl TradeApprover for AutoApprove {
    async fn approve(&self, proposal: &TradeProposal) -> Result<bool> {
        info!(
            "Auto-approving {} {} (confidence {:.1}%)",
            proposal.side,
            proposal.instrument,
            proposal.confidence * 100.0
        );
        Ok(true)
    }
}

/// Manual mode: asks on the terminal before each trade.
pub struct ConsoleApprover;

#[async_trait]
impl TradeApprover for ConsoleApprover {
    async fn approve(&self, proposal: &TradeProposal) -> Result<bool> {
        let prompt = format!(
            "{}\nOpen {} {} ${} x{} at {:.2}? [y/N] ",
            proposal.justification,
            proposal.side,
            proposal.instrument,
            proposal.size_usd,
            proposal.leverage,
            proposal.price
        );
        tokio::task::spawn_blocking(move || -> Result<bool> {
            let mut stdout = io::stdout();
            stdout.write_all(prompt.as_bytes())?;
            stdout.flush()?;
            let mut answer = String::new();
            io::stdin().lock().read_line(&mut answer)?;
            Ok(is_affirmative(&answer))
        })
        .await
        .context("approval prompt task failed")?
    }
}

pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
