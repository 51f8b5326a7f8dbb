use crate::errors::EngineError;
use crate::learning::WeightVector;
use crate::portfolio::Portfolio;
use crate::retry::{retry_with_backoff, RetryPolicy};
use anyhow::{Context, Result};
use log::{debug, info};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const STATE_VERSION: u32 = 1;

/// On-disk state document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedState {
    pub version: u32,
    #[serde(flatten)]
    pub portfolio: Portfolio,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub weights: WeightVector,
}

impl PersistedState {
    pub fn fresh(initial_balance: Decimal, auto_approve: bool) -> Self {
        Self {
            version: STATE_VERSION,
            portfolio: Portfolio::new(initial_balance),
            auto_approve,
            weights: WeightVector::default(),
        }
    }

    /// Snapshot of the live state with money rounded to cents.
    pub fn capture(portfolio: &Portfolio, weights: &WeightVector, auto_approve: bool) -> Self {
        Self {
            version: STATE_VERSION,
            portfolio: portfolio.rounded(),
            auto_approve,
            weights: weights.clone(),
        }
    }
}

/// JSON state file with atomic replace-on-write. A store without a path
/// keeps nothing: loads find no state and saves succeed without writing.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: Option<PathBuf>,
    retry: RetryPolicy,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            retry: RetryPolicy::default(),
        }
    }

    /// Throwaway store for runs that must not touch the live state file.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// `Ok(None)` when no state has been saved yet.
    pub fn load(&self) -> Result<Option<PersistedState>> {
        let Some(path) = self.path.as_deref() else {
            return Ok(None);
        };
        if !path.exists() {
            debug!("No state file at {}, starting fresh", path.display());
            return Ok(None);
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file {}", path.display()))?;
        let state: PersistedState = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse state file {}", path.display()))?;
        info!(
            "Loaded state from {}: balance {}, {} open positions, {} trades",
            path.display(),
            state.portfolio.balance,
            state.portfolio.open_positions.len(),
            state.portfolio.trade_history.len()
        );
        Ok(Some(state))
    }

    pub fn load_or_fresh(&self, initial_balance: Decimal, auto_approve: bool) -> Result<PersistedState> {
        Ok(self
            .load()?
            .unwrap_or_else(|| PersistedState::fresh(initial_balance, auto_approve)))
    }

    /// Writes through the async retry loop so a slow disk never parks a
    /// runtime worker.
    pub async fn save(&self, state: &PersistedState) -> Result<(), EngineError> {
        let Some(path) = self.path.as_deref() else {
            debug!("In-memory store, nothing written");
            return Ok(());
        };
        let payload = serde_json::to_string_pretty(state).map_err(|err| {
            EngineError::PersistenceFailure {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }
        })?;

        let context = format!("saving {}", path.display());
        let payload = payload.as_str();
        retry_with_backoff(&self.retry, &context, move || write_atomically(path, payload))
            .await
            .map_err(|err| EngineError::PersistenceFailure {
                path: path.to_path_buf(),
                reason: format!("{:#}", err),
            })?;

        debug!("Saved state to {}", path.display());
        Ok(())
    }
}

async fn write_atomically(path: &Path, payload: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let tmp_path = tmp_path(path);
    tokio::fs::write(&tmp_path, payload)
        .await
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path).await.with_context(|| {
        format!(
            "Failed to move {} into place at {}",
            tmp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
