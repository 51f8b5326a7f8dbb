use rust_decimal::Decimal;
use std::path::PathBuf;
use thiserror::Error;

/// Typed errors raised by the simulation engine, the indicator source and the
/// state store.
///
/// Command code wraps these with `anyhow::Context`; the runner matches on them
/// to decide whether a cycle downgrades to HOLD, skips, or keeps going without
/// durable state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    // -- Entry checks -------------------------------------------------------
    #[error("insufficient balance: need {required}, have {available}")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },

    #[error("position already open for {instrument}")]
    PositionAlreadyOpen { instrument: String },

    #[error("risk limit exceeded: {reason}")]
    ExceedsRiskLimit { reason: String },

    #[error("invalid order: {reason}")]
    InvalidOrder { reason: String },

    // -- Position lifecycle -------------------------------------------------
    #[error("no open position for {instrument}")]
    NoSuchPosition { instrument: String },

    // -- Market data --------------------------------------------------------
    #[error("market data unavailable for {instrument}: {reason}")]
    Unavailable { instrument: String, reason: String },

    // -- Persistence --------------------------------------------------------
    #[error("failed to persist state to {}: {reason}", path.display())]
    PersistenceFailure { path: PathBuf, reason: String },
}

impl EngineError {
    /// Whether the condition is expected during normal operation and the
    /// caller should carry on with the next cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientBalance { .. }
                | EngineError::ExceedsRiskLimit { .. }
                | EngineError::Unavailable { .. }
                | EngineError::PersistenceFailure { .. }
        )
    }

    /// Entry rejections that downgrade an actionable signal to HOLD.
    pub fn is_entry_rejection(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientBalance { .. } | EngineError::ExceedsRiskLimit { .. }
        )
    }
}
