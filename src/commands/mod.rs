pub mod close;
pub mod history;
pub mod replay;
pub mod run;
pub mod set_mode;
pub mod signal;
pub mod summary;
pub mod weights;

use clap::ValueEnum;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ApprovalMode {
    Auto,
    Manual,
}

impl ApprovalMode {
    pub fn is_auto(self) -> bool {
        matches!(self, ApprovalMode::Auto)
    }

    pub fn label(self) -> &'static str {
        match self {
            ApprovalMode::Auto => "auto",
            ApprovalMode::Manual => "manual",
        }
    }
}
