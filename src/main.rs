use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use perpsim::{
    commands::{close, history, replay, run, set_mode, signal, summary, weights, ApprovalMode},
    context::AppContext,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "perpsim")]
#[command(about = "Paper trading assistant for crypto perpetual futures")]
struct Cli {
    /// Path to the JSON state file (overrides STATE_FILE)
    #[arg(long = "state-file", value_name = "PATH", global = true)]
    state_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the evaluation cycle; Ctrl+C stops it between cycles
    Run {
        /// Open every actionable signal without asking
        #[arg(long, conflicts_with = "manual")]
        auto: bool,
        /// Ask before each trade
        #[arg(long)]
        manual: bool,
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
        /// Seconds between cycles (overrides CYCLE_INTERVAL_SECS)
        #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
        interval: Option<u64>,
    },
    /// Portfolio summary and performance report
    Summary,
    /// Closed trades, newest first
    History {
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Persist the approval mode
    SetMode {
        #[arg(value_enum)]
        mode: ApprovalMode,
    },
    /// Evaluate one instrument and print the recommendation as JSON
    Signal {
        #[arg(short, long, default_value = "ETH")]
        instrument: String,
    },
    /// Show the learned feature weights
    Weights,
    /// Drive the cycle over recorded snapshots (JSON lines) with auto-approve
    Replay {
        file: PathBuf,
        #[arg(short, long, default_value = "ETH")]
        instrument: String,
    },
    /// Close an open position at the current price
    Close { instrument: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        state_file,
        command,
    } = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let app_context = AppContext::initialize(state_file)?;

    info!("Paper trading only. No real orders are placed. Not financial advice.");

    match command {
        Commands::Run {
            auto,
            manual,
            once,
            interval,
        } => {
            let mode = match (auto, manual) {
                (true, _) => Some(ApprovalMode::Auto),
                (_, true) => Some(ApprovalMode::Manual),
                _ => None,
            };
            run::run(&app_context, mode, once, interval).await?;
        }
        Commands::Summary => {
            summary::run(&app_context).await?;
        }
        Commands::History { limit } => {
            history::run(&app_context, limit).await?;
        }
        Commands::SetMode { mode } => {
            set_mode::run(&app_context, mode).await?;
        }
        Commands::Signal { instrument } => {
            signal::run(&app_context, &instrument.to_ascii_uppercase()).await?;
        }
        Commands::Weights => {
            weights::run(&app_context).await?;
        }
        Commands::Replay { file, instrument } => {
            replay::run(&app_context, &file, &instrument).await?;
        }
        Commands::Close { instrument } => {
            close::run(&app_context, &instrument).await?;
        }
    }

    Ok(())
}
