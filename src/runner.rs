use crate::approval::{AutoApprove, ConsoleApprover, TradeApprover, TradeProposal};
use crate::config::{AppSettings, RunnerConfig};
use crate::engine::{Engine, OpenRequest};
use crate::errors::EngineError;
use crate::learning::{AdaptiveWeighting, WeightVector};
use crate::market_data::IndicatorSource;
use crate::models::*;
use crate::signals::SignalPolicy;
use crate::store::{PersistedState, StateStore};
use log::{error, info, warn};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// What happened to one instrument during a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// No usable market data.
    Skipped { reason: String },
    /// Flat, and the signal was HOLD (or data was stale).
    Hold,
    /// Position kept open.
    Holding { unrealized_pnl: Decimal },
    Opened { position: Position },
    Closed { trade: TradeRecord },
    /// Actionable signal downgraded to HOLD.
    Rejected { reason: String },
    Declined,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstrumentReport {
    pub instrument: String,
    pub stale: bool,
    pub signal: Option<Signal>,
    pub outcome: CycleOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub instruments: Vec<InstrumentReport>,
    pub durable: bool,
}

impl CycleReport {
    pub fn opened(&self) -> usize {
        self.instruments
            .iter()
            .filter(|report| matches!(report.outcome, CycleOutcome::Opened { .. }))
            .count()
    }

    pub fn closed(&self) -> usize {
        self.instruments
            .iter()
            .filter(|report| matches!(report.outcome, CycleOutcome::Closed { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub cycles: u64,
    pub opened: usize,
    pub closed: usize,
}

/// The evaluation loop: one engine, one policy and one learner, driven by a
/// single indicator source. Only one cycle runs at a time.
pub struct TradingSession {
    engine: Engine,
    learner: AdaptiveWeighting,
    policy: SignalPolicy,
    source: IndicatorSource,
    store: StateStore,
    approver: Box<dyn TradeApprover>,
    config: RunnerConfig,
    auto_approve: bool,
    durable: bool,
    cycles: u64,
}

impl TradingSession {
    pub fn new(
        settings: &AppSettings,
        state: PersistedState,
        source: IndicatorSource,
        store: StateStore,
    ) -> Self {
        let auto_approve = state.auto_approve;
        Self {
            engine: Engine::with_portfolio(settings.engine.clone(), state.portfolio),
            learner: AdaptiveWeighting::new(settings.learning.clone(), state.weights),
            policy: SignalPolicy::new(settings.policy.clone()),
            source,
            store,
            approver: default_approver(auto_approve),
            config: settings.runner.clone(),
            auto_approve,
            durable: true,
            cycles: 0,
        }
    }

    pub fn with_approver(mut self, approver: Box<dyn TradeApprover>) -> Self {
        self.approver = approver;
        self
    }

    /// Switch between auto and manual approval and record the choice in state.
    pub fn set_auto_approve(&mut self, auto_approve: bool) {
        self.auto_approve = auto_approve;
        self.approver = default_approver(auto_approve);
    }

    pub fn auto_approve(&self) -> bool {
        self.auto_approve
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn weights(&self) -> &WeightVector {
        self.learner.weights()
    }

    pub fn config_mut(&mut self) -> &mut RunnerConfig {
        &mut self.config
    }

    /// Whether the last save reached disk.
    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn capture_state(&self) -> PersistedState {
        PersistedState::capture(self.engine.portfolio(), self.learner.weights(), self.auto_approve)
    }

    pub async fn persist(&mut self) -> bool {
        match self.store.save(&self.capture_state()).await {
            Ok(()) => {
                if !self.durable {
                    if let Some(path) = self.store.path() {
                        info!("State is durable again ({})", path.display());
                    }
                }
                self.durable = true;
            }
            Err(err) => {
                warn!("{}; state is not durable, continuing in memory", err);
                self.durable = false;
            }
        }
        self.durable
    }

    /// Fetch and evaluate without touching the portfolio.
    pub async fn recommend(&mut self, instrument: &str) -> Result<Signal, EngineError> {
        let snapshot = self.source.get_market_data(instrument).await?;
        Ok(self.policy.evaluate(&snapshot, self.learner.weights()))
    }

    /// Close at the current provider price on the user's request.
    pub async fn close_manually(&mut self, instrument: &str) -> Result<TradeRecord, EngineError> {
        if self.engine.position(instrument).is_none() {
            return Err(EngineError::NoSuchPosition {
                instrument: instrument.to_string(),
            });
        }
        let snapshot = self.source.get_market_data(instrument).await?;
        if let Err(err) =
            self.engine
                .observe_funding_rate(instrument, snapshot.funding_rate, snapshot.timestamp)
        {
            warn!("Ignoring funding rate for {}: {}", instrument, err);
        }
        let trade = self.engine.close_position(
            instrument,
            snapshot.price,
            ExitReason::Manual,
            snapshot.timestamp,
        )?;
        self.learn(&trade);
        self.persist().await;
        Ok(trade)
    }

    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycles += 1;
        let instruments = self.config.instruments.clone();
        let mut reports = Vec::with_capacity(instruments.len());
        for instrument in &instruments {
            reports.push(self.evaluate_instrument(instrument).await);
        }
        CycleReport {
            cycle: self.cycles,
            instruments: reports,
            durable: self.durable,
        }
    }

    /// Run cycles until `shutdown` fires or `max_cycles` is reached. The
    /// token is only observed between cycles.
    pub async fn run(&mut self, shutdown: CancellationToken, max_cycles: Option<u64>) -> RunSummary {
        let mut summary = RunSummary::default();
        info!(
            "Starting evaluation loop for {} every {}s ({} mode)",
            self.config.instruments.join(", "),
            self.config.cycle_interval.as_secs(),
            if self.auto_approve { "auto" } else { "manual" }
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let report = self.run_cycle().await;
            summary.cycles += 1;
            summary.opened += report.opened();
            summary.closed += report.closed();

            if max_cycles.is_some_and(|limit| summary.cycles >= limit) {
                break;
            }
            if self.config.cycle_interval.is_zero() {
                continue;
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.cycle_interval) => {}
            }
        }

        self.persist().await;
        info!(
            "Evaluation loop stopped after {} cycles ({} opened, {} closed)",
            summary.cycles, summary.opened, summary.closed
        );
        summary
    }

    async fn evaluate_instrument(&mut self, instrument: &str) -> InstrumentReport {
        let snapshot = match self.source.get_market_data(instrument).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!("Skipping {} this cycle: {}", instrument, err);
                return InstrumentReport {
                    instrument: instrument.to_string(),
                    stale: false,
                    signal: None,
                    outcome: CycleOutcome::Skipped {
                        reason: err.to_string(),
                    },
                };
            }
        };

        let signal = self.policy.evaluate(&snapshot, self.learner.weights());
        info!(
            "{} via {}{}: price {:.2}, {} ({:.1}%)",
            instrument,
            snapshot.source,
            if snapshot.stale { " (stale)" } else { "" },
            snapshot.price,
            signal.action,
            signal.confidence * 100.0
        );

        let outcome = if self.engine.position(instrument).is_some() {
            self.manage_open_position(instrument, &snapshot, &signal).await
        } else {
            self.consider_entry(instrument, &snapshot, &signal).await
        };

        InstrumentReport {
            instrument: instrument.to_string(),
            stale: snapshot.stale,
            signal: Some(signal),
            outcome,
        }
    }

    async fn manage_open_position(
        &mut self,
        instrument: &str,
        snapshot: &IndicatorSnapshot,
        signal: &Signal,
    ) -> CycleOutcome {
        let at = snapshot.timestamp;
        if !snapshot.stale {
            if let Err(err) = self
                .engine
                .observe_funding_rate(instrument, snapshot.funding_rate, at)
            {
                warn!("Ignoring funding rate for {}: {}", instrument, err);
            }
        }

        let unrealized_pnl = match self.engine.mark_to_market(instrument, snapshot.price) {
            Ok(pnl) => pnl,
            Err(err) => {
                warn!("Cannot mark {} to market: {}", instrument, err);
                return CycleOutcome::Skipped {
                    reason: err.to_string(),
                };
            }
        };

        if snapshot.stale {
            return CycleOutcome::Holding { unrealized_pnl };
        }

        let exit_reason = self
            .engine
            .check_exit_conditions(instrument, snapshot.price)
            .or_else(|| {
                let held = self.engine.position(instrument)?.side;
                (signal.action.side() == Some(held.opposite())).then_some(ExitReason::SignalReversal)
            });

        let Some(reason) = exit_reason else {
            return CycleOutcome::Holding { unrealized_pnl };
        };

        match self
            .engine
            .close_position(instrument, snapshot.price, reason, at)
        {
            Ok(trade) => {
                self.learn(&trade);
                self.persist().await;
                CycleOutcome::Closed { trade }
            }
            Err(err) => {
                error!("Failed to close {} on {}: {}", instrument, reason, err);
                CycleOutcome::Holding { unrealized_pnl }
            }
        }
    }

    async fn consider_entry(
        &mut self,
        instrument: &str,
        snapshot: &IndicatorSnapshot,
        signal: &Signal,
    ) -> CycleOutcome {
        let Some(side) = signal.action.side() else {
            return CycleOutcome::Hold;
        };
        if snapshot.stale {
            info!("Not entering {} on stale data", instrument);
            return CycleOutcome::Hold;
        }

        if self.config.max_daily_trades > 0 {
            let today = snapshot.timestamp.date_naive();
            let opened_today = self.engine.portfolio().trades_opened_on(today);
            if opened_today >= self.config.max_daily_trades {
                let reason = format!(
                    "daily trade limit reached ({}/{})",
                    opened_today, self.config.max_daily_trades
                );
                info!("{} {} downgraded to HOLD: {}", instrument, side, reason);
                return CycleOutcome::Rejected { reason };
            }
        }

        let proposal = TradeProposal {
            instrument: instrument.to_string(),
            side,
            size_usd: self.config.trade_size_usd,
            leverage: self.config.leverage,
            price: snapshot.price,
            confidence: signal.confidence,
            justification: signal.justification(),
        };
        match self.approver.approve(&proposal).await {
            Ok(true) => {}
            Ok(false) => {
                info!("{} {} declined", instrument, side);
                return CycleOutcome::Declined;
            }
            Err(err) => {
                warn!("Approval for {} {} failed: {:#}", instrument, side, err);
                return CycleOutcome::Declined;
            }
        }

        let request = OpenRequest {
            instrument: instrument.to_string(),
            side,
            size_usd: self.config.trade_size_usd,
            leverage: self.config.leverage,
            price: snapshot.price,
            stop_loss_pct: self.config.stop_loss_pct,
            take_profit_pct: self.config.take_profit_pct,
            funding_rate: snapshot.funding_rate,
            opened_at: snapshot.timestamp,
            entry_signal: Some(signal.clone()),
        };
        match self.engine.open_position(request) {
            Ok(position) => {
                self.persist().await;
                CycleOutcome::Opened { position }
            }
            Err(err) => {
                if err.is_entry_rejection() {
                    info!("{} {} downgraded to HOLD: {}", instrument, side, err);
                } else {
                    error!("Could not open {} {}: {}", instrument, side, err);
                }
                CycleOutcome::Rejected {
                    reason: err.to_string(),
                }
            }
        }
    }

    fn learn(&mut self, trade: &TradeRecord) {
        if let Some(signal) = &trade.entry_signal {
            let update = self.learner.learn_from_outcome(signal, trade);
            if !update.is_noop() {
                info!(
                    "Adjusted {} weights after {} {} ({})",
                    update.adjustments.len(),
                    trade.instrument,
                    if update.outcome_sign > 0.0 { "win" } else { "loss" },
                    trade.net_pnl
                );
            }
        }
    }
}

fn default_approver(auto_approve: bool) -> Box<dyn TradeApprover> {
    if auto_approve {
        Box::new(AutoApprove)
    } else {
        Box::new(ConsoleApprover)
    }
}
