use crate::config::{AppSettings, ProviderKind};
use crate::market_data::IndicatorSource;
use crate::providers::{
    BinanceFuturesProvider, CoinGeckoProvider, IndicatorProvider, ReplayProvider,
};
use crate::runner::TradingSession;
use crate::store::{PersistedState, StateStore};
use anyhow::{Context, Result};
use log::info;
use reqwest::Client;
use std::path::{Path, PathBuf};

/// Settings plus the handles every command needs to build a session.
#[derive(Clone)]
pub struct AppContext {
    settings: AppSettings,
    /// Set when `--state-file` named the state file on the command line.
    state_file_explicit: bool,
}

impl AppContext {
    pub fn initialize(state_file: Option<PathBuf>) -> Result<Self> {
        let settings = AppSettings::from_env().context("Invalid configuration")?;
        Ok(Self::from_settings(settings, state_file))
    }

    pub fn from_settings(mut settings: AppSettings, state_file: Option<PathBuf>) -> Self {
        let state_file_explicit = state_file.is_some();
        if let Some(path) = state_file {
            settings.state_file = path;
        }
        Self {
            settings,
            state_file_explicit,
        }
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn store(&self) -> StateStore {
        StateStore::new(self.settings.state_file.clone())
    }

    pub fn load_state(&self) -> Result<PersistedState> {
        self.store().load_or_fresh(
            self.settings.engine.initial_balance,
            self.settings.runner.auto_approve,
        )
    }

    /// Network providers in the configured priority order.
    pub fn live_source(&self) -> Result<IndicatorSource> {
        let source = &self.settings.source;
        let http = Client::builder()
            .timeout(source.provider_timeout)
            .build()
            .context("failed to construct HTTP client")?;

        let providers: Vec<Box<dyn IndicatorProvider>> = source
            .providers
            .iter()
            .map(|kind| -> Box<dyn IndicatorProvider> {
                match kind {
                    ProviderKind::Binance => Box::new(BinanceFuturesProvider::new(
                        http.clone(),
                        &source.binance_base_url,
                        &source.kline_interval,
                        source.kline_limit,
                    )),
                    ProviderKind::CoinGecko => {
                        Box::new(CoinGeckoProvider::new(http.clone(), &source.coingecko_base_url))
                    }
                }
            })
            .collect();

        info!(
            "Indicator providers: {}",
            source
                .providers
                .iter()
                .map(|kind| kind.label())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(IndicatorSource::new(
            providers,
            source.provider_timeout,
            source.max_stale,
        ))
    }

    /// Recorded snapshots only. Returns the number of snapshots per instrument
    /// alongside the source.
    pub fn replay_source(&self, path: &Path, instrument: &str) -> Result<(IndicatorSource, usize)> {
        let provider = ReplayProvider::from_file(path)?;
        let available = provider.remaining(instrument);
        let source = IndicatorSource::new(
            vec![Box::new(provider)],
            self.settings.source.provider_timeout,
            self.settings.source.max_stale,
        );
        Ok((source, available))
    }

    pub fn session(&self, source: IndicatorSource) -> Result<TradingSession> {
        let state = self.load_state()?;
        Ok(TradingSession::new(
            &self.settings,
            state,
            source,
            self.store(),
        ))
    }

    /// Session for a replay. Starts from a fresh portfolio and keeps
    /// nothing unless `--state-file` was given, so the live state file is
    /// never read or overwritten by recorded data.
    pub fn replay_session(&self, source: IndicatorSource) -> Result<TradingSession> {
        if self.state_file_explicit {
            info!(
                "Replay state is read from and saved to {}",
                self.settings.state_file.display()
            );
            return self.session(source);
        }
        info!("Replay runs on a fresh in-memory portfolio; pass --state-file to keep it");
        Ok(TradingSession::new(
            &self.settings,
            PersistedState::fresh(self.settings.engine.initial_balance, true),
            source,
            StateStore::in_memory(),
        ))
    }
}
