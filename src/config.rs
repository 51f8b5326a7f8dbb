use anyhow::{anyhow, Result};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_STATE_FILE: &str = "data/paper_state.json";
pub const DEFAULT_BINANCE_BASE_URL: &str = "https://fapi.binance.com";
pub const DEFAULT_COINGECKO_BASE_URL: &str = "https://api.coingecko.com/api/v3";
pub const MIN_CYCLE_INTERVAL_SECS: u64 = 1;

/// Paper account parameters
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub initial_balance: Decimal,
    pub fee_rate: Decimal,
    pub funding_interval_hours: Decimal,
    pub max_leverage: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_balance: dec!(10000),
            fee_rate: dec!(0.001),
            funding_interval_hours: dec!(8),
            max_leverage: dec!(5),
        }
    }
}

/// Signal thresholds and feature scaling
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyConfig {
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub volume_spike_ratio: f64,
    /// Multiplier applied to the relative EMA gap before clamping.
    pub ema_scale: f64,
    /// Funding rate that maps to a full-strength score.
    pub funding_scale: f64,
    pub confidence_gain: f64,
    pub signal_threshold: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            volume_spike_ratio: 1.5,
            ema_scale: 100.0,
            funding_scale: 0.01,
            confidence_gain: 4.0,
            signal_threshold: 0.75,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LearningConfig {
    pub learning_rate: f64,
    pub max_weight: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            max_weight: 1.0,
        }
    }
}

/// Evaluation loop and order parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    pub instruments: Vec<String>,
    pub trade_size_usd: Decimal,
    pub leverage: Decimal,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub cycle_interval: Duration,
    /// 0 disables the cap.
    pub max_daily_trades: usize,
    pub auto_approve: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            instruments: vec!["ETH".to_string()],
            trade_size_usd: dec!(100),
            leverage: dec!(1),
            stop_loss_pct: dec!(0.02),
            take_profit_pct: dec!(0.04),
            cycle_interval: Duration::from_secs(30),
            max_daily_trades: 5,
            auto_approve: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Binance,
    CoinGecko,
}

impl ProviderKind {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "binance" => Ok(Self::Binance),
            "coingecko" => Ok(Self::CoinGecko),
            other => Err(anyhow!(
                "PRICE_PROVIDERS entries must be binance or coingecko (value: {})",
                other
            )),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::CoinGecko => "coingecko",
        }
    }
}

/// Market data providers, in priority order
#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub providers: Vec<ProviderKind>,
    pub provider_timeout: Duration,
    pub max_stale: Duration,
    pub binance_base_url: String,
    pub coingecko_base_url: String,
    pub kline_interval: String,
    pub kline_limit: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            providers: vec![ProviderKind::Binance, ProviderKind::CoinGecko],
            provider_timeout: Duration::from_secs(5),
            max_stale: Duration::from_secs(300),
            binance_base_url: DEFAULT_BINANCE_BASE_URL.to_string(),
            coingecko_base_url: DEFAULT_COINGECKO_BASE_URL.to_string(),
            kline_interval: "5m".to_string(),
            kline_limit: 100,
        }
    }
}

/// Every tunable the application reads, passed explicitly to the components
/// that need it.
#[derive(Debug, Clone, PartialEq)]
pub struct AppSettings {
    pub engine: EngineConfig,
    pub policy: PolicyConfig,
    pub learning: LearningConfig,
    pub runner: RunnerConfig,
    pub source: SourceConfig,
    pub state_file: PathBuf,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            policy: PolicyConfig::default(),
            learning: LearningConfig::default(),
            runner: RunnerConfig::default(),
            source: SourceConfig::default(),
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
        }
    }
}

impl AppSettings {
    pub fn from_env() -> Result<Self> {
        let settings: HashMap<String, String> = std::env::vars().collect();
        Self::from_settings_map(&settings)
    }

    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let engine_defaults = EngineConfig::default();
        let engine = EngineConfig {
            initial_balance: setting_decimal(
                settings,
                "INITIAL_BALANCE",
                engine_defaults.initial_balance,
                Some(0.0),
                None,
            )?,
            fee_rate: setting_decimal(
                settings,
                "TRADE_FEE_RATE",
                engine_defaults.fee_rate,
                Some(0.0),
                Some(0.1),
            )?,
            funding_interval_hours: setting_decimal(
                settings,
                "FUNDING_INTERVAL_HOURS",
                engine_defaults.funding_interval_hours,
                Some(1.0),
                None,
            )?,
            max_leverage: setting_decimal(
                settings,
                "MAX_LEVERAGE",
                engine_defaults.max_leverage,
                Some(1.0),
                Some(125.0),
            )?,
        };

        let policy_defaults = PolicyConfig::default();
        let policy = PolicyConfig {
            rsi_oversold: setting_f64(
                settings,
                "RSI_OVERSOLD",
                policy_defaults.rsi_oversold,
                Some(1.0),
                Some(50.0),
            )?,
            rsi_overbought: setting_f64(
                settings,
                "RSI_OVERBOUGHT",
                policy_defaults.rsi_overbought,
                Some(50.0),
                Some(99.0),
            )?,
            volume_spike_ratio: setting_f64(
                settings,
                "VOLUME_SPIKE_RATIO",
                policy_defaults.volume_spike_ratio,
                Some(1.0),
                None,
            )?,
            ema_scale: policy_defaults.ema_scale,
            funding_scale: policy_defaults.funding_scale,
            confidence_gain: setting_f64(
                settings,
                "CONFIDENCE_GAIN",
                policy_defaults.confidence_gain,
                Some(0.1),
                None,
            )?,
            signal_threshold: setting_f64(
                settings,
                "SIGNAL_THRESHOLD",
                policy_defaults.signal_threshold,
                Some(0.5),
                Some(1.0),
            )?,
        };

        let learning_defaults = LearningConfig::default();
        let learning = LearningConfig {
            learning_rate: setting_f64(
                settings,
                "LEARNING_RATE",
                learning_defaults.learning_rate,
                Some(0.0),
                Some(1.0),
            )?,
            max_weight: setting_f64(
                settings,
                "MAX_WEIGHT",
                learning_defaults.max_weight,
                Some(0.01),
                None,
            )?,
        };

        let runner_defaults = RunnerConfig::default();
        let runner = RunnerConfig {
            instruments: setting_list(settings, "INSTRUMENTS")
                .map(|values| {
                    values
                        .into_iter()
                        .map(|value| value.to_ascii_uppercase())
                        .collect()
                })
                .unwrap_or(runner_defaults.instruments),
            trade_size_usd: setting_decimal(
                settings,
                "TRADE_SIZE_USD",
                runner_defaults.trade_size_usd,
                Some(1.0),
                None,
            )?,
            leverage: setting_decimal(
                settings,
                "LEVERAGE",
                runner_defaults.leverage,
                Some(1.0),
                None,
            )?,
            stop_loss_pct: setting_decimal(
                settings,
                "STOP_LOSS_PCT",
                runner_defaults.stop_loss_pct,
                Some(0.0001),
                Some(0.99),
            )?,
            take_profit_pct: setting_decimal(
                settings,
                "TAKE_PROFIT_PCT",
                runner_defaults.take_profit_pct,
                Some(0.0001),
                None,
            )?,
            cycle_interval: Duration::from_secs(setting_u64(
                settings,
                "CYCLE_INTERVAL_SECS",
                runner_defaults.cycle_interval.as_secs(),
                MIN_CYCLE_INTERVAL_SECS,
            )?),
            max_daily_trades: setting_u64(
                settings,
                "MAX_DAILY_TRADES",
                runner_defaults.max_daily_trades as u64,
                0,
            )? as usize,
            auto_approve: setting_bool(settings, "AUTO_MODE", runner_defaults.auto_approve)?,
        };

        let source_defaults = SourceConfig::default();
        let providers = match setting_list(settings, "PRICE_PROVIDERS") {
            Some(values) => values
                .iter()
                .map(|value| ProviderKind::parse(value))
                .collect::<Result<Vec<_>>>()?,
            None => source_defaults.providers,
        };
        let source = SourceConfig {
            providers,
            provider_timeout: Duration::from_secs(setting_u64(
                settings,
                "PROVIDER_TIMEOUT_SECS",
                source_defaults.provider_timeout.as_secs(),
                1,
            )?),
            max_stale: Duration::from_secs(setting_u64(
                settings,
                "MAX_STALE_SECS",
                source_defaults.max_stale.as_secs(),
                0,
            )?),
            binance_base_url: setting_string(settings, "BINANCE_BASE_URL")
                .unwrap_or(source_defaults.binance_base_url),
            coingecko_base_url: setting_string(settings, "COINGECKO_BASE_URL")
                .unwrap_or(source_defaults.coingecko_base_url),
            kline_interval: setting_string(settings, "KLINE_INTERVAL")
                .unwrap_or(source_defaults.kline_interval),
            kline_limit: setting_u64(
                settings,
                "KLINE_LIMIT",
                source_defaults.kline_limit as u64,
                30,
            )? as usize,
        };

        let state_file = setting_string(settings, "STATE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE));

        if policy.rsi_overbought <= policy.rsi_oversold {
            return Err(anyhow!(
                "RSI_OVERBOUGHT ({}) must be > RSI_OVERSOLD ({})",
                policy.rsi_overbought,
                policy.rsi_oversold
            ));
        }
        if runner.leverage > engine.max_leverage {
            return Err(anyhow!(
                "LEVERAGE ({}) must be <= MAX_LEVERAGE ({})",
                runner.leverage,
                engine.max_leverage
            ));
        }
        if runner.instruments.is_empty() {
            return Err(anyhow!("INSTRUMENTS must name at least one instrument"));
        }

        Ok(Self {
            engine,
            policy,
            learning,
            runner,
            source,
            state_file,
        })
    }
}

fn setting_string(settings: &HashMap<String, String>, key: &str) -> Option<String> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
}

fn setting_list(settings: &HashMap<String, String>, key: &str) -> Option<Vec<String>> {
    let raw = setting_string(settings, key)?;
    let values: Vec<String> = raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_string())
        .collect();
    Some(values)
}

fn setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    default: f64,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<f64> {
    let Some(raw) = setting_string(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(value)
}

fn setting_decimal(
    settings: &HashMap<String, String>,
    key: &str,
    default: Decimal,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<Decimal> {
    if setting_string(settings, key).is_none() {
        return Ok(default);
    }
    let value = setting_f64(settings, key, 0.0, min, max)?;
    Decimal::from_f64(value)
        .map(|decimal| decimal.normalize())
        .ok_or_else(|| anyhow!("Setting {} is out of range (value: {})", key, value))
}

fn setting_u64(
    settings: &HashMap<String, String>,
    key: &str,
    default: u64,
    min: u64,
) -> Result<u64> {
    let Some(raw) = setting_string(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    if value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value as u64)
}

fn setting_bool(settings: &HashMap<String, String>, key: &str, default: bool) -> Result<bool> {
    let Some(raw) = setting_string(settings, key) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!(
            "Setting {} must be true or false (value: {})",
            key,
            raw
        )),
    }
}
