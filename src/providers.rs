use crate::indicators::snapshot_from_series;
use crate::models::IndicatorSnapshot;
use crate::retry::retry_request;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

const REQUEST_ATTEMPTS: u32 = 2;
const REQUEST_RETRY_DELAY: Duration = Duration::from_millis(250);

/// A source of indicator snapshots for one instrument at a time.
#[async_trait]
pub trait IndicatorProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, instrument: &str) -> Result<IndicatorSnapshot>;
}

async fn get_json<T: DeserializeOwned>(http: &Client, url: &str) -> Result<T> {
    retry_request!(url, REQUEST_ATTEMPTS, REQUEST_RETRY_DELAY, async {
        let response = http
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()
            .with_context(|| format!("GET {} returned error", url))?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("failed to parse response from {}", url))
    })
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn millis_to_utc(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| anyhow!("invalid timestamp {}", millis))
}

/// Close and volume series from Binance kline rows
/// (`[open_time, open, high, low, close, volume, close_time, ...]`).
/// The last row is usually the candle still forming, so the snapshot is
/// stamped with its open time; its close time lies in the future.
pub fn parse_binance_klines(rows: &[Vec<Value>]) -> Result<(Vec<f64>, Vec<f64>, DateTime<Utc>)> {
    let mut closes = Vec::with_capacity(rows.len());
    let mut volumes = Vec::with_capacity(rows.len());
    let mut last_open_time = None;

    for (index, row) in rows.iter().enumerate() {
        let close = row
            .get(4)
            .and_then(value_as_f64)
            .ok_or_else(|| anyhow!("kline {} has no close price", index))?;
        let volume = row.get(5).and_then(value_as_f64).unwrap_or(0.0);
        closes.push(close);
        volumes.push(volume);
        last_open_time = row.first().and_then(|value| value.as_i64());
    }

    let timestamp = millis_to_utc(last_open_time.ok_or_else(|| anyhow!("no klines returned"))?)?;
    Ok((closes, volumes, timestamp))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PremiumIndex {
    #[serde(default)]
    last_funding_rate: Option<Value>,
}

/// Binance USDⓈ-M perpetual futures: klines plus the premium index funding
/// rate.
pub struct BinanceFuturesProvider {
    http: Client,
    base_url: String,
    interval: String,
    limit: usize,
}

impl BinanceFuturesProvider {
    pub fn new(http: Client, base_url: &str, interval: &str, limit: usize) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            interval: interval.to_string(),
            limit,
        }
    }

    fn symbol(instrument: &str) -> String {
        format!("{}USDT", instrument.trim().to_ascii_uppercase())
    }
}

#[async_trait]
impl IndicatorProvider for BinanceFuturesProvider {
    fn name(&self) -> &str {
        "binance"
    }

    async fn fetch(&self, instrument: &str) -> Result<IndicatorSnapshot> {
        let symbol = Self::symbol(instrument);
        let klines_url = format!(
            "{}/fapi/v1/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, self.interval, self.limit
        );
        let rows: Vec<Vec<Value>> = get_json(&self.http, &klines_url).await?;
        let (closes, volumes, timestamp) = parse_binance_klines(&rows)?;

        let premium_url = format!("{}/fapi/v1/premiumIndex?symbol={}", self.base_url, symbol);
        let premium: PremiumIndex = get_json(&self.http, &premium_url).await?;
        let funding_rate = premium
            .last_funding_rate
            .as_ref()
            .and_then(value_as_f64)
            .unwrap_or(0.0);

        snapshot_from_series(
            instrument,
            &closes,
            &volumes,
            funding_rate,
            timestamp,
            self.name(),
        )
        .ok_or_else(|| anyhow!("not enough kline history for {}", symbol))
    }
}

#[derive(Debug, Deserialize)]
pub struct CoinGeckoMarketChart {
    #[serde(default)]
    pub prices: Vec<(f64, f64)>,
    #[serde(default)]
    pub total_volumes: Vec<(f64, f64)>,
}

impl CoinGeckoMarketChart {
    pub fn into_series(self) -> Result<(Vec<f64>, Vec<f64>, DateTime<Utc>)> {
        let last_time = self
            .prices
            .last()
            .map(|(millis, _)| *millis as i64)
            .ok_or_else(|| anyhow!("no prices returned"))?;
        let closes = self.prices.iter().map(|(_, price)| *price).collect();
        let volumes = self.total_volumes.iter().map(|(_, volume)| *volume).collect();
        Ok((closes, volumes, millis_to_utc(last_time)?))
    }
}

/// CoinGecko spot market chart. Spot data has no funding, so the rate reads 0.
pub struct CoinGeckoProvider {
    http: Client,
    base_url: String,
}

impl CoinGeckoProvider {
    pub fn new(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn coin_id(instrument: &str) -> Option<&'static str> {
        match instrument.trim().to_ascii_uppercase().as_str() {
            "ETH" => Some("ethereum"),
            "BTC" => Some("bitcoin"),
            "SOL" => Some("solana"),
            _ => None,
        }
    }
}

#[async_trait]
impl IndicatorProvider for CoinGeckoProvider {
    fn name(&self) -> &str {
        "coingecko"
    }

    async fn fetch(&self, instrument: &str) -> Result<IndicatorSnapshot> {
        let Some(coin_id) = Self::coin_id(instrument) else {
            bail!("no CoinGecko id for {}", instrument);
        };
        let url = format!(
            "{}/coins/{}/market_chart?vs_currency=usd&days=1",
            self.base_url, coin_id
        );
        let chart: CoinGeckoMarketChart = get_json(&self.http, &url).await?;
        let (closes, volumes, timestamp) = chart.into_series()?;
        snapshot_from_series(instrument, &closes, &volumes, 0.0, timestamp, self.name())
            .ok_or_else(|| anyhow!("not enough price history for {}", coin_id))
    }
}

/// Serves recorded snapshots in file order, one per fetch, per instrument.
pub struct ReplayProvider {
    queues: Mutex<HashMap<String, VecDeque<IndicatorSnapshot>>>,
}

impl ReplayProvider {
    pub fn new(snapshots: Vec<IndicatorSnapshot>) -> Self {
        let mut queues: HashMap<String, VecDeque<IndicatorSnapshot>> = HashMap::new();
        for snapshot in snapshots {
            queues
                .entry(snapshot.instrument.clone())
                .or_default()
                .push_back(snapshot);
        }
        Self {
            queues: Mutex::new(queues),
        }
    }

    /// One JSON snapshot per line; blank lines are skipped.
    pub fn parse_lines(raw: &str) -> Result<Vec<IndicatorSnapshot>> {
        raw.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str::<IndicatorSnapshot>(line)
                    .with_context(|| format!("invalid snapshot on line {}", index + 1))
            })
            .collect()
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay file {}", path.display()))?;
        Ok(Self::new(Self::parse_lines(&raw)?))
    }

    pub fn remaining(&self, instrument: &str) -> usize {
        self.queues
            .lock()
            .map(|queues| queues.get(instrument).map(VecDeque::len).unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait]
impl IndicatorProvider for ReplayProvider {
    fn name(&self) -> &str {
        "replay"
    }

    async fn fetch(&self, instrument: &str) -> Result<IndicatorSnapshot> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|_| anyhow!("replay queue lock poisoned"))?;
        let mut snapshot = queues
            .get_mut(instrument)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| anyhow!("replay exhausted for {}", instrument))?;
        snapshot.stale = false;
        if snapshot.source.is_empty() {
            snapshot.source = self.name().to_string();
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kline_rows(count: usize) -> Vec<Vec<Value>> {
        (0..count)
            .map(|i| {
                let open_time = 1_714_521_600_000_i64 + i as i64 * 300_000;
                let close = format!("{:.2}", 3000.0 + i as f64);
                vec![
                    json!(open_time),
                    json!("3000.00"),
                    json!("3100.00"),
                    json!("2900.00"),
                    json!(close),
                    json!("1250.5"),
                    json!(open_time + 299_999),
                ]
            })
            .collect()
    }

    #[test]
    fn parses_binance_klines() {
        let (closes, volumes, timestamp) = parse_binance_klines(&kline_rows(30)).unwrap();
        assert_eq!(closes.len(), 30);
        assert!((closes[29] - 3029.0).abs() < 1e-9);
        assert!((volumes[0] - 1250.5).abs() < 1e-9);
        // Open time of the last (still forming) candle, not its close time.
        assert_eq!(timestamp.timestamp_millis(), 1_714_521_600_000 + 29 * 300_000);

        assert!(parse_binance_klines(&[]).is_err());
        assert!(parse_binance_klines(&[vec![json!(1)]]).is_err());
    }

    #[test]
    fn forming_candle_is_not_stamped_in_the_future() {
        let open_time = Utc::now().timestamp_millis() - 60_000;
        let row = vec![
            json!(open_time),
            json!("3000.00"),
            json!("3010.00"),
            json!("2990.00"),
            json!("3005.00"),
            json!("12.5"),
            json!(open_time + 299_999),
        ];
        let (_, _, timestamp) = parse_binance_klines(&[row]).unwrap();
        assert_eq!(timestamp.timestamp_millis(), open_time);
        assert!(timestamp <= Utc::now());
    }

    #[test]
    fn parses_coingecko_chart() {
        let chart: CoinGeckoMarketChart = serde_json::from_value(json!({
            "prices": [[1714521600000.0, 3000.5], [1714521900000.0, 3001.5]],
            "total_volumes": [[1714521600000.0, 1.0e9], [1714521900000.0, 1.1e9]]
        }))
        .unwrap();
        let (closes, volumes, timestamp) = chart.into_series().unwrap();
        assert_eq!(closes, vec![3000.5, 3001.5]);
        assert_eq!(volumes.len(), 2);
        assert_eq!(timestamp.timestamp_millis(), 1_714_521_900_000);
        assert_eq!(CoinGeckoProvider::coin_id("eth"), Some("ethereum"));
        assert_eq!(CoinGeckoProvider::coin_id("DOGE"), None);
    }

    #[tokio::test]
    async fn replay_serves_snapshots_in_order() {
        let raw = r#"
{"instrument":"ETH","price":3000.0,"rsi":50.0,"ema_fast":3000.0,"ema_slow":3000.0,"bollinger_pos":0.5,"volume":1.0,"funding_rate":0.0,"timestamp":"2024-05-01T00:00:00Z"}

{"instrument":"ETH","price":3010.0,"rsi":55.0,"ema_fast":3005.0,"ema_slow":3000.0,"bollinger_pos":0.6,"volume":1.0,"funding_rate":0.0,"timestamp":"2024-05-01T00:05:00Z"}
"#;
        let provider = ReplayProvider::new(ReplayProvider::parse_lines(raw).unwrap());
        assert_eq!(provider.remaining("ETH"), 2);

        let first = provider.fetch("ETH").await.unwrap();
        assert_eq!(first.price, 3000.0);
        assert_eq!(first.source, "replay");
        let second = provider.fetch("ETH").await.unwrap();
        assert_eq!(second.price, 3010.0);
        assert!(provider.fetch("ETH").await.is_err());
        assert!(provider.fetch("BTC").await.is_err());
    }

    #[test]
    fn replay_reports_bad_lines() {
        let err = ReplayProvider::parse_lines("{\"instrument\":\"ETH\"}").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }
}
