use crate::errors::EngineError;
use crate::models::IndicatorSnapshot;
use crate::providers::IndicatorProvider;
use log::{debug, warn};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Prioritised provider list with a per-provider timeout and a last-known-good
/// fallback.
pub struct IndicatorSource {
    providers: Vec<Box<dyn IndicatorProvider>>,
    timeout: Duration,
    max_stale: Duration,
    last_good: HashMap<String, (IndicatorSnapshot, Instant)>,
}

impl IndicatorSource {
    pub fn new(providers: Vec<Box<dyn IndicatorProvider>>, timeout: Duration, max_stale: Duration) -> Self {
        Self {
            providers,
            timeout,
            max_stale,
            last_good: HashMap::new(),
        }
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|provider| provider.name()).collect()
    }

    /// First fresh snapshot from the providers in order. When all of them
    /// fail, a last-known-good snapshot younger than `max_stale` comes back
    /// flagged stale; otherwise the instrument is unavailable this cycle.
    pub async fn get_market_data(&mut self, instrument: &str) -> Result<IndicatorSnapshot, EngineError> {
        let mut failures = Vec::with_capacity(self.providers.len());

        for provider in &self.providers {
            match tokio::time::timeout(self.timeout, provider.fetch(instrument)).await {
                Ok(Ok(mut snapshot)) => {
                    snapshot.stale = false;
                    if snapshot.source.is_empty() {
                        snapshot.source = provider.name().to_string();
                    }
                    debug!(
                        "{} data for {} at {}: price {:.4}",
                        provider.name(),
                        instrument,
                        snapshot.timestamp,
                        snapshot.price
                    );
                    self.last_good
                        .insert(instrument.to_string(), (snapshot.clone(), Instant::now()));
                    return Ok(snapshot);
                }
                Ok(Err(err)) => {
                    warn!("Provider {} failed for {}: {:#}", provider.name(), instrument, err);
                    failures.push(format!("{}: {:#}", provider.name(), err));
                }
                Err(_) => {
                    warn!(
                        "Provider {} timed out after {:?} for {}",
                        provider.name(),
                        self.timeout,
                        instrument
                    );
                    failures.push(format!("{}: timed out", provider.name()));
                }
            }
        }

        if let Some((snapshot, fetched_at)) = self.last_good.get(instrument) {
            let age = fetched_at.elapsed();
            if age <= self.max_stale {
                warn!(
                    "Using stale {} snapshot for {} ({}s old)",
                    snapshot.source,
                    instrument,
                    age.as_secs()
                );
                let mut stale = snapshot.clone();
                stale.stale = true;
                return Ok(stale);
            }
        }

        let reason = if failures.is_empty() {
            "no providers configured".to_string()
        } else {
            failures.join("; ")
        };
        Err(EngineError::Unavailable {
            instrument: instrument.to_string(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    fn snapshot(price: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            instrument: "ETH".to_string(),
            price,
            rsi: 50.0,
            ema_fast: price,
            ema_slow: price,
            bollinger_pos: 0.5,
            volume: 1.0,
            avg_volume: 1.0,
            funding_rate: 0.0,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            source: String::new(),
            stale: false,
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl IndicatorProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn fetch(&self, _instrument: &str) -> Result<IndicatorSnapshot> {
            Err(anyhow!("connection refused"))
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl IndicatorProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn fetch(&self, _instrument: &str) -> Result<IndicatorSnapshot> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(snapshot(1.0))
        }
    }

    /// Succeeds until switched off.
    struct SwitchProvider {
        up: Arc<AtomicBool>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl IndicatorProvider for SwitchProvider {
        fn name(&self) -> &str {
            "switch"
        }

        async fn fetch(&self, _instrument: &str) -> Result<IndicatorSnapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.up.load(Ordering::SeqCst) {
                Ok(snapshot(3000.0))
            } else {
                Err(anyhow!("HTTP 503"))
            }
        }
    }

    #[tokio::test]
    async fn falls_back_through_providers_in_order() {
        let up = Arc::new(AtomicBool::new(true));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut source = IndicatorSource::new(
            vec![
                Box::new(FailingProvider),
                Box::new(SlowProvider),
                Box::new(SwitchProvider {
                    up: up.clone(),
                    calls: calls.clone(),
                }),
            ],
            Duration::from_millis(20),
            Duration::from_secs(300),
        );

        let fetched = source.get_market_data("ETH").await.unwrap();
        assert_eq!(fetched.source, "switch");
        assert!(!fetched.stale);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.provider_names(), vec!["failing", "slow", "switch"]);
    }

    #[tokio::test]
    async fn serves_stale_snapshot_then_unavailable() {
        let up = Arc::new(AtomicBool::new(true));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut source = IndicatorSource::new(
            vec![Box::new(SwitchProvider {
                up: up.clone(),
                calls,
            })],
            Duration::from_millis(20),
            Duration::from_secs(300),
        );

        source.get_market_data("ETH").await.unwrap();
        up.store(false, Ordering::SeqCst);

        let stale = source.get_market_data("ETH").await.unwrap();
        assert!(stale.stale);
        assert_eq!(stale.price, 3000.0);

        let err = source.get_market_data("BTC").await.unwrap_err();
        assert!(matches!(err, EngineError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn expired_snapshot_is_not_served() {
        let up = Arc::new(AtomicBool::new(true));
        let mut source = IndicatorSource::new(
            vec![Box::new(SwitchProvider {
                up: up.clone(),
                calls: Arc::new(AtomicUsize::new(0)),
            })],
            Duration::from_millis(20),
            Duration::ZERO,
        );

        source.get_market_data("ETH").await.unwrap();
        up.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;

        let err = source.get_market_data("ETH").await.unwrap_err();
        match err {
            EngineError::Unavailable { reason, .. } => assert!(reason.contains("HTTP 503")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn no_providers_is_unavailable() {
        let mut source = IndicatorSource::new(Vec::new(), Duration::from_secs(1), Duration::ZERO);
        assert!(matches!(
            source.get_market_data("ETH").await,
            Err(EngineError::Unavailable { .. })
        ));
    }
}
