use crate::models::IndicatorSnapshot;
use chrono::{DateTime, Utc};

pub const RSI_PERIOD: usize = 14;
pub const EMA_FAST_PERIOD: usize = 12;
pub const EMA_SLOW_PERIOD: usize = 26;
pub const BOLLINGER_PERIOD: usize = 20;
pub const BOLLINGER_STD_DEV: f64 = 2.0;
pub const VOLUME_AVERAGE_PERIOD: usize = 20;

/// Shortest close history that fills every indicator window.
pub const MIN_HISTORY: usize = EMA_SLOW_PERIOD + 1;

pub fn calculate_sma(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }
    if period == 0 {
        return vec![prices[0]; prices.len()];
    }
    if period == 1 {
        return prices.to_vec();
    }
    if prices.len() < period {
        return vec![prices[0]; prices.len()];
    }

    let mut sma_values = Vec::with_capacity(prices.len());
    for _ in 0..period - 1 {
        sma_values.push(prices[0]);
    }

    let mut window_sum: f64 = prices[..period].iter().sum();
    sma_values.push(window_sum / period as f64);
    for i in period..prices.len() {
        window_sum += prices[i] - prices[i - period];
        sma_values.push(window_sum / period as f64);
    }

    sma_values
}

pub fn calculate_ema(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema_values = Vec::with_capacity(prices.len());
    ema_values.push(prices[0]);

    for i in 1..prices.len() {
        let ema = (prices[i] * multiplier) + (ema_values[i - 1] * (1.0 - multiplier));
        ema_values.push(ema);
    }

    ema_values
}

fn rsi_from_avgs(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

/// Wilder-smoothed RSI; entries before the first full window read 50.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }
    if period == 0 || prices.len() < period + 1 {
        return vec![50.0; prices.len()];
    }

    let mut rsi_values = vec![50.0; prices.len()];
    let mut sum_gain = 0.0f64;
    let mut sum_loss = 0.0f64;
    for i in 1..=period {
        let delta = prices[i] - prices[i - 1];
        if delta >= 0.0 {
            sum_gain += delta;
        } else {
            sum_loss += -delta;
        }
    }

    let mut avg_gain = sum_gain / period as f64;
    let mut avg_loss = sum_loss / period as f64;
    rsi_values[period] = rsi_from_avgs(avg_gain, avg_loss);

    for i in (period + 1)..prices.len() {
        let delta = prices[i] - prices[i - 1];
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { -delta } else { 0.0 };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        rsi_values[i] = rsi_from_avgs(avg_gain, avg_loss);
    }

    rsi_values
}

/// Upper, middle and lower bands, one entry per full window.
pub fn calculate_bollinger_bands(
    prices: &[f64],
    period: usize,
    std_dev: f64,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    if period == 0 || prices.len() < period {
        return (Vec::new(), Vec::new(), Vec::new());
    }
    let sma = calculate_sma(prices, period);
    let mut upper = Vec::with_capacity(prices.len() + 1 - period);
    let mut middle = Vec::with_capacity(prices.len() + 1 - period);
    let mut lower = Vec::with_capacity(prices.len() + 1 - period);

    for i in (period - 1)..prices.len() {
        let slice = &prices[i + 1 - period..=i];
        let mean = sma[i];
        let variance = slice.iter().map(|&val| (val - mean).powi(2)).sum::<f64>() / period as f64;
        let standard_deviation = variance.sqrt();

        upper.push(mean + (std_dev * standard_deviation));
        middle.push(mean);
        lower.push(mean - (std_dev * standard_deviation));
    }

    (upper, middle, lower)
}

/// Where `price` sits between the bands, clamped to `[0, 1]`. A collapsed
/// band reads as the midpoint.
pub fn bollinger_position(price: f64, upper: f64, lower: f64) -> f64 {
    let width = upper - lower;
    if !width.is_finite() || width <= f64::EPSILON {
        return 0.5;
    }
    ((price - lower) / width).clamp(0.0, 1.0)
}

/// Mean of the `period` values before the last one.
pub fn trailing_average(values: &[f64], period: usize) -> f64 {
    if values.len() < 2 || period == 0 {
        return values.last().copied().unwrap_or(0.0);
    }
    let end = values.len() - 1;
    let start = end.saturating_sub(period);
    let window = &values[start..end];
    window.iter().sum::<f64>() / window.len() as f64
}

/// Build a snapshot from oldest-first close and volume series. Returns `None`
/// when the history is too short or contains unusable values.
pub fn snapshot_from_series(
    instrument: &str,
    closes: &[f64],
    volumes: &[f64],
    funding_rate: f64,
    timestamp: DateTime<Utc>,
    source: &str,
) -> Option<IndicatorSnapshot> {
    if closes.len() < MIN_HISTORY || closes.iter().any(|close| !close.is_finite() || *close <= 0.0)
    {
        return None;
    }
    let price = *closes.last()?;
    let rsi = *calculate_rsi(closes, RSI_PERIOD).last()?;
    let ema_fast = *calculate_ema(closes, EMA_FAST_PERIOD).last()?;
    let ema_slow = *calculate_ema(closes, EMA_SLOW_PERIOD).last()?;
    let (upper, _, lower) = calculate_bollinger_bands(closes, BOLLINGER_PERIOD, BOLLINGER_STD_DEV);
    let bollinger_pos = bollinger_position(price, *upper.last()?, *lower.last()?);
    let volume = volumes.last().copied().unwrap_or(0.0);
    let avg_volume = trailing_average(volumes, VOLUME_AVERAGE_PERIOD);

    Some(IndicatorSnapshot {
        instrument: instrument.to_string(),
        price,
        rsi,
        ema_fast,
        ema_slow,
        bollinger_pos,
        volume,
        avg_volume,
        funding_rate: if funding_rate.is_finite() { funding_rate } else { 0.0 },
        timestamp,
        source: source.to_string(),
        stale: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_sma_and_ema_basics() {
        let prices = [1.0, 2.0, 3.0, 4.0];
        let sma = calculate_sma(&prices, 2);
        assert_eq!(sma, vec![1.0, 1.5, 2.5, 3.5]);

        let ema = calculate_ema(&prices, 3);
        assert!((ema[0] - 1.0).abs() < EPS);
        assert!((ema[1] - 1.5).abs() < EPS);
        assert!((ema[3] - 3.125).abs() < EPS);
    }

    #[test]
    fn test_rsi_extremes() {
        let rising: Vec<f64> = (1..=20).map(|v| v as f64).collect();
        assert!((calculate_rsi(&rising, 14)[19] - 100.0).abs() < EPS);

        let falling: Vec<f64> = (1..=20).rev().map(|v| v as f64).collect();
        assert!(calculate_rsi(&falling, 14)[19].abs() < EPS);

        let flat = vec![10.0; 20];
        assert!((calculate_rsi(&flat, 14)[19] - 50.0).abs() < EPS);
        assert_eq!(calculate_rsi(&[1.0, 2.0], 14), vec![50.0, 50.0]);
    }

    #[test]
    fn test_bollinger_bands_use_window_mean() {
        let prices = [1.0, 2.0, 3.0, 10.0, 10.0, 10.0];
        let (upper, middle, lower) = calculate_bollinger_bands(&prices, 3, 2.0);
        assert_eq!(middle.len(), 4);
        assert!((middle[3] - 10.0).abs() < EPS);
        assert!((upper[3] - 10.0).abs() < EPS);
        assert!((lower[3] - 10.0).abs() < EPS);
        assert!((middle[0] - 2.0).abs() < EPS);
        assert!(upper[0] > middle[0] && lower[0] < middle[0]);
    }

    #[test]
    fn test_bollinger_position_clamps() {
        assert!((bollinger_position(105.0, 110.0, 100.0) - 0.5).abs() < EPS);
        assert_eq!(bollinger_position(90.0, 110.0, 100.0), 0.0);
        assert_eq!(bollinger_position(120.0, 110.0, 100.0), 1.0);
        assert_eq!(bollinger_position(100.0, 100.0, 100.0), 0.5);
    }

    #[test]
    fn test_trailing_average_excludes_latest() {
        let volumes = [10.0, 10.0, 10.0, 40.0];
        assert!((trailing_average(&volumes, 20) - 10.0).abs() < EPS);
        assert!((trailing_average(&volumes, 2) - 10.0).abs() < EPS);
    }

    #[test]
    fn test_snapshot_from_series() {
        let timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let closes: Vec<f64> = (0..40).map(|i| 3000.0 + i as f64 * 5.0).collect();
        let volumes = vec![100.0; 40];

        let snapshot =
            snapshot_from_series("ETH", &closes, &volumes, 0.0001, timestamp, "test").unwrap();
        assert!((snapshot.price - 3195.0).abs() < EPS);
        assert!(snapshot.ema_fast > snapshot.ema_slow);
        assert!((snapshot.rsi - 100.0).abs() < EPS);
        assert!((snapshot.avg_volume - 100.0).abs() < EPS);
        assert!(!snapshot.stale);

        assert!(snapshot_from_series("ETH", &closes[..10], &volumes, 0.0, timestamp, "test")
            .is_none());
    }
}
