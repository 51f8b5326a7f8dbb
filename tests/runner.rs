use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use perpsim::approval::{TradeApprover, TradeProposal};
use perpsim::config::AppSettings;
use perpsim::market_data::IndicatorSource;
use perpsim::models::{ExitReason, IndicatorSnapshot, Side};
use perpsim::providers::ReplayProvider;
use perpsim::runner::{CycleOutcome, TradingSession};
use perpsim::store::{PersistedState, StateStore};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

#[derive(Clone, Copy)]
enum Mood {
    Neutral,
    Bullish,
    Bearish,
}

fn snapshot(minutes: i64, price: f64, mood: Mood) -> IndicatorSnapshot {
    let (rsi, ema_fast, bollinger_pos, volume) = match mood {
        Mood::Neutral => (50.0, 3000.0, 0.5, 1000.0),
        Mood::Bullish => (20.0, 3030.0, 0.05, 2500.0),
        Mood::Bearish => (85.0, 2970.0, 0.95, 2500.0),
    };
    IndicatorSnapshot {
        instrument: "ETH".to_string(),
        price,
        rsi,
        ema_fast,
        ema_slow: 3000.0,
        bollinger_pos,
        volume,
        avg_volume: 1000.0,
        funding_rate: 0.0,
        timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
            + ChronoDuration::minutes(minutes),
        source: String::new(),
        stale: false,
    }
}

/// Answers every proposal the same way and counts how often it was asked.
struct ScriptedApprover {
    answer: bool,
    asked: Arc<AtomicUsize>,
}

#[async_trait]
impl TradeApprover for ScriptedApprover {
    async fn approve(&self, _proposal: &TradeProposal) -> Result<bool> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer)
    }
}

fn session_with(
    settings: &AppSettings,
    snapshots: Vec<IndicatorSnapshot>,
    max_stale: Duration,
    dir: &tempfile::TempDir,
) -> TradingSession {
    let source = IndicatorSource::new(
        vec![Box::new(ReplayProvider::new(snapshots))],
        Duration::from_secs(1),
        max_stale,
    );
    TradingSession::new(
        settings,
        PersistedState::fresh(settings.engine.initial_balance, true),
        source,
        StateStore::new(dir.path().join("state.json")),
    )
}

fn test_settings() -> AppSettings {
    let mut settings = AppSettings::default();
    settings.runner.cycle_interval = Duration::ZERO;
    settings
}

#[tokio::test]
async fn run_drives_a_full_trade_and_persists_it() {
    ensure_test_env();
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings();
    let mut session = session_with(
        &settings,
        vec![
            snapshot(0, 3000.0, Mood::Bullish),
            snapshot(5, 3060.0, Mood::Neutral),
            snapshot(10, 3125.0, Mood::Neutral),
        ],
        Duration::ZERO,
        &dir,
    );

    let summary = session.run(CancellationToken::new(), Some(3)).await;
    assert_eq!(summary.cycles, 3);
    assert_eq!(summary.opened, 1);
    assert_eq!(summary.closed, 1);

    let portfolio = session.engine().portfolio();
    assert_eq!(portfolio.trade_history[0].exit_reason, ExitReason::TakeProfit);
    assert_eq!(portfolio.ledger_discrepancy(), Decimal::ZERO);
    assert!(session.is_durable());

    let saved = StateStore::new(dir.path().join("state.json"))
        .load()
        .unwrap()
        .unwrap();
    assert_eq!(saved.portfolio.trade_history.len(), 1);
    assert_eq!(saved.portfolio.balance, portfolio.balance);
    assert!(saved.weights.get("rule_confluence") > 0.3);
}

#[tokio::test]
async fn opposing_signal_closes_with_signal_reversal() {
    ensure_test_env();
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings();
    let mut session = session_with(
        &settings,
        vec![
            snapshot(0, 3000.0, Mood::Bullish),
            snapshot(5, 3010.0, Mood::Bearish),
        ],
        Duration::ZERO,
        &dir,
    );

    session.run_cycle().await;
    let report = session.run_cycle().await;
    match &report.instruments[0].outcome {
        CycleOutcome::Closed { trade } => {
            assert_eq!(trade.exit_reason, ExitReason::SignalReversal);
            assert_eq!(trade.side, Side::Long);
            assert_eq!(trade.net_pnl, dec!(0.13));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    // Re-entry waits for the next cycle.
    assert_eq!(session.engine().portfolio().open_count(), 0);
}

#[tokio::test]
async fn daily_cap_downgrades_entries_to_hold() {
    ensure_test_env();
    let dir = tempfile::tempdir().unwrap();
    let mut settings = test_settings();
    settings.runner.max_daily_trades = 1;
    let mut session = session_with(
        &settings,
        vec![
            snapshot(0, 3000.0, Mood::Bullish),
            snapshot(5, 3125.0, Mood::Neutral),
            snapshot(10, 3000.0, Mood::Bullish),
        ],
        Duration::ZERO,
        &dir,
    );

    for _ in 0..2 {
        session.run_cycle().await;
    }
    let report = session.run_cycle().await;
    match &report.instruments[0].outcome {
        CycleOutcome::Rejected { reason } => assert!(reason.contains("daily trade limit")),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(session.engine().portfolio().open_count(), 0);
    assert_eq!(session.engine().portfolio().trade_history.len(), 1);
}

#[tokio::test]
async fn stale_data_neither_exits_nor_enters() {
    ensure_test_env();
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings();

    // Holding: the stale copy of the entry snapshot keeps the position open.
    let mut holding = session_with(
        &settings,
        vec![snapshot(0, 3000.0, Mood::Bullish)],
        Duration::from_secs(300),
        &dir,
    );
    holding.run_cycle().await;
    let report = holding.run_cycle().await;
    assert!(report.instruments[0].stale);
    assert!(matches!(
        report.instruments[0].outcome,
        CycleOutcome::Holding { .. }
    ));
    assert_eq!(holding.engine().portfolio().open_count(), 1);

    // Flat: a stale actionable signal is not proposed at all.
    let asked = Arc::new(AtomicUsize::new(0));
    let other_dir = tempfile::tempdir().unwrap();
    let mut flat = session_with(
        &settings,
        vec![snapshot(0, 3000.0, Mood::Bullish)],
        Duration::from_secs(300),
        &other_dir,
    )
    .with_approver(Box::new(ScriptedApprover {
        answer: false,
        asked: asked.clone(),
    }));
    let first = flat.run_cycle().await;
    assert_eq!(first.instruments[0].outcome, CycleOutcome::Declined);
    let second = flat.run_cycle().await;
    assert!(second.instruments[0].stale);
    assert_eq!(second.instruments[0].outcome, CycleOutcome::Hold);
    assert_eq!(asked.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn oversized_entries_are_rejected_without_touching_the_balance() {
    ensure_test_env();
    let dir = tempfile::tempdir().unwrap();
    let mut settings = test_settings();
    settings.runner.trade_size_usd = dec!(20000);
    let mut session = session_with(
        &settings,
        vec![snapshot(0, 3000.0, Mood::Bullish)],
        Duration::ZERO,
        &dir,
    );

    let report = session.run_cycle().await;
    assert!(matches!(
        report.instruments[0].outcome,
        CycleOutcome::Rejected { .. }
    ));
    assert_eq!(session.engine().portfolio().balance, dec!(10000));
}

#[tokio::test]
async fn unwritable_state_file_keeps_running_in_memory() {
    ensure_test_env();
    let dir = tempfile::tempdir().unwrap();
    // A directory where the state file should be makes every save fail.
    std::fs::create_dir(dir.path().join("state.json")).unwrap();
    std::fs::create_dir(dir.path().join("state.json.tmp")).unwrap();
    let settings = test_settings();
    let mut session = session_with(
        &settings,
        vec![snapshot(0, 3000.0, Mood::Bullish)],
        Duration::ZERO,
        &dir,
    );

    let report = session.run_cycle().await;
    assert!(matches!(
        report.instruments[0].outcome,
        CycleOutcome::Opened { .. }
    ));
    assert!(!session.is_durable());
    assert_eq!(session.engine().portfolio().open_count(), 1);
}

#[tokio::test]
async fn cancellation_is_observed_between_cycles() {
    ensure_test_env();
    let dir = tempfile::tempdir().unwrap();
    let mut settings = test_settings();
    settings.runner.cycle_interval = Duration::from_secs(3600);
    let mut session = session_with(
        &settings,
        vec![
            snapshot(0, 3000.0, Mood::Bullish),
            snapshot(5, 3010.0, Mood::Neutral),
        ],
        Duration::ZERO,
        &dir,
    );

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let summary = session.run(token, None).await;
    assert_eq!(summary.cycles, 1);
    assert_eq!(summary.opened, 1);
    assert_eq!(session.engine().portfolio().open_count(), 1);
}
