use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::Once;
use stonks::actions::{apply_action, ActionOutcome, TradeAction};
use stonks::config::SimulationConfig;
use stonks::models::{Bar, BucketSize, SimulationResults};
use stonks::simulated::{NoBottoms, SimulatedTrader};
use stonks::simulation::{run_days, run_session, ScriptedEvaluator};
use stonks::store::{SnapshotData, SnapshotStore};
use stonks::trader::Trader;
use stonks::TradingError;

fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn session_bars(closes: &[f64]) -> Vec<Bar> {
    let open = Utc.with_ymd_and_hms(2024, 3, 4, 14, 30, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(idx, close)| Bar {
            symbol: "AAA".to_string(),
            timestamp: open + Duration::minutes(idx as i64),
            open: *close,
            high: close + 0.02,
            low: close - 0.02,
            close: *close,
            volume: 500,
        })
        .collect()
}

fn store(closes: &[f64]) -> Result<SnapshotStore> {
    let mut data = SnapshotData {
        bars: session_bars(closes),
        ..SnapshotData::default()
    };
    data.floats.insert("AAA".to_string(), 4_000_000);
    SnapshotStore::from_data(data)
}

fn dec(value: i64) -> Decimal {
    Decimal::from(value)
}

#[test]
fn documented_scenario() -> Result<()> {
    ensure_test_env();
    let source = store(&[50.0, 60.0])?;
    let mut trader = SimulatedTrader::new("AAA", &source, dec(1000))?;

    trader.buy(10, dec(50))?;
    assert_eq!(trader.balance()?, dec(500));
    assert_eq!(trader.shares()?, 10);
    let results = trader.get_results();
    assert_eq!((results.buys, results.entries), (1, 1));

    trader.sell(5, dec(60))?;
    assert_eq!(trader.balance()?, dec(800));
    assert_eq!(trader.shares()?, 5);
    let results = trader.get_results();
    assert_eq!(results.sells, 1);
    assert_eq!(results.total_profit, dec(50));

    let before = trader.get_results();
    match trader.buy(100, dec(50)) {
        Err(TradingError::InsufficientFunds { required, available }) => {
            assert_eq!(required, dec(5000));
            assert_eq!(available, dec(800));
        }
        other => panic!("expected insufficient funds, got {:?}", other),
    }
    assert_eq!(trader.balance()?, dec(800));
    assert_eq!(trader.shares()?, 5);
    let after = trader.get_results();
    assert_eq!(after.mistakes, 1);
    assert_eq!(
        SimulationResults {
            mistakes: before.mistakes,
            ..after
        },
        before
    );
    Ok(())
}

#[test]
fn random_order_sequences_keep_books_non_negative() -> Result<()> {
    ensure_test_env();
    let source = store(&[1.0])?;
    let mut rng = fastrand::Rng::with_seed(7);

    for _ in 0..50 {
        let mut trader = SimulatedTrader::new("AAA", &source, dec(500))?
            .with_bottom_detector(Box::new(NoBottoms));
        for _ in 0..40 {
            let count = rng.u64(1..200);
            let price = Decimal::new(rng.i64(0..2_000), 2);
            let cash_before = trader.balance()?;
            let owned_before = trader.shares()?;
            let result = if rng.bool() {
                trader.buy(count, price)
            } else {
                trader.sell(count, price)
            };

            let cash = trader.balance()?;
            let owned = trader.shares()?;
            assert!(cash >= Decimal::ZERO, "cash went negative: {}", cash);
            if let Err(err) = result {
                assert!(err.is_mistake());
                assert_eq!(cash, cash_before);
                assert_eq!(owned, owned_before);
            }
            let position = trader.position()?;
            assert_eq!(position.shares_owned, owned);
            assert_eq!(position.average_cost.is_none(), owned == 0);
        }
    }
    Ok(())
}

#[test]
fn reset_restores_initial_state() -> Result<()> {
    ensure_test_env();
    let source = store(&[2.0])?;
    let mut trader = SimulatedTrader::new("AAA", &source, dec(100))?;
    trader.buy(10, dec(2))?;
    let _ = trader.sell(50, dec(2));
    trader.hold();
    trader.cancel_all()?;

    trader.reset();
    assert_eq!(trader.get_results(), SimulationResults::default());
    assert_eq!(trader.balance()?, trader.init_cash());
    assert_eq!(trader.shares()?, 0);
    assert!(trader.position()?.average_cost.is_none());
    Ok(())
}

#[test]
fn cancel_all_only_counts() -> Result<()> {
    ensure_test_env();
    let source = store(&[2.0])?;
    let mut trader = SimulatedTrader::new("AAA", &source, dec(100))?;
    trader.buy(5, dec(2))?;

    trader.cancel_all()?;
    let once = trader.get_results();
    trader.cancel_all()?;
    let twice = trader.get_results();

    assert_eq!(twice.cancels, once.cancels + 1);
    assert_eq!(
        SimulationResults {
            cancels: once.cancels,
            ..twice
        },
        once
    );
    assert_eq!(trader.balance()?, dec(90));
    assert_eq!(trader.shares()?, 5);
    Ok(())
}

#[test]
fn round_trip_at_one_price_is_profit_neutral() -> Result<()> {
    ensure_test_env();
    let source = store(&[3.0])?;
    let mut trader = SimulatedTrader::new("AAA", &source, dec(1000))?;
    let price = Decimal::new(333, 2);

    trader.buy(7, Decimal::new(150, 2))?;
    trader.sell(7, Decimal::new(175, 2))?;
    let cash_before = trader.balance()?;
    let profit_before = trader.get_results().total_profit;

    trader.buy(30, price)?;
    trader.sell(30, price)?;
    assert_eq!(trader.balance()?, cash_before);
    assert_eq!(trader.get_results().total_profit, profit_before);
    Ok(())
}

#[test]
fn invalid_orders_are_not_mistakes() -> Result<()> {
    ensure_test_env();
    let source = store(&[3.0])?;
    let mut trader = SimulatedTrader::new("AAA", &source, dec(1000))?;

    assert!(matches!(
        trader.buy(0, dec(1)),
        Err(TradingError::InvalidOrder(_))
    ));
    assert!(matches!(
        trader.sell(1, dec(-1)),
        Err(TradingError::InvalidOrder(_))
    ));
    assert_eq!(trader.get_results().mistakes, 0);
    Ok(())
}

#[test]
fn actions_resolve_against_the_trader_state() -> Result<()> {
    ensure_test_env();
    let source = store(&[4.0])?;
    let mut trader = SimulatedTrader::new("AAA", &source, dec(100))?;

    let outcome = apply_action(&mut trader, TradeAction::BuyHalf, dec(4))?;
    assert!(matches!(outcome, ActionOutcome::Bought(12)));
    let outcome = apply_action(&mut trader, TradeAction::SellAll, dec(5))?;
    assert!(matches!(outcome, ActionOutcome::Sold(12)));
    let outcome = apply_action(&mut trader, TradeAction::SellHalf, dec(5))?;
    assert!(outcome.is_rejected());
    assert_eq!(trader.get_results().mistakes, 1);
    Ok(())
}

#[test]
fn replay_clock_exposes_the_session_so_far() -> Result<()> {
    ensure_test_env();
    let source = store(&[1.0, 1.1, 1.2, 1.3])?;
    let mut trader = SimulatedTrader::new("AAA", &source, dec(100))?;
    assert!(matches!(
        trader.bars(BucketSize::Minute),
        Err(TradingError::NoData { .. })
    ));

    trader.set_clock(Utc.with_ymd_and_hms(2024, 3, 4, 14, 32, 0).unwrap());
    let bars = trader.bars(BucketSize::Minute)?;
    assert_eq!(bars.len(), 2);
    assert!((bars[1].close - 1.1).abs() < 1e-9);
    Ok(())
}

#[test]
fn scripted_session_and_day_replay_agree() -> Result<()> {
    ensure_test_env();
    let closes = [2.0, 1.9, 2.1, 2.4];
    let source = store(&closes)?;
    let script = vec![
        TradeAction::BuyHalf,
        TradeAction::Hold,
        TradeAction::Hold,
        TradeAction::SellAll,
    ];

    let mut trader = SimulatedTrader::new("AAA", &source, dec(1000))?;
    let mut evaluator = ScriptedEvaluator::new(script.clone());
    let session = run_session(&mut trader, &session_bars(&closes), &mut evaluator, Decimal::ZERO)?;
    assert_eq!((session.buys, session.sells), (1, 1));
    assert_eq!(session.total_profit, dec(250) * Decimal::new(4, 1));

    let config = SimulationConfig::default();
    let day = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap().date_naive();
    let mut evaluator = ScriptedEvaluator::new(script);
    let replayed = run_days(
        &source,
        &[
            ("AAA".to_string(), day),
            ("AAA".to_string(), day.succ_opt().unwrap()),
        ],
        &config,
        &mut evaluator,
    )?;
    assert_eq!(replayed.buys, session.buys);
    assert_eq!(replayed.sells, session.sells);
    assert_eq!(replayed.total_profit, session.total_profit);
    Ok(())
}

#[test]
fn oversized_orders_fail_without_touching_the_books() -> Result<()> {
    ensure_test_env();
    let source = store(&[1.0])?;
    let mut trader = SimulatedTrader::new("AAA", &source, dec(1000))?;

    let outcome = apply_action(&mut trader, TradeAction::BuyAll, Decimal::new(1, 28));
    assert!(matches!(outcome, Err(TradingError::InvalidOrder(_))));

    trader.buy(1, dec(1))?;
    let before = trader.get_results();
    assert!(matches!(
        trader.sell(1, Decimal::MAX),
        Err(TradingError::InvalidOrder(_))
    ));
    assert_eq!(trader.balance()?, dec(999));
    assert_eq!(trader.shares()?, 1);
    assert_eq!(trader.get_results(), before);
    Ok(())
}
