use crate::actions::{apply_action, ActionOutcome, TradeAction};
use crate::candle_utils::fill_sparse_bars;
use crate::config::SimulationConfig;
use crate::error::{TradingError, TradingResult};
use crate::models::{Bar, SimulationResults};
use crate::simulated::SimulatedTrader;
use crate::store::SnapshotStore;
use crate::trader::{HistoricalMarketData, Trader};
use chrono::{Duration, NaiveDate};
use log::{debug, info, warn};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

/// Decision source driven bar by bar during a replay.
pub trait Evaluator {
    /// `window` holds the session's bars up to and including the current one.
    fn decide(&mut self, window: &[Bar], cash: Decimal, shares: u64) -> TradeAction;

    /// Called before each new session.
    fn reset(&mut self) {}
}

/// Replays a fixed list of actions, then holds.
#[derive(Debug, Clone)]
pub struct ScriptedEvaluator {
    actions: Vec<TradeAction>,
    cursor: usize,
}

impl ScriptedEvaluator {
    pub fn new(actions: Vec<TradeAction>) -> Self {
        Self { actions, cursor: 0 }
    }
}

impl Evaluator for ScriptedEvaluator {
    fn decide(&mut self, _window: &[Bar], _cash: Decimal, _shares: u64) -> TradeAction {
        let action = self
            .actions
            .get(self.cursor)
            .copied()
            .unwrap_or(TradeAction::Hold);
        self.cursor += 1;
        action
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}

/// Baseline: buy half after a dip below the session high, sell everything
/// once the close recovers above the entry by `target_ratio`.
#[derive(Debug, Clone)]
pub struct DipBuyer {
    dip_ratio: f64,
    target_ratio: f64,
    entry: Option<f64>,
}

impl DipBuyer {
    pub fn new(dip_ratio: f64, target_ratio: f64) -> Self {
        Self {
            dip_ratio: dip_ratio.clamp(0.0, 1.0),
            target_ratio: target_ratio.max(0.0),
            entry: None,
        }
    }
}

impl Default for DipBuyer {
    fn default() -> Self {
        Self::new(0.05, 0.03)
    }
}

impl Evaluator for DipBuyer {
    fn decide(&mut self, window: &[Bar], _cash: Decimal, shares: u64) -> TradeAction {
        let Some(current) = window.iter().rev().find(|bar| !bar.is_zero()) else {
            return TradeAction::Hold;
        };
        let close = current.close;

        if shares > 0 {
            let entry = *self.entry.get_or_insert(close);
            if close >= entry * (1.0 + self.target_ratio) {
                self.entry = None;
                return TradeAction::SellAll;
            }
            return TradeAction::Hold;
        }

        self.entry = None;
        let session_high = window
            .iter()
            .filter(|bar| !bar.is_zero())
            .map(|bar| bar.high)
            .fold(0.0, f64::max);
        if session_high > 0.0 && close <= session_high * (1.0 - self.dip_ratio) {
            self.entry = Some(close);
            return TradeAction::BuyHalf;
        }
        TradeAction::Hold
    }

    fn reset(&mut self) {
        self.entry = None;
    }
}

fn fill_price(action: TradeAction, close: Decimal, slippage: Decimal) -> Decimal {
    if action.is_buy() {
        close + slippage
    } else if action.is_sell() {
        (close - slippage).max(Decimal::ZERO)
    } else {
        close
    }
}

/// Drives one session through `trader`, applying each decision at the bar
/// close shifted by `slippage`.
///
/// The replay clock sits at the close of the current bar. Mistakes are
/// counted by the trader and the run goes on; orders that cannot be formed
/// (a relative buy at a zero price) are skipped.
pub fn run_session<D: HistoricalMarketData + ?Sized>(
    trader: &mut SimulatedTrader<'_, D>,
    bars: &[Bar],
    evaluator: &mut dyn Evaluator,
    slippage: Decimal,
) -> TradingResult<SimulationResults> {
    for (idx, bar) in bars.iter().enumerate() {
        if bar.is_zero() {
            continue;
        }
        let bar_close_time = bars
            .get(idx + 1)
            .map(|next| next.timestamp)
            .unwrap_or(bar.timestamp + Duration::minutes(1));
        trader.set_clock(bar_close_time);

        let cash = trader.balance()?;
        let shares = trader.shares()?;
        let action = evaluator.decide(&bars[..=idx], cash, shares);
        let close = Decimal::from_f64(bar.close).ok_or_else(|| {
            TradingError::InvalidOrder(format!("unrepresentable close price {}", bar.close))
        })?;
        let price = fill_price(action, close, slippage);

        match apply_action(trader, action, price) {
            Ok(ActionOutcome::Rejected(err)) => {
                debug!("{} at {}: {} rejected ({})", action, bar.timestamp, price, err)
            }
            Ok(outcome) => debug!("{} at {}: {:?}", action, bar.timestamp, outcome),
            Err(TradingError::InvalidOrder(reason)) => {
                warn!("Skipping {} at {}: {}", action, bar.timestamp, reason)
            }
            Err(err) => return Err(err),
        }
    }
    Ok(trader.get_results())
}

/// Replays every `(symbol, day)` session with a fresh trader and merges the
/// results. Gaps inside a session are padded with flat bars; sessions without
/// data are skipped.
pub fn run_days<D: HistoricalMarketData + ?Sized>(
    source: &D,
    sessions: &[(String, NaiveDate)],
    config: &SimulationConfig,
    evaluator: &mut dyn Evaluator,
) -> TradingResult<SimulationResults> {
    let mut total = SimulationResults::default();
    for (symbol, day) in sessions {
        let Some(start) = day.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc()) else {
            continue;
        };
        let bars = match source.historical_bars(symbol, start, Duration::days(1), config.bucket) {
            Ok(bars) => bars,
            Err(err @ TradingError::NoData { .. }) => {
                warn!("Skipping {} on {}: {}", symbol, day, err);
                continue;
            }
            Err(err) => return Err(err),
        };
        let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
            continue;
        };
        let (from, until) = (first.timestamp, last.timestamp + config.bucket.duration());
        let bars = fill_sparse_bars(from, until, config.bucket, &bars);

        let mut trader = SimulatedTrader::new(symbol.as_str(), source, config.initial_cash)?
            .with_bottom_detector(config.bottom_detector());
        evaluator.reset();
        let results = run_session(&mut trader, &bars, evaluator, config.slippage)?;
        info!(
            "{} on {}: profit {}, {} buys, {} sells, {} mistakes",
            symbol, day, results.total_profit, results.buys, results.sells, results.mistakes
        );
        total.merge(&results);
    }
    Ok(total)
}

/// Picks `count` random `(symbol, day)` sessions, reproducible from `seed`.
pub fn sample_days(store: &SnapshotStore, count: usize, seed: u64) -> Vec<(String, NaiveDate)> {
    let candidates: Vec<(String, Vec<NaiveDate>)> = store
        .symbols()
        .into_iter()
        .map(|symbol| {
            let days = store.session_days(&symbol);
            (symbol, days)
        })
        .filter(|(_, days)| !days.is_empty())
        .collect();
    if candidates.is_empty() {
        return Vec::new();
    }

    let mut rng = fastrand::Rng::with_seed(seed);
    (0..count)
        .map(|_| {
            let (symbol, days) = &candidates[rng.usize(..candidates.len())];
            (symbol.clone(), days[rng.usize(..days.len())])
        })
        .collect()
}

/// Default fitness of a replay for an evolutionary search.
pub fn fitness_score(results: &SimulationResults) -> f64 {
    if results.buys == 0 || results.sells == 0 {
        return -10_000.0;
    }
    let buys = results.buys as f64;
    let sells = results.sells as f64;
    let profit = results.total_profit.to_f64().unwrap_or(0.0);

    let mut score = 20.0 * profit;
    let buy_gap = buys - 10.0;
    score += buy_gap * buy_gap / -10.0 + 10.0;
    let ratio_gap = sells / (buys + 1.0) - 5.0;
    score += ratio_gap * ratio_gap / -2.5 + 10.0;
    score -= 30.0 * (results.mistakes + results.bottoms) as f64;
    score
}

/// Parses a comma separated action script such as `buy_half,hold,sell_all`.
pub fn parse_script(raw: &str) -> TradingResult<Vec<TradeAction>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::parse)
        .collect()
}
