use crate::candle_utils::PRICE_EPSILON;
use crate::error::{TradingError, TradingResult};
use crate::models::{Bar, BucketSize, Position, Quote, SimulationResults, TradeTick};
use crate::trader::{
    order_value, session_start, validate_order, BarSeries, HistoricalMarketData, Trader,
};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Decides whether a buy happened at a local price minimum.
pub trait BottomDetector: Send + Sync {
    /// Length of the trailing window handed to [`BottomDetector::is_bottom`].
    fn lookback(&self) -> Duration;

    fn is_bottom(&self, trailing: &[Bar], price: Decimal) -> bool;
}

/// A buy is a bottom when its price is at or below every low of the window.
#[derive(Debug, Clone, Copy)]
pub struct TrailingLow {
    window: Duration,
}

impl TrailingLow {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn minutes(minutes: i64) -> Self {
        Self::new(Duration::minutes(minutes.max(1)))
    }
}

impl Default for TrailingLow {
    fn default() -> Self {
        Self::minutes(15)
    }
}

impl BottomDetector for TrailingLow {
    fn lookback(&self) -> Duration {
        self.window
    }

    fn is_bottom(&self, trailing: &[Bar], price: Decimal) -> bool {
        let Some(price) = price.to_f64() else {
            return false;
        };
        let lowest = trailing
            .iter()
            .filter(|bar| !bar.is_zero())
            .map(|bar| bar.low)
            .fold(f64::INFINITY, f64::min);
        lowest.is_finite() && price <= lowest + PRICE_EPSILON
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoBottoms;

impl BottomDetector for NoBottoms {
    fn lookback(&self) -> Duration {
        Duration::zero()
    }

    fn is_bottom(&self, _trailing: &[Bar], _price: Decimal) -> bool {
        false
    }
}

/// Deterministic broker over a borrowed historical data source.
///
/// Every order fills completely and immediately at the supplied price or is
/// rejected without touching state. Rejections for missing cash or shares
/// are counted as mistakes.
pub struct SimulatedTrader<'a, D: HistoricalMarketData + ?Sized> {
    symbol: String,
    source: &'a D,
    init_cash: Decimal,
    cash: Decimal,
    owned: u64,
    cost_basis: Decimal,
    results: SimulationResults,
    clock: Option<DateTime<Utc>>,
    bottom_detector: Box<dyn BottomDetector>,
}

impl<'a, D: HistoricalMarketData + ?Sized> SimulatedTrader<'a, D> {
    pub fn new(symbol: impl Into<String>, source: &'a D, init_cash: Decimal) -> TradingResult<Self> {
        if init_cash < Decimal::ZERO {
            return Err(TradingError::InvalidOrder(format!(
                "initial cash must be >= 0 (value: {})",
                init_cash
            )));
        }
        Ok(Self {
            symbol: symbol.into(),
            source,
            init_cash,
            cash: init_cash,
            owned: 0,
            cost_basis: Decimal::ZERO,
            results: SimulationResults::default(),
            clock: None,
            bottom_detector: Box::new(TrailingLow::default()),
        })
    }

    pub fn with_bottom_detector(mut self, detector: Box<dyn BottomDetector>) -> Self {
        self.bottom_detector = detector;
        self
    }

    pub fn init_cash(&self) -> Decimal {
        self.init_cash
    }

    pub fn clock(&self) -> Option<DateTime<Utc>> {
        self.clock
    }

    /// Moves the replay clock; "live" accessors read the session up to it.
    pub fn set_clock(&mut self, now: DateTime<Utc>) {
        self.clock = Some(now);
    }

    /// Snapshot of the counters; later trading does not affect it.
    pub fn get_results(&self) -> SimulationResults {
        self.results
    }

    pub fn reset(&mut self) {
        self.cash = self.init_cash;
        self.owned = 0;
        self.cost_basis = Decimal::ZERO;
        self.results = SimulationResults::default();
    }

    /// Mark-to-market value for reporting. Fills never depend on it.
    pub fn equity(&self, current_price: Decimal) -> Decimal {
        self.cash
            .saturating_add(current_price.saturating_mul(Decimal::from(self.owned)))
    }

    fn reject(&mut self, err: TradingError) -> TradingResult<()> {
        self.results.mistakes += 1;
        warn!("{}: order rejected: {}", self.symbol, err);
        Err(err)
    }

    fn bought_at_bottom(&self, price: Decimal) -> bool {
        let Some(now) = self.clock else {
            return false;
        };
        let lookback = self.bottom_detector.lookback();
        if lookback <= Duration::zero() {
            return false;
        }
        match self
            .source
            .historical_bars(&self.symbol, now - lookback, lookback, BucketSize::Minute)
        {
            Ok(trailing) => self.bottom_detector.is_bottom(&trailing, price),
            Err(err) => {
                debug!("{}: no trailing window for bottom check: {}", self.symbol, err);
                false
            }
        }
    }

    fn session_range(&self) -> TradingResult<(DateTime<Utc>, Duration)> {
        let now = self.clock.ok_or_else(|| {
            TradingError::no_data(format!("{} (replay clock not set)", self.symbol))
        })?;
        let start = session_start(now);
        Ok((start, now - start))
    }
}

fn overflow(what: &str, count: u64, price: Decimal) -> TradingError {
    TradingError::InvalidOrder(format!("{} overflows ({} x {})", what, count, price))
}

impl<'a, D: HistoricalMarketData + ?Sized> Trader for SimulatedTrader<'a, D> {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn balance(&self) -> TradingResult<Decimal> {
        Ok(self.cash)
    }

    fn shares(&self) -> TradingResult<u64> {
        Ok(self.owned)
    }

    fn position(&self) -> TradingResult<Position> {
        if self.owned == 0 {
            return Ok(Position::flat());
        }
        Ok(Position {
            shares_owned: self.owned,
            average_cost: Some(self.cost_basis / Decimal::from(self.owned)),
        })
    }

    fn buy(&mut self, count: u64, price: Decimal) -> TradingResult<()> {
        validate_order(count, price)?;
        let cost = order_value(count, price)?;
        if cost > self.cash {
            return self.reject(TradingError::InsufficientFunds {
                required: cost,
                available: self.cash,
            });
        }

        let owned = self
            .owned
            .checked_add(count)
            .ok_or_else(|| overflow("share count", count, price))?;
        let cost_basis = self
            .cost_basis
            .checked_add(cost)
            .ok_or_else(|| overflow("cost basis", count, price))?;

        let was_flat = self.owned == 0;
        self.cash -= cost;
        self.owned = owned;
        self.cost_basis = cost_basis;
        self.results.buys += 1;
        if was_flat {
            self.results.entries += 1;
            info!("{}: entered with {} shares at {}", self.symbol, count, price);
        }
        if self.bought_at_bottom(price) {
            self.results.bottoms += 1;
            debug!("{}: buy at {} marked as bottom", self.symbol, price);
        }
        Ok(())
    }

    fn sell(&mut self, count: u64, price: Decimal) -> TradingResult<()> {
        validate_order(count, price)?;
        if count > self.owned {
            return self.reject(TradingError::InsufficientShares {
                requested: count,
                owned: self.owned,
            });
        }
        let proceeds = order_value(count, price)?;

        let released_basis = if count == self.owned {
            self.cost_basis
        } else {
            self.cost_basis
                .checked_mul(Decimal::from(count))
                .and_then(|basis| basis.checked_div(Decimal::from(self.owned)))
                .ok_or_else(|| overflow("cost basis", count, price))?
        };
        let cash = self
            .cash
            .checked_add(proceeds)
            .ok_or_else(|| overflow("cash", count, price))?;
        let total_profit = proceeds
            .checked_sub(released_basis)
            .and_then(|profit| self.results.total_profit.checked_add(profit))
            .ok_or_else(|| overflow("realized profit", count, price))?;

        self.cash = cash;
        self.owned -= count;
        self.cost_basis -= released_basis;
        self.results.total_profit = total_profit;
        self.results.sells += 1;
        if self.owned == 0 {
            self.cost_basis = Decimal::ZERO;
            self.results.exits += 1;
            info!(
                "{}: exited at {}, realized profit so far {}",
                self.symbol, price, self.results.total_profit
            );
        }
        Ok(())
    }

    fn cancel_all(&mut self) -> TradingResult<()> {
        self.results.cancels += 1;
        Ok(())
    }

    fn hold(&mut self) {
        self.results.holds += 1;
    }

    fn hbars(
        &self,
        start: DateTime<Utc>,
        duration: Duration,
        bucket: BucketSize,
    ) -> TradingResult<BarSeries> {
        self.source
            .historical_bars(&self.symbol, start, duration, bucket)
    }

    fn bars(&self, bucket: BucketSize) -> TradingResult<BarSeries> {
        let (start, duration) = self.session_range()?;
        self.hbars(start, duration, bucket)
    }

    fn hquotes(&self, start: DateTime<Utc>, duration: Duration) -> TradingResult<Vec<Quote>> {
        self.source.historical_quotes(&self.symbol, start, duration)
    }

    fn quotes(&self) -> TradingResult<Vec<Quote>> {
        let (start, duration) = self.session_range()?;
        self.hquotes(start, duration)
    }

    fn htrades(
        &self,
        start: DateTime<Utc>,
        duration: Duration,
    ) -> TradingResult<Vec<TradeTick>> {
        self.source.historical_trades(&self.symbol, start, duration)
    }

    fn trades(&self) -> TradingResult<Vec<TradeTick>> {
        let (start, duration) = self.session_range()?;
        self.htrades(start, duration)
    }
}
