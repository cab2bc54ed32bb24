use anyhow::{anyhow, Result as AnyResult};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BucketSize {
    #[default]
    Minute,
    FiveMinutes,
    FifteenMinutes,
    Hour,
    Day,
}

impl BucketSize {
    pub fn duration(self) -> Duration {
        match self {
            BucketSize::Minute => Duration::minutes(1),
            BucketSize::FiveMinutes => Duration::minutes(5),
            BucketSize::FifteenMinutes => Duration::minutes(15),
            BucketSize::Hour => Duration::hours(1),
            BucketSize::Day => Duration::days(1),
        }
    }

    pub fn alpaca_timeframe(self) -> &'static str {
        match self {
            BucketSize::Minute => "1Min",
            BucketSize::FiveMinutes => "5Min",
            BucketSize::FifteenMinutes => "15Min",
            BucketSize::Hour => "1Hour",
            BucketSize::Day => "1Day",
        }
    }

    pub fn parse(raw: &str) -> AnyResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "minute" | "1min" | "1m" => Ok(Self::Minute),
            "five_minutes" | "5min" | "5m" => Ok(Self::FiveMinutes),
            "fifteen_minutes" | "15min" | "15m" => Ok(Self::FifteenMinutes),
            "hour" | "1hour" | "1h" => Ok(Self::Hour),
            "day" | "1day" | "1d" => Ok(Self::Day),
            other => Err(anyhow!(
                "bucket size must be one of minute, 5min, 15min, hour, day (value: {})",
                other
            )),
        }
    }
}

/// A single candlestick for one bucket of a symbol's session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    /// Filler bar that carries no market data at all.
    pub fn is_zero(&self) -> bool {
        self.open == 0.0 && self.close == 0.0 && self.low == 0.0 && self.volume == 0
    }

    /// Bar without trades, e.g. padding after an active bucket.
    pub fn is_tradeless(&self) -> bool {
        self.volume == 0
    }
}

/// Best bid and ask at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub ask_exchange: String,
    pub ask_size: u64,
    pub ask_price: f64,
    pub bid_exchange: String,
    pub bid_size: u64,
    pub bid_price: f64,
}

/// A single executed trade reported by an exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeTick {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub exchange: String,
    pub size: u64,
    pub price: f64,
}

/// Ticker metadata as reported by a data provider for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerMeta {
    pub symbol: String,
    pub date: NaiveDate,
    pub float_shares: u64,
    pub current_price: f64,
    pub open: f64,
    pub change_since_open: f64,
}

impl TickerMeta {
    pub fn new(
        symbol: impl Into<String>,
        date: NaiveDate,
        float_shares: u64,
        current_price: f64,
        open: f64,
    ) -> Self {
        let change_since_open = if open > 0.0 && current_price >= 0.0 {
            (current_price - open) / open
        } else {
            0.0
        };
        Self {
            symbol: symbol.into(),
            date,
            float_shares,
            current_price,
            open,
            change_since_open,
        }
    }
}

/// Screening result for one symbol at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub float_shares: u64,
    pub current_price: f64,
    pub change_since_open: f64,
}

impl Ticker {
    pub fn from_meta(meta: &TickerMeta, float_shares: u64) -> Self {
        Self {
            symbol: meta.symbol.clone(),
            float_shares,
            current_price: meta.current_price.max(0.0),
            change_since_open: meta.change_since_open,
        }
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}): ${:.2} {:.2}%",
            self.symbol,
            group_thousands(self.float_shares),
            self.current_price,
            self.change_since_open * 100.0
        )
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

/// Derived view of what a trader holds in its bound symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Position {
    pub shares_owned: u64,
    /// `None` while flat.
    pub average_cost: Option<Decimal>,
}

impl Position {
    pub fn flat() -> Self {
        Self::default()
    }

    pub fn is_flat(&self) -> bool {
        self.shares_owned == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SimulationResults {
    pub total_profit: Decimal,
    pub buys: u64,
    pub sells: u64,
    pub mistakes: u64,
    pub bottoms: u64,
    pub entries: u64,
    pub exits: u64,
    pub cancels: u64,
    pub holds: u64,
}

impl SimulationResults {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Accumulates the counters of another run into this one.
    pub fn merge(&mut self, other: &SimulationResults) {
        self.total_profit = self.total_profit.saturating_add(other.total_profit);
        self.buys += other.buys;
        self.sells += other.sells;
        self.mistakes += other.mistakes;
        self.bottoms += other.bottoms;
        self.entries += other.entries;
        self.exits += other.exits;
        self.cancels += other.cancels;
        self.holds += other.holds;
    }
}
