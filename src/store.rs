use crate::candle_utils::{aggregate_bars, normalize_ticker_symbol};
use crate::error::{TradingError, TradingResult};
use crate::models::{Bar, BucketSize, Quote, TickerMeta, TradeTick};
use crate::symbols::SymbolData;
use crate::trader::{BarSeries, HistoricalMarketData};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

const MARKET_SNAPSHOT_VERSION: u32 = 1;

/// Raw contents of a snapshot, also the JSON import format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotData {
    #[serde(default)]
    pub bars: Vec<Bar>,
    #[serde(default)]
    pub quotes: Vec<Quote>,
    #[serde(default)]
    pub trades: Vec<TradeTick>,
    #[serde(default)]
    pub tickers: Vec<TickerMeta>,
    #[serde(default)]
    pub floats: HashMap<String, u64>,
    /// Market days without any recorded bars still count as sessions.
    #[serde(default)]
    pub sessions: Vec<NaiveDate>,
}

#[derive(Serialize, Deserialize)]
struct MarketSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    data: SnapshotData,
}

/// Immutable, indexed market data replayed by the simulator and screened by
/// the fetcher.
pub struct SnapshotStore {
    bars: HashMap<String, Vec<Bar>>,
    quotes: HashMap<String, Vec<Quote>>,
    trades: HashMap<String, Vec<TradeTick>>,
    tickers: HashMap<String, BTreeMap<NaiveDate, TickerMeta>>,
    floats: HashMap<String, u64>,
    sessions: BTreeSet<NaiveDate>,
    symbol_days: HashMap<String, BTreeSet<NaiveDate>>,
}

impl SnapshotStore {
    pub fn from_data(data: SnapshotData) -> Result<Self> {
        if data.bars.is_empty() && data.tickers.is_empty() {
            return Err(anyhow!("Market data snapshot has no usable bars or tickers"));
        }

        let mut bars: HashMap<String, Vec<Bar>> = HashMap::new();
        for mut bar in data.bars {
            let Some(symbol) = normalize_ticker_symbol(&bar.symbol) else {
                continue;
            };
            bar.symbol = symbol.clone();
            bars.entry(symbol).or_default().push(bar);
        }
        for series in bars.values_mut() {
            series.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        }

        let mut quotes: HashMap<String, Vec<Quote>> = HashMap::new();
        for mut quote in data.quotes {
            let Some(symbol) = normalize_ticker_symbol(&quote.symbol) else {
                continue;
            };
            quote.symbol = symbol.clone();
            quotes.entry(symbol).or_default().push(quote);
        }
        for series in quotes.values_mut() {
            series.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        }

        let mut trades: HashMap<String, Vec<TradeTick>> = HashMap::new();
        for mut trade in data.trades {
            let Some(symbol) = normalize_ticker_symbol(&trade.symbol) else {
                continue;
            };
            trade.symbol = symbol.clone();
            trades.entry(symbol).or_default().push(trade);
        }
        for series in trades.values_mut() {
            series.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        }

        let mut tickers: HashMap<String, BTreeMap<NaiveDate, TickerMeta>> = HashMap::new();
        for mut meta in data.tickers {
            let Some(symbol) = normalize_ticker_symbol(&meta.symbol) else {
                continue;
            };
            meta.symbol = symbol.clone();
            tickers.entry(symbol).or_default().insert(meta.date, meta);
        }

        let floats: HashMap<String, u64> = data
            .floats
            .into_iter()
            .filter_map(|(symbol, shares)| normalize_ticker_symbol(&symbol).map(|s| (s, shares)))
            .collect();

        let mut symbol_days: HashMap<String, BTreeSet<NaiveDate>> = HashMap::new();
        for (symbol, series) in &bars {
            let days = symbol_days.entry(symbol.clone()).or_default();
            days.extend(series.iter().map(|bar| bar.timestamp.date_naive()));
        }
        for (symbol, by_day) in &tickers {
            symbol_days
                .entry(symbol.clone())
                .or_default()
                .extend(by_day.keys().copied());
        }

        let mut sessions: BTreeSet<NaiveDate> = data.sessions.into_iter().collect();
        for days in symbol_days.values() {
            sessions.extend(days.iter().copied());
        }

        info!(
            "Indexed market data for {} symbols across {} sessions",
            symbol_days.len(),
            sessions.len()
        );

        Ok(Self {
            bars,
            quotes,
            trades,
            tickers,
            floats,
            sessions,
            symbol_days,
        })
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading market data snapshot from {}", path.display());
        let file = File::open(path).with_context(|| {
            format!("Failed to open market data snapshot at {}", path.display())
        })?;
        let reader = BufReader::new(file);
        let snapshot: MarketSnapshot =
            bincode::deserialize_from(reader).context("Snapshot decode failed")?;

        if snapshot.version != MARKET_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Market data snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                MARKET_SNAPSHOT_VERSION
            ));
        }
        Self::from_data(snapshot.data)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path).with_context(|| {
            format!(
                "Unable to create market data snapshot at {}",
                path.display()
            )
        })?;
        let mut writer = BufWriter::new(file);
        let snapshot = MarketSnapshot {
            version: MARKET_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            data: self.to_data(),
        };
        bincode::serialize_into(&mut writer, &snapshot)
            .context("Failed to serialize market data snapshot")?;
        writer
            .flush()
            .context("Failed to flush market data snapshot to disk")?;
        Ok(())
    }

    pub fn import_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open JSON market data at {}", path.display()))?;
        let data: SnapshotData = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Invalid JSON market data in {}", path.display()))?;
        Self::from_data(data)
    }

    fn to_data(&self) -> SnapshotData {
        let mut symbols = self.symbols();
        symbols.sort();
        let mut data = SnapshotData {
            floats: self.floats.clone(),
            sessions: self.sessions.iter().copied().collect(),
            ..SnapshotData::default()
        };
        for symbol in &symbols {
            if let Some(series) = self.bars.get(symbol) {
                data.bars.extend(series.iter().cloned());
            }
            if let Some(series) = self.quotes.get(symbol) {
                data.quotes.extend(series.iter().cloned());
            }
            if let Some(series) = self.trades.get(symbol) {
                data.trades.extend(series.iter().cloned());
            }
            if let Some(by_day) = self.tickers.get(symbol) {
                data.tickers.extend(by_day.values().cloned());
            }
        }
        data
    }

    /// Every symbol with bars or ticker metadata, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.symbol_days.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Days with recorded bars for `symbol`, i.e. the replayable sessions.
    pub fn session_days(&self, symbol: &str) -> Vec<NaiveDate> {
        let Some(series) = self.bars.get(symbol) else {
            return Vec::new();
        };
        let days: BTreeSet<NaiveDate> = series.iter().map(|bar| bar.timestamp.date_naive()).collect();
        days.into_iter().collect()
    }

    pub fn sessions(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.sessions.iter().copied()
    }

    fn day_bars(&self, symbol: &str, day: NaiveDate) -> &[Bar] {
        let Some(series) = self.bars.get(symbol) else {
            return &[];
        };
        let lo = series.partition_point(|bar| bar.timestamp.date_naive() < day);
        let hi = series.partition_point(|bar| bar.timestamp.date_naive() <= day);
        &series[lo..hi]
    }

    fn float_or_zero(&self, symbol: &str) -> u64 {
        self.floats.get(symbol).copied().unwrap_or(0)
    }
}

fn time_range<'a, T>(
    series: &'a [T],
    timestamp: impl Fn(&T) -> DateTime<Utc>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> &'a [T] {
    let lo = series.partition_point(|item| timestamp(item) < start);
    let hi = series.partition_point(|item| timestamp(item) < end);
    if lo >= hi {
        &[]
    } else {
        &series[lo..hi]
    }
}

fn range_label(kind: &str, symbol: &str, start: DateTime<Utc>, duration: Duration) -> String {
    format!(
        "{} {} from {} to {}",
        symbol,
        kind,
        start.format("%Y-%m-%d %H:%M"),
        (start + duration).format("%Y-%m-%d %H:%M")
    )
}

impl HistoricalMarketData for SnapshotStore {
    fn was_market_open(&self, day: NaiveDate) -> TradingResult<bool> {
        Ok(self.sessions.contains(&day))
    }

    fn historical_bars(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        duration: Duration,
        bucket: BucketSize,
    ) -> TradingResult<BarSeries> {
        let series = self.bars.get(symbol).map(Vec::as_slice).unwrap_or(&[]);
        let slice = time_range(series, |bar| bar.timestamp, start, start + duration);
        if slice.is_empty() {
            return Err(TradingError::no_data(range_label(
                "bars", symbol, start, duration,
            )));
        }
        Ok(match bucket {
            BucketSize::Minute => slice.to_vec(),
            coarser => aggregate_bars(slice, coarser),
        })
    }

    fn historical_quotes(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        duration: Duration,
    ) -> TradingResult<Vec<Quote>> {
        let series = self.quotes.get(symbol).map(Vec::as_slice).unwrap_or(&[]);
        let slice = time_range(series, |quote| quote.timestamp, start, start + duration);
        if slice.is_empty() {
            return Err(TradingError::no_data(range_label(
                "quotes", symbol, start, duration,
            )));
        }
        Ok(slice.to_vec())
    }

    fn historical_trades(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        duration: Duration,
    ) -> TradingResult<Vec<TradeTick>> {
        let series = self.trades.get(symbol).map(Vec::as_slice).unwrap_or(&[]);
        let slice = time_range(series, |trade| trade.timestamp, start, start + duration);
        if slice.is_empty() {
            return Err(TradingError::no_data(range_label(
                "trades", symbol, start, duration,
            )));
        }
        Ok(slice.to_vec())
    }
}

impl SymbolData for SnapshotStore {
    fn ticker_symbols(&self, day: Option<NaiveDate>) -> TradingResult<Vec<String>> {
        let Some(day) = day else {
            return Ok(self.symbols());
        };
        if !self.sessions.contains(&day) {
            return Err(TradingError::no_data(format!("session on {}", day)));
        }
        let mut symbols: Vec<String> = self
            .symbol_days
            .iter()
            .filter(|(_, days)| days.contains(&day))
            .map(|(symbol, _)| symbol.clone())
            .collect();
        symbols.sort();
        Ok(symbols)
    }

    fn has_session(&self, day: NaiveDate) -> TradingResult<bool> {
        Ok(self.sessions.contains(&day))
    }

    fn float_shares(&self, symbol: &str) -> TradingResult<Option<u64>> {
        if let Some(shares) = self.floats.get(symbol) {
            return Ok(Some(*shares));
        }
        Ok(self
            .tickers
            .get(symbol)
            .and_then(|by_day| by_day.values().rev().map(|meta| meta.float_shares).find(|f| *f > 0)))
    }

    fn ticker(&self, symbol: &str) -> TradingResult<TickerMeta> {
        let latest_meta = self
            .tickers
            .get(symbol)
            .and_then(|by_day| by_day.keys().next_back().copied());
        let latest_bar = self
            .bars
            .get(symbol)
            .and_then(|series| series.last())
            .map(|bar| bar.timestamp.date_naive());
        match latest_meta.max(latest_bar) {
            Some(day) => self.historical_ticker(symbol, day),
            None => Err(TradingError::no_data(format!("ticker {}", symbol))),
        }
    }

    fn historical_ticker(&self, symbol: &str, day: NaiveDate) -> TradingResult<TickerMeta> {
        if let Some(meta) = self.tickers.get(symbol).and_then(|by_day| by_day.get(&day)) {
            let mut meta = meta.clone();
            if meta.float_shares == 0 {
                meta.float_shares = self.float_or_zero(symbol);
            }
            return Ok(meta);
        }

        let bars = self.day_bars(symbol, day);
        let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
            return Err(TradingError::no_data(format!("ticker {} on {}", symbol, day)));
        };
        Ok(TickerMeta::new(
            symbol,
            day,
            self.float_or_zero(symbol),
            last.close,
            first.open,
        ))
    }
}
