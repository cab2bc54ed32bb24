use crate::candle_utils::normalize_ticker_symbol;
use crate::filter::{
    ChangeSinceOpenFilter, FloatFilter, Interval, PriceChangeFilter, PriceFilter, TickerFilter,
};
use crate::models::BucketSize;
use crate::simulated::{BottomDetector, NoBottoms, TrailingLow};
use crate::symbols::SymbolData;
use crate::ticker::ScreeningFetcher;
use anyhow::{anyhow, Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
const DEFAULT_STORAGE_LOCATION: &str = "data/market-data.bin";

/// Application settings loaded from `config.json` plus environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub alpaca_key: String,
    pub alpaca_secret: String,
    pub paper: bool,
    pub storage_location: PathBuf,
    pub alpaca_trading_url: Option<String>,
    pub alpaca_data_url: Option<String>,
    pub screener: ScreenerConfig,
    pub simulation: SimulationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            alpaca_key: String::new(),
            alpaca_secret: String::new(),
            paper: true,
            storage_location: PathBuf::from(DEFAULT_STORAGE_LOCATION),
            alpaca_trading_url: None,
            alpaca_data_url: None,
            screener: ScreenerConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads `path`, or `config.json` when present, then applies the
    /// `ALPACA_*` and `STORAGE_LOCATION` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Config JSON decode failed")
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(key) = lookup("ALPACA_KEY") {
            self.alpaca_key = key;
        }
        if let Some(secret) = lookup("ALPACA_SECRET") {
            self.alpaca_secret = secret;
        }
        if let Some(raw) = lookup("ALPACA_PAPER") {
            self.paper = parse_flag("ALPACA_PAPER", &raw)?;
        }
        if let Some(location) = lookup("STORAGE_LOCATION") {
            self.storage_location = PathBuf::from(location);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.screener.validate()?;
        self.simulation.validate()
    }

    /// Credentials are only required by commands that talk to the broker.
    pub fn require_credentials(&self) -> Result<(&str, &str)> {
        if self.alpaca_key.trim().is_empty() || self.alpaca_secret.trim().is_empty() {
            return Err(anyhow!(
                "Missing required setting alpaca_key/alpaca_secret (set them in {} or ALPACA_KEY/ALPACA_SECRET)",
                DEFAULT_CONFIG_FILE
            ));
        }
        Ok((self.alpaca_key.as_str(), self.alpaca_secret.as_str()))
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
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

fn require_min<T: PartialOrd + std::fmt::Display>(key: &str, value: T, min: T) -> Result<()> {
    if value < min {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            value
        ));
    }
    Ok(())
}

fn require_ordered<T: PartialOrd + std::fmt::Display + Copy>(
    min_key: &str,
    min: Option<T>,
    max_key: &str,
    max: Option<T>,
) -> Result<()> {
    if let (Some(min), Some(max)) = (min, max) {
        if max < min {
            return Err(anyhow!(
                "Setting {} ({}) must be >= {} ({})",
                max_key,
                max,
                min_key,
                min
            ));
        }
    }
    Ok(())
}

/// Screening options, turned into a filter chain by [`ScreenerConfig::build_filters`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenerConfig {
    /// Hard ceiling on tradable float.
    pub float_limit: Option<u64>,
    pub float_floor: Option<u64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    /// Change since open as a ratio (0.1 = +10%).
    pub min_change: Option<f64>,
    pub max_change: Option<f64>,
    pub blacklist: Vec<String>,
    /// One symbol per line, `#` starts a comment.
    pub blacklist_file: Option<PathBuf>,
    pub whitelist: Option<Vec<String>>,
    pub interval_secs: u64,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            float_limit: Some(10_000_000),
            float_floor: None,
            min_price: Some(1.0),
            max_price: None,
            min_change: None,
            max_change: None,
            blacklist: Vec::new(),
            blacklist_file: None,
            whitelist: None,
            interval_secs: 60,
        }
    }
}

impl ScreenerConfig {
    pub fn validate(&self) -> Result<()> {
        require_ordered(
            "float_floor",
            self.float_floor,
            "float_limit",
            self.float_limit,
        )?;
        require_ordered("min_price", self.min_price, "max_price", self.max_price)?;
        require_ordered("min_change", self.min_change, "max_change", self.max_change)?;
        if let Some(min_price) = self.min_price {
            require_min("min_price", min_price, 0.0)?;
        }
        require_min("interval_secs", self.interval_secs, 1)?;
        Ok(())
    }

    pub fn float_range(&self) -> Interval<u64> {
        Interval::new(self.float_floor, self.float_limit)
    }

    pub fn price_range(&self) -> Interval<f64> {
        Interval::new(self.min_price, self.max_price)
    }

    pub fn change_range(&self) -> Interval<f64> {
        Interval::new(self.min_change, self.max_change)
    }

    /// Ordered chain, cheapest first: the float check needs no lookup, the
    /// price and change checks share one metadata lookup.
    pub fn build_filters(&self, data: Arc<dyn SymbolData>) -> Vec<Box<dyn TickerFilter>> {
        let mut filters: Vec<Box<dyn TickerFilter>> = Vec::new();
        let float_range = self.float_range();
        if !float_range.is_unbounded() {
            filters.push(Box::new(FloatFilter::new(float_range)));
        }

        let price = self.price_range();
        let change = self.change_range();
        match (price.is_unbounded(), change.is_unbounded()) {
            (false, false) => filters.push(Box::new(PriceChangeFilter::new(data, price, change))),
            (false, true) => filters.push(Box::new(PriceFilter::new(data, price))),
            (true, false) => filters.push(Box::new(ChangeSinceOpenFilter::new(data, change))),
            (true, true) => {}
        }
        filters
    }

    /// Inline blacklist merged with the blacklist file, normalized.
    pub fn load_blacklist(&self) -> Result<HashSet<String>> {
        let mut blacklist: HashSet<String> = self
            .blacklist
            .iter()
            .filter_map(|symbol| normalize_ticker_symbol(symbol))
            .collect();
        if let Some(path) = &self.blacklist_file {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Failed to read blacklist file {}", path.display()))?;
            for line in raw.lines() {
                let entry = line.split('#').next().unwrap_or_default();
                if let Some(symbol) = normalize_ticker_symbol(entry) {
                    blacklist.insert(symbol);
                }
            }
        }
        Ok(blacklist)
    }

    pub fn build_fetcher(&self, data: Arc<dyn SymbolData>) -> ScreeningFetcher {
        let filters = self.build_filters(Arc::clone(&data));
        let fetcher = ScreeningFetcher::new(data, filters);
        match &self.whitelist {
            Some(whitelist) => fetcher.with_whitelist(whitelist),
            None => fetcher,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub initial_cash: Decimal,
    /// Absolute price offset: buys fill at close + slippage, sells at
    /// close - slippage (never below zero).
    pub slippage: Decimal,
    /// Trailing window of the bottom detector; 0 disables bottom counting.
    pub bottom_window_minutes: u32,
    pub bucket: BucketSize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_cash: Decimal::from(1000),
            slippage: Decimal::ZERO,
            bottom_window_minutes: 15,
            bucket: BucketSize::Minute,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        require_min("initial_cash", self.initial_cash, Decimal::ZERO)?;
        require_min("slippage", self.slippage, Decimal::ZERO)?;
        Ok(())
    }

    pub fn bottom_detector(&self) -> Box<dyn BottomDetector> {
        if self.bottom_window_minutes == 0 {
            Box::new(NoBottoms)
        } else {
            Box::new(TrailingLow::minutes(i64::from(self.bottom_window_minutes)))
        }
    }
}
