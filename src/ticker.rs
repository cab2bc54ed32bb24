use crate::candle_utils::normalize_ticker_symbol;
use crate::error::{TradingError, TradingResult};
use crate::filter::{passes_all, TickerFilter};
use crate::models::Ticker;
use crate::symbols::SymbolData;
use chrono::NaiveDate;
use dashmap::DashMap;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

/// Produces tradable tickers for now or for a historical day.
pub trait TickerFetcher: Send + Sync {
    fn tickers(&self, blacklist: &HashSet<String>) -> TradingResult<Vec<Ticker>>;

    /// Fails with `NoData` when `day` has no recorded session.
    fn htickers(&self, day: NaiveDate, blacklist: &HashSet<String>) -> TradingResult<Vec<Ticker>>;

    /// Single-symbol verdict that agrees with the fetch methods: a symbol
    /// outside the configured universe fails even if every filter passes.
    fn check_filters(&self, symbol: &str, float_shares: u64, day: Option<NaiveDate>) -> bool;
}

/// Screens a [`SymbolData`] universe through an ordered filter chain.
///
/// Results are sorted by symbol. Blacklisted symbols never reach a filter.
/// Historical verdicts are memoized per day and symbol, so a later screen of
/// the same day only evaluates symbols it has not seen yet.
pub struct ScreeningFetcher {
    data: Arc<dyn SymbolData>,
    filters: Vec<Box<dyn TickerFilter>>,
    whitelist: Option<HashSet<String>>,
    show_progress: bool,
    day_cache: DashMap<(NaiveDate, String), Option<Ticker>>,
}

impl ScreeningFetcher {
    pub fn new(data: Arc<dyn SymbolData>, filters: Vec<Box<dyn TickerFilter>>) -> Self {
        Self {
            data,
            filters,
            whitelist: None,
            show_progress: false,
            day_cache: DashMap::new(),
        }
    }

    /// Restricts the universe to the given symbols.
    pub fn with_whitelist<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.whitelist = Some(
            symbols
                .into_iter()
                .filter_map(|symbol| normalize_ticker_symbol(symbol.as_ref()))
                .collect(),
        );
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn filter_names(&self) -> Vec<&str> {
        self.filters.iter().map(|filter| filter.name()).collect()
    }

    fn universe(
        &self,
        day: Option<NaiveDate>,
        blacklist: Option<&HashSet<String>>,
    ) -> TradingResult<Vec<String>> {
        let mut symbols: Vec<String> = self
            .data
            .ticker_symbols(day)?
            .iter()
            .filter_map(|symbol| normalize_ticker_symbol(symbol))
            .collect();
        symbols.sort();
        symbols.dedup();

        if let Some(whitelist) = &self.whitelist {
            symbols.retain(|symbol| whitelist.contains(symbol));
        }
        if let Some(blacklist) = blacklist {
            let before = symbols.len();
            symbols.retain(|symbol| !blacklist.contains(symbol));
            debug!("Blacklist removed {} symbols", before - symbols.len());
        }
        Ok(symbols)
    }

    /// Runs the chain over `symbols` in parallel, one verdict per symbol.
    fn evaluate(
        &self,
        symbols: &[String],
        day: Option<NaiveDate>,
    ) -> TradingResult<Vec<(String, Option<Ticker>)>> {
        let floats = self.data.floats(symbols)?;
        let progress = if self.show_progress {
            let pb = ProgressBar::new(symbols.len() as u64);
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            ) {
                pb.set_style(style.progress_chars("#>-"));
            }
            Some(pb)
        } else {
            None
        };

        let verdicts: Vec<(String, Option<Ticker>)> = symbols
            .par_iter()
            .map(|symbol| {
                if let Some(pb) = &progress {
                    pb.inc(1);
                }
                let verdict = floats
                    .get(symbol)
                    .copied()
                    .filter(|shares| *shares > 0)
                    .filter(|shares| passes_all(&self.filters, symbol, *shares, day))
                    .map(|shares| self.describe(symbol, shares, day));
                (symbol.clone(), verdict)
            })
            .collect();

        if let Some(pb) = progress {
            pb.finish_with_message("Screening completed");
        }
        Ok(verdicts)
    }

    fn screen(&self, symbols: &[String], day: Option<NaiveDate>) -> TradingResult<Vec<Ticker>> {
        let mut passed: Vec<Ticker> = self
            .evaluate(symbols, day)?
            .into_iter()
            .filter_map(|(_, verdict)| verdict)
            .collect();
        passed.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(passed)
    }

    fn describe(&self, symbol: &str, float_shares: u64, day: Option<NaiveDate>) -> Ticker {
        let meta = match day {
            Some(day) => self.data.historical_ticker(symbol, day),
            None => self.data.ticker(symbol),
        };
        match meta {
            Ok(meta) => Ticker::from_meta(&meta, float_shares),
            Err(err) => {
                debug!("No price metadata for {}: {}", symbol, err);
                Ticker {
                    symbol: symbol.to_string(),
                    float_shares,
                    current_price: 0.0,
                    change_since_open: 0.0,
                }
            }
        }
    }
}

impl TickerFetcher for ScreeningFetcher {
    fn tickers(&self, blacklist: &HashSet<String>) -> TradingResult<Vec<Ticker>> {
        let symbols = self.universe(None, Some(blacklist))?;
        let passed = self.screen(&symbols, None)?;
        info!(
            "Screened {} symbols against a blacklist of {}, {} passed",
            symbols.len(),
            blacklist.len(),
            passed.len()
        );
        Ok(passed)
    }

    fn htickers(&self, day: NaiveDate, blacklist: &HashSet<String>) -> TradingResult<Vec<Ticker>> {
        if !self.data.has_session(day)? {
            return Err(TradingError::no_data(format!("session on {}", day)));
        }

        let symbols = self.universe(Some(day), Some(blacklist))?;
        let pending: Vec<String> = symbols
            .iter()
            .filter(|symbol| !self.day_cache.contains_key(&(day, (*symbol).clone())))
            .cloned()
            .collect();
        if !pending.is_empty() {
            let verdicts = self.evaluate(&pending, Some(day))?;
            info!(
                "Screened {} new symbols for {}, {} passed",
                pending.len(),
                day,
                verdicts.iter().filter(|(_, verdict)| verdict.is_some()).count()
            );
            for (symbol, verdict) in verdicts {
                self.day_cache.insert((day, symbol), verdict);
            }
        }

        Ok(symbols
            .into_iter()
            .filter_map(|symbol| {
                self.day_cache
                    .get(&(day, symbol))
                    .and_then(|hit| hit.value().clone())
            })
            .collect())
    }

    fn check_filters(&self, symbol: &str, float_shares: u64, day: Option<NaiveDate>) -> bool {
        if let Some(whitelist) = &self.whitelist {
            let listed = normalize_ticker_symbol(symbol)
                .map_or(false, |symbol| whitelist.contains(&symbol));
            if !listed {
                debug!("{} is not on the whitelist", symbol);
                return false;
            }
        }
        passes_all(&self.filters, symbol, float_shares, day)
    }
}
