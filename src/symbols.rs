use crate::error::TradingResult;
use crate::models::TickerMeta;
use chrono::NaiveDate;
use dashmap::DashMap;
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

/// Ticker metadata provider consulted by filters and fetchers.
pub trait SymbolData: Send + Sync {
    /// Tradable universe, either as of now or as of `day`.
    fn ticker_symbols(&self, day: Option<NaiveDate>) -> TradingResult<Vec<String>>;

    fn has_session(&self, day: NaiveDate) -> TradingResult<bool>;

    /// `None` when the provider has no float on record for `symbol`.
    fn float_shares(&self, symbol: &str) -> TradingResult<Option<u64>>;

    fn floats(&self, symbols: &[String]) -> TradingResult<HashMap<String, u64>> {
        let mut result = HashMap::with_capacity(symbols.len());
        for symbol in symbols {
            if let Some(shares) = self.float_shares(symbol)? {
                result.insert(symbol.clone(), shares);
            }
        }
        Ok(result)
    }

    /// Latest known metadata for `symbol`.
    fn ticker(&self, symbol: &str) -> TradingResult<TickerMeta>;

    /// Metadata as of `day`; `NoData` when nothing was recorded.
    fn historical_ticker(&self, symbol: &str, day: NaiveDate) -> TradingResult<TickerMeta>;
}

impl<T: SymbolData + ?Sized> SymbolData for Arc<T> {
    fn ticker_symbols(&self, day: Option<NaiveDate>) -> TradingResult<Vec<String>> {
        (**self).ticker_symbols(day)
    }

    fn has_session(&self, day: NaiveDate) -> TradingResult<bool> {
        (**self).has_session(day)
    }

    fn float_shares(&self, symbol: &str) -> TradingResult<Option<u64>> {
        (**self).float_shares(symbol)
    }

    fn floats(&self, symbols: &[String]) -> TradingResult<HashMap<String, u64>> {
        (**self).floats(symbols)
    }

    fn ticker(&self, symbol: &str) -> TradingResult<TickerMeta> {
        (**self).ticker(symbol)
    }

    fn historical_ticker(&self, symbol: &str, day: NaiveDate) -> TradingResult<TickerMeta> {
        (**self).historical_ticker(symbol, day)
    }
}

/// Memoizes float lookups of an inner provider. Floats are treated as
/// constant for the lifetime of the cache, misses included.
pub struct CachedSymbolData<S: SymbolData> {
    inner: S,
    floats: DashMap<String, Option<u64>>,
}

impl<S: SymbolData> CachedSymbolData<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            floats: DashMap::new(),
        }
    }

    pub fn cached_floats(&self) -> usize {
        self.floats.len()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: SymbolData> SymbolData for CachedSymbolData<S> {
    fn ticker_symbols(&self, day: Option<NaiveDate>) -> TradingResult<Vec<String>> {
        self.inner.ticker_symbols(day)
    }

    fn has_session(&self, day: NaiveDate) -> TradingResult<bool> {
        self.inner.has_session(day)
    }

    fn float_shares(&self, symbol: &str) -> TradingResult<Option<u64>> {
        if let Some(hit) = self.floats.get(symbol) {
            return Ok(*hit);
        }
        let fetched = self.inner.float_shares(symbol)?;
        debug!("Cached float for {}: {:?}", symbol, fetched);
        self.floats.insert(symbol.to_string(), fetched);
        Ok(fetched)
    }

    fn floats(&self, symbols: &[String]) -> TradingResult<HashMap<String, u64>> {
        let missing: Vec<String> = symbols
            .iter()
            .filter(|symbol| !self.floats.contains_key(symbol.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            let fetched = self.inner.floats(&missing)?;
            for symbol in missing {
                let shares = fetched.get(&symbol).copied();
                self.floats.insert(symbol, shares);
            }
        }
        Ok(symbols
            .iter()
            .filter_map(|symbol| {
                self.floats
                    .get(symbol.as_str())
                    .and_then(|entry| (*entry).map(|shares| (symbol.clone(), shares)))
            })
            .collect())
    }

    fn ticker(&self, symbol: &str) -> TradingResult<TickerMeta> {
        self.inner.ticker(symbol)
    }

    fn historical_ticker(&self, symbol: &str, day: NaiveDate) -> TradingResult<TickerMeta> {
        self.inner.historical_ticker(symbol, day)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TradingError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingFloats {
        lookups: AtomicUsize,
    }

    impl SymbolData for CountingFloats {
        fn ticker_symbols(&self, _day: Option<NaiveDate>) -> TradingResult<Vec<String>> {
            Ok(vec!["AAA".to_string(), "BBB".to_string()])
        }

        fn has_session(&self, _day: NaiveDate) -> TradingResult<bool> {
            Ok(true)
        }

        fn float_shares(&self, symbol: &str) -> TradingResult<Option<u64>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(match symbol {
                "AAA" => Some(1_000_000),
                _ => None,
            })
        }

        fn ticker(&self, symbol: &str) -> TradingResult<TickerMeta> {
            Err(TradingError::no_data(symbol))
        }

        fn historical_ticker(&self, symbol: &str, _day: NaiveDate) -> TradingResult<TickerMeta> {
            Err(TradingError::no_data(symbol))
        }
    }

    #[test]
    fn float_lookups_hit_the_provider_once() {
        let cached = CachedSymbolData::new(CountingFloats::default());
        assert_eq!(cached.float_shares("AAA").unwrap(), Some(1_000_000));
        assert_eq!(cached.float_shares("AAA").unwrap(), Some(1_000_000));
        assert_eq!(cached.float_shares("BBB").unwrap(), None);
        assert_eq!(cached.float_shares("BBB").unwrap(), None);
        assert_eq!(cached.inner().lookups.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn batch_floats_skip_cached_symbols() {
        let cached = CachedSymbolData::new(CountingFloats::default());
        cached.float_shares("AAA").unwrap();
        let symbols = vec!["AAA".to_string(), "BBB".to_string()];
        let floats = cached.floats(&symbols).unwrap();
        assert_eq!(floats.len(), 1);
        assert_eq!(floats.get("AAA"), Some(&1_000_000));
        assert_eq!(cached.inner().lookups.load(Ordering::SeqCst), 2);
        assert_eq!(cached.cached_floats(), 2);
    }
}
