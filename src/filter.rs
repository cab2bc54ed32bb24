use crate::models::TickerMeta;
use crate::symbols::SymbolData;
use chrono::NaiveDate;
use log::debug;
use std::fmt;
use std::sync::Arc;

/// Eligibility predicate over one candidate symbol.
pub trait TickerFilter: Send + Sync {
    fn name(&self) -> &str;

    fn passes(&self, symbol: &str, float_shares: u64, day: Option<NaiveDate>) -> bool;
}

/// Combined decision of an ordered chain; stops at the first failing filter.
pub fn passes_all(
    filters: &[Box<dyn TickerFilter>],
    symbol: &str,
    float_shares: u64,
    day: Option<NaiveDate>,
) -> bool {
    filters.iter().all(|filter| {
        let passed = filter.passes(symbol, float_shares, day);
        if !passed {
            debug!("{} rejected by {}", symbol, filter.name());
        }
        passed
    })
}

/// Inclusive range with optional bounds; a missing bound is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Interval<T> {
    pub min: Option<T>,
    pub max: Option<T>,
}

impl<T: PartialOrd + Copy> Interval<T> {
    pub fn new(min: Option<T>, max: Option<T>) -> Self {
        Self { min, max }
    }

    pub fn unbounded() -> Self {
        Self {
            min: None,
            max: None,
        }
    }

    pub fn at_least(min: T) -> Self {
        Self::new(Some(min), None)
    }

    pub fn at_most(max: T) -> Self {
        Self::new(None, Some(max))
    }

    pub fn between(min: T, max: T) -> Self {
        Self::new(Some(min), Some(max))
    }

    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    pub fn contains(&self, value: T) -> bool {
        if let Some(min) = self.min {
            if value < min {
                return false;
            }
        }
        if let Some(max) = self.max {
            if value > max {
                return false;
            }
        }
        true
    }
}

impl<T: fmt::Display> fmt::Display for Interval<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.min, &self.max) {
            (Some(min), Some(max)) => write!(f, "[{}, {}]", min, max),
            (Some(min), None) => write!(f, ">= {}", min),
            (None, Some(max)) => write!(f, "<= {}", max),
            (None, None) => f.write_str("any"),
        }
    }
}

/// Restricts the tradable float, typically to a hard ceiling.
pub struct FloatFilter {
    range: Interval<u64>,
    name: String,
}

impl FloatFilter {
    pub fn new(range: Interval<u64>) -> Self {
        Self {
            name: format!("float {}", range),
            range,
        }
    }

    pub fn at_most(limit: u64) -> Self {
        Self::new(Interval::at_most(limit))
    }
}

impl TickerFilter for FloatFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn passes(&self, _symbol: &str, float_shares: u64, _day: Option<NaiveDate>) -> bool {
        self.range.contains(float_shares)
    }
}

fn lookup_meta(
    data: &dyn SymbolData,
    filter: &str,
    symbol: &str,
    day: Option<NaiveDate>,
) -> Option<TickerMeta> {
    let result = match day {
        Some(day) => data.historical_ticker(symbol, day),
        None => data.ticker(symbol),
    };
    match result {
        Ok(meta) => Some(meta),
        Err(err) => {
            debug!("{}: metadata lookup for {} failed: {}", filter, symbol, err);
            None
        }
    }
}

pub struct PriceFilter {
    data: Arc<dyn SymbolData>,
    range: Interval<f64>,
    name: String,
}

impl PriceFilter {
    pub fn new(data: Arc<dyn SymbolData>, range: Interval<f64>) -> Self {
        Self {
            name: format!("price {}", range),
            data,
            range,
        }
    }
}

impl TickerFilter for PriceFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn passes(&self, symbol: &str, _float_shares: u64, day: Option<NaiveDate>) -> bool {
        lookup_meta(self.data.as_ref(), &self.name, symbol, day)
            .map_or(false, |meta| self.range.contains(meta.current_price))
    }
}

/// Change since the session open, expressed as a ratio (0.1 = +10%).
pub struct ChangeSinceOpenFilter {
    data: Arc<dyn SymbolData>,
    range: Interval<f64>,
    name: String,
}

impl ChangeSinceOpenFilter {
    pub fn new(data: Arc<dyn SymbolData>, range: Interval<f64>) -> Self {
        Self {
            name: format!("change since open {}", range),
            data,
            range,
        }
    }
}

impl TickerFilter for ChangeSinceOpenFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn passes(&self, symbol: &str, _float_shares: u64, day: Option<NaiveDate>) -> bool {
        lookup_meta(self.data.as_ref(), &self.name, symbol, day)
            .map_or(false, |meta| self.range.contains(meta.change_since_open))
    }
}

/// Price and change thresholds checked against a single metadata lookup.
pub struct PriceChangeFilter {
    data: Arc<dyn SymbolData>,
    price: Interval<f64>,
    change: Interval<f64>,
    name: String,
}

impl PriceChangeFilter {
    pub fn new(data: Arc<dyn SymbolData>, price: Interval<f64>, change: Interval<f64>) -> Self {
        Self {
            name: format!("price {} and change {}", price, change),
            data,
            price,
            change,
        }
    }
}

impl TickerFilter for PriceChangeFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn passes(&self, symbol: &str, _float_shares: u64, day: Option<NaiveDate>) -> bool {
        lookup_meta(self.data.as_ref(), &self.name, symbol, day).map_or(false, |meta| {
            self.price.contains(meta.current_price) && self.change.contains(meta.change_since_open)
        })
    }
}
