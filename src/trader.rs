use crate::error::{TradingError, TradingResult};
use crate::models::{Bar, BucketSize, Position, Quote, TradeTick};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;

pub type BarSeries = Vec<Bar>;

/// Read-only source of historical market data.
///
/// Ranges are half-open: `[start, start + duration)`. Days inside a range
/// without a session are skipped; a range with no data at all fails with
/// [`TradingError::NoData`]. Implementations must be safe to share across
/// threads since screening and replay fan out over symbols.
pub trait HistoricalMarketData: Send + Sync {
    fn was_market_open(&self, day: NaiveDate) -> TradingResult<bool>;

    fn historical_bars(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        duration: Duration,
        bucket: BucketSize,
    ) -> TradingResult<BarSeries>;

    fn historical_quotes(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        duration: Duration,
    ) -> TradingResult<Vec<Quote>>;

    fn historical_trades(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        duration: Duration,
    ) -> TradingResult<Vec<TradeTick>>;
}

/// Account state and order entry for one bound symbol, live or simulated.
///
/// Instances are driven by a single decision loop; none of the
/// implementations lock internally.
pub trait Trader {
    fn symbol(&self) -> &str;

    fn balance(&self) -> TradingResult<Decimal>;

    fn shares(&self) -> TradingResult<u64>;

    fn position(&self) -> TradingResult<Position>;

    /// Fails with `InsufficientFunds` when `count * price` exceeds the balance.
    fn buy(&mut self, count: u64, price: Decimal) -> TradingResult<()>;

    /// Fails with `InsufficientShares` when `count` exceeds the owned shares.
    fn sell(&mut self, count: u64, price: Decimal) -> TradingResult<()>;

    fn cancel_all(&mut self) -> TradingResult<()>;

    /// Records an explicit decision to do nothing.
    fn hold(&mut self) {}

    fn hbars(
        &self,
        start: DateTime<Utc>,
        duration: Duration,
        bucket: BucketSize,
    ) -> TradingResult<BarSeries>;

    fn bars(&self, bucket: BucketSize) -> TradingResult<BarSeries>;

    fn hquotes(&self, start: DateTime<Utc>, duration: Duration) -> TradingResult<Vec<Quote>>;

    fn quotes(&self) -> TradingResult<Vec<Quote>>;

    fn htrades(&self, start: DateTime<Utc>, duration: Duration)
        -> TradingResult<Vec<TradeTick>>;

    fn trades(&self) -> TradingResult<Vec<TradeTick>>;
}

/// Shape checks shared by every trader before any bookkeeping happens.
pub fn validate_order(count: u64, price: Decimal) -> TradingResult<()> {
    if count == 0 {
        return Err(TradingError::InvalidOrder(
            "share count must be > 0 (value: 0)".to_string(),
        ));
    }
    if price < Decimal::ZERO {
        return Err(TradingError::InvalidOrder(format!(
            "price must be >= 0 (value: {})",
            price
        )));
    }
    Ok(())
}

/// Value of `count` shares at `price`, rejecting values `Decimal` cannot hold.
pub fn order_value(count: u64, price: Decimal) -> TradingResult<Decimal> {
    price.checked_mul(Decimal::from(count)).ok_or_else(|| {
        TradingError::InvalidOrder(format!("order value overflows ({} x {})", count, price))
    })
}

/// Start of the UTC day containing `at`, the session origin used by replay.
pub fn session_start(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn validate_order_rejects_zero_count_and_negative_price() {
        assert!(validate_order(1, Decimal::ZERO).is_ok());
        assert!(matches!(
            validate_order(0, Decimal::from(5)),
            Err(TradingError::InvalidOrder(_))
        ));
        assert!(matches!(
            validate_order(3, Decimal::from(-1)),
            Err(TradingError::InvalidOrder(_))
        ));
    }

    #[test]
    fn order_value_multiplies_exactly() {
        let price = Decimal::new(1234, 2);
        assert_eq!(order_value(3, price).unwrap(), Decimal::new(3702, 2));
        assert!(order_value(u64::MAX, Decimal::MAX).is_err());
    }

    #[test]
    fn session_start_truncates_to_midnight_utc() {
        let at = Utc.with_ymd_and_hms(2024, 3, 4, 15, 42, 7).unwrap();
        assert_eq!(
            session_start(at),
            Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap()
        );
    }
}
