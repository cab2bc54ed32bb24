use crate::config::AppConfig;
use crate::error::{TradingError, TradingResult};
use crate::models::{Bar, BucketSize, Position, Quote, TradeTick};
use crate::trader::{
    order_value, session_start, validate_order, BarSeries, HistoricalMarketData, Trader,
};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use log::{debug, info, warn};
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::de::{self, DeserializeOwned, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

pub const PAPER_TRADING_URL: &str = "https://paper-api.alpaca.markets";
pub const LIVE_TRADING_URL: &str = "https://api.alpaca.markets";
pub const MARKET_DATA_URL: &str = "https://data.alpaca.markets";
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_millis(350);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_LIMIT: &str = "10000";
const MAX_PAGES: usize = 100;

/// Connection settings for the broker and market-data APIs.
#[derive(Debug, Clone)]
pub struct AlpacaSettings {
    pub key: String,
    pub secret: String,
    pub trading_url: String,
    pub data_url: String,
    pub request_delay: Duration,
    pub timeout: Option<Duration>,
}

impl AlpacaSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let (key, secret) = config.require_credentials()?;
        let trading_url = resolve_url(
            config.alpaca_trading_url.as_deref(),
            if config.paper {
                PAPER_TRADING_URL
            } else {
                LIVE_TRADING_URL
            },
        );
        let data_url = resolve_url(config.alpaca_data_url.as_deref(), MARKET_DATA_URL);
        Ok(Self {
            key: key.trim().to_string(),
            secret: secret.trim().to_string(),
            trading_url,
            data_url,
            request_delay: DEFAULT_REQUEST_DELAY,
            timeout: Some(DEFAULT_TIMEOUT),
        })
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }
}

fn resolve_url(configured: Option<&str>, fallback: &str) -> String {
    configured
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(fallback)
        .trim_end_matches('/')
        .to_string()
}

/// Throttled blocking client for the trading and market-data endpoints.
pub struct AlpacaClient {
    http: Client,
    trading_url: String,
    data_url: String,
    headers: HeaderMap,
    request_delay: Duration,
}

impl AlpacaClient {
    pub fn new(settings: &AlpacaSettings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "APCA-API-KEY-ID",
            HeaderValue::from_str(&settings.key).context("invalid Alpaca API key")?,
        );
        headers.insert(
            "APCA-API-SECRET-KEY",
            HeaderValue::from_str(&settings.secret).context("invalid Alpaca API secret")?,
        );

        let mut builder = Client::builder();
        if let Some(timeout) = settings.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context("failed to build HTTP client")?;

        Ok(Self {
            http,
            trading_url: settings.trading_url.clone(),
            data_url: settings.data_url.clone(),
            headers,
            request_delay: settings.request_delay,
        })
    }

    fn throttle(&self) {
        if !self.request_delay.is_zero() {
            sleep(self.request_delay);
        }
    }

    fn get<T: DeserializeOwned>(&self, base: &str, path: &str, query: &[(&str, &str)]) -> Result<T> {
        self.throttle();
        let url = format!("{}{}", base, path);
        let response = self
            .http
            .get(&url)
            .headers(self.headers.clone())
            .query(query)
            .send()
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()
            .with_context(|| format!("GET {} returned error", url))?;
        response
            .json::<T>()
            .context("failed to parse Alpaca response")
    }

    fn get_optional<T: DeserializeOwned>(&self, base: &str, path: &str) -> Result<Option<T>> {
        self.throttle();
        let url = format!("{}{}", base, path);
        let response = self
            .http
            .get(&url)
            .headers(self.headers.clone())
            .send()
            .with_context(|| format!("request {} failed", path))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let payload = response
            .error_for_status()
            .with_context(|| format!("GET {} returned error", url))?
            .json::<T>()
            .context("failed to parse Alpaca response")?;
        Ok(Some(payload))
    }

    fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.throttle();
        let url = format!("{}{}", self.trading_url, path);
        let response = self
            .http
            .post(&url)
            .headers(self.headers.clone())
            .json(body)
            .send()
            .with_context(|| format!("POST {} failed", url))?
            .error_for_status()
            .with_context(|| format!("POST {} returned error", url))?;
        response
            .json::<T>()
            .context("failed to parse Alpaca response")
    }

    fn delete(&self, path: &str) -> Result<Response> {
        self.throttle();
        let url = format!("{}{}", self.trading_url, path);
        self.http
            .delete(&url)
            .headers(self.headers.clone())
            .send()
            .with_context(|| format!("DELETE {} failed", url))?
            .error_for_status()
            .with_context(|| format!("DELETE {} returned error", url))
    }

    /// Follows `next_page_token` until the provider stops returning one.
    fn paginate<P, T, F>(&self, path: &str, base_query: &[(&str, &str)], split: F) -> Result<Vec<T>>
    where
        P: DeserializeOwned,
        F: Fn(P) -> (Vec<T>, Option<String>),
    {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page: P = {
                let mut query: Vec<(&str, &str)> = base_query.to_vec();
                query.push(("limit", PAGE_LIMIT));
                if let Some(token) = page_token.as_deref() {
                    query.push(("page_token", token));
                }
                self.get(&self.data_url, path, &query)?
            };
            let (entries, next) = split(page);
            items.extend(entries);

            match next.filter(|token| !token.trim().is_empty()) {
                Some(token) => page_token = Some(token),
                None => return Ok(items),
            }
        }

        warn!("Stopped paging {} after {} pages", path, MAX_PAGES);
        Ok(items)
    }

    pub fn account_cash(&self) -> Result<Decimal> {
        let account: AlpacaAccount = self.get(&self.trading_url, "/v2/account", &[])?;
        Ok(account.cash.unwrap_or(Decimal::ZERO).max(Decimal::ZERO))
    }

    pub fn position(&self, symbol: &str) -> Result<Position> {
        let path = format!("/v2/positions/{}", symbol);
        let Some(entry) = self.get_optional::<AlpacaPosition>(&self.trading_url, &path)? else {
            return Ok(Position::flat());
        };

        let qty = entry.qty.unwrap_or(Decimal::ZERO);
        let is_short = entry
            .side
            .as_deref()
            .map_or(false, |side| side.trim().eq_ignore_ascii_case("short"));
        if is_short || qty <= Decimal::ZERO {
            if is_short {
                warn!("Ignoring short position in {} ({} shares)", symbol, qty);
            }
            return Ok(Position::flat());
        }

        let shares_owned = qty.trunc().to_u64().unwrap_or(0);
        if shares_owned == 0 {
            return Ok(Position::flat());
        }
        Ok(Position {
            shares_owned,
            average_cost: entry.avg_entry_price,
        })
    }

    fn submit_order(&self, symbol: &str, side: &str, count: u64, price: Decimal) -> Result<()> {
        let limit_price = limit_price(price);
        let request = OrderRequest {
            symbol,
            qty: count.to_string(),
            side,
            order_type: "limit",
            time_in_force: "ioc",
            limit_price: limit_price.to_string(),
            client_order_id: uuid::Uuid::new_v4().to_string(),
        };
        let order: AlpacaOrder = self.post_json("/v2/orders", &request)?;
        let status = order.normalized_status();
        if is_cancel_status(&status) {
            warn!(
                "Alpaca {} order for {} x {} @ {} ended as {}",
                side, count, symbol, limit_price, status
            );
        } else {
            info!(
                "Submitted {} order {} for {} x {} @ {} ({})",
                side,
                order.id.as_deref().unwrap_or(&request.client_order_id),
                count,
                symbol,
                limit_price,
                status
            );
        }
        Ok(())
    }

    pub fn cancel_all_orders(&self) -> Result<usize> {
        let response = self.delete("/v2/orders")?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(0);
        }
        let cancelled = response
            .json::<Vec<serde_json::Value>>()
            .map(|entries| entries.len())
            .unwrap_or(0);
        Ok(cancelled)
    }
}

impl HistoricalMarketData for AlpacaClient {
    fn was_market_open(&self, day: NaiveDate) -> TradingResult<bool> {
        let date = day.format("%Y-%m-%d").to_string();
        let sessions: Vec<CalendarDay> = self.get(
            &self.trading_url,
            "/v2/calendar",
            &[("start", date.as_str()), ("end", date.as_str())],
        )?;
        Ok(sessions.iter().any(|session| session.date == day))
    }

    fn historical_bars(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        duration: chrono::Duration,
        bucket: BucketSize,
    ) -> TradingResult<BarSeries> {
        let symbol = normalize_symbol(Some(symbol))
            .ok_or_else(|| TradingError::InvalidOrder("symbol must not be empty".to_string()))?;
        let end = start + duration;
        let (start_raw, end_raw) = (format_time(start), format_time(end));
        let path = format!("/v2/stocks/{}/bars", symbol);
        let bars = self.paginate(
            &path,
            &[
                ("timeframe", bucket.alpaca_timeframe()),
                ("start", start_raw.as_str()),
                ("end", end_raw.as_str()),
            ],
            |page: BarsPage| (page.bars.unwrap_or_default(), page.next_page_token),
        )?;

        let series: BarSeries = bars
            .into_iter()
            .filter(|bar| bar.t >= start && bar.t < end)
            .map(|bar| Bar {
                symbol: symbol.clone(),
                timestamp: bar.t,
                open: bar.o,
                high: bar.h,
                low: bar.l,
                close: bar.c,
                volume: bar.v,
            })
            .collect();
        debug!("Fetched {} {} bars for {}", series.len(), bucket.alpaca_timeframe(), symbol);
        non_empty(series, || format!("{} bars from {} to {}", symbol, start, end))
    }

    fn historical_quotes(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        duration: chrono::Duration,
    ) -> TradingResult<Vec<Quote>> {
        let symbol = normalize_symbol(Some(symbol))
            .ok_or_else(|| TradingError::InvalidOrder("symbol must not be empty".to_string()))?;
        let end = start + duration;
        let (start_raw, end_raw) = (format_time(start), format_time(end));
        let path = format!("/v2/stocks/{}/quotes", symbol);
        let quotes = self.paginate(
            &path,
            &[("start", start_raw.as_str()), ("end", end_raw.as_str())],
            |page: QuotesPage| (page.quotes.unwrap_or_default(), page.next_page_token),
        )?;

        let quotes: Vec<Quote> = quotes
            .into_iter()
            .filter(|quote| quote.t >= start && quote.t < end)
            .map(|quote| Quote {
                symbol: symbol.clone(),
                timestamp: quote.t,
                ask_exchange: quote.ax,
                ask_size: quote.ask_size,
                ask_price: quote.ap,
                bid_exchange: quote.bx,
                bid_size: quote.bs,
                bid_price: quote.bp,
            })
            .collect();
        non_empty(quotes, || format!("{} quotes from {} to {}", symbol, start, end))
    }

    fn historical_trades(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        duration: chrono::Duration,
    ) -> TradingResult<Vec<TradeTick>> {
        let symbol = normalize_symbol(Some(symbol))
            .ok_or_else(|| TradingError::InvalidOrder("symbol must not be empty".to_string()))?;
        let end = start + duration;
        let (start_raw, end_raw) = (format_time(start), format_time(end));
        let path = format!("/v2/stocks/{}/trades", symbol);
        let trades = self.paginate(
            &path,
            &[("start", start_raw.as_str()), ("end", end_raw.as_str())],
            |page: TradesPage| (page.trades.unwrap_or_default(), page.next_page_token),
        )?;

        let trades: Vec<TradeTick> = trades
            .into_iter()
            .filter(|trade| trade.t >= start && trade.t < end)
            .map(|trade| TradeTick {
                symbol: symbol.clone(),
                timestamp: trade.t,
                exchange: trade.x,
                size: trade.s,
                price: trade.p,
            })
            .collect();
        non_empty(trades, || format!("{} trades from {} to {}", symbol, start, end))
    }
}

/// Live trader bound to one symbol. Orders are limit IOC, so a partial fill
/// leaves the remainder cancelled by the broker.
pub struct AlpacaTrader {
    client: Arc<AlpacaClient>,
    symbol: String,
}

impl AlpacaTrader {
    pub fn new(client: Arc<AlpacaClient>, symbol: &str) -> TradingResult<Self> {
        let symbol = normalize_symbol(Some(symbol))
            .ok_or_else(|| TradingError::InvalidOrder("symbol must not be empty".to_string()))?;
        Ok(Self { client, symbol })
    }

    pub fn client(&self) -> &AlpacaClient {
        &self.client
    }

    fn reject(&self, err: TradingError) -> TradingResult<()> {
        warn!("{}: order rejected: {}", self.symbol, err);
        Err(err)
    }

    fn session_range(&self) -> (DateTime<Utc>, chrono::Duration) {
        let now = Utc::now();
        let start = session_start(now);
        (start, now - start)
    }
}

impl Trader for AlpacaTrader {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn balance(&self) -> TradingResult<Decimal> {
        Ok(self.client.account_cash()?)
    }

    fn shares(&self) -> TradingResult<u64> {
        Ok(self.position()?.shares_owned)
    }

    fn position(&self) -> TradingResult<Position> {
        Ok(self.client.position(&self.symbol)?)
    }

    fn buy(&mut self, count: u64, price: Decimal) -> TradingResult<()> {
        validate_order(count, price)?;
        let required = order_value(count, price)?;
        let available = self.balance()?;
        if required > available {
            return self.reject(TradingError::InsufficientFunds {
                required,
                available,
            });
        }
        self.client.submit_order(&self.symbol, "buy", count, price)?;
        Ok(())
    }

    fn sell(&mut self, count: u64, price: Decimal) -> TradingResult<()> {
        validate_order(count, price)?;
        let owned = self.shares()?;
        if count > owned {
            return self.reject(TradingError::InsufficientShares {
                requested: count,
                owned,
            });
        }
        self.client.submit_order(&self.symbol, "sell", count, price)?;
        Ok(())
    }

    fn cancel_all(&mut self) -> TradingResult<()> {
        let cancelled = self.client.cancel_all_orders()?;
        info!("Cancelled {} open orders", cancelled);
        Ok(())
    }

    fn hbars(
        &self,
        start: DateTime<Utc>,
        duration: chrono::Duration,
        bucket: BucketSize,
    ) -> TradingResult<BarSeries> {
        self.client
            .historical_bars(&self.symbol, start, duration, bucket)
    }

    fn bars(&self, bucket: BucketSize) -> TradingResult<BarSeries> {
        let (start, duration) = self.session_range();
        self.hbars(start, duration, bucket)
    }

    fn hquotes(&self, start: DateTime<Utc>, duration: chrono::Duration) -> TradingResult<Vec<Quote>> {
        self.client.historical_quotes(&self.symbol, start, duration)
    }

    fn quotes(&self) -> TradingResult<Vec<Quote>> {
        let (start, duration) = self.session_range();
        self.hquotes(start, duration)
    }

    fn htrades(
        &self,
        start: DateTime<Utc>,
        duration: chrono::Duration,
    ) -> TradingResult<Vec<TradeTick>> {
        self.client.historical_trades(&self.symbol, start, duration)
    }

    fn trades(&self) -> TradingResult<Vec<TradeTick>> {
        let (start, duration) = self.session_range();
        self.htrades(start, duration)
    }
}

fn non_empty<T>(items: Vec<T>, scope: impl FnOnce() -> String) -> TradingResult<Vec<T>> {
    if items.is_empty() {
        return Err(TradingError::no_data(scope()));
    }
    Ok(items)
}

fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Alpaca accepts two decimals at or above $1 and four below.
fn limit_price(price: Decimal) -> Decimal {
    let places = if price >= Decimal::ONE { 2 } else { 4 };
    price.round_dp(places)
}

#[derive(Debug, Serialize)]
struct OrderRequest<'a> {
    symbol: &'a str,
    qty: String,
    side: &'a str,
    #[serde(rename = "type")]
    order_type: &'a str,
    time_in_force: &'a str,
    limit_price: String,
    client_order_id: String,
}

#[derive(Debug, Deserialize)]
struct AlpacaAccount {
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    cash: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct AlpacaPosition {
    #[serde(default)]
    side: Option<String>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    qty: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    avg_entry_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct AlpacaOrder {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl AlpacaOrder {
    fn normalized_status(&self) -> String {
        self.status
            .as_deref()
            .unwrap_or("unknown")
            .trim()
            .to_lowercase()
    }
}

#[derive(Debug, Deserialize)]
struct CalendarDay {
    date: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct BarsPage {
    #[serde(default)]
    bars: Option<Vec<AlpacaBar>>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaBar {
    t: DateTime<Utc>,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    #[serde(default)]
    v: u64,
}

#[derive(Debug, Deserialize)]
struct QuotesPage {
    #[serde(default)]
    quotes: Option<Vec<AlpacaQuote>>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaQuote {
    t: DateTime<Utc>,
    #[serde(default)]
    ax: String,
    #[serde(default)]
    ap: f64,
    #[serde(rename = "as", default)]
    ask_size: u64,
    #[serde(default)]
    bx: String,
    #[serde(default)]
    bp: f64,
    #[serde(default)]
    bs: u64,
}

#[derive(Debug, Deserialize)]
struct TradesPage {
    #[serde(default)]
    trades: Option<Vec<AlpacaTrade>>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaTrade {
    t: DateTime<Utc>,
    #[serde(default)]
    x: String,
    p: f64,
    #[serde(default)]
    s: u64,
}

fn deserialize_decimal_opt<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    struct DecimalOptVisitor;

    impl<'de> Visitor<'de> for DecimalOptVisitor {
        type Value = Option<Decimal>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a number or numeric string")
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Decimal::from_f64(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Decimal::from(value)))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Decimal::from(value)))
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Decimal::from_str(value.trim()).ok())
        }
    }

    deserializer.deserialize_any(DecimalOptVisitor)
}

fn normalize_symbol(value: Option<&str>) -> Option<String> {
    value
        .map(|symbol| symbol.trim().to_uppercase())
        .filter(|symbol| !symbol.is_empty())
}

fn is_cancel_status(status: &str) -> bool {
    matches!(
        status,
        "canceled" | "cancelled" | "expired" | "rejected" | "stopped" | "suspended"
    )
}
