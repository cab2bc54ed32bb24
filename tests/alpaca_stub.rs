use anyhow::Result;
use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::str::FromStr;
use std::sync::{mpsc, Arc, Mutex, Once};
use std::thread;
use std::time::Duration;
use stonks::actions::{apply_action, ActionOutcome, TradeAction};
use stonks::alpaca::{AlpacaClient, AlpacaSettings, AlpacaTrader};
use stonks::config::AppConfig;
use stonks::models::BucketSize;
use stonks::trader::{HistoricalMarketData, Trader};
use stonks::TradingError;

fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

#[derive(Clone)]
struct StubResponses {
    account_json: String,
    position_json: Option<String>,
    bar_pages: Vec<String>,
    calendar_json: String,
}

impl StubResponses {
    fn with_cash(cash: &str) -> Self {
        Self {
            account_json: serde_json::json!({ "cash": cash }).to_string(),
            position_json: None,
            bar_pages: Vec::new(),
            calendar_json: "[]".to_string(),
        }
    }

    fn holding(mut self, qty: &str, avg_entry_price: &str) -> Self {
        self.position_json = Some(
            serde_json::json!({
                "symbol": "AAA",
                "side": "long",
                "qty": qty,
                "avg_entry_price": avg_entry_price,
            })
            .to_string(),
        );
        self
    }
}

#[derive(Debug, Clone)]
struct RecordedRequest {
    method: String,
    path: String,
    query: String,
    body: String,
}

struct AlpacaStub {
    base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    shutdown: mpsc::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl AlpacaStub {
    fn start(responses: StubResponses) -> Result<Self> {
        let mut listener: Option<TcpListener> = None;
        for _ in 0..64 {
            let port = fastrand::u16(40_000..60_000);
            if let Ok(bound) = TcpListener::bind(("127.0.0.1", port)) {
                listener = Some(bound);
                break;
            }
        }
        let listener = match listener {
            Some(listener) => listener,
            None => TcpListener::bind("127.0.0.1:0")?,
        };
        listener.set_nonblocking(true)?;
        let base_url = format!("http://{}", listener.local_addr()?);
        let (shutdown, shutdown_rx) = mpsc::channel();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);

        let handle = thread::spawn(move || loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            match listener.accept() {
                Ok((stream, _)) => {
                    let _ = stream.set_nonblocking(false);
                    let _ = handle_request(stream, &responses, &recorded);
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => thread::sleep(Duration::from_millis(5)),
            }
        });

        Ok(Self {
            base_url,
            requests,
            shutdown,
            handle: Some(handle),
        })
    }

    fn config(&self) -> AppConfig {
        AppConfig {
            alpaca_key: "test-key".to_string(),
            alpaca_secret: "test-secret".to_string(),
            alpaca_trading_url: Some(self.base_url.clone()),
            alpaca_data_url: Some(self.base_url.clone()),
            ..AppConfig::default()
        }
    }

    fn client(&self) -> Result<Arc<AlpacaClient>> {
        let settings = AlpacaSettings::from_config(&self.config())?.with_request_delay(Duration::ZERO);
        Ok(Arc::new(AlpacaClient::new(&settings)?))
    }

    fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn count(&self, method: &str, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.method == method && request.path == path)
            .count()
    }
}

impl Drop for AlpacaStub {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn handle_request(
    mut stream: TcpStream,
    responses: &StubResponses,
    recorded: &Mutex<Vec<RecordedRequest>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line)? == 0 {
        return Ok(());
    }
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return Ok(());
    }
    let method = parts[0].to_string();
    let (path, query) = match parts[1].split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (parts[1].to_string(), String::new()),
    };

    let mut content_length = 0usize;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header)? == 0 || header == "\r\n" {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body)?;

    recorded.lock().unwrap().push(RecordedRequest {
        method: method.clone(),
        path: path.clone(),
        query: query.clone(),
        body: String::from_utf8_lossy(&body).into_owned(),
    });

    match (method.as_str(), path.as_str()) {
        ("GET", "/v2/account") => write_json_response(&mut stream, "200 OK", &responses.account_json),
        ("GET", "/v2/positions/AAA") => match &responses.position_json {
            Some(body) => write_json_response(&mut stream, "200 OK", body),
            None => write_json_response(
                &mut stream,
                "404 Not Found",
                r#"{"code":40410000,"message":"position does not exist"}"#,
            ),
        },
        ("POST", "/v2/orders") => write_json_response(
            &mut stream,
            "200 OK",
            r#"{"id":"order-1","status":"accepted"}"#,
        ),
        ("DELETE", "/v2/orders") => write_json_response(
            &mut stream,
            "207 Multi-Status",
            r#"[{"id":"order-1","status":200},{"id":"order-2","status":200}]"#,
        ),
        ("GET", "/v2/calendar") => {
            write_json_response(&mut stream, "200 OK", &responses.calendar_json)
        }
        ("GET", "/v2/stocks/AAA/bars") => {
            let page = query
                .split('&')
                .find_map(|pair| pair.strip_prefix("page_token=page-"))
                .and_then(|index| index.parse::<usize>().ok())
                .unwrap_or(0);
            match responses.bar_pages.get(page) {
                Some(body) => write_json_response(&mut stream, "200 OK", body),
                None => write_json_response(
                    &mut stream,
                    "200 OK",
                    r#"{"bars":null,"symbol":"AAA","next_page_token":null}"#,
                ),
            }
        }
        _ => write_empty_response(&mut stream, "404 Not Found"),
    }
}

fn write_json_response(stream: &mut TcpStream, status: &str, body: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes())
}

fn write_empty_response(stream: &mut TcpStream, status: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        status
    );
    stream.write_all(response.as_bytes())
}

fn bar_json(minute: u32, close: f64) -> Value {
    serde_json::json!({
        "t": format!("2024-03-04T14:{:02}:00Z", minute),
        "o": close,
        "h": close + 0.05,
        "l": close - 0.05,
        "c": close,
        "v": 1200,
        "n": 12,
        "vw": close,
    })
}

#[test]
fn balance_and_missing_position_read_as_flat() -> Result<()> {
    ensure_test_env();
    let stub = AlpacaStub::start(StubResponses::with_cash("2500.50"))?;
    let trader = AlpacaTrader::new(stub.client()?, "aaa")?;

    assert_eq!(trader.symbol(), "AAA");
    assert_eq!(trader.balance()?, Decimal::new(250050, 2));
    assert_eq!(trader.shares()?, 0);
    assert!(trader.position()?.is_flat());
    Ok(())
}

#[test]
fn open_position_reports_shares_and_average_cost() -> Result<()> {
    ensure_test_env();
    let stub = AlpacaStub::start(StubResponses::with_cash("100").holding("40", "2.5"))?;
    let trader = AlpacaTrader::new(stub.client()?, "AAA")?;

    let position = trader.position()?;
    assert_eq!(position.shares_owned, 40);
    assert_eq!(position.average_cost, Some(Decimal::new(25, 1)));
    Ok(())
}

#[test]
fn buy_submits_a_limit_ioc_order() -> Result<()> {
    ensure_test_env();
    let stub = AlpacaStub::start(StubResponses::with_cash("1000"))?;
    let mut trader = AlpacaTrader::new(stub.client()?, "AAA")?;

    trader.buy(100, Decimal::new(25, 1))?;

    let orders: Vec<RecordedRequest> = stub
        .requests()
        .into_iter()
        .filter(|request| request.method == "POST")
        .collect();
    assert_eq!(orders.len(), 1);
    let body: Value = serde_json::from_str(&orders[0].body)?;
    assert_eq!(body["symbol"], "AAA");
    assert_eq!(body["qty"], "100");
    assert_eq!(body["side"], "buy");
    assert_eq!(body["type"], "limit");
    assert_eq!(body["time_in_force"], "ioc");
    let limit = body["limit_price"].as_str().unwrap_or_default();
    assert_eq!(Decimal::from_str(limit)?, Decimal::new(25, 1));
    let client_order_id = body["client_order_id"].as_str().unwrap_or_default();
    assert!(uuid::Uuid::parse_str(client_order_id).is_ok());
    Ok(())
}

#[test]
fn insufficient_funds_never_reach_the_broker() -> Result<()> {
    ensure_test_env();
    let stub = AlpacaStub::start(StubResponses::with_cash("100"))?;
    let mut trader = AlpacaTrader::new(stub.client()?, "AAA")?;

    match trader.buy(100, Decimal::from(2)) {
        Err(TradingError::InsufficientFunds {
            required,
            available,
        }) => {
            assert_eq!(required, Decimal::from(200));
            assert_eq!(available, Decimal::from(100));
        }
        other => panic!("expected insufficient funds, got {:?}", other),
    }
    assert_eq!(stub.count("POST", "/v2/orders"), 0);
    Ok(())
}

#[test]
fn overselling_never_reaches_the_broker() -> Result<()> {
    ensure_test_env();
    let stub = AlpacaStub::start(StubResponses::with_cash("100").holding("10", "1.0"))?;
    let mut trader = AlpacaTrader::new(stub.client()?, "AAA")?;

    let err = trader.sell(11, Decimal::ONE).unwrap_err();
    assert!(err.is_mistake());
    assert_eq!(stub.count("POST", "/v2/orders"), 0);

    trader.sell(10, Decimal::ONE)?;
    assert_eq!(stub.count("POST", "/v2/orders"), 1);
    Ok(())
}

#[test]
fn live_rejections_surface_as_rejected_actions() -> Result<()> {
    ensure_test_env();
    let stub = AlpacaStub::start(StubResponses::with_cash("5"))?;
    let mut trader = AlpacaTrader::new(stub.client()?, "AAA")?;

    match apply_action(&mut trader, TradeAction::SellHalf, Decimal::ONE)? {
        ActionOutcome::Rejected(TradingError::InsufficientShares { requested, owned }) => {
            assert_eq!((requested, owned), (1, 0));
        }
        other => panic!("expected a rejected sell, got {:?}", other),
    }
    let outcome = apply_action(&mut trader, TradeAction::BuyAll, Decimal::from(10))?;
    assert!(outcome.is_rejected());
    assert_eq!(stub.count("POST", "/v2/orders"), 0);
    Ok(())
}

#[test]
fn cancel_all_deletes_open_orders() -> Result<()> {
    ensure_test_env();
    let stub = AlpacaStub::start(StubResponses::with_cash("100"))?;
    let mut trader = AlpacaTrader::new(stub.client()?, "AAA")?;

    trader.cancel_all()?;
    trader.cancel_all()?;
    assert_eq!(stub.count("DELETE", "/v2/orders"), 2);
    Ok(())
}

#[test]
fn bars_follow_page_tokens_and_stay_half_open() -> Result<()> {
    ensure_test_env();
    let mut responses = StubResponses::with_cash("100");
    responses.bar_pages = vec![
        serde_json::json!({
            "bars": [bar_json(30, 1.0), bar_json(31, 1.1)],
            "symbol": "AAA",
            "next_page_token": "page-1",
        })
        .to_string(),
        serde_json::json!({
            "bars": [bar_json(32, 1.2), bar_json(33, 1.3)],
            "symbol": "AAA",
            "next_page_token": null,
        })
        .to_string(),
    ];
    let stub = AlpacaStub::start(responses)?;
    let client = stub.client()?;

    let start = Utc.with_ymd_and_hms(2024, 3, 4, 14, 30, 0).unwrap();
    let bars = client.historical_bars("AAA", start, ChronoDuration::minutes(3), BucketSize::Minute)?;
    let closes: Vec<f64> = bars.iter().map(|bar| bar.close).collect();
    assert_eq!(closes, vec![1.0, 1.1, 1.2]);
    assert!(bars.iter().all(|bar| bar.symbol == "AAA" && bar.volume == 1200));

    let bar_requests: Vec<RecordedRequest> = stub
        .requests()
        .into_iter()
        .filter(|request| request.path == "/v2/stocks/AAA/bars")
        .collect();
    assert_eq!(bar_requests.len(), 2);
    assert!(bar_requests[0].query.contains("timeframe=1Min"));
    assert!(bar_requests[1].query.contains("page_token=page-1"));
    Ok(())
}

#[test]
fn empty_bar_range_is_no_data() -> Result<()> {
    ensure_test_env();
    let stub = AlpacaStub::start(StubResponses::with_cash("100"))?;
    let client = stub.client()?;

    let start = Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap();
    let result = client.historical_bars("AAA", start, ChronoDuration::days(1), BucketSize::Minute);
    assert!(matches!(result, Err(TradingError::NoData { .. })));
    Ok(())
}

#[test]
fn calendar_decides_market_days() -> Result<()> {
    ensure_test_env();
    let mut responses = StubResponses::with_cash("100");
    responses.calendar_json =
        r#"[{"date":"2024-03-04","open":"09:30","close":"16:00"}]"#.to_string();
    let stub = AlpacaStub::start(responses)?;
    let client = stub.client()?;

    assert!(client.was_market_open(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap())?);
    assert!(!client.was_market_open(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap())?);
    Ok(())
}
