use crate::error::TradingResult;
use crate::models::Ticker;
use crate::ticker::TickerFetcher;
use chrono::NaiveDate;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Polls a fetcher on an interval and emits every newly passing ticker once.
pub struct Screener {
    fetcher: Arc<dyn TickerFetcher>,
    interval: Duration,
    blacklist: HashSet<String>,
}

/// Handle to a screener running on its own thread.
pub struct ScreenerHandle {
    pub tickers: Receiver<Ticker>,
    shutdown: Sender<()>,
    worker: JoinHandle<TradingResult<usize>>,
}

impl ScreenerHandle {
    /// Signals the loop to stop and returns how many tickers it emitted.
    pub fn stop(self) -> TradingResult<usize> {
        let _ = self.shutdown.send(());
        match self.worker.join() {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("Screener thread panicked").into()),
        }
    }
}

impl Screener {
    pub fn new(fetcher: Arc<dyn TickerFetcher>, interval: Duration, blacklist: HashSet<String>) -> Self {
        Self {
            fetcher,
            interval,
            blacklist,
        }
    }

    /// Runs until `shutdown` yields a message or disconnects, or until the
    /// consumer of `output` goes away. Failed passes are logged and retried
    /// on the next tick.
    pub fn run(&self, output: &Sender<Ticker>, shutdown: &Receiver<()>) -> TradingResult<usize> {
        let mut emitted: HashSet<String> = HashSet::new();
        loop {
            let pass_started = Instant::now();
            info!("Starting screener pass");
            match self.fetcher.tickers(&self.blacklist) {
                Ok(tickers) => {
                    for ticker in tickers {
                        if emitted.contains(&ticker.symbol) {
                            continue;
                        }
                        info!("Found screened stock: {}", ticker);
                        let symbol = ticker.symbol.clone();
                        if output.send(ticker).is_err() {
                            info!("Screener output closed, stopping");
                            return Ok(emitted.len());
                        }
                        emitted.insert(symbol);
                    }
                }
                Err(err) => warn!("Screener pass failed: {}", err),
            }

            let wait = self.interval.saturating_sub(pass_started.elapsed());
            match shutdown.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    info!("Screener stopped after emitting {} tickers", emitted.len());
                    return Ok(emitted.len());
                }
            }
        }
    }

    pub fn spawn(self) -> ScreenerHandle {
        let (ticker_tx, ticker_rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let worker = thread::spawn(move || self.run(&ticker_tx, &shutdown_rx));
        ScreenerHandle {
            tickers: ticker_rx,
            shutdown: shutdown_tx,
            worker,
        }
    }

    /// One-shot historical screen for `day`.
    pub fn hscreen(&self, day: NaiveDate) -> TradingResult<Vec<String>> {
        Ok(self
            .fetcher
            .htickers(day, &self.blacklist)?
            .into_iter()
            .map(|ticker| ticker.symbol)
            .collect())
    }
}
