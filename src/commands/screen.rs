use crate::commands::market_data_snapshot::load_market_data;
use crate::config::AppConfig;
use crate::screener::Screener;
use crate::symbols::{CachedSymbolData, SymbolData};
use crate::ticker::TickerFetcher;
use anyhow::Result;
use chrono::NaiveDate;
use log::info;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub fn run(
    config: &AppConfig,
    market_data_file: &Path,
    day: Option<NaiveDate>,
    watch: bool,
) -> Result<()> {
    let store = Arc::new(load_market_data(market_data_file)?);
    let data: Arc<dyn SymbolData> = Arc::new(CachedSymbolData::new(store));
    let fetcher = config.screener.build_fetcher(data).with_progress(!watch);
    let blacklist = config.screener.load_blacklist()?;
    info!("Screening with filters: {}", fetcher.filter_names().join(", "));

    if watch {
        let interval = Duration::from_secs(config.screener.interval_secs);
        info!("Watching for new tickers every {}s, Ctrl-C to stop", interval.as_secs());
        let handle = Screener::new(Arc::new(fetcher), interval, blacklist).spawn();
        for ticker in handle.tickers.iter() {
            println!("{}", ticker);
        }
        let emitted = handle.stop()?;
        info!("Screener emitted {} tickers", emitted);
        return Ok(());
    }

    let tickers = match day {
        Some(day) => fetcher.htickers(day, &blacklist)?,
        None => fetcher.tickers(&blacklist)?,
    };
    if tickers.is_empty() {
        println!("No tickers passed the screen");
        return Ok(());
    }
    for ticker in &tickers {
        println!("{}", ticker);
    }
    Ok(())
}
