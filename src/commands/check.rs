use crate::commands::market_data_snapshot::load_market_data;
use crate::config::AppConfig;
use crate::symbols::SymbolData;
use crate::ticker::TickerFetcher;
use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use std::path::Path;
use std::sync::Arc;

/// Prints each filter's verdict for one symbol, then the combined decision.
pub fn run(
    config: &AppConfig,
    market_data_file: &Path,
    symbol: &str,
    day: Option<NaiveDate>,
) -> Result<()> {
    let store = Arc::new(load_market_data(market_data_file)?);
    let symbol = symbol.trim().to_uppercase();
    let float_shares = store
        .float_shares(&symbol)?
        .ok_or_else(|| anyhow!("No float on record for {}", symbol))?;

    let data: Arc<dyn SymbolData> = store;
    let filters = config.screener.build_filters(Arc::clone(&data));
    for filter in &filters {
        let verdict = if filter.passes(&symbol, float_shares, day) {
            "pass"
        } else {
            "fail"
        };
        println!("{:<40} {}", filter.name(), verdict);
    }

    let fetcher = config.screener.build_fetcher(data);
    let passed = fetcher.check_filters(&symbol, float_shares, day);
    println!(
        "{} (float {}): {}",
        symbol,
        float_shares,
        if passed { "eligible" } else { "rejected" }
    );
    Ok(())
}
