use crate::alpaca::{AlpacaClient, AlpacaSettings, AlpacaTrader};
use crate::config::AppConfig;
use crate::trader::Trader;
use anyhow::Result;
use log::info;
use std::sync::Arc;

pub fn run(config: &AppConfig, symbol: &str) -> Result<()> {
    let settings = AlpacaSettings::from_config(config)?;
    info!(
        "Querying {} account at {}",
        if config.paper { "paper" } else { "live" },
        settings.trading_url
    );
    let client = Arc::new(AlpacaClient::new(&settings)?);
    let trader = AlpacaTrader::new(client, symbol)?;

    let balance = trader.balance()?;
    let position = trader.position()?;
    println!("Cash balance: ${}", balance);
    match position.average_cost {
        Some(cost) if !position.is_flat() => println!(
            "{}: {} shares at an average cost of ${}",
            trader.symbol(),
            position.shares_owned,
            cost
        ),
        _ => println!("{}: no open position", trader.symbol()),
    }
    Ok(())
}
