use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::PathBuf;
use stonks::commands::{account, check, evolve_sample, import, screen, simulate};
use stonks::config::AppConfig;

#[derive(Parser)]
#[command(name = "stonks")]
#[command(about = "Small-cap day-trading screener, simulator and paper trader")]
struct Cli {
    /// Configuration file (defaults to config.json when present)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Path to the market data snapshot file (overrides storage_location)
    #[arg(long = "data-file", global = true, value_name = "PATH")]
    data_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay one session from the snapshot and print the results as JSON
    Simulate {
        #[arg(long)]
        symbol: String,
        /// Session day (YYYY-MM-DD)
        #[arg(long)]
        day: NaiveDate,
        /// Comma separated action script, e.g. buy_half,hold,sell_all
        #[arg(long, conflicts_with_all = ["dip_ratio", "target"])]
        script: Option<String>,
        /// Drop below the session high that triggers a buy (ratio)
        #[arg(long, default_value_t = 0.05)]
        dip_ratio: f64,
        /// Gain over the entry that triggers a sell (ratio)
        #[arg(long, default_value_t = 0.03)]
        target: f64,
    },
    /// Replay randomly sampled sessions with the baseline evaluator
    EvolveSample {
        #[arg(long, default_value_t = 20)]
        days: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Run the configured filter chain over the snapshot
    Screen {
        /// Screen a historical day instead of the latest data
        #[arg(long)]
        day: Option<NaiveDate>,
        /// Keep polling on the configured interval and print each new ticker once
        #[arg(long, conflicts_with = "day")]
        watch: bool,
    },
    /// Print the filter chain decision for one symbol
    Check {
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        day: Option<NaiveDate>,
    },
    /// Convert a JSON market data export into the binary snapshot format
    Import {
        #[arg(short, long, value_name = "PATH")]
        input: PathBuf,
        /// Destination file (defaults to storage_location)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Print the live cash balance and position for a symbol
    Account {
        #[arg(long)]
        symbol: String,
    },
}

fn main() -> Result<()> {
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            eprintln!("Ignoring unreadable .env file: {err}");
        }
    }
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli {
        config,
        data_file,
        command,
    } = Cli::parse();

    info!("Starting stonks. Not financial advice. Most retail traders lose money. Use at your own risk.");

    let config = AppConfig::load(config.as_deref())?;
    if !config.paper && matches!(command, Commands::Account { .. }) {
        warn!("Using the LIVE trading endpoint");
    }
    let market_data_path = data_file.unwrap_or_else(|| config.storage_location.clone());

    match command {
        Commands::Simulate {
            symbol,
            day,
            script,
            dip_ratio,
            target,
        } => {
            let strategy = match script {
                Some(raw) => simulate::Strategy::Script(raw),
                None => simulate::Strategy::DipBuyer {
                    dip_ratio,
                    target_ratio: target,
                },
            };
            simulate::run(&config, &market_data_path, &symbol, day, strategy)?;
        }
        Commands::EvolveSample { days, seed } => {
            evolve_sample::run(&config, &market_data_path, days, seed)?;
        }
        Commands::Screen { day, watch } => {
            screen::run(&config, &market_data_path, day, watch)?;
        }
        Commands::Check { symbol, day } => {
            check::run(&config, &market_data_path, &symbol, day)?;
        }
        Commands::Import { input, output } => {
            import::run(&input, &output.unwrap_or(market_data_path))?;
        }
        Commands::Account { symbol } => {
            account::run(&config, &symbol)?;
        }
    }

    Ok(())
}
