use crate::commands::market_data_snapshot::load_market_data;
use crate::config::AppConfig;
use crate::simulation::{fitness_score, parse_script, run_days, DipBuyer, Evaluator, ScriptedEvaluator};
use anyhow::Result;
use chrono::NaiveDate;
use log::info;
use serde_json::json;
use std::path::Path;

/// How the replayed session decides what to do on each bar.
pub enum Strategy {
    Script(String),
    DipBuyer { dip_ratio: f64, target_ratio: f64 },
}

pub fn run(
    config: &AppConfig,
    market_data_file: &Path,
    symbol: &str,
    day: NaiveDate,
    strategy: Strategy,
) -> Result<()> {
    let store = load_market_data(market_data_file)?;
    let symbol = symbol.trim().to_uppercase();

    let mut evaluator: Box<dyn Evaluator> = match strategy {
        Strategy::Script(raw) => {
            let actions = parse_script(&raw)?;
            info!("Replaying a script of {} actions", actions.len());
            Box::new(ScriptedEvaluator::new(actions))
        }
        Strategy::DipBuyer {
            dip_ratio,
            target_ratio,
        } => Box::new(DipBuyer::new(dip_ratio, target_ratio)),
    };

    let sessions = vec![(symbol.clone(), day)];
    let results = run_days(&store, &sessions, &config.simulation, evaluator.as_mut())?;

    let report = json!({
        "symbol": symbol,
        "day": day,
        "results": results,
        "fitness": fitness_score(&results),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
