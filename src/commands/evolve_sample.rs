use crate::commands::market_data_snapshot::load_market_data;
use crate::config::AppConfig;
use crate::simulation::{fitness_score, run_days, sample_days, DipBuyer};
use anyhow::{anyhow, Result};
use log::info;
use serde_json::json;
use std::path::Path;

pub fn run(config: &AppConfig, market_data_file: &Path, days: usize, seed: u64) -> Result<()> {
    let store = load_market_data(market_data_file)?;
    let sessions = sample_days(&store, days, seed);
    if sessions.is_empty() {
        return Err(anyhow!(
            "Snapshot {} has no replayable sessions",
            market_data_file.display()
        ));
    }
    info!("Replaying {} sampled sessions (seed {})", sessions.len(), seed);

    let mut evaluator = DipBuyer::default();
    let results = run_days(&store, &sessions, &config.simulation, &mut evaluator)?;
    let fitness = fitness_score(&results);
    info!("Sample fitness {:.2}", fitness);

    let sampled: Vec<String> = sessions
        .iter()
        .map(|(symbol, day)| format!("{} {}", symbol, day))
        .collect();
    let report = json!({
        "seed": seed,
        "sessions": sampled,
        "results": results,
        "fitness": fitness,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
