pub mod account;
pub mod check;
pub mod evolve_sample;
pub mod import;
pub mod market_data_snapshot;
pub mod screen;
pub mod simulate;
