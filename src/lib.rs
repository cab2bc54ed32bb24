pub mod actions;
pub mod alpaca;
pub mod candle_utils;
pub mod commands;
pub mod config;
pub mod error;
pub mod filter;
pub mod models;
pub mod screener;
pub mod simulated;
pub mod simulation;
pub mod store;
pub mod symbols;
pub mod ticker;
pub mod trader;

pub use error::{TradingError, TradingResult};
