pub mod approval;
pub mod commands;
pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod indicators;
pub mod learning;
pub mod market_data;
pub mod models;
pub mod performance;
pub mod portfolio;
pub mod providers;
pub mod retry;
pub mod runner;
pub mod signals;
pub mod store;
pub mod strategy_utils;
pub mod trading_rules;
