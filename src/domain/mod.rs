//! Core domain types and logic.

pub mod snapshot;
pub mod simulator;
pub mod rolling;
pub mod features;
pub mod forecast;
pub mod position;
pub mod portfolio;
pub mod execution;
pub mod paper;
pub mod risk;
pub mod strategy;
pub mod pipeline;
pub mod metrics;
pub mod backtest;
pub mod config_validation;
pub mod error;
