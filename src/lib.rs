//! Rebuilds XGBoost tree dumps into exact in-memory ensembles, evaluates
//! them and emits equivalent MQL5 or Rust evaluator source.

pub mod codegen;
pub mod config;
pub mod ml;
pub mod types;
