pub mod analytics;
pub mod config;
pub mod logging;
pub mod market_data;

pub use analytics::{EngineError, QuantumEngine};
