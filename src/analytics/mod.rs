pub mod allocator;
pub mod constants;
pub mod covariance;
pub mod engine;
pub mod error;
pub mod returns;
pub mod scenario;
pub mod summary;
pub mod types;
pub mod volatility;

pub use allocator::optimize_portfolio;
pub use engine::{AnalysisError, QuantumEngine};
pub use error::{EngineError, Result};
pub use returns::estimate_return_model;
pub use scenario::{ScenarioSimulator, simulate, simulate_batch, simulate_paths};
pub use summary::summarize_asset;
pub use types::*;
pub use volatility::forecast_volatility;
